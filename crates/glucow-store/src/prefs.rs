//! Key/value preferences persisted as a JSON object.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use glucow_types::DisplayUnit;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fs::{read_optional, write_atomic};

/// Preference keys.
pub mod keys {
    /// Display unit recorded at the last history save.
    pub const MEASUREMENT_UNIT: &str = "measurement_unit";
    /// Display unit chosen by the user.
    pub const DISPLAY_UNIT: &str = "display_unit";
    /// LibreLinkUp bearer token.
    pub const AUTH_TOKEN: &str = "auth_token";
    /// LibreLinkUp user id.
    pub const USER_ID: &str = "user_id";
    /// SHA-256 of the user id, sent as `Account-Id`.
    pub const ACCOUNT_ID_HASH: &str = "account_id_hash";
    /// Serial of the last seen sensor.
    pub const SENSOR_SERIAL: &str = "sensor_serial";
    /// Rendered remaining-life text of the last seen sensor.
    pub const SENSOR_EXPIRY_TEXT: &str = "sensor_expiry_text";
}

/// Preferences file.
///
/// Clones share the same in-memory map. Every write is persisted immediately.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    values: Arc<Mutex<Map<String, Value>>>,
}

impl PreferenceStore {
    /// Open the preferences file, starting empty if it is absent or unreadable.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match Self::read(&path) {
            Ok(values) => values,
            Err(e) => {
                warn!("Ignoring preferences at {}: {}", path.display(), e);
                Map::new()
            }
        };
        Self::with_values(path, values)
    }

    /// Open the preferences file, failing if it exists but cannot be parsed.
    pub fn try_open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = Self::read(&path)?;
        Ok(Self::with_values(path, values))
    }

    fn with_values(path: PathBuf, values: Map<String, Value>) -> Self {
        debug!("Preferences at {} ({} keys)", path.display(), values.len());
        Self {
            path,
            values: Arc::new(Mutex::new(values)),
        }
    }

    fn read(path: &Path) -> Result<Map<String, Value>> {
        let Some(bytes) = read_optional(path)? else {
            return Ok(Map::new());
        };
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::InvalidFile {
                path: path.to_path_buf(),
                message: format!("expected a JSON object, found {}", kind(&other)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A string value. Non-string values read as `None`.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.lock()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// A string value, treating the empty string as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get_string(key).filter(|s| !s.is_empty())
    }

    /// Set a string value and persist.
    pub fn set_string(&self, key: &str, value: impl Into<String>) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), Value::String(value.into()));
        })
    }

    /// Remove a key and persist. Returns whether it was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut removed = false;
        self.update(|values| removed = values.remove(key).is_some())?;
        Ok(removed)
    }

    /// The stored display unit, if one was recorded and is recognised.
    pub fn unit(&self) -> Option<DisplayUnit> {
        self.get_string(keys::MEASUREMENT_UNIT)?.parse().ok()
    }

    /// Record the display unit.
    pub fn set_unit(&self, unit: DisplayUnit) -> Result<()> {
        self.set_string(keys::MEASUREMENT_UNIT, unit.label())
    }

    /// The display unit the user chose, overriding the configured default.
    pub fn display_unit(&self) -> Option<DisplayUnit> {
        self.get_string(keys::DISPLAY_UNIT)?.parse().ok()
    }

    pub fn set_display_unit(&self, unit: DisplayUnit) -> Result<()> {
        self.set_string(keys::DISPLAY_UNIT, unit.label())
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        let mut values = self.lock();
        f(&mut values);
        let bytes = serde_json::to_vec_pretty(&*values)?;
        write_atomic(&self.path, &bytes)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
