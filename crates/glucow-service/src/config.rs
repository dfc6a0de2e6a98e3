//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glucow_core::{LibreLinkUpConfig, SyncSettings};
use glucow_types::{BandRange, ClinicalBands, DisplayUnit};
use serde::{Deserialize, Serialize};
use time::UtcOffset;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// LibreLinkUp client settings.
    pub source: SourceConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Clinical bands in mg/dL.
    pub ranges: RangesConfig,
    /// Per-reading notifications.
    pub notifications: NotificationsConfig,
    /// Health-record export.
    pub health_export: HealthExportConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// ```
    /// use glucow_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.source.validate());
        errors.extend(self.ranges.validate());
        errors.extend(self.health_export.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Settings the scheduler evaluates each fetch with.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            unit: self.display.unit,
            bands: self.ranges.bands(),
            show_text_reading: self.display.show_text_reading,
            health_export: self.health_export.enabled,
            notifications: self.notifications.enabled,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8086").
    pub bind: String,
    /// Serve the REST API.
    pub api_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8086".to_string(),
            api_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            ));
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the history and preferences files.
    pub data_dir: PathBuf,
    /// Save the history after every new reading.
    pub autosave: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: glucow_store::default_data_dir(),
            autosave: true,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "data directory cannot be empty",
            ));
        }
        errors
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(glucow_store::HISTORY_FILE)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(glucow_store::PREFERENCES_FILE)
    }
}

/// Minimum request timeout in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;
/// Maximum request timeout in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 120;

/// LibreLinkUp client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Regional API host.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Offset, in minutes, of the local time the API reports timestamps in.
    ///
    /// Only used when a measurement lacks its UTC `FactoryTimestamp`. The
    /// offset is fixed, so it does not follow daylight saving changes.
    pub utc_offset_minutes: i32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: glucow_core::librelinkup::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            utc_offset_minutes: 0,
        }
    }
}

impl SourceConfig {
    /// Validate source configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !is_http_url(&self.base_url) {
            errors.push(ValidationError::new(
                "source.base_url",
                format!("'{}' must start with http:// or https://", self.base_url),
            ));
        }

        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            errors.push(ValidationError::new(
                "source.timeout_secs",
                format!(
                    "timeout {} is out of range ({}-{} seconds)",
                    self.timeout_secs, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
                ),
            ));
        }

        if self.utc_offset().is_none() {
            errors.push(ValidationError::new(
                "source.utc_offset_minutes",
                format!("{} is not a valid UTC offset", self.utc_offset_minutes),
            ));
        }

        errors
    }

    /// The configured offset, if it is representable.
    pub fn utc_offset(&self) -> Option<UtcOffset> {
        let seconds = self.utc_offset_minutes.checked_mul(60)?;
        UtcOffset::from_whole_seconds(seconds).ok()
    }

    /// Client configuration. Invalid offsets fall back to UTC.
    pub fn client_config(&self) -> LibreLinkUpConfig {
        LibreLinkUpConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            utc_offset: self.utc_offset().unwrap_or(UtcOffset::UTC),
        }
    }
}

/// Display configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Unit values are shown in.
    pub unit: DisplayUnit,
    /// Publish the range message alongside the value.
    pub show_text_reading: bool,
    /// Serve chart points from `/api/readings`.
    pub enable_graph: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            unit: DisplayUnit::default(),
            show_text_reading: true,
            enable_graph: true,
        }
    }
}

/// Clinical band bounds in mg/dL. Omitted bands keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangesConfig {
    pub very_low: BandRange,
    pub low: BandRange,
    pub in_range: BandRange,
    pub high: BandRange,
    pub very_high: BandRange,
}

impl Default for RangesConfig {
    fn default() -> Self {
        let bands = ClinicalBands::default();
        Self {
            very_low: bands.very_low,
            low: bands.low,
            in_range: bands.in_range,
            high: bands.high,
            very_high: bands.very_high,
        }
    }
}

impl RangesConfig {
    pub fn bands(&self) -> ClinicalBands {
        ClinicalBands {
            very_low: self.very_low,
            low: self.low,
            in_range: self.in_range,
            high: self.high,
            very_high: self.very_high,
        }
    }

    /// Validate band ordering.
    pub fn validate(&self) -> Vec<ValidationError> {
        match self.bands().validate() {
            Ok(()) => Vec::new(),
            Err(e) => vec![ValidationError::new("ranges", e.to_string())],
        }
    }
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Notify on every new reading.
    pub enabled: bool,
    /// Use desktop notifications instead of the log
    /// (requires the `notifications` feature).
    pub desktop: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop: false,
        }
    }
}

/// Health export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthExportConfig {
    /// Export every new reading.
    pub enabled: bool,
    /// POST each record to this URL. Without it records go to the log.
    pub webhook_url: Option<String>,
}

impl Default for HealthExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
        }
    }
}

impl HealthExportConfig {
    /// Validate health export configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Some(url) = &self.webhook_url
            && !is_http_url(url)
        {
            errors.push(ValidationError::new(
                "health_export.webhook_url",
                format!("'{}' must start with http:// or https://", url),
            ));
        }
        errors
    }
}

fn is_http_url(url: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `source.timeout_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("glucow")
        .join("service.toml")
}
