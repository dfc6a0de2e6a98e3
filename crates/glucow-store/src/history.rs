//! Durable, ordered history of glucose readings.

use std::path::{Path, PathBuf};

use glucow_types::{DisplayUnit, Reading};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::fs::{read_optional, write_atomic};
use crate::prefs::PreferenceStore;

/// Outcome of a display-unit change as seen by the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The unit did not change.
    Unchanged,
    /// The unit changed. Stored values are mg/dL and were left as they are.
    CanonicalNoOp,
}

/// Readings in ascending timestamp order, backed by a JSON array file.
///
/// Values are canonical mg/dL. Timestamps are unique: the remote keeps
/// returning the same latest measurement until a new one arrives, so a repeat
/// is dropped rather than stored twice.
///
/// Appends only touch memory; call [`save`](Self::save) to persist.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    prefs: PreferenceStore,
    readings: Vec<Reading>,
}

impl HistoryStore {
    /// Open the history file and load it.
    ///
    /// A missing or malformed file gives an empty history.
    pub fn open<P: AsRef<Path>>(path: P, prefs: PreferenceStore) -> Self {
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            prefs,
            readings: Vec::new(),
        };
        store.load();
        store
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The preferences this store records the unit in.
    pub fn prefs(&self) -> &PreferenceStore {
        &self.prefs
    }

    /// Reload from disk, falling back to an empty history on any error.
    pub fn load(&mut self) -> &[Reading] {
        if let Err(e) = self.try_load() {
            warn!(
                "Could not load history from {}, starting empty: {}",
                self.path.display(),
                e
            );
            self.readings.clear();
        }
        &self.readings
    }

    /// Reload from disk. Returns the number of readings loaded.
    ///
    /// On error the in-memory history is left untouched.
    pub fn try_load(&mut self) -> Result<usize> {
        let Some(bytes) = read_optional(&self.path)? else {
            info!("No history at {}, starting empty", self.path.display());
            self.readings.clear();
            return Ok(0);
        };

        let mut readings: Vec<Reading> = serde_json::from_slice(&bytes)?;
        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        readings.dedup_by(|a, b| a.timestamp == b.timestamp);

        debug!(
            "Loaded {} readings from {}",
            readings.len(),
            self.path.display()
        );
        self.readings = readings;
        Ok(self.readings.len())
    }

    /// Insert a reading at its sorted position.
    ///
    /// Returns `false` if a reading with the same timestamp is already stored.
    pub fn append(&mut self, reading: Reading) -> bool {
        match self
            .readings
            .binary_search_by(|r| r.timestamp.cmp(&reading.timestamp))
        {
            Ok(_) => false,
            Err(index) => {
                self.readings.insert(index, reading);
                true
            }
        }
    }

    /// Persist the history and the active unit, logging any failure.
    pub fn save(&self, unit: DisplayUnit) -> bool {
        match self.try_save(unit) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save history to {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Persist the history and record `unit` as the unit at save time.
    pub fn try_save(&self, unit: DisplayUnit) -> Result<()> {
        self.prepare_save()?.write(unit).map(|_| ())
    }

    /// Serialize the history now so it can be written without holding the
    /// store, e.g. from a blocking thread.
    pub fn prepare_save(&self) -> Result<PendingSave> {
        Ok(PendingSave {
            path: self.path.clone(),
            prefs: self.prefs.clone(),
            bytes: serde_json::to_vec_pretty(&self.readings)?,
            count: self.readings.len(),
        })
    }

    /// React to a display-unit change.
    ///
    /// Readings are stored in mg/dL, so nothing is rewritten.
    pub fn reconcile_unit_change(
        &self,
        previous: DisplayUnit,
        current: DisplayUnit,
    ) -> Reconciliation {
        if previous == current {
            return Reconciliation::Unchanged;
        }
        info!(
            "Display unit changed from {} to {}; {} stored readings stay in mg/dL",
            previous,
            current,
            self.readings.len()
        );
        Reconciliation::CanonicalNoOp
    }

    /// Unit recorded by the last successful save.
    pub fn saved_unit(&self) -> Option<DisplayUnit> {
        self.prefs.unit()
    }

    /// All readings, oldest first.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// The newest reading.
    pub fn last(&self) -> Option<&Reading> {
        self.readings.last()
    }

    /// The newest reading strictly older than `timestamp`.
    pub fn latest_before(&self, timestamp: OffsetDateTime) -> Option<&Reading> {
        let end = self.readings.partition_point(|r| r.timestamp < timestamp);
        end.checked_sub(1).map(|i| &self.readings[i])
    }

    /// Readings at or after `timestamp`.
    pub fn since(&self, timestamp: OffsetDateTime) -> &[Reading] {
        let start = self.readings.partition_point(|r| r.timestamp < timestamp);
        &self.readings[start..]
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Chart points with values in `unit`, optionally from `since` onwards.
    pub fn display_points(
        &self,
        unit: DisplayUnit,
        since: Option<OffsetDateTime>,
    ) -> Vec<(OffsetDateTime, f64)> {
        let readings = match since {
            Some(since) => self.since(since),
            None => self.readings.as_slice(),
        };
        readings
            .iter()
            .map(|r| (r.timestamp, unit.display_value(r.value_mgdl)))
            .collect()
    }
}

/// A serialized history waiting to be written.
///
/// Writes of the same file must not overlap; callers serialize them.
#[derive(Debug)]
pub struct PendingSave {
    path: PathBuf,
    prefs: PreferenceStore,
    bytes: Vec<u8>,
    count: usize,
}

impl PendingSave {
    /// File the history will be written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the file atomically and record `unit`. Returns the reading count.
    pub fn write(self, unit: DisplayUnit) -> Result<usize> {
        write_atomic(&self.path, &self.bytes)?;
        self.prefs.set_unit(unit)?;
        debug!("Saved {} readings to {}", self.count, self.path.display());
        Ok(self.count)
    }
}
