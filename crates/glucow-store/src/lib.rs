//! Local persistence for glucose readings and preferences.
//!
//! Two small JSON files live in the data directory:
//!
//! - `glucose_readings.json`: the reading history, an array of
//!   `{"timestamp": "<RFC 3339>", "value_mgdl": <number>}` records
//! - `preferences.json`: a flat object holding credentials, the display
//!   unit at last save and the cached sensor display text
//!
//! Both are replaced atomically on write.
//!
//! # Example
//!
//! ```no_run
//! use glucow_store::{HistoryStore, PreferenceStore};
//! use glucow_types::DisplayUnit;
//!
//! let dir = glucow_store::default_data_dir();
//! let prefs = PreferenceStore::open(dir.join(glucow_store::PREFERENCES_FILE));
//! let history = HistoryStore::open(dir.join(glucow_store::HISTORY_FILE), prefs);
//!
//! for reading in history.readings().iter().rev().take(5) {
//!     println!("{} {}", reading.timestamp, reading.value_mgdl);
//! }
//! history.try_save(DisplayUnit::MmolPerL)?;
//! # Ok::<(), glucow_store::Error>(())
//! ```

mod error;
mod fs;
mod history;
mod prefs;

pub use error::{Error, Result};
pub use history::{HistoryStore, PendingSave, Reconciliation};
pub use prefs::{PreferenceStore, keys};

/// File name of the reading history inside the data directory.
pub const HISTORY_FILE: &str = "glucose_readings.json";
/// File name of the preferences inside the data directory.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Default data directory following platform conventions.
///
/// - Linux: `~/.local/share/glucow`
/// - macOS: `~/Library/Application Support/glucow`
/// - Windows: `C:\Users\<user>\AppData\Local\glucow`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("glucow")
}
