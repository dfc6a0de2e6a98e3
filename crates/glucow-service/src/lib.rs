//! Background glucose sync daemon with a local HTTP API.
//!
//! This crate wires the sync engine to real collaborators:
//! - Fetches the latest LibreLinkUp measurement every minute
//! - Keeps the reading history on disk, saving after each new reading
//! - Sends per-reading notifications and health-record exports
//! - Exposes the published state over a REST API
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Latest reading, sensor state and sync counters
//! - `GET /api/readings?since=<rfc3339>&limit=<n>` - Chart points in the display unit
//! - `GET /api/settings` - Display unit, bands and toggles
//! - `PUT /api/settings/unit` - Switch the display unit (`{"unit": "mg/dL"}`)
//! - `POST /api/history/save` - Persist the history immediately
//! - `POST /api/sync/now` - Fetch now instead of waiting for the next minute
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/glucow/service.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8086"
//!
//! [storage]
//! data_dir = "~/.local/share/glucow"
//! autosave = true
//!
//! [source]
//! base_url = "https://api.libreview.io"
//! utc_offset_minutes = 60
//!
//! [display]
//! unit = "mmol/L"
//!
//! [ranges]
//! in_range = { lo = 90.0, hi = 153.0 }
//!
//! [health_export]
//! enabled = true
//! webhook_url = "http://localhost:9000/records"
//! ```
//!
//! # Credentials
//!
//! The session token, user id and account id hash are read from
//! `preferences.json` in the data directory. Store them with
//! `glucow-service credentials`.

pub mod api;
pub mod config;
pub mod sinks;
pub mod state;

pub use config::{
    Config, ConfigError, DisplayConfig, HealthExportConfig, NotificationsConfig, RangesConfig,
    ServerConfig, SourceConfig, StorageConfig,
};
pub use sinks::{
    HistorySink, LogHealthExporter, LogNotifier, PreferenceCredentials, WebhookHealthExporter,
};
pub use state::AppState;

#[cfg(feature = "notifications")]
pub use sinks::DesktopNotifier;
