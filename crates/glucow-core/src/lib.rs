//! Sync engine for continuous glucose monitoring.
//!
//! This crate periodically fetches the latest glucose measurement from
//! LibreLinkUp, derives the clinical state a display needs and hands new
//! readings to the history, health-export and notification collaborators.
//!
//! # Features
//!
//! - **Scheduled sync**: fetch on start, then on every wall-clock minute
//! - **Trend arrows**: direction and delta against the previous reading
//! - **Range classification**: five clinical bands with alert messages
//! - **Sensor lifecycle**: warm-up grace period, remaining life, expiry
//! - **Unit conversion**: mg/dL storage, mg/dL or mmol/L display
//! - **Injectable collaborators**: source, history, sinks and clock are traits
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`units`] | mg/dL ↔ mmol/L conversion and formatting |
//! | [`trend`] | Trend arrow and delta |
//! | [`ranges`] | Band classification and messages |
//! | [`sensor`] | Grace period and expiry state machine |
//! | [`scheduler`] | Fetch and tick loops, published snapshot |
//! | [`librelinkup`] | HTTP client for the LibreLinkUp API |
//! | [`mock`] | Test doubles for every collaborator |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use glucow_core::clock::SystemClock;
//! use glucow_core::librelinkup::{LibreLinkUpClient, LibreLinkUpConfig};
//! use glucow_core::mock::{MemoryHistory, StaticCredentials};
//! use glucow_core::scheduler::{Collaborators, SyncScheduler, SyncSettings};
//! use glucow_core::sinks::{NullHealthSink, NullNotifier};
//! use glucow_core::source::Credentials;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = LibreLinkUpClient::new(LibreLinkUpConfig::default())?;
//!     let credentials = Credentials::new("token", "user-id", "account-hash").unwrap();
//!     let (_settings_tx, settings_rx) = watch::channel(SyncSettings::default());
//!
//!     let scheduler = SyncScheduler::new(
//!         Collaborators {
//!             source: Arc::new(client),
//!             history: Arc::new(MemoryHistory::new()),
//!             credentials: Arc::new(StaticCredentials::new(credentials)),
//!             health: Arc::new(NullHealthSink),
//!             notifier: Arc::new(NullNotifier),
//!             clock: Arc::new(SystemClock),
//!         },
//!         settings_rx,
//!     );
//!
//!     scheduler.fetch_once().await;
//!     if let Some(latest) = scheduler.snapshot().latest {
//!         println!("{} {} {}", latest.display_value, latest.unit, latest.arrow);
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod error;
pub mod events;
pub mod librelinkup;
pub mod mock;
pub mod ranges;
pub mod scheduler;
pub mod sensor;
pub mod sinks;
pub mod source;
pub mod trend;
pub mod units;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, SyncEvent};
pub use librelinkup::{LibreLinkUpClient, LibreLinkUpConfig};
pub use ranges::{Classification, RangeClassifier, Severity};
pub use scheduler::{
    Collaborators, FetchOutcome, LatestReading, SyncScheduler, SyncSettings, SyncSnapshot,
};
pub use sensor::{SensorLifecycle, SensorMetadata, SensorPhase, SensorTransition};
pub use sinks::{HealthSink, NotificationSink, NullHealthSink, NullNotifier, ReadingSink};
pub use source::{Connection, CredentialProvider, Credentials, GlucoseSource};
pub use trend::{TrendDelta, compute_delta};
pub use units::UnitSetting;

// Re-export the data model
pub use glucow_types::{
    Band, BandRange, ClinicalBands, DisplayUnit, Reading, SensorKind, SensorState, Trend,
};
