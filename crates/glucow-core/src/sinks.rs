//! Collaborator traits the scheduler writes to.
//!
//! | Trait | Receives | Service implementations |
//! |-------|----------|-------------------------|
//! | [`ReadingSink`] | new readings, previous-reading lookups | history store adapter |
//! | [`HealthSink`] | `(value_mgdl, timestamp)` per new reading | log, webhook |
//! | [`NotificationSink`] | title and subtitle per new reading | log, desktop |
//!
//! Sink failures never abort a fetch; the scheduler logs them and moves on.

use async_trait::async_trait;
use time::OffsetDateTime;

use glucow_types::Reading;

use crate::error::Result;

/// Durable history of readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// The latest stored reading strictly older than `timestamp`.
    async fn latest_before(&self, timestamp: OffsetDateTime) -> Option<Reading>;

    /// Append a reading. Returns `false` if a reading with the same timestamp
    /// is already stored.
    async fn append(&self, reading: Reading) -> bool;
}

/// Export target for health records.
#[async_trait]
pub trait HealthSink: Send + Sync {
    async fn record(&self, value_mgdl: f64, at: OffsetDateTime) -> Result<()>;
}

/// User-facing notification channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, title: &str, subtitle: &str) -> Result<()>;
}

/// A health sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHealthSink;

#[async_trait]
impl HealthSink for NullHealthSink {
    async fn record(&self, _value_mgdl: f64, _at: OffsetDateTime) -> Result<()> {
        Ok(())
    }
}

/// A notification sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn notify(&self, _title: &str, _subtitle: &str) -> Result<()> {
        Ok(())
    }
}
