//! Sync event stream.
//!
//! The scheduler publishes a [`SyncEvent`] for every fetch outcome and sensor
//! transition. Consumers (history persister, API, logging) subscribe through
//! an [`EventDispatcher`]; events sent while nobody listens are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use glucow_types::{DisplayUnit, Reading, Trend};

use crate::sensor::{SensorPhase, SensorTransition};

/// Events emitted by the sync scheduler.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SyncEvent {
    /// Scheduler loops started.
    Started,
    /// Scheduler loops stopped.
    Stopped,
    /// A new reading was appended to the history.
    Reading {
        reading: Reading,
        trend: Trend,
        delta_mgdl: f64,
    },
    /// The source returned a measurement already in the history.
    Duplicate { reading: Reading },
    /// Fetch skipped because no credentials are stored.
    Skipped,
    /// Fetch failed; state left untouched.
    FetchFailed { error: String },
    /// Sensor lifecycle changed.
    Sensor {
        transition: SensorTransition,
        phase: SensorPhase,
    },
    /// The display unit changed.
    UnitChanged { unit: DisplayUnit },
}

/// Sender for sync events.
pub type EventSender = broadcast::Sender<SyncEvent>;

/// Receiver for sync events.
pub type EventReceiver = broadcast::Receiver<SyncEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SyncEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
