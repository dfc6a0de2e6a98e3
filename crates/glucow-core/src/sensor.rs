//! Sensor lifecycle: warm-up grace period, active life and expiry.
//!
//! A FreeStyle Libre sensor reports no usable values for the first hour after
//! activation and expires 337 hours after it. [`SensorLifecycle`] tracks the
//! current sensor across fetches and reports phase changes so the scheduler
//! can fetch as soon as the grace period is over.
//!
//! | From | To | Transition |
//! |------|----|------------|
//! | (none) | computed | [`SensorTransition::Started`] |
//! | any | computed, new activation | [`SensorTransition::Replaced`] |
//! | `GracePeriod` | `Active` | [`SensorTransition::GraceEnded`] (once) |
//! | `GracePeriod`/`Active` | `Expired` | [`SensorTransition::Expired`] |
//!
//! `Expired` is terminal until a different activation timestamp is observed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use glucow_types::{SensorKind, SensorState};

/// Warm-up time after activation.
pub const GRACE_PERIOD: Duration = Duration::from_secs(3600);

/// Total sensor life from activation.
pub const SENSOR_LIFESPAN: Duration = Duration::from_secs(337 * 3600);

/// Text shown when no activation timestamp is known.
pub const NO_SENSOR_TEXT: &str = "Sensor info not found (maybe not activated)";

/// Text shown once the sensor is past its lifespan.
pub const EXPIRED_TEXT: &str = "Sensor expired, please activate a new one.";

/// Where a sensor is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorPhase {
    /// No activation timestamp known.
    #[default]
    Unknown,
    /// Within the first hour after activation.
    GracePeriod,
    Active,
    Expired,
}

/// Phase change reported by [`SensorLifecycle::observe`] and [`SensorLifecycle::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorTransition {
    /// First sensor seen.
    Started(SensorPhase),
    /// A different activation timestamp replaced the previous sensor.
    Replaced(SensorPhase),
    /// Grace period over; values are now usable.
    GraceEnded,
    /// Lifespan exceeded.
    Expired,
}

/// Sensor fields as reported by the remote source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorMetadata {
    /// Activation time, unix seconds.
    pub activation_unix: Option<i64>,
    pub serial: Option<String>,
    /// LibreLinkUp product type code.
    pub product_code: Option<i64>,
}

/// Compute the phase of a sensor activated at `activation_unix`.
///
/// ```
/// use glucow_core::sensor::{SensorPhase, phase_at};
///
/// assert_eq!(phase_at(None, 1_000), SensorPhase::Unknown);
/// assert_eq!(phase_at(Some(0), 3_599), SensorPhase::GracePeriod);
/// assert_eq!(phase_at(Some(0), 3_600), SensorPhase::Active);
/// assert_eq!(phase_at(Some(0), 337 * 3600), SensorPhase::Expired);
/// ```
pub fn phase_at(activation_unix: Option<i64>, now_unix: i64) -> SensorPhase {
    let Some(activation) = activation_unix else {
        return SensorPhase::Unknown;
    };
    let elapsed = now_unix.saturating_sub(activation);
    if elapsed < GRACE_PERIOD.as_secs() as i64 {
        SensorPhase::GracePeriod
    } else if elapsed >= SENSOR_LIFESPAN.as_secs() as i64 {
        SensorPhase::Expired
    } else {
        SensorPhase::Active
    }
}

/// Tracks the current sensor across fetches.
#[derive(Debug, Clone, Default)]
pub struct SensorLifecycle {
    state: SensorState,
    phase: SensorPhase,
}

impl SensorLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current sensor state.
    pub fn state(&self) -> &SensorState {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> SensorPhase {
        self.phase
    }

    /// Feed sensor metadata from a fetch.
    pub fn observe(&mut self, metadata: &SensorMetadata, now: OffsetDateTime) -> Option<SensorTransition> {
        let kind = metadata
            .product_code
            .map(SensorKind::from_product_code)
            .unwrap_or_default();

        if metadata.activation_unix.is_some() && metadata.activation_unix != self.state.activation_unix {
            let had_sensor = self.state.activation_unix.is_some();
            self.state = SensorState {
                activation_unix: metadata.activation_unix,
                serial: metadata.serial.clone(),
                kind,
                grace_period_active: false,
            };
            self.set_phase(phase_at(metadata.activation_unix, now.unix_timestamp()));

            return Some(if had_sensor {
                info!(serial = ?self.state.serial, phase = ?self.phase, "Sensor replaced");
                SensorTransition::Replaced(self.phase)
            } else {
                info!(serial = ?self.state.serial, phase = ?self.phase, "Sensor detected");
                SensorTransition::Started(self.phase)
            });
        }

        if metadata.serial.is_some() {
            self.state.serial = metadata.serial.clone();
        }
        if metadata.product_code.is_some() {
            self.state.kind = kind;
        }
        self.advance(now)
    }

    /// Re-evaluate the phase at `now`.
    pub fn advance(&mut self, now: OffsetDateTime) -> Option<SensorTransition> {
        if self.phase == SensorPhase::Expired {
            return None;
        }

        let next = phase_at(self.state.activation_unix, now.unix_timestamp());
        if next == self.phase {
            return None;
        }

        let previous = self.phase;
        self.set_phase(next);
        match (previous, next) {
            (SensorPhase::GracePeriod, SensorPhase::Active) => {
                info!("Sensor grace period ended");
                Some(SensorTransition::GraceEnded)
            }
            (_, SensorPhase::Expired) => {
                info!(serial = ?self.state.serial, "Sensor expired");
                Some(SensorTransition::Expired)
            }
            (from, to) => {
                debug!(?from, ?to, "Sensor phase changed");
                None
            }
        }
    }

    fn set_phase(&mut self, phase: SensorPhase) {
        self.phase = phase;
        self.state.grace_period_active = phase == SensorPhase::GracePeriod;
    }

    /// "Xm Ys" until the grace period ends, `None` outside it.
    pub fn grace_countdown(&self, now: OffsetDateTime) -> Option<String> {
        if self.phase != SensorPhase::GracePeriod {
            return None;
        }
        let activation = self.state.activation_unix?;
        let end = activation.saturating_add(GRACE_PERIOD.as_secs() as i64);
        let remaining = (end - now.unix_timestamp()).max(0);
        Some(format!("{}m {}s", remaining / 60, remaining % 60))
    }

    /// Human readable time left on the sensor.
    pub fn expiry_text(&self, now: OffsetDateTime) -> String {
        expiry_text(self.state.activation_unix, now.unix_timestamp())
    }
}

/// Render the remaining sensor life as "N days, H hours".
pub fn expiry_text(activation_unix: Option<i64>, now_unix: i64) -> String {
    let Some(activation) = activation_unix else {
        return NO_SENSOR_TEXT.to_string();
    };
    let expiry = activation.saturating_add(SENSOR_LIFESPAN.as_secs() as i64);
    let remaining = expiry - now_unix;
    if remaining <= 0 {
        return EXPIRED_TEXT.to_string();
    }
    format!("{} days, {} hours", remaining / 86_400, (remaining % 86_400) / 3600)
}
