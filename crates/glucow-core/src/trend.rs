//! Trend arrow and delta between consecutive readings.
//!
//! Thresholds are in mg/dL regardless of the display unit. A gap longer than
//! [`STALE_GAP`] means a sync was missed, so no trend is reported.

use glucow_types::{Reading, Trend};
use time::Duration;

/// Largest gap between two readings that still yields a trend.
pub const STALE_GAP: Duration = Duration::minutes(24);

/// Changes smaller than this (mg/dL) count as stable.
pub const STABLE_EPSILON_MGDL: f64 = 0.1;

/// Changes larger than this (mg/dL) count as sharp.
pub const SHARP_CHANGE_MGDL: f64 = 5.0;

/// Trend and signed change against the previous reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct TrendDelta {
    pub trend: Trend,
    pub delta_mgdl: f64,
}

impl TrendDelta {
    /// The "no usable previous reading" result.
    pub const UNKNOWN: TrendDelta = TrendDelta {
        trend: Trend::Unknown,
        delta_mgdl: 0.0,
    };
}

/// Compute the trend from `previous` to `current`.
///
/// ```
/// use glucow_core::trend::compute_delta;
/// use glucow_types::{Reading, Trend};
/// use time::macros::datetime;
///
/// let prev = Reading::new(datetime!(2025-01-05 10:00:00 UTC), 100.0);
/// let cur = Reading::new(datetime!(2025-01-05 10:05:00 UTC), 130.0);
/// let delta = compute_delta(Some(&prev), &cur);
/// assert_eq!(delta.trend, Trend::SharpUp);
/// assert_eq!(delta.delta_mgdl, 30.0);
/// ```
#[must_use]
pub fn compute_delta(previous: Option<&Reading>, current: &Reading) -> TrendDelta {
    let Some(previous) = previous else {
        return TrendDelta::UNKNOWN;
    };

    let elapsed = current.timestamp - previous.timestamp;
    if elapsed > STALE_GAP {
        return TrendDelta::UNKNOWN;
    }

    let delta_mgdl = current.value_mgdl - previous.value_mgdl;
    TrendDelta {
        trend: classify_delta(delta_mgdl),
        delta_mgdl,
    }
}

/// Classify a signed mg/dL change.
#[must_use]
pub fn classify_delta(delta_mgdl: f64) -> Trend {
    if delta_mgdl.abs() < STABLE_EPSILON_MGDL {
        Trend::Stable
    } else if delta_mgdl > SHARP_CHANGE_MGDL {
        Trend::SharpUp
    } else if delta_mgdl > 0.0 {
        Trend::Up
    } else if delta_mgdl < -SHARP_CHANGE_MGDL {
        Trend::SharpDown
    } else if delta_mgdl < 0.0 {
        Trend::Down
    } else {
        Trend::Stable
    }
}
