//! Glucose unit conversion.
//!
//! Readings and band bounds are kept in mg/dL. Everything in this module is a
//! pure function of its arguments; the display unit is always passed in.
//! [`UnitSetting`] is the one stateful piece, meant for the boundary that has
//! to react live when the user switches units.
//!
//! ```
//! use glucow_core::units::{to_canonical, to_display};
//! use glucow_types::DisplayUnit;
//!
//! assert_eq!(to_display(DisplayUnit::MmolPerL, 90.0), 5.0);
//! assert_eq!(to_canonical(DisplayUnit::MmolPerL, 5.0), 90.0);
//! assert_eq!(to_display(DisplayUnit::MgPerDl, 90.0), 90.0);
//! ```

use glucow_types::{ClinicalBands, DisplayUnit};
use tokio::sync::watch;

pub use glucow_types::MGDL_PER_MMOL;

/// Convert a canonical mg/dL value to the display unit.
#[must_use]
pub fn to_display(unit: DisplayUnit, mgdl: f64) -> f64 {
    unit.display_value(mgdl)
}

/// Convert a value in the display unit back to mg/dL.
#[must_use]
pub fn to_canonical(unit: DisplayUnit, value: f64) -> f64 {
    unit.canonical_value(value)
}

/// Round a display-unit value to the precision it is shown with.
#[must_use]
pub fn round_for_display(unit: DisplayUnit, value: f64) -> f64 {
    let scale = 10f64.powi(unit.decimals() as i32);
    (value * scale).round() / scale
}

/// Format a canonical value for display ("5.0" or "90").
#[must_use]
pub fn format_value(unit: DisplayUnit, mgdl: f64) -> String {
    format!("{:.*}", unit.decimals(), to_display(unit, mgdl))
}

/// Format a signed mg/dL delta in the display unit ("+1.7", "-5.0").
#[must_use]
pub fn format_delta(unit: DisplayUnit, delta_mgdl: f64) -> String {
    format!("{:+.1}", to_display(unit, delta_mgdl))
}

/// Convert canonical bands to the display unit, rounded to display precision.
#[must_use]
pub fn bands_for_display(unit: DisplayUnit, bands: &ClinicalBands) -> ClinicalBands {
    bands.map(|v| round_for_display(unit, to_display(unit, v)))
}

/// Convert bands entered in the display unit to canonical mg/dL.
#[must_use]
pub fn bands_from_display(unit: DisplayUnit, bands: &ClinicalBands) -> ClinicalBands {
    bands.map(|v| to_canonical(unit, v))
}

/// Live display-unit setting with change notification.
///
/// Setting the same unit again does not wake subscribers.
#[derive(Debug)]
pub struct UnitSetting {
    tx: watch::Sender<DisplayUnit>,
}

impl UnitSetting {
    pub fn new(unit: DisplayUnit) -> Self {
        let (tx, _) = watch::channel(unit);
        Self { tx }
    }

    /// Current unit.
    pub fn get(&self) -> DisplayUnit {
        *self.tx.borrow()
    }

    /// Set the unit. Returns `true` if it changed.
    pub fn set(&self, unit: DisplayUnit) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == unit {
                false
            } else {
                *current = unit;
                true
            }
        })
    }

    /// Switch to the other unit and return it.
    pub fn toggle(&self) -> DisplayUnit {
        let next = self.get().toggled();
        self.set(next);
        next
    }

    /// Receive change notifications.
    pub fn subscribe(&self) -> watch::Receiver<DisplayUnit> {
        self.tx.subscribe()
    }
}

impl Default for UnitSetting {
    fn default() -> Self {
        Self::new(DisplayUnit::default())
    }
}
