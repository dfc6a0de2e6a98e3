//! Clinical range classification and alert messages.
//!
//! A value is matched against the five [`ClinicalBands`] in ascending order;
//! the first closed interval containing it wins. The trend decides between
//! the "going" and plain wording of out-of-range messages.
//!
//! # Example
//!
//! ```
//! use glucow_core::ranges::{RangeClassifier, Severity};
//! use glucow_types::{ClinicalBands, DisplayUnit, Trend};
//!
//! let classifier = RangeClassifier::new(ClinicalBands::default());
//!
//! let result = classifier.classify_reading(60.0, DisplayUnit::MgPerDl, Trend::Down);
//! assert_eq!(result.message, "Glucose going very low ⚠️");
//! assert_eq!(result.severity, Severity::Urgent);
//! assert_eq!(result.severity.colour(), "red");
//! ```

use serde::{Deserialize, Serialize};

use glucow_types::{Band, ClinicalBands, DisplayUnit, Trend};

use crate::units::{bands_for_display, round_for_display, to_display};

/// Message used when no band contains the value.
pub const OUT_OF_RANGE_MESSAGE: &str = "Glucose out of range ⚠️";

/// How urgently a classification should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// In range.
    Normal,
    /// High.
    Warning,
    /// Any low, or very high.
    Urgent,
    /// No band matched (misconfigured or gapped bands).
    Undefined,
}

impl Severity {
    /// Colour name displays use for this severity.
    pub fn colour(&self) -> &'static str {
        match self {
            Severity::Normal => "green",
            Severity::Warning => "yellow",
            Severity::Urgent => "red",
            Severity::Undefined => "blue",
        }
    }

    fn for_band(band: Option<Band>) -> Self {
        match band {
            Some(Band::InRange) => Severity::Normal,
            Some(Band::High) => Severity::Warning,
            Some(Band::VeryLow | Band::Low | Band::VeryHigh) => Severity::Urgent,
            None => Severity::Undefined,
        }
    }
}

/// Result of classifying one value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Matched band, `None` if the value falls outside every band.
    pub band: Option<Band>,
    /// User-facing message.
    pub message: &'static str,
    pub severity: Severity,
}

/// Classify a display-unit value against display-unit bands.
///
/// Both must already be rounded to the same precision, otherwise values in
/// the conversion gap between two bands fall through to the fallback.
pub fn classify(value: f64, bands: &ClinicalBands, trend: Trend) -> Classification {
    let band = bands
        .iter()
        .find(|(_, range)| range.contains(value))
        .map(|(band, _)| band);

    Classification {
        band,
        message: message_for(band, trend),
        severity: Severity::for_band(band),
    }
}

fn message_for(band: Option<Band>, trend: Trend) -> &'static str {
    match band {
        Some(Band::VeryLow) if trend.is_falling() => "Glucose going very low ⚠️",
        Some(Band::VeryLow) => "Glucose very low ⚠️",
        Some(Band::Low) if trend.is_falling() => "Glucose going low ⚠️",
        Some(Band::Low) => "Glucose low ⚠️",
        Some(Band::InRange) => "Glucose in range",
        Some(Band::High) if trend.is_rising() => "Glucose going high ⚠️",
        Some(Band::High) => "Glucose high ⚠️",
        Some(Band::VeryHigh) if trend.is_rising() => "Glucose going very high ⚠️",
        Some(Band::VeryHigh) => "Glucose very high ⚠️",
        None => OUT_OF_RANGE_MESSAGE,
    }
}

/// Classifier holding the user's canonical (mg/dL) bands.
#[derive(Debug, Clone, Default)]
pub struct RangeClassifier {
    bands: ClinicalBands,
}

impl RangeClassifier {
    /// Create a classifier over canonical bands.
    pub fn new(bands: ClinicalBands) -> Self {
        Self { bands }
    }

    /// The canonical bands.
    pub fn bands(&self) -> &ClinicalBands {
        &self.bands
    }

    /// Classify a canonical value as the user sees it in `unit`.
    pub fn classify_reading(&self, value_mgdl: f64, unit: DisplayUnit, trend: Trend) -> Classification {
        classify_reading(value_mgdl, unit, &self.bands, trend)
    }
}

/// Convert `value_mgdl` and `bands` to `unit` at display precision, then classify.
pub fn classify_reading(
    value_mgdl: f64,
    unit: DisplayUnit,
    bands: &ClinicalBands,
    trend: Trend,
) -> Classification {
    let value = round_for_display(unit, to_display(unit, value_mgdl));
    classify(value, &bands_for_display(unit, bands), trend)
}
