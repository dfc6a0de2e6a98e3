//! Core types for glucose monitoring data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Lowest bound any clinical band may be edited to, in mg/dL.
pub const MIN_BAND_MGDL: f64 = 0.0;
/// Highest bound any clinical band may be edited to, in mg/dL (30 mmol/L).
pub const MAX_BAND_MGDL: f64 = 600.0;
/// mg/dL per mmol/L for glucose (molar mass approximation).
pub const MGDL_PER_MMOL: f64 = 18.0;

/// A single timestamped glucose value.
///
/// Values are always stored in mg/dL, whatever unit the user displays, so that
/// toggling the display unit never compounds rounding error in the history.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// When the sensor took the measurement.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Glucose concentration in mg/dL.
    pub value_mgdl: f64,
}

impl Reading {
    /// Create a new reading.
    #[must_use]
    pub fn new(timestamp: OffsetDateTime, value_mgdl: f64) -> Self {
        Self {
            timestamp,
            value_mgdl,
        }
    }
}

/// Unit used to present glucose values to the user.
///
/// Serialized using the conventional labels `"mg/dL"` and `"mmol/L"`.
///
/// ```
/// use glucow_types::DisplayUnit;
///
/// assert_eq!("mg/dL".parse::<DisplayUnit>(), Ok(DisplayUnit::MgPerDl));
/// assert_eq!(DisplayUnit::MmolPerL.to_string(), "mmol/L");
/// assert_eq!(DisplayUnit::MgPerDl.toggled(), DisplayUnit::MmolPerL);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DisplayUnit {
    /// Milligrams per decilitre (canonical storage unit).
    #[cfg_attr(feature = "serde", serde(rename = "mg/dL"))]
    MgPerDl,
    /// Millimoles per litre.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "mmol/L"))]
    MmolPerL,
}

impl DisplayUnit {
    /// The conventional label for this unit.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DisplayUnit::MgPerDl => "mg/dL",
            DisplayUnit::MmolPerL => "mmol/L",
        }
    }

    /// Number of decimals shown for values in this unit.
    #[must_use]
    pub fn decimals(&self) -> usize {
        match self {
            DisplayUnit::MgPerDl => 0,
            DisplayUnit::MmolPerL => 1,
        }
    }

    /// Express a canonical mg/dL value in this unit.
    #[must_use]
    pub fn display_value(self, mgdl: f64) -> f64 {
        match self {
            DisplayUnit::MgPerDl => mgdl,
            DisplayUnit::MmolPerL => mgdl / MGDL_PER_MMOL,
        }
    }

    /// Express a value given in this unit in mg/dL.
    #[must_use]
    pub fn canonical_value(self, value: f64) -> f64 {
        match self {
            DisplayUnit::MgPerDl => value,
            DisplayUnit::MmolPerL => value * MGDL_PER_MMOL,
        }
    }

    /// The other unit.
    #[must_use]
    pub fn toggled(&self) -> Self {
        match self {
            DisplayUnit::MgPerDl => DisplayUnit::MmolPerL,
            DisplayUnit::MmolPerL => DisplayUnit::MgPerDl,
        }
    }
}

impl fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DisplayUnit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mg/dl" | "mgdl" => Ok(DisplayUnit::MgPerDl),
            "mmol/l" | "mmol" => Ok(DisplayUnit::MmolPerL),
            _ => Err(ParseError::UnknownUnit(s.to_string())),
        }
    }
}

/// Direction of change between two consecutive readings.
///
/// Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Trend {
    /// Falling more than 5 mg/dL.
    SharpDown,
    /// Falling up to 5 mg/dL.
    Down,
    /// Change below 0.1 mg/dL.
    Stable,
    /// Rising up to 5 mg/dL.
    Up,
    /// Rising more than 5 mg/dL.
    SharpUp,
    /// No usable previous reading, or the series is stale.
    #[default]
    Unknown,
}

impl Trend {
    /// Arrow glyph shown next to the value.
    #[must_use]
    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::SharpDown => "⬇️",
            Trend::Down => "↘️",
            Trend::Stable => "➡️",
            Trend::Up => "↗️",
            Trend::SharpUp => "⬆️",
            Trend::Unknown => "❓",
        }
    }

    /// Whether the glucose level is going up.
    #[must_use]
    pub fn is_rising(&self) -> bool {
        matches!(self, Trend::Up | Trend::SharpUp)
    }

    /// Whether the glucose level is going down.
    #[must_use]
    pub fn is_falling(&self) -> bool {
        matches!(self, Trend::Down | Trend::SharpDown)
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arrow())
    }
}

/// One of the five ordered clinical ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Band {
    VeryLow,
    Low,
    InRange,
    High,
    VeryHigh,
}

impl Band {
    /// All bands in ascending order.
    pub const ALL: [Band; 5] = [
        Band::VeryLow,
        Band::Low,
        Band::InRange,
        Band::High,
        Band::VeryHigh,
    ];

    /// Short name used in messages and validation errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Band::VeryLow => "very low",
            Band::Low => "low",
            Band::InRange => "in range",
            Band::High => "high",
            Band::VeryHigh => "very high",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A closed interval `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BandRange {
    pub lo: f64,
    pub hi: f64,
}

impl BandRange {
    #[must_use]
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Whether `value` lies inside the closed interval.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// Apply `f` to both bounds.
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            lo: f(self.lo),
            hi: f(self.hi),
        }
    }
}

/// The five clinical bands, ascending.
///
/// Stored in canonical mg/dL. Conversion to the display unit happens at the
/// presentation boundary so that customized ranges survive unit toggles.
///
/// ```
/// use glucow_types::{Band, ClinicalBands};
///
/// let bands = ClinicalBands::default();
/// assert!(bands.validate().is_ok());
/// assert!(bands.get(Band::InRange).contains(120.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClinicalBands {
    pub very_low: BandRange,
    pub low: BandRange,
    pub in_range: BandRange,
    pub high: BandRange,
    pub very_high: BandRange,
}

impl Default for ClinicalBands {
    /// 3.8 / 4.9 / 8.5 / 13.9 / 27.0 mmol/L expressed in whole mg/dL.
    fn default() -> Self {
        Self {
            very_low: BandRange::new(0.0, 69.0),
            low: BandRange::new(70.0, 89.0),
            in_range: BandRange::new(90.0, 153.0),
            high: BandRange::new(154.0, 250.0),
            very_high: BandRange::new(251.0, 486.0),
        }
    }
}

impl ClinicalBands {
    /// Get the interval for a band.
    #[must_use]
    pub fn get(&self, band: Band) -> BandRange {
        match band {
            Band::VeryLow => self.very_low,
            Band::Low => self.low,
            Band::InRange => self.in_range,
            Band::High => self.high,
            Band::VeryHigh => self.very_high,
        }
    }

    fn get_mut(&mut self, band: Band) -> &mut BandRange {
        match band {
            Band::VeryLow => &mut self.very_low,
            Band::Low => &mut self.low,
            Band::InRange => &mut self.in_range,
            Band::High => &mut self.high,
            Band::VeryHigh => &mut self.very_high,
        }
    }

    /// Iterate over `(band, range)` pairs from very low to very high.
    pub fn iter(&self) -> impl Iterator<Item = (Band, BandRange)> + '_ {
        Band::ALL.into_iter().map(|band| (band, self.get(band)))
    }

    /// Apply `f` to every bound (e.g. a unit conversion).
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            very_low: self.very_low.map(&f),
            low: self.low.map(&f),
            in_range: self.in_range.map(&f),
            high: self.high.map(&f),
            very_high: self.very_high.map(&f),
        }
    }

    /// Check that all bounds are finite, each band is non-empty and bands
    /// ascend without overlapping their neighbours.
    pub fn validate(&self) -> Result<(), ParseError> {
        let mut previous: Option<(Band, BandRange)> = None;
        for (band, range) in self.iter() {
            if !range.lo.is_finite() || !range.hi.is_finite() {
                return Err(ParseError::InvalidBands {
                    band: band.name(),
                    reason: "bounds must be finite".to_string(),
                });
            }
            if range.lo > range.hi {
                return Err(ParseError::InvalidBands {
                    band: band.name(),
                    reason: format!("lower bound {} exceeds upper bound {}", range.lo, range.hi),
                });
            }
            if let Some((prev_band, prev)) = previous
                && range.lo < prev.hi
            {
                return Err(ParseError::InvalidBands {
                    band: band.name(),
                    reason: format!(
                        "lower bound {} is below the {} upper bound {}",
                        range.lo,
                        prev_band.name(),
                        prev.hi
                    ),
                });
            }
            previous = Some((band, range));
        }
        Ok(())
    }

    /// Edit the lower bound of a band (mg/dL).
    ///
    /// A lower bound above the band's upper bound collapses the band onto its
    /// upper bound. Values are clamped to `[MIN_BAND_MGDL, MAX_BAND_MGDL]`.
    pub fn set_lower(&mut self, band: Band, value: f64) {
        let value = value.clamp(MIN_BAND_MGDL, MAX_BAND_MGDL);
        let range = self.get_mut(band);
        if value > range.hi {
            range.lo = range.hi;
        } else {
            range.lo = value;
        }
    }

    /// Edit the upper bound of a band (mg/dL).
    ///
    /// An upper bound below the band's lower bound collapses the band onto its
    /// lower bound. Values are clamped to `[MIN_BAND_MGDL, MAX_BAND_MGDL]`.
    pub fn set_upper(&mut self, band: Band, value: f64) {
        let value = value.clamp(MIN_BAND_MGDL, MAX_BAND_MGDL);
        let range = self.get_mut(band);
        if value < range.lo {
            range.hi = range.lo;
        } else {
            range.hi = value;
        }
    }
}

/// FreeStyle Libre sensor generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorKind {
    Libre1,
    Libre2,
    Libre3,
    #[default]
    Unknown,
}

impl SensorKind {
    /// Map the LibreLinkUp product type code (`pt`) to a sensor kind.
    ///
    /// ```
    /// use glucow_types::SensorKind;
    ///
    /// assert_eq!(SensorKind::from_product_code(4), SensorKind::Libre3);
    /// assert_eq!(SensorKind::from_product_code(9), SensorKind::Unknown);
    /// ```
    #[must_use]
    pub fn from_product_code(code: i64) -> Self {
        match code {
            0 => SensorKind::Libre1,
            1 => SensorKind::Libre2,
            4 => SensorKind::Libre3,
            _ => SensorKind::Unknown,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Libre1 => write!(f, "Freestyle Libre 1"),
            SensorKind::Libre2 => write!(f, "Freestyle Libre 2"),
            SensorKind::Libre3 => write!(f, "Freestyle Libre 3"),
            SensorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// What is known about the currently worn sensor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorState {
    /// Activation time as Unix seconds.
    pub activation_unix: Option<i64>,
    /// Sensor serial number.
    pub serial: Option<String>,
    /// Sensor generation.
    pub kind: SensorKind,
    /// Whether the sensor is still in its first hour after activation.
    pub grace_period_active: bool,
}
