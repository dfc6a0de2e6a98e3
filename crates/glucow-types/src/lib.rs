//! Platform-agnostic types for continuous glucose monitoring.
//!
//! This crate provides the shared data model used by the sync engine
//! (glucow-core), the persistence layer (glucow-store) and the service.
//!
//! # Features
//!
//! - Canonical glucose readings (always mg/dL)
//! - Display units and trend directions
//! - Clinical band definitions with validation and clamped editing
//! - Sensor identity and lifecycle state
//!
//! # Example
//!
//! ```
//! use glucow_types::{ClinicalBands, DisplayUnit, Reading, Trend};
//!
//! let unit = DisplayUnit::MgPerDl;
//! let bands = ClinicalBands::default();
//! assert_eq!(unit.label(), "mg/dL");
//! assert!(bands.validate().is_ok());
//! assert_eq!(Trend::SharpUp.arrow(), "⬆️");
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    Band, BandRange, ClinicalBands, DisplayUnit, MAX_BAND_MGDL, MGDL_PER_MMOL, MIN_BAND_MGDL,
    Reading, SensorKind, SensorState, Trend,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    // --- DisplayUnit tests ---

    #[test]
    fn test_display_unit_labels() {
        assert_eq!(DisplayUnit::MgPerDl.label(), "mg/dL");
        assert_eq!(DisplayUnit::MmolPerL.label(), "mmol/L");
        assert_eq!(format!("{}", DisplayUnit::MmolPerL), "mmol/L");
    }

    #[test]
    fn test_display_unit_default_is_mmol() {
        assert_eq!(DisplayUnit::default(), DisplayUnit::MmolPerL);
    }

    #[test]
    fn test_display_unit_parse() {
        assert_eq!("mg/dL".parse::<DisplayUnit>(), Ok(DisplayUnit::MgPerDl));
        assert_eq!("MMOL/L".parse::<DisplayUnit>(), Ok(DisplayUnit::MmolPerL));
        assert_eq!(" mmol ".parse::<DisplayUnit>(), Ok(DisplayUnit::MmolPerL));

        let err = "g/L".parse::<DisplayUnit>().unwrap_err();
        assert!(err.to_string().contains("g/L"));
    }

    #[test]
    fn test_display_unit_toggle_twice_is_identity() {
        for unit in [DisplayUnit::MgPerDl, DisplayUnit::MmolPerL] {
            assert_ne!(unit.toggled(), unit);
            assert_eq!(unit.toggled().toggled(), unit);
        }
    }

    #[test]
    fn test_display_unit_conversion() {
        assert_eq!(DisplayUnit::MmolPerL.display_value(90.0), 5.0);
        assert_eq!(DisplayUnit::MmolPerL.canonical_value(5.0), 90.0);
        assert_eq!(DisplayUnit::MgPerDl.display_value(123.4), 123.4);
    }

    #[test]
    fn test_display_unit_decimals() {
        assert_eq!(DisplayUnit::MgPerDl.decimals(), 0);
        assert_eq!(DisplayUnit::MmolPerL.decimals(), 1);
    }

    // --- Trend tests ---

    #[test]
    fn test_trend_arrows() {
        assert_eq!(Trend::SharpDown.arrow(), "⬇️");
        assert_eq!(Trend::Down.arrow(), "↘️");
        assert_eq!(Trend::Stable.arrow(), "➡️");
        assert_eq!(Trend::Up.arrow(), "↗️");
        assert_eq!(Trend::SharpUp.arrow(), "⬆️");
        assert_eq!(Trend::Unknown.arrow(), "❓");
    }

    #[test]
    fn test_trend_direction() {
        assert!(Trend::Up.is_rising());
        assert!(Trend::SharpUp.is_rising());
        assert!(Trend::Down.is_falling());
        assert!(Trend::SharpDown.is_falling());
        for trend in [Trend::Stable, Trend::Unknown] {
            assert!(!trend.is_rising());
            assert!(!trend.is_falling());
        }
    }

    // --- ClinicalBands tests ---

    #[test]
    fn test_default_bands_are_valid_and_contiguous() {
        let bands = ClinicalBands::default();
        assert!(bands.validate().is_ok());

        // Every whole mg/dL value between the outer bounds lands in a band.
        for value in 0..=486 {
            let v = value as f64;
            assert!(
                bands.iter().any(|(_, r)| r.contains(v)),
                "{} mg/dL not covered",
                value
            );
        }
    }

    #[test]
    fn test_bands_iter_order() {
        let bands = ClinicalBands::default();
        let order: Vec<Band> = bands.iter().map(|(b, _)| b).collect();
        assert_eq!(order, Band::ALL.to_vec());
    }

    #[test]
    fn test_validate_rejects_inverted_band() {
        let mut bands = ClinicalBands::default();
        bands.low = BandRange::new(90.0, 70.0);

        let err = bands.validate().unwrap_err();
        assert!(matches!(err, ParseError::InvalidBands { band: "low", .. }));
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut bands = ClinicalBands::default();
        bands.high = BandRange::new(140.0, 250.0);

        let err = bands.validate().unwrap_err();
        assert!(err.to_string().contains("high"));
        assert!(err.to_string().contains("in range"));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut bands = ClinicalBands::default();
        bands.very_high.hi = f64::NAN;
        assert!(bands.validate().is_err());
    }

    #[test]
    fn test_set_lower_above_upper_collapses() {
        let mut bands = ClinicalBands::default();
        bands.set_lower(Band::InRange, 200.0);
        assert_eq!(bands.in_range, BandRange::new(153.0, 153.0));
    }

    #[test]
    fn test_set_upper_below_lower_collapses() {
        let mut bands = ClinicalBands::default();
        bands.set_upper(Band::High, 100.0);
        assert_eq!(bands.high, BandRange::new(154.0, 154.0));
    }

    #[test]
    fn test_set_bounds_are_clamped() {
        let mut bands = ClinicalBands::default();
        bands.set_upper(Band::VeryHigh, 10_000.0);
        assert_eq!(bands.very_high.hi, MAX_BAND_MGDL);

        bands.set_lower(Band::VeryLow, -5.0);
        assert_eq!(bands.very_low.lo, MIN_BAND_MGDL);
    }

    #[test]
    fn test_set_bounds_normal_edit() {
        let mut bands = ClinicalBands::default();
        bands.set_lower(Band::InRange, 80.0);
        bands.set_upper(Band::InRange, 180.0);
        assert_eq!(bands.in_range, BandRange::new(80.0, 180.0));
    }

    #[test]
    fn test_band_range_contains_is_closed() {
        let range = BandRange::new(70.0, 180.0);
        assert!(range.contains(70.0));
        assert!(range.contains(180.0));
        assert!(!range.contains(69.9));
        assert!(!range.contains(180.1));
    }

    // --- SensorKind tests ---

    #[test]
    fn test_sensor_kind_from_product_code() {
        assert_eq!(SensorKind::from_product_code(0), SensorKind::Libre1);
        assert_eq!(SensorKind::from_product_code(1), SensorKind::Libre2);
        assert_eq!(SensorKind::from_product_code(4), SensorKind::Libre3);
        assert_eq!(SensorKind::from_product_code(2), SensorKind::Unknown);
        assert_eq!(SensorKind::from_product_code(-1), SensorKind::Unknown);
    }

    #[test]
    fn test_sensor_kind_display() {
        assert_eq!(SensorKind::Libre3.to_string(), "Freestyle Libre 3");
        assert_eq!(SensorKind::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_sensor_state_default_is_empty() {
        let state = SensorState::default();
        assert!(state.activation_unix.is_none());
        assert!(state.serial.is_none());
        assert_eq!(state.kind, SensorKind::Unknown);
        assert!(!state.grace_period_active);
    }

    // --- Serialization tests ---

    #[test]
    fn test_reading_serializes_rfc3339_timestamp() {
        let reading = Reading::new(datetime!(2025-01-05 15:04:05 UTC), 130.0);
        let json = serde_json::to_string(&reading).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"2025-01-05T15:04:05Z","value_mgdl":130.0}"#
        );
    }

    #[test]
    fn test_reading_deserialization() {
        let json = r#"{"timestamp":"2025-01-05T15:04:05+01:00","value_mgdl":98.5}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.value_mgdl, 98.5);
        assert_eq!(reading.timestamp, datetime!(2025-01-05 14:04:05 UTC));
    }

    #[test]
    fn test_display_unit_serialization() {
        assert_eq!(
            serde_json::to_string(&DisplayUnit::MgPerDl).unwrap(),
            "\"mg/dL\""
        );
        let unit: DisplayUnit = serde_json::from_str("\"mmol/L\"").unwrap();
        assert_eq!(unit, DisplayUnit::MmolPerL);
    }

    #[test]
    fn test_trend_serialization() {
        assert_eq!(
            serde_json::to_string(&Trend::SharpUp).unwrap(),
            "\"sharp_up\""
        );
        assert_eq!(serde_json::to_string(&Band::InRange).unwrap(), "\"in_range\"");
    }

    // --- Property tests ---

    proptest! {
        #[test]
        fn prop_edited_band_never_inverts(lo in -100.0f64..700.0, hi in -100.0f64..700.0) {
            let mut bands = ClinicalBands::default();
            bands.set_lower(Band::InRange, lo);
            bands.set_upper(Band::InRange, hi);
            let range = bands.in_range;
            prop_assert!(range.lo <= range.hi);
            prop_assert!(range.lo >= MIN_BAND_MGDL);
            prop_assert!(range.hi <= MAX_BAND_MGDL);
        }
    }
}
