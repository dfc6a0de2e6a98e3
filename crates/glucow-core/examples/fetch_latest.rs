//! Example: Fetching the Latest Glucose Reading
//!
//! This example fetches the first followed patient's latest measurement
//! from LibreLinkUp and prints it with its range classification.
//!
//! Credentials come from the environment:
//! - `GLUCOW_TOKEN`: bearer token from the login flow
//! - `GLUCOW_USER_ID`: account user id
//! - `GLUCOW_ACCOUNT_ID_HASH`: SHA-256 of the user id
//! - `GLUCOW_BASE_URL` (optional): regional API host
//!
//! Run with: `cargo run --example fetch_latest`

use std::env;

use glucow_core::librelinkup::{DEFAULT_BASE_URL, LibreLinkUpClient, LibreLinkUpConfig};
use glucow_core::ranges::RangeClassifier;
use glucow_core::sensor::SensorLifecycle;
use glucow_core::source::{Credentials, GlucoseSource};
use glucow_core::units::format_value;
use glucow_types::{ClinicalBands, DisplayUnit, Trend};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let credentials = Credentials::new(
        env::var("GLUCOW_TOKEN").unwrap_or_default(),
        env::var("GLUCOW_USER_ID").unwrap_or_default(),
        env::var("GLUCOW_ACCOUNT_ID_HASH").unwrap_or_default(),
    );
    let Some(credentials) = credentials else {
        eprintln!("Set GLUCOW_TOKEN, GLUCOW_USER_ID and GLUCOW_ACCOUNT_ID_HASH");
        std::process::exit(1);
    };

    let client = LibreLinkUpClient::new(LibreLinkUpConfig {
        base_url: env::var("GLUCOW_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        ..Default::default()
    })?;

    println!("Fetching connections from {}...", client.base_url());
    let connection = client.connection(&credentials).await?;
    println!("Patient: {}", connection.patient_name());

    let now = OffsetDateTime::now_utc();
    if let Some(metadata) = &connection.sensor {
        let mut lifecycle = SensorLifecycle::new();
        lifecycle.observe(metadata, now);
        println!("Sensor:  {} ({:?})", lifecycle.state().kind, lifecycle.phase());
        println!("Expires: {}", lifecycle.expiry_text(now));
    }

    let reading = client
        .latest_measurement(&credentials, &connection.patient_id)
        .await?;

    let classifier = RangeClassifier::new(ClinicalBands::default());
    println!();
    for unit in [DisplayUnit::MgPerDl, DisplayUnit::MmolPerL] {
        let result = classifier.classify_reading(reading.value_mgdl, unit, Trend::Unknown);
        println!(
            "  {:>6} {:<7} {} [{}]",
            format_value(unit, reading.value_mgdl),
            unit,
            result.message,
            result.severity.colour()
        );
    }
    println!("  measured at {}", reading.timestamp);

    Ok(())
}
