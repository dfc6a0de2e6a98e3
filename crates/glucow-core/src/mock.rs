//! Test doubles for the scheduler's collaborators.
//!
//! These let the sync pipeline run without a network or a disk. They are
//! public so the service crate and integration tests can use them too.
//!
//! | Type | Implements |
//! |------|------------|
//! | [`MockSource`] | [`GlucoseSource`] with failure injection and latency |
//! | [`MemoryHistory`] | [`ReadingSink`] backed by a `Vec` |
//! | [`StaticCredentials`] | [`CredentialProvider`] |
//! | [`RecordingHealthSink`] | [`HealthSink`] |
//! | [`RecordingNotifier`] | [`NotificationSink`] |

use std::sync::RwLock as StdRwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use glucow_types::Reading;

use crate::error::{Error, Result};
use crate::sensor::SensorMetadata;
use crate::sinks::{HealthSink, NotificationSink, ReadingSink};
use crate::source::{Connection, CredentialProvider, Credentials, GlucoseSource};

/// Failure a [`MockSource`] can be told to return.
#[derive(Debug, Clone, PartialEq)]
pub enum MockFailure {
    /// API envelope status other than 0.
    Status(Option<i64>),
    /// HTTP status error.
    HttpStatus(u16),
    NoConnections,
    InvalidData(String),
}

impl MockFailure {
    fn to_error(&self, endpoint: &'static str) -> Error {
        match self {
            MockFailure::Status(status) => Error::Status {
                endpoint,
                status: *status,
            },
            MockFailure::HttpStatus(status) => Error::HttpStatus {
                endpoint,
                status: *status,
            },
            MockFailure::NoConnections => Error::NoConnections,
            MockFailure::InvalidData(message) => Error::invalid_data(message.clone()),
        }
    }
}

/// A scripted glucose source.
///
/// # Example
///
/// ```
/// use glucow_core::mock::MockSource;
/// use glucow_core::source::{Credentials, GlucoseSource};
/// use glucow_types::Reading;
/// use time::macros::datetime;
///
/// #[tokio::main]
/// async fn main() {
///     let source = MockSource::new();
///     source.set_reading(Reading::new(datetime!(2025-01-05 10:00 UTC), 110.0)).await;
///
///     let creds = Credentials::new("t", "u", "h").unwrap();
///     let conn = source.connection(&creds).await.unwrap();
///     let reading = source.latest_measurement(&creds, &conn.patient_id).await.unwrap();
///     assert_eq!(reading.value_mgdl, 110.0);
///     assert_eq!(source.connection_calls(), 1);
/// }
/// ```
#[derive(Debug)]
pub struct MockSource {
    connection: RwLock<Connection>,
    reading: RwLock<Option<Reading>>,
    failure: RwLock<Option<MockFailure>>,
    /// Simulated connection latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    connection_calls: AtomicU32,
    measurement_calls: AtomicU32,
}

impl MockSource {
    /// A source following "Test Patient" with no sensor and no reading.
    pub fn new() -> Self {
        Self {
            connection: RwLock::new(Connection {
                patient_id: "p-1".to_string(),
                first_name: "Test".to_string(),
                last_name: "Patient".to_string(),
                sensor: None,
            }),
            reading: RwLock::new(None),
            failure: RwLock::new(None),
            latency_ms: AtomicU64::new(0),
            connection_calls: AtomicU32::new(0),
            measurement_calls: AtomicU32::new(0),
        }
    }

    /// Set the measurement returned by `latest_measurement`.
    pub async fn set_reading(&self, reading: Reading) {
        *self.reading.write().await = Some(reading);
    }

    /// Set the sensor metadata on the connection.
    pub async fn set_sensor(&self, sensor: Option<SensorMetadata>) {
        self.connection.write().await.sensor = sensor;
    }

    /// Fail every call with `failure`, or succeed again with `None`.
    pub async fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.write().await = failure;
    }

    /// Delay every `connection` call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of `connection` calls so far.
    pub fn connection_calls(&self) -> u32 {
        self.connection_calls.load(Ordering::Relaxed)
    }

    /// Number of `latest_measurement` calls so far.
    pub fn measurement_calls(&self) -> u32 {
        self.measurement_calls.load(Ordering::Relaxed)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GlucoseSource for MockSource {
    async fn connection(&self, _credentials: &Credentials) -> Result<Connection> {
        self.connection_calls.fetch_add(1, Ordering::Relaxed);
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if let Some(failure) = self.failure.read().await.as_ref() {
            return Err(failure.to_error("connections"));
        }
        Ok(self.connection.read().await.clone())
    }

    async fn latest_measurement(&self, _credentials: &Credentials, _patient_id: &str) -> Result<Reading> {
        self.measurement_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(failure) = self.failure.read().await.as_ref() {
            return Err(failure.to_error("graph"));
        }
        (*self.reading.read().await).ok_or_else(|| Error::invalid_data("no measurement configured"))
    }
}

/// In-memory reading history with the same ordering and duplicate rules as
/// the file-backed store.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    readings: RwLock<Vec<Reading>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All readings, ascending.
    pub async fn readings(&self) -> Vec<Reading> {
        self.readings.read().await.clone()
    }
}

#[async_trait]
impl ReadingSink for MemoryHistory {
    async fn latest_before(&self, timestamp: OffsetDateTime) -> Option<Reading> {
        self.readings
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.timestamp < timestamp)
            .copied()
    }

    async fn append(&self, reading: Reading) -> bool {
        let mut readings = self.readings.write().await;
        match readings.binary_search_by(|r| r.timestamp.cmp(&reading.timestamp)) {
            Ok(_) => false,
            Err(index) => {
                readings.insert(index, reading);
                true
            }
        }
    }
}

/// Fixed credentials that can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    credentials: StdRwLock<Option<Credentials>>,
    sensor_display: StdRwLock<Option<(Option<String>, String)>>,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: StdRwLock::new(Some(credentials)),
            sensor_display: StdRwLock::new(None),
        }
    }

    /// A provider with nothing stored (logged out).
    pub fn none() -> Self {
        Self::default()
    }

    /// Replace the stored credentials.
    pub fn set(&self, credentials: Option<Credentials>) {
        let mut guard = self
            .credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = credentials;
    }

    /// Last `(serial, expiry_text)` passed to the display cache.
    pub fn cached_sensor_display(&self) -> Option<(Option<String>, String)> {
        self.sensor_display
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn cache_sensor_display(&self, serial: Option<&str>, expiry_text: &str) {
        let mut guard = self
            .sensor_display
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some((serial.map(str::to_string), expiry_text.to_string()));
    }
}

/// Health sink that records every call.
#[derive(Debug, Default)]
pub struct RecordingHealthSink {
    records: RwLock<Vec<(f64, OffsetDateTime)>>,
    should_fail: AtomicBool,
}

impl RecordingHealthSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(value_mgdl, timestamp)` pairs.
    pub async fn records(&self) -> Vec<(f64, OffsetDateTime)> {
        self.records.read().await.clone()
    }

    /// Make subsequent calls fail (after recording nothing).
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl HealthSink for RecordingHealthSink {
    async fn record(&self, value_mgdl: f64, at: OffsetDateTime) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::sink("health export", "mock failure"));
        }
        self.records.write().await.push((value_mgdl, at));
        Ok(())
    }
}

/// Notification sink that records every call.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: RwLock<Vec<(String, String)>>,
    should_fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(title, subtitle)` pairs.
    pub async fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.read().await.clone()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, title: &str, subtitle: &str) -> Result<()> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(Error::sink("notification", "mock failure"));
        }
        self.notifications
            .write()
            .await
            .push((title.to_string(), subtitle.to_string()));
        Ok(())
    }
}
