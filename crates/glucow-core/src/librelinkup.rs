//! HTTP client for the LibreLinkUp follower API.
//!
//! Two calls make up a fetch:
//!
//! | Call | Endpoint | Used for |
//! |------|----------|----------|
//! | [`GlucoseSource::connection`] | `GET {base}/llu/connections` | patient id, name, sensor metadata |
//! | [`GlucoseSource::latest_measurement`] | `GET {base}/llu/connections/{patientId}/graph` | latest glucose value |
//!
//! Both responses are wrapped in `{"status": 0, "data": ...}`; any other
//! status is an [`Error::Status`]. Payload parsing lives in free functions
//! ([`parse_connections`], [`parse_graph`], [`parse_timestamp`]) so it can be
//! tested without a server.
//!
//! # Example
//!
//! ```no_run
//! use glucow_core::librelinkup::{LibreLinkUpClient, LibreLinkUpConfig};
//! use glucow_core::source::{Credentials, GlucoseSource};
//!
//! # async fn example() -> glucow_core::Result<()> {
//! let client = LibreLinkUpClient::new(LibreLinkUpConfig::default())?;
//! let creds = Credentials::new("token", "user-id", "account-hash").unwrap();
//!
//! let connection = client.connection(&creds).await?;
//! let reading = client.latest_measurement(&creds, &connection.patient_id).await?;
//! println!("{} mg/dL at {}", reading.value_mgdl, reading.timestamp);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::debug;

use glucow_types::Reading;

use crate::error::{Error, Result};
use crate::sensor::SensorMetadata;
use crate::source::{Connection, Credentials, GlucoseSource};

/// Default API host.
pub const DEFAULT_BASE_URL: &str = "https://api.libreview.io";

const PRODUCT: &str = "llu.android";
const VERSION: &str = "4.12";
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:129.0) Gecko/20100101 Firefox/129.0";

/// Client settings.
#[derive(Debug, Clone)]
pub struct LibreLinkUpConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Offset the API's local timestamps are interpreted in.
    pub utc_offset: UtcOffset,
}

impl Default for LibreLinkUpConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            utc_offset: UtcOffset::UTC,
        }
    }
}

/// LibreLinkUp API client.
#[derive(Debug, Clone)]
pub struct LibreLinkUpClient {
    client: Client,
    base_url: String,
    base: Url,
    utc_offset: UtcOffset,
}

impl LibreLinkUpClient {
    /// Create a client. Fails if the base URL is not http(s).
    pub fn new(config: LibreLinkUpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .gzip(true)
            .build()?;
        Self::with_client(config, client)
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(config: LibreLinkUpConfig, client: Client) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::invalid_config(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }
        let base = Url::parse(&base_url)
            .map_err(|e| Error::invalid_config(format!("invalid URL '{}': {}", base_url, e)))?;
        Ok(Self {
            client,
            base_url,
            base,
            utc_offset: config.utc_offset,
        })
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Append percent-encoded `segments` to the base URL's path.
    fn endpoint_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::invalid_config(format!("URL cannot have a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, endpoint: &'static str, url: Url, creds: &Credentials) -> Result<Vec<u8>> {
        debug!(endpoint, "GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&creds.token)
            .header("Account-Id", &creds.account_id_hash)
            .header("patientid", &creds.user_id)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-cache")
            .header("product", PRODUCT)
            .header("version", VERSION)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl GlucoseSource for LibreLinkUpClient {
    async fn connection(&self, credentials: &Credentials) -> Result<Connection> {
        let url = self.endpoint_url(&["llu", "connections"])?;
        let body = self.get("connections", url, credentials).await?;
        parse_connections(&body)
    }

    async fn latest_measurement(&self, credentials: &Credentials, patient_id: &str) -> Result<Reading> {
        let url = self.endpoint_url(&["llu", "connections", patient_id, "graph"])?;
        let body = self.get("graph", url, credentials).await?;
        parse_graph(&body, self.utc_offset)
    }
}

// ==========================================================================
// Wire format
// ==========================================================================

#[derive(Deserialize)]
struct Envelope {
    status: Option<i64>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConnection {
    #[serde(default)]
    patient_id: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    sensor: Option<RawSensor>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSensor {
    a: Option<i64>,
    pt: Option<i64>,
    serial_number: Option<String>,
}

#[derive(Deserialize)]
struct GraphData {
    connection: GraphConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphConnection {
    glucose_measurement: Option<RawMeasurement>,
}

#[derive(Deserialize)]
struct RawMeasurement {
    /// Same instant in UTC.
    #[serde(rename = "FactoryTimestamp")]
    factory_timestamp: Option<String>,
    /// Wall-clock time of the follower's account region.
    #[serde(rename = "Timestamp")]
    timestamp: Option<String>,
    #[serde(rename = "ValueInMgPerDl")]
    value_mgdl: Option<f64>,
}

fn unwrap_envelope(endpoint: &'static str, body: &[u8]) -> Result<serde_json::Value> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    match envelope.status {
        Some(0) => Ok(envelope.data),
        status => Err(Error::Status { endpoint, status }),
    }
}

/// Parse a `/llu/connections` body into its first connection.
pub fn parse_connections(body: &[u8]) -> Result<Connection> {
    let data = unwrap_envelope("connections", body)?;
    if data.is_null() {
        return Err(Error::NoConnections);
    }

    let mut connections: Vec<RawConnection> = serde_json::from_value(data)?;
    if connections.is_empty() {
        return Err(Error::NoConnections);
    }
    let first = connections.swap_remove(0);
    if first.patient_id.is_empty() {
        return Err(Error::invalid_data("connection without patientId"));
    }

    Ok(Connection {
        patient_id: first.patient_id,
        first_name: first.first_name,
        last_name: first.last_name,
        sensor: first.sensor.map(|s| SensorMetadata {
            activation_unix: s.a,
            serial: s.serial_number,
            product_code: s.pt,
        }),
    })
}

/// Parse a `/graph` body into the latest reading.
///
/// The UTC `FactoryTimestamp` is preferred. Only when it is absent is the
/// local `Timestamp` read in `utc_offset`, which cannot follow DST changes.
pub fn parse_graph(body: &[u8], utc_offset: UtcOffset) -> Result<Reading> {
    let data = unwrap_envelope("graph", body)?;
    let graph: GraphData = serde_json::from_value(data)?;
    let measurement = graph
        .connection
        .glucose_measurement
        .ok_or_else(|| Error::invalid_data("missing glucoseMeasurement"))?;

    let (raw_ts, offset) = match (measurement.factory_timestamp, measurement.timestamp) {
        (Some(factory), _) => (factory, UtcOffset::UTC),
        (None, Some(local)) => (local, utc_offset),
        (None, None) => return Err(Error::invalid_data("missing Timestamp")),
    };
    let value = measurement
        .value_mgdl
        .ok_or_else(|| Error::invalid_data("missing ValueInMgPerDl"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Error::invalid_data(format!("implausible glucose value {}", value)));
    }

    Ok(Reading::new(parse_timestamp(&raw_ts, offset)?, value))
}

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[month padding:none]/[day padding:none]/[year] [hour repr:12 padding:none]:[minute]:[second] [period case_sensitive:false]"
);

/// Parse a LibreLinkUp timestamp such as `"1/5/2025 3:04:05 PM"`.
///
/// Only the first three whitespace-separated tokens are used. The API sends
/// local time without an offset, so `utc_offset` supplies it.
///
/// ```
/// use glucow_core::librelinkup::parse_timestamp;
/// use time::UtcOffset;
/// use time::macros::datetime;
///
/// let ts = parse_timestamp("1/5/2025 3:04:05 PM", UtcOffset::UTC).unwrap();
/// assert_eq!(ts, datetime!(2025-01-05 15:04:05 UTC));
/// ```
pub fn parse_timestamp(raw: &str, utc_offset: UtcOffset) -> Result<OffsetDateTime> {
    let tokens: Vec<&str> = raw.split_whitespace().take(3).collect();
    if tokens.len() < 3 {
        return Err(Error::invalid_data(format!("unparseable timestamp '{}'", raw)));
    }

    let joined = tokens.join(" ");
    let local = PrimitiveDateTime::parse(&joined, TIMESTAMP_FORMAT)
        .map_err(|e| Error::invalid_data(format!("unparseable timestamp '{}': {}", raw, e)))?;
    Ok(local.assume_offset(utc_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    const CONNECTIONS: &str = r#"{
        "status": 0,
        "data": [{
            "patientId": "p-123",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "sensor": {"a": 1736000000, "pt": 4, "serialNumber": "0M0001ABCD"}
        }, {
            "patientId": "p-456",
            "firstName": "Second",
            "lastName": "Patient"
        }]
    }"#;

    const GRAPH: &str = r#"{
        "status": 0,
        "data": {
            "connection": {
                "glucoseMeasurement": {
                    "Timestamp": "1/5/2025 3:04:05 PM",
                    "ValueInMgPerDl": 130,
                    "TrendArrow": 3
                }
            },
            "graphData": []
        }
    }"#;

    #[test]
    fn test_parse_connections_first_entry() {
        let conn = parse_connections(CONNECTIONS.as_bytes()).unwrap();
        assert_eq!(conn.patient_id, "p-123");
        assert_eq!(conn.patient_name(), "Ada Lovelace");

        let sensor = conn.sensor.unwrap();
        assert_eq!(sensor.activation_unix, Some(1_736_000_000));
        assert_eq!(sensor.product_code, Some(4));
        assert_eq!(sensor.serial.as_deref(), Some("0M0001ABCD"));
    }

    #[test]
    fn test_parse_connections_without_sensor() {
        let body = r#"{"status":0,"data":[{"patientId":"p-1"}]}"#;
        let conn = parse_connections(body.as_bytes()).unwrap();
        assert!(conn.sensor.is_none());
        assert_eq!(conn.patient_name(), "");
    }

    #[test]
    fn test_nonzero_status_is_error() {
        let body = r#"{"status":2,"data":[]}"#;
        let err = parse_connections(body.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            Error::Status {
                endpoint: "connections",
                status: Some(2)
            }
        ));
    }

    #[test]
    fn test_missing_status_is_error() {
        let body = r#"{"data":{"connection":{}}}"#;
        let err = parse_graph(body.as_bytes(), UtcOffset::UTC).unwrap_err();
        assert!(matches!(err, Error::Status { status: None, .. }));
    }

    #[test]
    fn test_empty_connections() {
        let err = parse_connections(br#"{"status":0,"data":[]}"#).unwrap_err();
        assert!(matches!(err, Error::NoConnections));

        let err = parse_connections(br#"{"status":0}"#).unwrap_err();
        assert!(matches!(err, Error::NoConnections));
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_connections(b"<html>").unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_parse_graph() {
        let reading = parse_graph(GRAPH.as_bytes(), UtcOffset::UTC).unwrap();
        assert_eq!(reading.value_mgdl, 130.0);
        assert_eq!(reading.timestamp, datetime!(2025-01-05 15:04:05 UTC));
    }

    #[test]
    fn test_parse_graph_applies_offset() {
        let reading = parse_graph(GRAPH.as_bytes(), offset!(+1)).unwrap();
        assert_eq!(reading.timestamp, datetime!(2025-01-05 14:04:05 UTC));
    }

    #[test]
    fn test_parse_graph_prefers_factory_timestamp() {
        // 2:30 CEST occurs twice on this date; the UTC field is unambiguous.
        let body = r#"{"status":0,"data":{"connection":{"glucoseMeasurement":{
            "FactoryTimestamp": "10/26/2025 12:30:00 AM",
            "Timestamp": "10/26/2025 2:30:00 AM",
            "ValueInMgPerDl": 110
        }}}}"#;
        let reading = parse_graph(body.as_bytes(), offset!(+2)).unwrap();
        assert_eq!(reading.timestamp, datetime!(2025-10-26 00:30:00 UTC));
    }

    #[test]
    fn test_endpoint_url_encodes_patient_id() {
        let config = LibreLinkUpConfig {
            base_url: "https://api-eu.libreview.io/".to_string(),
            ..Default::default()
        };
        let client = LibreLinkUpClient::new(config).unwrap();

        let url = client
            .endpoint_url(&["llu", "connections", "a/b?c", "graph"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api-eu.libreview.io/llu/connections/a%2Fb%3Fc/graph"
        );
        assert_eq!(
            client.endpoint_url(&["llu", "connections"]).unwrap().as_str(),
            "https://api-eu.libreview.io/llu/connections"
        );
    }

    #[test]
    fn test_parse_graph_missing_value() {
        let body = r#"{"status":0,"data":{"connection":{"glucoseMeasurement":{"Timestamp":"1/5/2025 3:04:05 PM"}}}}"#;
        let err = parse_graph(body.as_bytes(), UtcOffset::UTC).unwrap_err();
        assert!(err.to_string().contains("ValueInMgPerDl"));
    }

    #[test]
    fn test_parse_graph_missing_measurement() {
        let body = r#"{"status":0,"data":{"connection":{}}}"#;
        let err = parse_graph(body.as_bytes(), UtcOffset::UTC).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let utc = UtcOffset::UTC;
        assert_eq!(
            parse_timestamp("12/31/2024 11:59:59 PM", utc).unwrap(),
            datetime!(2024-12-31 23:59:59 UTC)
        );
        assert_eq!(
            parse_timestamp("1/5/2025 12:00:00 AM", utc).unwrap(),
            datetime!(2025-01-05 00:00:00 UTC)
        );
        // Trailing tokens are ignored.
        assert_eq!(
            parse_timestamp("1/5/2025 9:15:00 am extra", utc).unwrap(),
            datetime!(2025-01-05 09:15:00 UTC)
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("", UtcOffset::UTC).is_err());
        assert!(parse_timestamp("2025-01-05T10:00:00Z", UtcOffset::UTC).is_err());
        assert!(parse_timestamp("13/45/2025 3:04:05 PM", UtcOffset::UTC).is_err());
    }

    #[test]
    fn test_client_normalizes_url() {
        let config = LibreLinkUpConfig {
            base_url: "https://api-eu.libreview.io/".to_string(),
            ..Default::default()
        };
        let client = LibreLinkUpClient::new(config).unwrap();
        assert_eq!(client.base_url(), "https://api-eu.libreview.io");
    }

    #[test]
    fn test_client_rejects_invalid_url() {
        let config = LibreLinkUpConfig {
            base_url: "api.libreview.io".to_string(),
            ..Default::default()
        };
        let result = LibreLinkUpClient::new(config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
