//! Remote glucose source abstraction.
//!
//! [`GlucoseSource`] is the seam between the scheduler and the network. The
//! production implementation is [`LibreLinkUpClient`](crate::librelinkup::LibreLinkUpClient);
//! tests use [`MockSource`](crate::mock::MockSource).

use std::fmt;

use async_trait::async_trait;

use glucow_types::Reading;

use crate::error::Result;
use crate::sensor::SensorMetadata;

/// Session credentials issued by the login flow.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token.
    pub token: String,
    /// Account user id, sent as the `patientid` header.
    pub user_id: String,
    /// SHA-256 of the user id, sent as the `Account-Id` header.
    pub account_id_hash: String,
}

impl Credentials {
    /// Build credentials, returning `None` if any part is empty.
    pub fn new(
        token: impl Into<String>,
        user_id: impl Into<String>,
        account_id_hash: impl Into<String>,
    ) -> Option<Self> {
        let creds = Self {
            token: token.into(),
            user_id: user_id.into(),
            account_id_hash: account_id_hash.into(),
        };
        let complete = !creds.token.trim().is_empty()
            && !creds.user_id.trim().is_empty()
            && !creds.account_id_hash.trim().is_empty();
        complete.then_some(creds)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("account_id_hash", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials to the scheduler and keeps its display cache.
pub trait CredentialProvider: Send + Sync {
    /// Current credentials, `None` when the user is not logged in.
    fn credentials(&self) -> Option<Credentials>;

    /// Remember the last rendered sensor details for displays that start
    /// before the first fetch completes.
    fn cache_sensor_display(&self, _serial: Option<&str>, _expiry_text: &str) {}
}

/// A followed patient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub sensor: Option<SensorMetadata>,
}

impl Connection {
    /// "First Last", trimmed.
    pub fn patient_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Remote source of glucose measurements.
#[async_trait]
pub trait GlucoseSource: Send + Sync {
    /// The first patient connection on the account.
    ///
    /// Returns [`Error::NoConnections`](crate::Error::NoConnections) when the
    /// account follows nobody.
    async fn connection(&self, credentials: &Credentials) -> Result<Connection>;

    /// The most recent measurement for `patient_id`.
    async fn latest_measurement(&self, credentials: &Credentials, patient_id: &str) -> Result<Reading>;
}
