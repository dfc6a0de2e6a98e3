//! Service-side implementations of the scheduler's collaborator traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use glucow_core::{
    CredentialProvider, Credentials, Error, HealthSink, NotificationSink, ReadingSink, Result,
};
use glucow_store::{HistoryStore, PreferenceStore, keys};
use glucow_types::Reading;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// History store adapter for the scheduler.
pub struct HistorySink {
    history: Arc<Mutex<HistoryStore>>,
}

impl HistorySink {
    pub fn new(history: Arc<Mutex<HistoryStore>>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl ReadingSink for HistorySink {
    async fn latest_before(&self, timestamp: OffsetDateTime) -> Option<Reading> {
        self.history.lock().await.latest_before(timestamp).copied()
    }

    async fn append(&self, reading: Reading) -> bool {
        self.history.lock().await.append(reading)
    }
}

/// Credentials and sensor display cache kept in the preferences file.
pub struct PreferenceCredentials {
    prefs: PreferenceStore,
}

impl PreferenceCredentials {
    pub fn new(prefs: PreferenceStore) -> Self {
        Self { prefs }
    }

    /// Store a session issued by the login flow.
    pub fn store(&self, credentials: &Credentials) -> glucow_store::Result<()> {
        self.prefs.set_string(keys::AUTH_TOKEN, &credentials.token)?;
        self.prefs.set_string(keys::USER_ID, &credentials.user_id)?;
        self.prefs
            .set_string(keys::ACCOUNT_ID_HASH, &credentials.account_id_hash)
    }
}

impl CredentialProvider for PreferenceCredentials {
    fn credentials(&self) -> Option<Credentials> {
        Credentials::new(
            self.prefs.get_non_empty(keys::AUTH_TOKEN)?,
            self.prefs.get_non_empty(keys::USER_ID)?,
            self.prefs.get_non_empty(keys::ACCOUNT_ID_HASH)?,
        )
    }

    fn cache_sensor_display(&self, serial: Option<&str>, expiry_text: &str) {
        let unchanged = self.prefs.get_string(keys::SENSOR_SERIAL).as_deref() == serial
            && self.prefs.get_string(keys::SENSOR_EXPIRY_TEXT).as_deref() == Some(expiry_text);
        if unchanged {
            return;
        }

        let result = match serial {
            Some(serial) => self.prefs.set_string(keys::SENSOR_SERIAL, serial),
            None => self.prefs.remove(keys::SENSOR_SERIAL).map(|_| ()),
        }
        .and_then(|()| self.prefs.set_string(keys::SENSOR_EXPIRY_TEXT, expiry_text));

        if let Err(e) = result {
            warn!("Failed to cache sensor display: {}", e);
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, title: &str, subtitle: &str) -> Result<()> {
        info!("{} ({})", title, subtitle);
        Ok(())
    }
}

/// Shows desktop notifications.
#[cfg(feature = "notifications")]
#[derive(Debug, Default)]
pub struct DesktopNotifier;

#[cfg(feature = "notifications")]
#[async_trait]
impl NotificationSink for DesktopNotifier {
    async fn notify(&self, title: &str, subtitle: &str) -> Result<()> {
        use notify_rust::Notification;

        let mut notification = Notification::new();
        notification.summary(title).body(subtitle).appname("Glucow");

        tokio::task::spawn_blocking(move || notification.show().map(|_| ()))
            .await
            .map_err(|e| Error::sink("notification", e.to_string()))?
            .map_err(|e| Error::sink("notification", e.to_string()))?;
        debug!("Notification sent: {} - {}", title, subtitle);
        Ok(())
    }
}

/// Writes health records to the log.
#[derive(Debug, Default)]
pub struct LogHealthExporter;

#[async_trait]
impl HealthSink for LogHealthExporter {
    async fn record(&self, value_mgdl: f64, at: OffsetDateTime) -> Result<()> {
        info!("Health record: {} mg/dL at {}", value_mgdl, at);
        Ok(())
    }
}

/// JSON body POSTed for each health record.
#[derive(Debug, Serialize)]
pub struct HealthRecord {
    pub value_mgdl: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// POSTs health records to a webhook.
pub struct WebhookHealthExporter {
    client: reqwest::Client,
    url: String,
}

impl WebhookHealthExporter {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HealthSink for WebhookHealthExporter {
    async fn record(&self, value_mgdl: f64, at: OffsetDateTime) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&HealthRecord {
                value_mgdl,
                timestamp: at,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::sink(
                "health export",
                format!("webhook returned HTTP {}", status.as_u16()),
            ));
        }
        debug!("Exported {} mg/dL to {}", value_mgdl, self.url);
        Ok(())
    }
}
