//! Error types for glucow-core.
//!
//! Every error here is recoverable. The scheduler logs it, leaves the
//! published state untouched and retries on the next scheduled tick.
//!
//! | Error | Cause | Scheduler reaction |
//! |-------|-------|--------------------|
//! | [`Error::Http`] | Network failure, TLS, timeout | Log, retry next minute |
//! | [`Error::HttpStatus`] | Non-2xx HTTP response | Log, retry next minute |
//! | [`Error::Status`] | API envelope `status` absent or non-zero | Log, retry next minute |
//! | [`Error::InvalidData`] | Malformed payload or timestamp | Log, retry next minute |
//! | [`Error::NoConnections`] | Account follows nobody | Log, retry next minute |
//! | [`Error::Sink`] | Export/notification collaborator failed | Log only |
//! | [`Error::InvalidConfig`] | Bad client configuration | Reported at construction |

use thiserror::Error;

/// Errors that can occur while syncing glucose data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success HTTP status.
    #[error("{endpoint} returned HTTP {status}")]
    HttpStatus {
        /// Which call failed.
        endpoint: &'static str,
        /// The HTTP status code.
        status: u16,
    },

    /// The API envelope carried an absent or non-zero status field.
    #[error("{endpoint}: unexpected response status {status:?}")]
    Status {
        /// Which call failed.
        endpoint: &'static str,
        /// The status field, if present.
        status: Option<i64>,
    },

    /// The payload could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The account has no patient connections.
    #[error("No patient connections available")]
    NoConnections,

    /// An external sink (health export, notification) failed.
    #[error("{sink} failed: {message}")]
    Sink {
        /// Sink name for logging.
        sink: &'static str,
        /// What went wrong.
        message: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    /// Create a sink failure.
    pub fn sink(sink: &'static str, message: impl Into<String>) -> Self {
        Self::Sink {
            sink,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(format!("malformed JSON: {}", err))
    }
}

impl From<glucow_types::ParseError> for Error {
    fn from(err: glucow_types::ParseError) -> Self {
        Error::InvalidData(err.to_string())
    }
}

/// Result type alias using glucow-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
