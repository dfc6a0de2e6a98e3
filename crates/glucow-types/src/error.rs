//! Error types for data parsing in glucow-types.

use thiserror::Error;

/// Errors that can occur when parsing or validating glucose data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Unrecognized display unit label.
    #[error("Unknown unit '{0}': expected \"mg/dL\" or \"mmol/L\"")]
    UnknownUnit(String),

    /// Clinical band boundaries are not ascending and contiguous.
    #[error("Invalid range for {band}: {reason}")]
    InvalidBands {
        /// The band whose bounds are wrong.
        band: &'static str,
        /// Why the bounds were rejected.
        reason: String,
    },
}

/// Result type alias using glucow-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
