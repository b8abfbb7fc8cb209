//! Error types for the Tollgate service.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// Rate limit denial is not represented here: a denied request is an
/// ordinary [`Decision`](crate::ratelimit::Decision) with `allowed == false`.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy whose rate or burst cannot produce a working limiter
    #[error("Invalid policy '{policy}': {reason}")]
    InvalidPolicy { policy: String, reason: String },

    /// Lookup of a policy name that was never configured
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// Layered configuration loading errors
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, GateError>;
