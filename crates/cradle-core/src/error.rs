//! Error types for the cradle telemetry core
//!
//! None of these errors are user-facing. They are operational signals: the
//! ingestion path logs them and moves on to the next message.

use thiserror::Error;

/// Result type alias for cradle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the cradle telemetry core
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed payload (message is dropped, never retried)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Telemetry from a device that never registered
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Durable store read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A single alert rule could not be evaluated
    #[error("Evaluation error ({rule}): {message}")]
    Evaluation {
        /// Rule that faulted
        rule: String,
        /// Error message
        message: String,
    },

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Telemetry bus errors
    #[error("Bus error: {0}")]
    Bus(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an unknown device error
    pub fn unknown_device(device_id: impl Into<String>) -> Self {
        Self::UnknownDevice(device_id.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an evaluation error for one rule
    pub fn evaluation(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Create a notification error
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a bus error
    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the message that produced this error should simply be dropped
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::UnknownDevice(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
