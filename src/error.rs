//! Unified error handling model
//!
//! Top-level error type of the rollcall host binary, aggregating the
//! errors of the library crates and the runtime.

use thiserror::Error;

/// Unified error enum of the host binary
#[derive(Debug, Error)]
pub enum Error {
    // ========== Library errors ==========
    /// Shared infrastructure errors
    #[error("Base library error: {0}")]
    Base(Box<rollcall_common::error::BaseError>),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] rollcall_common::error::ConfigError),

    // ========== System-level errors ==========
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Task join errors
    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    // ========== Business errors ==========
    /// Service startup failure
    #[error("Service startup failed: {message}")]
    ServiceStartup { message: String },

    // ========== Generic errors ==========
    /// Anyhow compatibility layer
    #[error("Legacy error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Custom error message
    #[error("Application error: {message}")]
    Custom { message: String },
}

impl From<rollcall_common::error::BaseError> for Error {
    fn from(err: rollcall_common::error::BaseError) -> Self {
        Error::Base(Box::new(err))
    }
}

/// Unified Result type of the host binary
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    /// Create a service startup error
    pub fn service_startup(message: impl Into<String>) -> Self {
        Self::ServiceStartup {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::custom("test error");
        assert!(matches!(err, Error::Custom { .. }));
    }
}
