//! Top-level error enum
//!
//! Aggregates the error types of all submodules behind a single handling
//! surface.

use super::{ConfigError, DatabaseError, ValidationError};
use thiserror::Error;

/// Top-level error enum aggregating the sub-crate errors
#[derive(Error, Debug)]
pub enum BaseError {
    // ========== Service-level errors ==========
    /// Verification coordinator errors
    #[error("Verification service error: {message}")]
    VerificationService { message: String },

    // ========== Infrastructure errors ==========
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    // ========== Generic errors ==========
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// General errors that fit no other category
    #[error("General error: {message}")]
    General { message: String },

    /// Internal errors (usually programming errors)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BaseError {
    /// Create a general error
    pub fn general(message: impl Into<String>) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a verification service error
    pub fn verification_service(message: impl Into<String>) -> Self {
        Self::VerificationService {
            message: message.into(),
        }
    }
}

/// Unified Result type
pub type Result<T> = std::result::Result<T, BaseError>;
