//! Validation error types
//!
//! Input validation and rule checks shared across services.

use thiserror::Error;

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid input: {field}")]
    InvalidInput { field: String },

    #[error("Value out of range: {field} = {value}")]
    OutOfRange { field: String, value: String },

    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Rate limit exceeded: {limit}")]
    RateLimit { limit: String },
}
