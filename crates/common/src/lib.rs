//! Shared infrastructure for the Rollcall face-recognition services
//!
//! Provides the pieces every service crate needs: the error hierarchy, the
//! unified configuration layer and the identity newtypes used across the
//! verification subsystem.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{ObservabilityConfig, RollcallConfig, VerificationConfig};
pub use error::{BaseError, ConfigError, DatabaseError, Result, ValidationError};
pub use types::{InitiatorId, NotificationId, RecipientId, RequestId, SessionId};
