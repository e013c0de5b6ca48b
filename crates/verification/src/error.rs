//! Verification coordinator error taxonomy
//!
//! One variant per caller-visible failure, each carrying a stable HTTP
//! status code. All are terminal for the calling request; the coordinator
//! never retries on behalf of a caller.

use crate::comparator::ComparatorError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_common::types::{RecipientId, SessionId};
use serde_json::json;
use thiserror::Error;

/// Caller-visible verification errors
#[derive(Error, Debug)]
pub enum VerificationError {
    /// The request id does not resolve to live ephemeral state
    #[error("Verification request not found or expired")]
    NotFoundOrExpired,

    /// The request exists but its deadline has passed
    #[error("Verification request expired")]
    RequestExpired,

    /// An active request already exists for this session
    #[error("An active verification request already exists for session {session_id}")]
    RequestAlreadyActive { session_id: SessionId },

    /// Recipient resolution produced an empty set
    #[error("No recipients resolved for the verification request")]
    NoRecipients,

    /// The caller is not part of the fixed recipient set
    #[error("Identity {recipient_id} is not a recipient of this request")]
    NotARecipient { recipient_id: RecipientId },

    /// The recipient already completed verification for this request
    #[error("Recipient {recipient_id} already verified for this request")]
    AlreadyVerified { recipient_id: RecipientId },

    /// The biometric comparison itself failed
    #[error("Comparison failed: {0}")]
    Comparison(#[from] ComparatorError),

    /// Store or repository failure the caller cannot act on
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl VerificationError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable HTTP status code for this error
    ///
    /// The 400/404/409/410 distinctions are part of the caller contract
    /// and must not collapse into a generic failure code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerificationError::NotFoundOrExpired => StatusCode::NOT_FOUND,
            VerificationError::RequestExpired => StatusCode::GONE,
            VerificationError::RequestAlreadyActive { .. } => StatusCode::CONFLICT,
            VerificationError::NoRecipients => StatusCode::UNPROCESSABLE_ENTITY,
            VerificationError::NotARecipient { .. } => StatusCode::BAD_REQUEST,
            VerificationError::AlreadyVerified { .. } => StatusCode::CONFLICT,
            VerificationError::Comparison(_) => StatusCode::BAD_GATEWAY,
            VerificationError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "code": status.as_u16(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Result type of the coordinator operations
pub type VerificationResult<T> = std::result::Result<T, VerificationError>;
