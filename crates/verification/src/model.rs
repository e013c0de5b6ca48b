//! Domain model of the verification coordinator
//!
//! The ephemeral types (`VerificationRequest`, `VerificationReceipt`) live
//! in the state store and disappear with their TTL; `AuditRecord` is the
//! durable system of record and outlives them.

use chrono::{DateTime, Utc};
use rollcall_common::types::{InitiatorId, NotificationId, RecipientId, RequestId, SessionId};
use serde::{Deserialize, Serialize};

/// One multi-recipient verification challenge
///
/// Immutable after creation. Recipients are fixed and ordered; only the
/// associated verified set, receipts and audit rows are mutated later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub initiator_id: InitiatorId,
    /// Roster/group reference, display only
    pub scope_ref: Option<String>,
    /// Absolute deadline. Past this instant the request is logically dead
    /// even if the key still physically exists.
    pub expires_at: DateTime<Utc>,
    /// Fixed, ordered, deduplicated recipient set
    pub recipients: Vec<RecipientId>,
    /// Similarity threshold applied when a verify call does not override it
    pub threshold: f64,
    pub title: String,
    pub body: String,
}

impl VerificationRequest {
    /// Whether the deadline has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the identity belongs to the fixed recipient set
    pub fn is_recipient(&self, recipient: &RecipientId) -> bool {
        self.recipients.iter().any(|r| r == recipient)
    }
}

/// Result of the most recent verification attempt by one recipient
///
/// Overwritten on retries; does not affect the verified set once the
/// recipient is already present there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReceipt {
    pub matched: bool,
    pub similarity: f64,
    pub verified_at: DateTime<Utc>,
}

/// Durable audit row status
///
/// Transitions: `Pending` → `CompletedMatch` | `CompletedNoMatch` |
/// `Cancelled`, plus `CompletedNoMatch` → `CompletedMatch` when a retry
/// succeeds. `CompletedMatch` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Pending,
    CompletedMatch,
    CompletedNoMatch,
    Cancelled,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "PENDING",
            AuditStatus::CompletedMatch => "COMPLETED_MATCH",
            AuditStatus::CompletedNoMatch => "COMPLETED_NOMATCH",
            AuditStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AuditStatus::Pending),
            "COMPLETED_MATCH" => Some(AuditStatus::CompletedMatch),
            "COMPLETED_NOMATCH" => Some(AuditStatus::CompletedNoMatch),
            "CANCELLED" => Some(AuditStatus::Cancelled),
            _ => None,
        }
    }
}

/// One durable audit row per (request, recipient)
///
/// Created at request creation, status transitioned by verify/cancel,
/// never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: RequestId,
    pub recipient_id: RecipientId,
    pub initiator_id: InitiatorId,
    pub session_id: SessionId,
    pub scope_ref: Option<String>,
    pub threshold: f64,
    pub expires_at: DateTime<Utc>,
    pub notification_id: Option<NotificationId>,
    pub status: AuditStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ========== Operation inputs ==========

/// Input of [`crate::coordinator::RequestCoordinator::create`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateParams {
    pub initiator_id: InitiatorId,
    pub session_id: SessionId,
    /// Roster reference resolved via the roster collaborator when no
    /// explicit recipient list is given
    #[serde(default)]
    pub scope_ref: Option<String>,
    /// Explicit recipient list; takes precedence over roster resolution
    #[serde(default)]
    pub recipients: Option<Vec<RecipientId>>,
    /// Requested lifetime in seconds, clamped to the configured window
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Similarity threshold for this request; configured default otherwise
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Input of [`crate::coordinator::RequestCoordinator::verify`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyParams {
    pub recipient_id: RecipientId,
    /// Biometric feature vector captured live
    pub feature_vector: Vec<f64>,
    /// Per-call threshold override
    #[serde(default)]
    pub threshold: Option<f64>,
}

// ========== Operation outcomes ==========

/// Output of a successful create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
    pub recipient_count: usize,
    pub threshold: f64,
}

/// Output of a successful verify
///
/// `matched: false` is a normal response, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub matched: bool,
    pub similarity: f64,
    pub verified_at: DateTime<Utc>,
    pub request_id: RequestId,
    pub session_id: SessionId,
}

/// Output of a status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOutcome {
    pub request_id: RequestId,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
    pub total_recipients: usize,
    pub total_verified: usize,
    pub verified_recipient_ids: Vec<RecipientId>,
}

/// Output of a successful cancel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub request_id: RequestId,
    /// Audit rows transitioned to `Cancelled` by this call
    pub records_cancelled: u64,
    /// Recipients an early-termination push was enqueued for
    pub recipients_notified: usize,
}

/// Output of a session-wide cleanup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub session_id: SessionId,
    /// Distinct requests whose cancel effects ran
    pub requests_cancelled: usize,
    /// Audit rows transitioned to `Cancelled` across those requests
    pub records_cancelled: u64,
    /// Deduplicated recipients that received the aggregate push
    pub recipients_notified: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_audit_status_round_trip() {
        for status in [
            AuditStatus::Pending,
            AuditStatus::CompletedMatch,
            AuditStatus::CompletedNoMatch,
            AuditStatus::Cancelled,
        ] {
            assert_eq!(AuditStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AuditStatus::parse("DONE"), None);
    }

    #[test]
    fn test_request_expiry_boundary() {
        let now = Utc::now();
        let request = VerificationRequest {
            request_id: RequestId::generate(),
            session_id: SessionId::new("s1"),
            initiator_id: InitiatorId::new("lecturer-1"),
            scope_ref: None,
            expires_at: now,
            recipients: vec![RecipientId::new("u1")],
            threshold: 0.75,
            title: String::new(),
            body: String::new(),
        };

        // exactly at the deadline is still alive, one millisecond past is not
        assert!(!request.is_expired_at(now));
        assert!(request.is_expired_at(now + Duration::milliseconds(1)));
    }

    #[test]
    fn test_recipient_membership() {
        let request = VerificationRequest {
            request_id: RequestId::generate(),
            session_id: SessionId::new("s1"),
            initiator_id: InitiatorId::new("lecturer-1"),
            scope_ref: None,
            expires_at: Utc::now(),
            recipients: vec![RecipientId::new("u1"), RecipientId::new("u2")],
            threshold: 0.75,
            title: String::new(),
            body: String::new(),
        };

        assert!(request.is_recipient(&RecipientId::new("u2")));
        assert!(!request.is_recipient(&RecipientId::new("u9")));
    }
}
