//! Face verification request coordinator
//!
//! # Overview
//!
//! The coordinator orchestrates short-lived, multi-recipient verification
//! challenges: a lecturer creates one per live session, recipients submit
//! biometric comparisons concurrently and exactly once, anyone may poll
//! progress, and the initiator may cancel early. Ephemeral state lives in
//! the TTL store, durable accounting in the audit repository.
//!
//! ```text
//! ┌──────────────┐ create/verify/status/cancel/cleanup
//! │   Caller     │──────────────┐
//! └──────────────┘              ▼
//!                ┌──────────────────────────────┐
//!                │      RequestCoordinator      │
//!                └──┬────────┬────────┬─────┬───┘
//!                   │        │        │     │
//!          ┌────────▼──┐ ┌───▼────┐ ┌─▼───┐ ┌▼──────────┐
//!          │ Ephemeral │ │ Audit  │ │Queue│ │Comparator │
//!          │ TTL store │ │ SQLite │ │push │ │ + Roster  │
//!          └───────────┘ └────────┘ └─────┘ └───────────┘
//! ```
//!
//! # Concurrency contract
//!
//! The coordinator is stateless per call and safe under arbitrary
//! interleaving. Two invariants are anchored on atomic store primitives
//! rather than read-then-write pairs:
//!
//! - one active request per session: `claim_session` (create-if-absent on
//!   a session-keyed guard)
//! - one successful verification per recipient: `add_verified`
//!   (set-add-if-not-member); the first winner is authoritative
//!
//! Deadlines are enforced lazily on access. The comparator call is the
//! only externally-bound step and runs without any coordinator lock held.

use crate::audit_storage::AuditStorage;
use crate::comparator::VerificationComparator;
use crate::dispatch::{Notification, NotificationDispatcher};
use crate::error::{VerificationError, VerificationResult};
use crate::model::{
    AuditRecord, AuditStatus, CancelOutcome, CleanupOutcome, CreateOutcome, CreateParams,
    StatusOutcome, VerificationReceipt, VerificationRequest, VerifyOutcome, VerifyParams,
};
use crate::roster::{RosterError, RosterResolver};
use crate::state_store::{EphemeralStateStore, SetAddOutcome};
use chrono::{DateTime, Utc};
use rollcall_common::config::VerificationConfig;
use rollcall_common::types::{RecipientId, RequestId, SessionId};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receipts never get a shorter TTL than this, so a receipt written just
/// before the deadline does not end up with a zero or negative lifetime.
const MIN_RECEIPT_TTL: Duration = Duration::from_secs(1);

/// Physical key lifetime beyond the logical deadline. A verify attempt
/// shortly after expiry observes the dead request (410) instead of an
/// indistinguishable miss (404); the session guard itself gets no grace,
/// its lifetime IS the deadline.
const EXPIRED_RETENTION: Duration = Duration::from_secs(60);

/// Display title used when the caller provides none
const DEFAULT_TITLE: &str = "Verification requested";

/// The coordination core
pub struct RequestCoordinator {
    store: Arc<dyn EphemeralStateStore>,
    audit: AuditStorage,
    dispatcher: Arc<dyn NotificationDispatcher>,
    comparator: Arc<dyn VerificationComparator>,
    roster: Arc<dyn RosterResolver>,
    config: VerificationConfig,
}

impl RequestCoordinator {
    pub fn new(
        store: Arc<dyn EphemeralStateStore>,
        audit: AuditStorage,
        dispatcher: Arc<dyn NotificationDispatcher>,
        comparator: Arc<dyn VerificationComparator>,
        roster: Arc<dyn RosterResolver>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            store,
            audit,
            dispatcher,
            comparator,
            roster,
            config,
        }
    }

    /// Create a verification request for a session
    ///
    /// Side effects run as a saga: session guard → metadata → audit rows
    /// → notifications. Guard/metadata failures abort cleanly; an audit
    /// write failure rolls the ephemeral writes back so no request is
    /// ever actable without its audit rows. Notification dispatch is
    /// best-effort and never fails the create.
    pub async fn create(&self, params: CreateParams) -> VerificationResult<CreateOutcome> {
        let recipients = self.resolve_recipients(&params).await?;
        let ttl = self.config.clamp_ttl(params.ttl_secs);
        let threshold = effective_threshold(params.threshold, self.config.default_threshold);

        let request_id = RequestId::generate();
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| VerificationError::internal(format!("Invalid TTL: {e}")))?;

        // Atomic create-if-absent on the session guard. A plain
        // existence query here would admit two concurrent creates.
        let claimed = self
            .store
            .claim_session(&params.session_id, &request_id, ttl)
            .await
            .map_err(|e| VerificationError::internal(format!("Session claim failed: {e}")))?;
        if !claimed {
            return Err(VerificationError::RequestAlreadyActive {
                session_id: params.session_id,
            });
        }

        let request = VerificationRequest {
            request_id: request_id.clone(),
            session_id: params.session_id.clone(),
            initiator_id: params.initiator_id.clone(),
            scope_ref: params.scope_ref.clone(),
            expires_at,
            recipients: recipients.clone(),
            threshold,
            title: params
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: params.body.unwrap_or_default(),
        };

        if let Err(e) = self.store.put_request(&request, ttl + EXPIRED_RETENTION).await {
            let _ = self
                .store
                .release_session(&params.session_id, &request_id)
                .await;
            return Err(VerificationError::internal(format!(
                "Failed to store request metadata: {e}"
            )));
        }

        let records: Vec<AuditRecord> = recipients
            .iter()
            .map(|recipient| AuditRecord {
                request_id: request_id.clone(),
                recipient_id: recipient.clone(),
                initiator_id: params.initiator_id.clone(),
                session_id: params.session_id.clone(),
                scope_ref: params.scope_ref.clone(),
                threshold,
                expires_at,
                notification_id: None,
                status: AuditStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect();

        if let Err(e) = self.audit.create_many(&records).await {
            warn!(
                request_id = %request_id,
                error = %e,
                "Audit write failed, rolling back request creation"
            );
            let _ = self.store.purge_request(&request_id).await;
            let _ = self
                .store
                .release_session(&params.session_id, &request_id)
                .await;
            return Err(VerificationError::internal(format!(
                "Failed to write audit rows: {e}"
            )));
        }

        for recipient in &recipients {
            let notification_id = self.dispatcher.dispatch(Notification {
                recipient_id: recipient.clone(),
                title: request.title.clone(),
                body: request.body.clone(),
                metadata: json!({
                    "request_id": &request_id,
                    "session_id": &params.session_id,
                    "expires_at": expires_at.to_rfc3339(),
                }),
            });
            if let Err(e) = self
                .audit
                .set_notification_id(&request_id, recipient, &notification_id)
                .await
            {
                // Non-fatal: the request works without the dispatch id.
                warn!(
                    request_id = %request_id,
                    recipient_id = %recipient,
                    error = %e,
                    "Failed to record notification id"
                );
            }
        }

        info!(
            request_id = %request_id,
            session_id = %params.session_id,
            recipients = recipients.len(),
            expires_at = %expires_at,
            "Created verification request"
        );

        Ok(CreateOutcome {
            request_id,
            session_id: params.session_id,
            expires_at,
            recipient_count: recipients.len(),
            threshold,
        })
    }

    /// One recipient's verification attempt (the hot path)
    pub async fn verify(
        &self,
        request_id: &RequestId,
        params: VerifyParams,
    ) -> VerificationResult<VerifyOutcome> {
        // Step 1: existence
        let request = self
            .store
            .get_request(request_id)
            .await
            .map_err(|e| VerificationError::internal(format!("State store read failed: {e}")))?
            .ok_or(VerificationError::NotFoundOrExpired)?;

        // Step 2: deadline
        let now = Utc::now();
        if request.is_expired_at(now) {
            self.drop_ephemeral_state(&request).await;
            return Err(VerificationError::RequestExpired);
        }

        // Step 3: membership
        if !request.is_recipient(&params.recipient_id) {
            return Err(VerificationError::NotARecipient {
                recipient_id: params.recipient_id,
            });
        }

        // Step 4: fast idempotency check. The conditional add in step 6
        // is the authoritative one; this only spares the comparator call.
        let members = self
            .store
            .verified_members(request_id)
            .await
            .map_err(|e| VerificationError::internal(format!("State store read failed: {e}")))?;
        if members.contains(&params.recipient_id) {
            return Err(VerificationError::AlreadyVerified {
                recipient_id: params.recipient_id,
            });
        }

        // Step 5: comparison. Externally bound, no coordinator lock held.
        let threshold = effective_threshold(params.threshold, request.threshold);
        let comparison = self
            .comparator
            .compare(&params.recipient_id, &params.feature_vector, threshold)
            .await?;

        // Step 6: recording
        let receipt = VerificationReceipt {
            matched: comparison.matched,
            similarity: comparison.similarity,
            verified_at: now,
        };
        self.store
            .put_receipt(
                request_id,
                &params.recipient_id,
                &receipt,
                remaining_ttl(request.expires_at, now),
            )
            .await
            .map_err(|e| VerificationError::internal(format!("Failed to store receipt: {e}")))?;

        if comparison.matched {
            match self
                .store
                .add_verified(request_id, &params.recipient_id)
                .await
                .map_err(|e| {
                    VerificationError::internal(format!("Verified-set update failed: {e}"))
                })? {
                SetAddOutcome::Added => {
                    let updated = self
                        .audit
                        .update_status(request_id, &params.recipient_id, AuditStatus::CompletedMatch)
                        .await
                        .map_err(|e| {
                            VerificationError::internal(format!("Audit update failed: {e}"))
                        })?;
                    if !updated {
                        warn!(
                            request_id = %request_id,
                            recipient_id = %params.recipient_id,
                            "Verification succeeded but no audit row accepted the transition"
                        );
                    }
                    info!(
                        request_id = %request_id,
                        recipient_id = %params.recipient_id,
                        similarity = comparison.similarity,
                        "Recipient verified"
                    );
                }
                SetAddOutcome::AlreadyPresent => {
                    // Lost the race against a concurrent call for the same
                    // recipient; the first success is authoritative and the
                    // duplicate add was a no-op.
                    return Err(VerificationError::AlreadyVerified {
                        recipient_id: params.recipient_id,
                    });
                }
                SetAddOutcome::RequestGone => {
                    return Err(VerificationError::RequestExpired);
                }
            }
        } else {
            // A failed attempt does not consume the recipient's slot;
            // retries remain possible until the deadline.
            self.audit
                .update_status(
                    request_id,
                    &params.recipient_id,
                    AuditStatus::CompletedNoMatch,
                )
                .await
                .map_err(|e| VerificationError::internal(format!("Audit update failed: {e}")))?;
            debug!(
                request_id = %request_id,
                recipient_id = %params.recipient_id,
                similarity = comparison.similarity,
                "Comparison below threshold"
            );
        }

        Ok(VerifyOutcome {
            matched: comparison.matched,
            similarity: comparison.similarity,
            verified_at: now,
            request_id: request.request_id,
            session_id: request.session_id,
        })
    }

    /// Read-only progress query, no side effects
    pub async fn status(&self, request_id: &RequestId) -> VerificationResult<StatusOutcome> {
        let request = self
            .store
            .get_request(request_id)
            .await
            .map_err(|e| VerificationError::internal(format!("State store read failed: {e}")))?
            .ok_or(VerificationError::NotFoundOrExpired)?;

        // An expired key that has not been reclaimed yet reads as absent.
        // Status never mutates state, so no cleanup here.
        if request.is_expired_at(Utc::now()) {
            return Err(VerificationError::NotFoundOrExpired);
        }

        let verified = self
            .store
            .verified_members(request_id)
            .await
            .map_err(|e| VerificationError::internal(format!("State store read failed: {e}")))?;

        Ok(StatusOutcome {
            request_id: request.request_id,
            session_id: request.session_id,
            expires_at: request.expires_at,
            total_recipients: request.recipients.len(),
            total_verified: verified.len(),
            verified_recipient_ids: verified,
        })
    }

    /// Early termination of one request, idempotent
    ///
    /// With live ephemeral state: notify every recipient, cancel the
    /// pending audit rows, drop the ephemeral keys. Expired-but-present
    /// state is cleaned up without notifications. When only durable rows
    /// remain (expired and reclaimed, or already cancelled), the call
    /// sweeps the remaining pending audit rows and still succeeds; an id
    /// unknown to both stores is a 404.
    pub async fn cancel(&self, request_id: &RequestId) -> VerificationResult<CancelOutcome> {
        let live = self
            .store
            .get_request(request_id)
            .await
            .map_err(|e| VerificationError::internal(format!("State store read failed: {e}")))?;

        match live {
            Some(request) => {
                let expired = request.is_expired_at(Utc::now());
                let mut recipients_notified = 0;

                if !expired {
                    for recipient in &request.recipients {
                        self.dispatcher.dispatch(Notification {
                            recipient_id: recipient.clone(),
                            title: "Verification cancelled".to_string(),
                            body: "The verification request ended early".to_string(),
                            metadata: json!({
                                "request_id": request_id,
                                "session_id": &request.session_id,
                            }),
                        });
                        recipients_notified += 1;
                    }
                }

                let records_cancelled = self
                    .audit
                    .cancel_by_request_id(request_id)
                    .await
                    .map_err(|e| VerificationError::internal(format!("Audit cancel failed: {e}")))?;

                self.drop_ephemeral_state(&request).await;

                info!(
                    request_id = %request_id,
                    session_id = %request.session_id,
                    records_cancelled,
                    expired,
                    "Cancelled verification request"
                );

                Ok(CancelOutcome {
                    request_id: request_id.clone(),
                    records_cancelled,
                    recipients_notified,
                })
            }
            None => {
                // Ephemeral state is gone. Fall back to the durable rows
                // so repeated cancels and cancel-after-expiry succeed
                // without re-notifying anyone.
                let rows = self
                    .audit
                    .find_by_request_id(request_id)
                    .await
                    .map_err(|e| VerificationError::internal(format!("Audit read failed: {e}")))?;
                if rows.is_empty() {
                    return Err(VerificationError::NotFoundOrExpired);
                }

                let records_cancelled = self
                    .audit
                    .cancel_by_request_id(request_id)
                    .await
                    .map_err(|e| VerificationError::internal(format!("Audit cancel failed: {e}")))?;

                debug!(
                    request_id = %request_id,
                    records_cancelled,
                    "Cancel on reclaimed request, audit sweep only"
                );

                Ok(CancelOutcome {
                    request_id: request_id.clone(),
                    records_cancelled,
                    recipients_notified: 0,
                })
            }
        }
    }

    /// Session-wide cleanup
    ///
    /// Driven by the durable rows: every request with pending audit rows
    /// for the session gets the cancel effects. There should be at most
    /// one such request, but historical races or manual intervention can
    /// leave more; all of them are handled. Affected recipients receive
    /// one aggregate push each, not one per request group.
    pub async fn cleanup_session(
        &self,
        session_id: &SessionId,
    ) -> VerificationResult<CleanupOutcome> {
        let pending = self
            .audit
            .find_active_by_session_id(session_id)
            .await
            .map_err(|e| VerificationError::internal(format!("Audit read failed: {e}")))?;

        let mut request_ids: Vec<RequestId> = Vec::new();
        let mut affected: Vec<RecipientId> = Vec::new();
        let mut seen = HashSet::new();
        for row in &pending {
            if !request_ids.contains(&row.request_id) {
                request_ids.push(row.request_id.clone());
            }
            if seen.insert(row.recipient_id.clone()) {
                affected.push(row.recipient_id.clone());
            }
        }

        let mut records_cancelled = 0;
        for request_id in &request_ids {
            records_cancelled += self
                .audit
                .cancel_by_request_id(request_id)
                .await
                .map_err(|e| VerificationError::internal(format!("Audit cancel failed: {e}")))?;

            if let Err(e) = self.store.purge_request(request_id).await {
                warn!(request_id = %request_id, error = %e, "Failed to purge ephemeral state");
            }
            if let Err(e) = self.store.release_session(session_id, request_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to release session guard");
            }
        }

        for recipient in &affected {
            self.dispatcher.dispatch(Notification {
                recipient_id: recipient.clone(),
                title: "Verification closed".to_string(),
                body: "The session's verification requests were closed".to_string(),
                metadata: json!({ "session_id": session_id }),
            });
        }

        info!(
            session_id = %session_id,
            requests_cancelled = request_ids.len(),
            records_cancelled,
            recipients_notified = affected.len(),
            "Session cleanup completed"
        );

        Ok(CleanupOutcome {
            session_id: session_id.clone(),
            requests_cancelled: request_ids.len(),
            records_cancelled,
            recipients_notified: affected.len(),
        })
    }

    /// Best-effort removal of one request's ephemeral keys and its
    /// session guard. Used on expiry and cancel; failures are logged,
    /// the TTL reclaims whatever remains.
    async fn drop_ephemeral_state(&self, request: &VerificationRequest) {
        if let Err(e) = self.store.purge_request(&request.request_id).await {
            warn!(
                request_id = %request.request_id,
                error = %e,
                "Failed to purge ephemeral state"
            );
        }
        if let Err(e) = self
            .store
            .release_session(&request.session_id, &request.request_id)
            .await
        {
            warn!(
                session_id = %request.session_id,
                error = %e,
                "Failed to release session guard"
            );
        }
    }

    async fn resolve_recipients(
        &self,
        params: &CreateParams,
    ) -> VerificationResult<Vec<RecipientId>> {
        if let Some(explicit) = &params.recipients
            && !explicit.is_empty()
        {
            return Ok(dedup_preserving_order(explicit.clone()));
        }

        let Some(scope_ref) = &params.scope_ref else {
            return Err(VerificationError::NoRecipients);
        };

        match self.roster.resolve(scope_ref).await {
            Ok(resolved) if !resolved.is_empty() => Ok(dedup_preserving_order(resolved)),
            Ok(_) => Err(VerificationError::NoRecipients),
            Err(RosterError::ScopeNotFound { .. }) => Err(VerificationError::NoRecipients),
            Err(e) => Err(VerificationError::internal(format!(
                "Roster resolution failed: {e}"
            ))),
        }
    }
}

/// Pick the applicable threshold, ignoring out-of-range overrides
fn effective_threshold(requested: Option<f64>, fallback: f64) -> f64 {
    match requested {
        Some(t) if t > 0.0 && t <= 1.0 => t,
        Some(t) => {
            warn!(threshold = t, "Ignoring out-of-range threshold override");
            fallback
        }
        None => fallback,
    }
}

/// First occurrence wins, order preserved
fn dedup_preserving_order(recipients: Vec<RecipientId>) -> Vec<RecipientId> {
    let mut seen = HashSet::new();
    recipients
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

/// Remaining lifetime until the deadline, floored at [`MIN_RECEIPT_TTL`]
fn remaining_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(MIN_RECEIPT_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_threshold() {
        assert_eq!(effective_threshold(None, 0.75), 0.75);
        assert_eq!(effective_threshold(Some(0.9), 0.75), 0.9);
        assert_eq!(effective_threshold(Some(1.0), 0.75), 1.0);
        // out-of-range overrides fall back
        assert_eq!(effective_threshold(Some(0.0), 0.75), 0.75);
        assert_eq!(effective_threshold(Some(1.5), 0.75), 0.75);
        assert_eq!(effective_threshold(Some(-0.3), 0.75), 0.75);
    }

    #[test]
    fn test_dedup_preserving_order() {
        let deduped = dedup_preserving_order(vec![
            RecipientId::new("u1"),
            RecipientId::new("u2"),
            RecipientId::new("u1"),
            RecipientId::new("u3"),
            RecipientId::new("u2"),
        ]);
        assert_eq!(
            deduped,
            vec![
                RecipientId::new("u1"),
                RecipientId::new("u2"),
                RecipientId::new("u3")
            ]
        );
    }

    #[test]
    fn test_remaining_ttl_floor() {
        let now = Utc::now();

        let healthy = remaining_ttl(now + chrono::Duration::seconds(90), now);
        assert_eq!(healthy, Duration::from_secs(90));

        // already past the deadline still yields the floor, never zero
        let past = remaining_ttl(now - chrono::Duration::seconds(5), now);
        assert_eq!(past, MIN_RECEIPT_TTL);

        let sliver = remaining_ttl(now + chrono::Duration::milliseconds(200), now);
        assert_eq!(sliver, MIN_RECEIPT_TTL);
    }
}
