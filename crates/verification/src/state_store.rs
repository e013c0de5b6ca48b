//! Ephemeral coordination state
//!
//! ## Design
//!
//! All mutable coordinator state lives behind [`EphemeralStateStore`], a
//! TTL key/value abstraction with two conditional primitives:
//!
//! - `claim_session`: create-if-absent on a session-keyed guard entry,
//!   the anchor for the one-active-request-per-session invariant
//! - `add_verified`: set-add-if-not-member on the per-request verified
//!   set, the anchor for exactly-once success accounting
//!
//! Expiry is enforced lazily: an expired entry is treated as absent by
//! every read, whether or not it has been reclaimed yet. The background
//! sweep only frees memory.
//!
//! [`MemoryStateStore`] is the single-process implementation. Every
//! operation takes the inner lock for the duration of the map access and
//! never across an await point, so the conditional primitives are atomic
//! with respect to each other.

use crate::model::{VerificationReceipt, VerificationRequest};
use async_trait::async_trait;
use rollcall_common::types::{RecipientId, RequestId, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Ephemeral store errors
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("State store backend error: {message}")]
    Backend { message: String },
}

/// Outcome of the conditional set-add primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAddOutcome {
    /// The recipient was not present and has been added
    Added,
    /// The recipient was already present; nothing changed
    AlreadyPresent,
    /// The parent request no longer has live state
    RequestGone,
}

/// TTL key/value store holding all mutable coordinator state
#[async_trait]
pub trait EphemeralStateStore: Send + Sync {
    /// Write request metadata and its (empty) verified set under `ttl`
    async fn put_request(
        &self,
        request: &VerificationRequest,
        ttl: Duration,
    ) -> Result<(), StateStoreError>;

    /// Read request metadata; expired entries read as absent
    async fn get_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<VerificationRequest>, StateStoreError>;

    /// Delete request metadata, verified set and all receipts
    async fn purge_request(&self, request_id: &RequestId) -> Result<(), StateStoreError>;

    /// Atomically claim the session guard for `request_id`
    ///
    /// Returns `false` when a live guard for a different request already
    /// exists. Re-claiming with the same request id succeeds.
    async fn claim_session(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        ttl: Duration,
    ) -> Result<bool, StateStoreError>;

    /// Release the session guard if it is still held by `request_id`
    ///
    /// Compare-release: a guard claimed by a newer request is left alone.
    async fn release_session(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<(), StateStoreError>;

    /// Atomically add a recipient to the verified set
    async fn add_verified(
        &self,
        request_id: &RequestId,
        recipient: &RecipientId,
    ) -> Result<SetAddOutcome, StateStoreError>;

    /// Current members of the verified set, in insertion-independent order
    async fn verified_members(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RecipientId>, StateStoreError>;

    /// Write (or overwrite) a recipient's receipt under `ttl`
    async fn put_receipt(
        &self,
        request_id: &RequestId,
        recipient: &RecipientId,
        receipt: &VerificationReceipt,
        ttl: Duration,
    ) -> Result<(), StateStoreError>;

    /// Read a recipient's most recent receipt
    async fn get_receipt(
        &self,
        request_id: &RequestId,
        recipient: &RecipientId,
    ) -> Result<Option<VerificationReceipt>, StateStoreError>;
}

/// An entry plus its physical expiry instant
#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
struct StoreInner {
    requests: HashMap<RequestId, Expiring<VerificationRequest>>,
    sessions: HashMap<SessionId, Expiring<RequestId>>,
    verified: HashMap<RequestId, Expiring<HashSet<RecipientId>>>,
    receipts: HashMap<(RequestId, RecipientId), Expiring<VerificationReceipt>>,
}

/// In-memory ephemeral store
///
/// Maps guarded by one mutex; the per-request keyspaces never contend
/// across different requests for longer than a map access.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<StoreInner>,
}

/// Store statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub live_requests: usize,
    pub live_sessions: usize,
    pub live_receipts: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned lock means a panic while holding it; propagating the
        // inner state is still sound because every mutation is a single
        // map operation.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reclaim expired entries, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.requests.len()
            + inner.sessions.len()
            + inner.verified.len()
            + inner.receipts.len();

        inner.requests.retain(|_, e| e.is_live(now));
        inner.sessions.retain(|_, e| e.is_live(now));
        inner.verified.retain(|_, e| e.is_live(now));
        inner.receipts.retain(|_, e| e.is_live(now));

        let removed = before
            - (inner.requests.len()
                + inner.sessions.len()
                + inner.verified.len()
                + inner.receipts.len());
        if removed > 0 {
            info!("Swept {} expired ephemeral entries", removed);
        }
        removed
    }

    /// Live entry counts
    pub fn stats(&self) -> StoreStats {
        let now = Instant::now();
        let inner = self.lock();
        StoreStats {
            live_requests: inner.requests.values().filter(|e| e.is_live(now)).count(),
            live_sessions: inner.sessions.values().filter(|e| e.is_live(now)).count(),
            live_receipts: inner.receipts.values().filter(|e| e.is_live(now)).count(),
        }
    }
}

#[async_trait]
impl EphemeralStateStore for MemoryStateStore {
    async fn put_request(
        &self,
        request: &VerificationRequest,
        ttl: Duration,
    ) -> Result<(), StateStoreError> {
        let mut inner = self.lock();
        inner.requests.insert(
            request.request_id.clone(),
            Expiring::new(request.clone(), ttl),
        );
        inner.verified.insert(
            request.request_id.clone(),
            Expiring::new(HashSet::new(), ttl),
        );
        debug!(
            request_id = %request.request_id,
            session_id = %request.session_id,
            ttl_secs = ttl.as_secs(),
            "Stored verification request"
        );
        Ok(())
    }

    async fn get_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<VerificationRequest>, StateStoreError> {
        let now = Instant::now();
        let inner = self.lock();
        Ok(inner
            .requests
            .get(request_id)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn purge_request(&self, request_id: &RequestId) -> Result<(), StateStoreError> {
        let mut inner = self.lock();
        inner.requests.remove(request_id);
        inner.verified.remove(request_id);
        inner.receipts.retain(|(rid, _), _| rid != request_id);
        debug!(request_id = %request_id, "Purged ephemeral request state");
        Ok(())
    }

    async fn claim_session(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        ttl: Duration,
    ) -> Result<bool, StateStoreError> {
        let now = Instant::now();
        let mut inner = self.lock();

        if let Some(existing) = inner.sessions.get(session_id)
            && existing.is_live(now)
        {
            return Ok(&existing.value == request_id);
        }

        inner.sessions.insert(
            session_id.clone(),
            Expiring::new(request_id.clone(), ttl),
        );
        debug!(
            session_id = %session_id,
            request_id = %request_id,
            "Claimed session guard"
        );
        Ok(true)
    }

    async fn release_session(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<(), StateStoreError> {
        let mut inner = self.lock();
        if inner
            .sessions
            .get(session_id)
            .is_some_and(|e| &e.value == request_id)
        {
            inner.sessions.remove(session_id);
            debug!(session_id = %session_id, "Released session guard");
        }
        Ok(())
    }

    async fn add_verified(
        &self,
        request_id: &RequestId,
        recipient: &RecipientId,
    ) -> Result<SetAddOutcome, StateStoreError> {
        let now = Instant::now();
        let mut inner = self.lock();

        let Some(entry) = inner.verified.get_mut(request_id).filter(|e| e.is_live(now)) else {
            return Ok(SetAddOutcome::RequestGone);
        };

        if entry.value.insert(recipient.clone()) {
            Ok(SetAddOutcome::Added)
        } else {
            Ok(SetAddOutcome::AlreadyPresent)
        }
    }

    async fn verified_members(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RecipientId>, StateStoreError> {
        let now = Instant::now();
        let inner = self.lock();
        Ok(inner
            .verified
            .get(request_id)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_receipt(
        &self,
        request_id: &RequestId,
        recipient: &RecipientId,
        receipt: &VerificationReceipt,
        ttl: Duration,
    ) -> Result<(), StateStoreError> {
        let mut inner = self.lock();
        inner.receipts.insert(
            (request_id.clone(), recipient.clone()),
            Expiring::new(receipt.clone(), ttl),
        );
        Ok(())
    }

    async fn get_receipt(
        &self,
        request_id: &RequestId,
        recipient: &RecipientId,
    ) -> Result<Option<VerificationReceipt>, StateStoreError> {
        let now = Instant::now();
        let inner = self.lock();
        Ok(inner
            .receipts
            .get(&(request_id.clone(), recipient.clone()))
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }
}
