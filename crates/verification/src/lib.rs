//! Face verification request coordinator
//!
//! # Overview
//!
//! This crate implements the coordination core of the Rollcall
//! face-recognition module: a lecturer asks the platform to verify the
//! live presence of a class roster, recipients submit biometric
//! comparisons concurrently and exactly once, and everything is tracked
//! against a hard deadline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Client     │
//! └──────┬───────┘
//!        │ POST /requests, /requests/{id}/verify, ... (JSON)
//!        ▼
//! ┌───────────────────────────────────────────────┐
//! │  Verification Service                         │
//! │  ┌────────────┐      ┌─────────────────────┐  │
//! │  │  Router    │─────▶│  RequestCoordinator │  │
//! │  └────────────┘      └──────────┬──────────┘  │
//! │                                 │             │
//! │  ┌─────────────────┐   ┌────────▼─────────┐   │
//! │  │ MemoryStateStore│   │  AuditStorage    │   │
//! │  │ (TTL key/value) │   │  (SQLite)        │   │
//! │  └─────────────────┘   └──────────────────┘   │
//! │  ┌─────────────────┐   ┌──────────────────┐   │
//! │  │ OutboundQueue   │   │ Comparator +     │   │
//! │  │ (push fan-out)  │   │ RosterResolver   │   │
//! │  └─────────────────┘   └──────────────────┘   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most one active request per session; concurrent creates resolve
//!   to one winner via an atomic session-guard claim.
//! - A recipient's first successful verification is authoritative;
//!   concurrent duplicates lose via the atomic verified-set add.
//! - TTL expiry is enforced lazily on access; expired state reads as
//!   absent everywhere.
//! - Cancellation is idempotent and safe on expired requests.
//!
//! # Usage
//!
//! ```no_run
//! use rollcall_common::config::RollcallConfig;
//! use verification::create_verification_router;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RollcallConfig::default();
//! let router = create_verification_router(&config).await?;
//! // let app = axum::Router::new().nest("/verification", router);
//! # Ok(())
//! # }
//! ```

pub mod audit_storage;
pub mod axum_router;
pub mod comparator;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod ratelimit;
pub mod roster;
pub mod state_store;

pub use audit_storage::AuditStorage;
pub use axum_router::{
    create_verification_router, create_verification_router_with_collaborators, VerificationState,
};
pub use comparator::{Comparison, ComparatorError, CosineComparator, VerificationComparator};
pub use coordinator::RequestCoordinator;
pub use dispatch::{
    LoggingPushChannel, Notification, NotificationDispatcher, OutboundQueue, PushChannel,
};
pub use error::{VerificationError, VerificationResult};
pub use model::{
    AuditRecord, AuditStatus, CancelOutcome, CleanupOutcome, CreateOutcome, CreateParams,
    StatusOutcome, VerificationReceipt, VerificationRequest, VerifyOutcome, VerifyParams,
};
pub use roster::{RosterError, RosterResolver, StaticRosterResolver};
pub use state_store::{
    EphemeralStateStore, MemoryStateStore, SetAddOutcome, StateStoreError, StoreStats,
};
