//! Axum router integration
//!
//! Mounts the coordinator behind a JSON HTTP surface:
//!
//! - `POST   /requests`               create a verification request
//! - `POST   /requests/{id}/verify`   submit one recipient's comparison
//! - `GET    /requests/{id}`          read-only progress
//! - `DELETE /requests/{id}`          early cancellation
//! - `POST   /sessions/{id}/cleanup`  session-wide cleanup
//! - `GET    /health`                 liveness + audit database check

use crate::audit_storage::AuditStorage;
use crate::comparator::{CosineComparator, VerificationComparator};
use crate::coordinator::RequestCoordinator;
use crate::dispatch::{LoggingPushChannel, OutboundQueue};
use crate::error::VerificationError;
use crate::model::{
    CancelOutcome, CleanupOutcome, CreateOutcome, CreateParams, StatusOutcome, VerifyOutcome,
    VerifyParams,
};
use crate::ratelimit::ip_rate_limiter;
use crate::roster::{RosterResolver, StaticRosterResolver};
use crate::state_store::MemoryStateStore;
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use rollcall_common::config::RollcallConfig;
use rollcall_common::types::{RequestId, SessionId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Verification service state (for Axum State)
#[derive(Clone)]
pub struct VerificationState {
    pub coordinator: Arc<RequestCoordinator>,
    pub audit: AuditStorage,
    pub store: Arc<MemoryStateStore>,
}

/// Create the verification router with in-process collaborators
///
/// Uses the static roster and the cosine comparator with an empty
/// enrollment table; suitable for standalone deployments where requests
/// carry explicit recipient lists and enrollment happens elsewhere.
pub async fn create_verification_router(config: &RollcallConfig) -> Result<Router> {
    create_verification_router_with_collaborators(
        config,
        Arc::new(StaticRosterResolver::new()),
        Arc::new(CosineComparator::new()),
    )
    .await
}

/// Create the verification router with caller-provided collaborators
pub async fn create_verification_router_with_collaborators(
    config: &RollcallConfig,
    roster: Arc<dyn RosterResolver>,
    comparator: Arc<dyn VerificationComparator>,
) -> Result<Router> {
    info!("Creating verification router");

    if !config.sqlite_path.exists() {
        std::fs::create_dir_all(&config.sqlite_path).with_context(|| {
            format!(
                "Failed to create SQLite data directory: {}",
                config.sqlite_path.display()
            )
        })?;
    }
    let db_file = config.sqlite_path.join("verification_audit.db");
    let audit = AuditStorage::new(&db_file)
        .await
        .with_context(|| format!("Failed to open audit database: {}", db_file.display()))?;
    info!("Audit database ready at: {}", db_file.display());

    let store = Arc::new(MemoryStateStore::new());
    let dispatcher = Arc::new(OutboundQueue::start(Arc::new(LoggingPushChannel)));

    // Periodic sweep of expired ephemeral entries. Lazy expiry keeps the
    // semantics; the sweep only reclaims memory.
    {
        let store_for_sweep = store.clone();
        let interval_secs = config.verification.sweep_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                store_for_sweep.sweep_expired();
            }
        });
    }

    let coordinator = Arc::new(RequestCoordinator::new(
        store.clone(),
        audit.clone(),
        dispatcher,
        comparator,
        roster,
        config.verification.clone(),
    ));

    let state = VerificationState {
        coordinator,
        audit,
        store,
    };

    let rate_limit = &config.verification.rate_limit;
    let mut router = Router::new()
        .route("/requests", post(create_request))
        .route("/requests/{id}", get(request_status).delete(cancel_request))
        .route("/requests/{id}/verify", post(verify_request))
        .route("/sessions/{id}/cleanup", post(cleanup_session))
        .route("/health", get(health_check))
        .with_state(state);

    if rate_limit.enabled {
        router = router.layer(ip_rate_limiter(rate_limit));
    }

    info!("Verification router created successfully");
    Ok(router)
}

async fn create_request(
    State(state): State<VerificationState>,
    Json(params): Json<CreateParams>,
) -> Result<(StatusCode, Json<CreateOutcome>), VerificationError> {
    let outcome = state.coordinator.create(params).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn verify_request(
    State(state): State<VerificationState>,
    Path(id): Path<String>,
    Json(params): Json<VerifyParams>,
) -> Result<Json<VerifyOutcome>, VerificationError> {
    let outcome = state
        .coordinator
        .verify(&RequestId::new(id), params)
        .await?;
    Ok(Json(outcome))
}

async fn request_status(
    State(state): State<VerificationState>,
    Path(id): Path<String>,
) -> Result<Json<StatusOutcome>, VerificationError> {
    let outcome = state.coordinator.status(&RequestId::new(id)).await?;
    Ok(Json(outcome))
}

async fn cancel_request(
    State(state): State<VerificationState>,
    Path(id): Path<String>,
) -> Result<Json<CancelOutcome>, VerificationError> {
    let outcome = state.coordinator.cancel(&RequestId::new(id)).await?;
    Ok(Json(outcome))
}

async fn cleanup_session(
    State(state): State<VerificationState>,
    Path(id): Path<String>,
) -> Result<Json<CleanupOutcome>, VerificationError> {
    let outcome = state
        .coordinator
        .cleanup_session(&SessionId::new(id))
        .await?;
    Ok(Json(outcome))
}

/// Health check endpoint
///
/// Checks the audit database connection and reports ephemeral store
/// occupancy.
async fn health_check(State(state): State<VerificationState>) -> Json<Value> {
    let mut checks = json!({
        "service": "verification",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "healthy"
    });

    match state.audit.health_check().await {
        Ok(()) => {
            checks["database"] = json!("ok");
        }
        Err(e) => {
            error!("Audit database health check failed: {}", e);
            checks["status"] = json!("degraded");
            checks["database"] = json!("failed");
        }
    }

    let stats = state.store.stats();
    checks["ephemeral"] = json!({
        "live_requests": stats.live_requests,
        "live_sessions": stats.live_sessions,
        "live_receipts": stats.live_receipts,
    });

    Json(checks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_builds_with_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = RollcallConfig {
            sqlite_path: temp_dir.path().to_path_buf(),
            ..RollcallConfig::default()
        };

        let router = create_verification_router(&config).await;
        assert!(router.is_ok());
    }
}
