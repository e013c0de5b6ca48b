//! Roster resolution seam
//!
//! Maps a scope reference (e.g. a class section) to the identities
//! required to verify. The authoritative roster lives in the surrounding
//! HR platform; [`StaticRosterResolver`] is the in-process implementation
//! used by tests and standalone deployments.

use async_trait::async_trait;
use rollcall_common::types::RecipientId;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Roster resolution errors
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Scope not found: {scope_ref}")]
    ScopeNotFound { scope_ref: String },

    #[error("Roster backend error: {message}")]
    Backend { message: String },
}

/// Resolves a scope reference to its recipient identities
#[async_trait]
pub trait RosterResolver: Send + Sync {
    async fn resolve(&self, scope_ref: &str) -> Result<Vec<RecipientId>, RosterError>;
}

/// In-memory roster table
#[derive(Default)]
pub struct StaticRosterResolver {
    rosters: RwLock<HashMap<String, Vec<RecipientId>>>,
}

impl StaticRosterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the roster of a scope
    pub async fn insert(&self, scope_ref: impl Into<String>, recipients: Vec<RecipientId>) {
        self.rosters.write().await.insert(scope_ref.into(), recipients);
    }
}

#[async_trait]
impl RosterResolver for StaticRosterResolver {
    async fn resolve(&self, scope_ref: &str) -> Result<Vec<RecipientId>, RosterError> {
        self.rosters
            .read()
            .await
            .get(scope_ref)
            .cloned()
            .ok_or_else(|| RosterError::ScopeNotFound {
                scope_ref: scope_ref.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_known_scope() {
        let resolver = StaticRosterResolver::new();
        resolver
            .insert("class-42", vec![RecipientId::new("u1"), RecipientId::new("u2")])
            .await;

        let recipients = resolver.resolve("class-42").await.unwrap();
        assert_eq!(recipients.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_scope_fails() {
        let resolver = StaticRosterResolver::new();
        let result = resolver.resolve("class-404").await;
        assert!(matches!(result, Err(RosterError::ScopeNotFound { .. })));
    }
}
