//! Biometric comparison seam
//!
//! The matching algorithm itself is outside this subsystem; the
//! coordinator only needs a black-box [`VerificationComparator`].
//! [`CosineComparator`] is the shipped implementation: cosine similarity
//! between the live capture and the enrolled embedding of the recipient.

use async_trait::async_trait;
use rollcall_common::types::RecipientId;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Comparison errors
#[derive(Error, Debug)]
pub enum ComparatorError {
    #[error("No enrolled embedding for recipient {recipient_id}")]
    UnknownRecipient { recipient_id: RecipientId },

    #[error("Feature vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid feature vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Comparison backend error: {message}")]
    Backend { message: String },
}

/// Result of one biometric comparison
#[derive(Debug, Clone, Copy)]
pub struct Comparison {
    pub matched: bool,
    pub similarity: f64,
}

/// Black-box comparison of a live capture against a recipient's identity
#[async_trait]
pub trait VerificationComparator: Send + Sync {
    async fn compare(
        &self,
        recipient_id: &RecipientId,
        feature_vector: &[f64],
        threshold: f64,
    ) -> Result<Comparison, ComparatorError>;
}

/// Cosine-similarity comparator over enrolled embeddings
#[derive(Default)]
pub struct CosineComparator {
    enrolled: RwLock<HashMap<RecipientId, Vec<f64>>>,
}

impl CosineComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the enrolled embedding of a recipient
    pub async fn enroll(&self, recipient_id: RecipientId, embedding: Vec<f64>) {
        debug!(
            recipient_id = %recipient_id,
            dimensions = embedding.len(),
            "Enrolled embedding"
        );
        self.enrolled.write().await.insert(recipient_id, embedding);
    }
}

#[async_trait]
impl VerificationComparator for CosineComparator {
    async fn compare(
        &self,
        recipient_id: &RecipientId,
        feature_vector: &[f64],
        threshold: f64,
    ) -> Result<Comparison, ComparatorError> {
        let enrolled = self.enrolled.read().await;
        let reference =
            enrolled
                .get(recipient_id)
                .ok_or_else(|| ComparatorError::UnknownRecipient {
                    recipient_id: recipient_id.clone(),
                })?;

        if reference.len() != feature_vector.len() {
            return Err(ComparatorError::DimensionMismatch {
                expected: reference.len(),
                actual: feature_vector.len(),
            });
        }

        let similarity = cosine_similarity(reference, feature_vector)?;
        Ok(Comparison {
            matched: similarity >= threshold,
            similarity,
        })
    }
}

/// Cosine similarity of two same-length vectors
fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, ComparatorError> {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(ComparatorError::InvalidVector {
            reason: "zero-magnitude vector".to_string(),
        });
    }

    Ok(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_vectors_match() {
        let comparator = CosineComparator::new();
        let u1 = RecipientId::new("u1");
        comparator.enroll(u1.clone(), vec![0.2, 0.4, 0.6]).await;

        let result = comparator
            .compare(&u1, &[0.2, 0.4, 0.6], 0.9)
            .await
            .unwrap();
        assert!(result.matched);
        assert!((result.similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_orthogonal_vectors_do_not_match() {
        let comparator = CosineComparator::new();
        let u1 = RecipientId::new("u1");
        comparator.enroll(u1.clone(), vec![1.0, 0.0]).await;

        let result = comparator.compare(&u1, &[0.0, 1.0], 0.5).await.unwrap();
        assert!(!result.matched);
        assert!(result.similarity.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_threshold_boundary_is_inclusive() {
        let comparator = CosineComparator::new();
        let u1 = RecipientId::new("u1");
        comparator.enroll(u1.clone(), vec![1.0, 0.0]).await;

        // similarity is exactly 1.0 against the same direction
        let result = comparator.compare(&u1, &[2.0, 0.0], 1.0).await.unwrap();
        assert!(result.matched, "similarity == threshold must match");
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let comparator = CosineComparator::new();
        let result = comparator
            .compare(&RecipientId::new("ghost"), &[1.0], 0.5)
            .await;
        assert!(matches!(
            result,
            Err(ComparatorError::UnknownRecipient { .. })
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let comparator = CosineComparator::new();
        let u1 = RecipientId::new("u1");
        comparator.enroll(u1.clone(), vec![1.0, 0.0, 0.0]).await;

        let result = comparator.compare(&u1, &[1.0, 0.0], 0.5).await;
        assert!(matches!(
            result,
            Err(ComparatorError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_zero_vector_rejected() {
        let comparator = CosineComparator::new();
        let u1 = RecipientId::new("u1");
        comparator.enroll(u1.clone(), vec![1.0, 0.0]).await;

        let result = comparator.compare(&u1, &[0.0, 0.0], 0.5).await;
        assert!(matches!(result, Err(ComparatorError::InvalidVector { .. })));
    }
}
