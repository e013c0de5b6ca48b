//! Outbound notification queue
//!
//! ## Design
//!
//! Notification delivery is best-effort and must never sit on the
//! coordinator's hot path. [`OutboundQueue::dispatch`] assigns a dispatch
//! id, enqueues the job on an unbounded channel and returns immediately;
//! a background worker drains the queue into a [`PushChannel`].
//!
//! Delivery is at-least-once from the queue's perspective: a failed push
//! is retried once and then dropped with a warning. The coordinator's
//! correctness never depends on a push completing or succeeding; a
//! recipient who never received one can still verify against the request
//! if they learn the request id out of band.

use async_trait::async_trait;
use rollcall_common::types::{NotificationId, RecipientId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum delivery attempts per job (initial try + one retry)
const MAX_DISPATCH_ATTEMPTS: u32 = 2;

/// One outbound push message
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient_id: RecipientId,
    pub title: String,
    pub body: String,
    /// Structured payload forwarded to the push channel (request id,
    /// session id, deadline)
    pub metadata: serde_json::Value,
}

/// Transport that actually delivers a push to one recipient
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn push(
        &self,
        notification_id: &NotificationId,
        notification: &Notification,
    ) -> anyhow::Result<()>;
}

/// Non-blocking dispatch seam used by the coordinator
pub trait NotificationDispatcher: Send + Sync {
    /// Enqueue a push and return its dispatch id immediately
    fn dispatch(&self, notification: Notification) -> NotificationId;
}

#[derive(Debug)]
struct OutboundJob {
    notification_id: NotificationId,
    notification: Notification,
    attempt: u32,
}

/// Queue-backed dispatcher with a single drain worker
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundJob>,
}

impl OutboundQueue {
    /// Start the drain worker and return the dispatcher handle
    pub fn start(channel: Arc<dyn PushChannel>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundJob>();
        let retry_tx = tx.clone();

        tokio::spawn(async move {
            while let Some(mut job) = rx.recv().await {
                match channel
                    .push(&job.notification_id, &job.notification)
                    .await
                {
                    Ok(()) => {
                        debug!(
                            notification_id = %job.notification_id,
                            recipient_id = %job.notification.recipient_id,
                            "Notification delivered"
                        );
                    }
                    Err(e) if job.attempt + 1 < MAX_DISPATCH_ATTEMPTS => {
                        warn!(
                            notification_id = %job.notification_id,
                            recipient_id = %job.notification.recipient_id,
                            error = %e,
                            "Notification push failed, requeueing"
                        );
                        job.attempt += 1;
                        let _ = retry_tx.send(job);
                    }
                    Err(e) => {
                        warn!(
                            notification_id = %job.notification_id,
                            recipient_id = %job.notification.recipient_id,
                            error = %e,
                            "Notification push failed, giving up"
                        );
                    }
                }
            }
        });

        Self { tx }
    }
}

impl NotificationDispatcher for OutboundQueue {
    fn dispatch(&self, notification: Notification) -> NotificationId {
        let notification_id = NotificationId::generate();
        let job = OutboundJob {
            notification_id: notification_id.clone(),
            notification,
            attempt: 0,
        };
        if self.tx.send(job).is_err() {
            // The worker is gone (shutdown). Dispatch stays best-effort.
            warn!("Outbound queue worker is not running, notification dropped");
        }
        notification_id
    }
}

/// Push channel that only logs
///
/// Stands in for the platform's push gateway in standalone deployments.
pub struct LoggingPushChannel;

#[async_trait]
impl PushChannel for LoggingPushChannel {
    async fn push(
        &self,
        notification_id: &NotificationId,
        notification: &Notification,
    ) -> anyhow::Result<()> {
        info!(
            notification_id = %notification_id,
            recipient_id = %notification.recipient_id,
            title = %notification.title,
            "Push notification (logging channel)"
        );
        Ok(())
    }
}
