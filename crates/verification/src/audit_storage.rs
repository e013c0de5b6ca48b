//! Durable verification audit store
//!
//! # Data model
//!
//! ```sql
//! CREATE TABLE verification_audit (
//!     request_id      TEXT NOT NULL,
//!     recipient_id    TEXT NOT NULL,
//!     initiator_id    TEXT NOT NULL,
//!     session_id      TEXT NOT NULL,
//!     scope_ref       TEXT,
//!     threshold       REAL NOT NULL,
//!     expires_at      INTEGER NOT NULL,   -- Unix timestamp
//!     notification_id TEXT,
//!     status          TEXT NOT NULL,      -- PENDING/COMPLETED_MATCH/...
//!     created_at      INTEGER NOT NULL,
//!     updated_at      INTEGER NOT NULL,
//!     PRIMARY KEY (request_id, recipient_id)
//! )
//! ```
//!
//! One row per (request, recipient), created at request-creation time.
//! This is the system of record once the ephemeral keys expire; rows are
//! never deleted here. Status transitions are guarded in SQL
//! (`WHERE status IN (...)`) so concurrent writers sharing the database
//! cannot double-complete a row.
//!
//! Uses a sqlx connection pool with WAL mode for concurrent read
//! performance, the same shape as the other Rollcall SQLite stores.

use crate::model::{AuditRecord, AuditStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rollcall_common::types::{
    InitiatorId, NotificationId, RecipientId, RequestId, SessionId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Audit repository over a SQLite pool
#[derive(Clone)]
pub struct AuditStorage {
    pool: SqlitePool,
}

impl AuditStorage {
    /// Create or open the audit database file
    pub async fn new<P: AsRef<Path>>(db_file: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", db_file.as_ref().display()))
                .context("Failed to parse SQLite URL")?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite")?;

        let storage = Self { pool };
        storage.init_schema().await?;

        info!("Audit storage initialized (WAL mode, max_connections=10)");
        Ok(storage)
    }

    /// Open an in-memory database, for tests
    ///
    /// A single connection, since every in-memory connection is its own
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Failed to parse in-memory SQLite URL")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite")?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS verification_audit (
                request_id      TEXT NOT NULL,
                recipient_id    TEXT NOT NULL,
                initiator_id    TEXT NOT NULL,
                session_id      TEXT NOT NULL,
                scope_ref       TEXT,
                threshold       REAL NOT NULL,
                expires_at      INTEGER NOT NULL,
                notification_id TEXT,
                status          TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                PRIMARY KEY (request_id, recipient_id)
            );

            CREATE INDEX IF NOT EXISTS idx_audit_session_status
                ON verification_audit(session_id, status);
            CREATE INDEX IF NOT EXISTS idx_audit_request
                ON verification_audit(request_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create verification_audit table")?;

        Ok(())
    }

    /// Insert one row per recipient in a single transaction
    ///
    /// All-or-nothing so request creation can roll back cleanly when the
    /// audit write fails partway.
    pub async fn create_many(&self, records: &[AuditRecord]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin audit transaction")?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO verification_audit (
                    request_id, recipient_id, initiator_id, session_id,
                    scope_ref, threshold, expires_at, notification_id,
                    status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(record.request_id.as_str())
            .bind(record.recipient_id.as_str())
            .bind(record.initiator_id.as_str())
            .bind(record.session_id.as_str())
            .bind(record.scope_ref.as_deref())
            .bind(record.threshold)
            .bind(record.expires_at.timestamp())
            .bind(record.notification_id.as_ref().map(|n| n.as_str()))
            .bind(record.status.as_str())
            .bind(record.created_at.timestamp())
            .bind(record.updated_at.timestamp())
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert audit row: request={} recipient={}",
                    record.request_id, record.recipient_id
                )
            })?;
        }

        tx.commit().await.context("Failed to commit audit rows")?;

        debug!("Inserted {} audit rows", records.len());
        Ok(())
    }

    /// Record the dispatch id returned by the notification channel
    pub async fn set_notification_id(
        &self,
        request_id: &RequestId,
        recipient_id: &RecipientId,
        notification_id: &NotificationId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE verification_audit
            SET notification_id = ?1, updated_at = ?2
            WHERE request_id = ?3 AND recipient_id = ?4
            "#,
        )
        .bind(notification_id.as_str())
        .bind(Utc::now().timestamp())
        .bind(request_id.as_str())
        .bind(recipient_id.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to record notification id")?;

        Ok(())
    }

    /// Conditionally transition one row to `status`
    ///
    /// Allowed transitions: PENDING → any terminal state, and
    /// COMPLETED_NOMATCH → COMPLETED_MATCH (a retry after a failed
    /// attempt may succeed). Returns whether a row actually changed, so
    /// racing completions resolve to exactly one winner.
    pub async fn update_status(
        &self,
        request_id: &RequestId,
        recipient_id: &RecipientId,
        status: AuditStatus,
    ) -> Result<bool> {
        let allowed_from: &[&str] = match status {
            AuditStatus::CompletedMatch => &["PENDING", "COMPLETED_NOMATCH"],
            AuditStatus::CompletedNoMatch => &["PENDING"],
            AuditStatus::Cancelled => &["PENDING"],
            AuditStatus::Pending => return Ok(false),
        };

        // allowed_from has at most two entries, bind both slots
        let from_a = allowed_from[0];
        let from_b = allowed_from.get(1).copied().unwrap_or(from_a);

        let rows_affected = sqlx::query(
            r#"
            UPDATE verification_audit
            SET status = ?1, updated_at = ?2
            WHERE request_id = ?3 AND recipient_id = ?4
              AND status IN (?5, ?6)
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(request_id.as_str())
        .bind(recipient_id.as_str())
        .bind(from_a)
        .bind(from_b)
        .execute(&self.pool)
        .await
        .context("Failed to update audit status")?
        .rows_affected();

        debug!(
            request_id = %request_id,
            recipient_id = %recipient_id,
            status = status.as_str(),
            updated = rows_affected > 0,
            "Audit status transition"
        );

        Ok(rows_affected > 0)
    }

    /// Cancel every still-pending row of one request
    pub async fn cancel_by_request_id(&self, request_id: &RequestId) -> Result<u64> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE verification_audit
            SET status = 'CANCELLED', updated_at = ?1
            WHERE request_id = ?2 AND status = 'PENDING'
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(request_id.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to cancel audit rows by request")?
        .rows_affected();

        Ok(rows_affected)
    }

    /// Cancel every still-pending row of one session
    pub async fn cancel_by_session_id(&self, session_id: &SessionId) -> Result<u64> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE verification_audit
            SET status = 'CANCELLED', updated_at = ?1
            WHERE session_id = ?2 AND status = 'PENDING'
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to cancel audit rows by session")?
        .rows_affected();

        Ok(rows_affected)
    }

    /// All pending rows of one session
    pub async fn find_active_by_session_id(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT request_id, recipient_id, initiator_id, session_id,
                   scope_ref, threshold, expires_at, notification_id,
                   status, created_at, updated_at
            FROM verification_audit
            WHERE session_id = ?1 AND status = 'PENDING'
            ORDER BY request_id, recipient_id
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query pending audit rows by session")?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// All rows of one request, regardless of status
    pub async fn find_by_request_id(&self, request_id: &RequestId) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT request_id, recipient_id, initiator_id, session_id,
                   scope_ref, threshold, expires_at, notification_id,
                   status, created_at, updated_at
            FROM verification_audit
            WHERE request_id = ?1
            ORDER BY recipient_id
            "#,
        )
        .bind(request_id.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query audit rows by request")?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Health check: verify the connection pool answers a trivial query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Audit database health check failed")?;
        Ok(())
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<AuditRecord> {
    let status_str: String = row.get("status");
    let status = AuditStatus::parse(&status_str)
        .with_context(|| format!("Invalid audit status in database: {status_str}"))?;

    Ok(AuditRecord {
        request_id: RequestId::new(row.get::<String, _>("request_id")),
        recipient_id: RecipientId::new(row.get::<String, _>("recipient_id")),
        initiator_id: InitiatorId::new(row.get::<String, _>("initiator_id")),
        session_id: SessionId::new(row.get::<String, _>("session_id")),
        scope_ref: row.get::<Option<String>, _>("scope_ref"),
        threshold: row.get::<f64, _>("threshold"),
        expires_at: timestamp_to_datetime(row.get::<i64, _>("expires_at")),
        notification_id: row
            .get::<Option<String>, _>("notification_id")
            .map(NotificationId::new),
        status,
        created_at: timestamp_to_datetime(row.get::<i64, _>("created_at")),
        updated_at: timestamp_to_datetime(row.get::<i64, _>("updated_at")),
    })
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn make_record(request: &str, recipient: &str) -> AuditRecord {
        let now = Utc::now();
        AuditRecord {
            request_id: RequestId::new(request),
            recipient_id: RecipientId::new(recipient),
            initiator_id: InitiatorId::new("lecturer-1"),
            session_id: SessionId::new("s1"),
            scope_ref: Some("class-42".to_string()),
            threshold: 0.75,
            expires_at: now + ChronoDuration::minutes(30),
            notification_id: None,
            status: AuditStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let storage = AuditStorage::in_memory().await.unwrap();
        let records = vec![make_record("r1", "u1"), make_record("r1", "u2")];

        storage.create_many(&records).await.unwrap();

        let loaded = storage
            .find_by_request_id(&RequestId::new("r1"))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].status, AuditStatus::Pending);
        assert_eq!(loaded[0].scope_ref.as_deref(), Some("class-42"));
    }

    #[tokio::test]
    async fn test_update_status_guards() {
        let storage = AuditStorage::in_memory().await.unwrap();
        storage
            .create_many(&[make_record("r1", "u1")])
            .await
            .unwrap();
        let request = RequestId::new("r1");
        let recipient = RecipientId::new("u1");

        // first completion wins
        assert!(
            storage
                .update_status(&request, &recipient, AuditStatus::CompletedMatch)
                .await
                .unwrap()
        );
        // a second completion of either kind changes nothing
        assert!(
            !storage
                .update_status(&request, &recipient, AuditStatus::CompletedMatch)
                .await
                .unwrap()
        );
        assert!(
            !storage
                .update_status(&request, &recipient, AuditStatus::CompletedNoMatch)
                .await
                .unwrap()
        );
        // a completed row cannot be cancelled
        assert!(
            !storage
                .update_status(&request, &recipient, AuditStatus::Cancelled)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_no_match_can_upgrade_to_match() {
        let storage = AuditStorage::in_memory().await.unwrap();
        storage
            .create_many(&[make_record("r1", "u1")])
            .await
            .unwrap();
        let request = RequestId::new("r1");
        let recipient = RecipientId::new("u1");

        assert!(
            storage
                .update_status(&request, &recipient, AuditStatus::CompletedNoMatch)
                .await
                .unwrap()
        );
        // a retry that matches records the final outcome
        assert!(
            storage
                .update_status(&request, &recipient, AuditStatus::CompletedMatch)
                .await
                .unwrap()
        );
        // but never the other way around
        assert!(
            !storage
                .update_status(&request, &recipient, AuditStatus::CompletedNoMatch)
                .await
                .unwrap()
        );

        let loaded = storage.find_by_request_id(&request).await.unwrap();
        assert_eq!(loaded[0].status, AuditStatus::CompletedMatch);
    }

    #[tokio::test]
    async fn test_cancel_by_request_only_touches_pending() {
        let storage = AuditStorage::in_memory().await.unwrap();
        storage
            .create_many(&[
                make_record("r1", "u1"),
                make_record("r1", "u2"),
                make_record("r1", "u3"),
            ])
            .await
            .unwrap();
        let request = RequestId::new("r1");

        storage
            .update_status(&request, &RecipientId::new("u1"), AuditStatus::CompletedMatch)
            .await
            .unwrap();

        let cancelled = storage.cancel_by_request_id(&request).await.unwrap();
        assert_eq!(cancelled, 2);

        let loaded = storage.find_by_request_id(&request).await.unwrap();
        let statuses: Vec<AuditStatus> = loaded.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                AuditStatus::CompletedMatch,
                AuditStatus::Cancelled,
                AuditStatus::Cancelled
            ]
        );

        // second cancel is a no-op
        assert_eq!(storage.cancel_by_request_id(&request).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_by_session_spans_requests() {
        let storage = AuditStorage::in_memory().await.unwrap();
        let mut second = make_record("r2", "u3");
        second.session_id = SessionId::new("s1");
        storage
            .create_many(&[make_record("r1", "u1"), make_record("r1", "u2"), second])
            .await
            .unwrap();

        let cancelled = storage
            .cancel_by_session_id(&SessionId::new("s1"))
            .await
            .unwrap();
        assert_eq!(cancelled, 3);

        let active = storage
            .find_active_by_session_id(&SessionId::new("s1"))
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_find_active_by_session() {
        let storage = AuditStorage::in_memory().await.unwrap();
        let mut other = make_record("r2", "u9");
        other.session_id = SessionId::new("s2");
        storage
            .create_many(&[make_record("r1", "u1"), make_record("r1", "u2"), other])
            .await
            .unwrap();

        storage
            .update_status(
                &RequestId::new("r1"),
                &RecipientId::new("u1"),
                AuditStatus::CompletedMatch,
            )
            .await
            .unwrap();

        let active = storage
            .find_active_by_session_id(&SessionId::new("s1"))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].recipient_id, RecipientId::new("u2"));
    }

    #[tokio::test]
    async fn test_notification_id_round_trip() {
        let storage = AuditStorage::in_memory().await.unwrap();
        storage
            .create_many(&[make_record("r1", "u1")])
            .await
            .unwrap();

        let nid = NotificationId::generate();
        storage
            .set_notification_id(&RequestId::new("r1"), &RecipientId::new("u1"), &nid)
            .await
            .unwrap();

        let loaded = storage
            .find_by_request_id(&RequestId::new("r1"))
            .await
            .unwrap();
        assert_eq!(loaded[0].notification_id.as_ref(), Some(&nid));
    }

    #[tokio::test]
    async fn test_file_backed_storage() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let storage = AuditStorage::new(temp_file.path()).await.unwrap();

        storage
            .create_many(&[make_record("r1", "u1")])
            .await
            .unwrap();
        storage.health_check().await.unwrap();

        let loaded = storage
            .find_by_request_id(&RequestId::new("r1"))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
