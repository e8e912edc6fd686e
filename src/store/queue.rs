//! # Pending-Operation Queue
//!
//! Durable, ordered record of mutations awaiting server acknowledgment. The
//! queue is the single source of truth for "what has not yet reached the
//! server"; an operation leaves it only on a positive acknowledgment (or an
//! explicit user cancel of a terminally failed item).
//!
//! ## Mirror
//!
//! The queue keeps an in-memory mirror of its rows, loaded once at open.
//! All reads (`peek_all`, `size`) are served from the mirror, and every
//! durable write is best-effort: if SQLite rejects a write, the operation
//! stays in the mirror for the rest of the session. Degraded, but never
//! lost mid-session.
//!
//! ## Retry Tracking
//!
//! Server rejections bump `retry_count`; past the configured bound the item
//! moves to the terminal `failed` status and waits for manual resolution.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Result as SqlxResult, Row, SqlitePool};
use uuid::Uuid;

use crate::model::{OperationKind, OperationStatus, PendingOperation};

/// Durable FIFO of not-yet-acknowledged mutations
#[derive(Debug, Clone)]
pub struct OperationQueue {
    pool: SqlitePool,
    mirror: Arc<Mutex<Vec<PendingOperation>>>,
    max_retries: i32,
}

impl OperationQueue {
    /// Open the queue and load its in-memory mirror from the database
    ///
    /// Rows that fail to parse (unknown kind, corrupt payload) are skipped,
    /// not fatal: a corrupt persisted document is treated as absent.
    pub(crate) async fn open(pool: SqlitePool, max_retries: i32) -> SqlxResult<Self> {
        let rows = sqlx::query(
            "SELECT queue_id, resource, kind, target_id, payload, enqueued_at,
                    retry_count, last_attempt, error_message, status
             FROM pending_queue
             ORDER BY seq ASC",
        )
        .fetch_all(&pool)
        .await?;

        let mut mirror = Vec::with_capacity(rows.len());
        for row in rows {
            match Self::parse_row(&row) {
                Some(op) => mirror.push(op),
                None => {
                    tracing::warn!("skipping unreadable pending-queue row");
                }
            }
        }
        tracing::debug!(pending = mirror.len(), "pending queue loaded");

        Ok(Self {
            pool,
            mirror: Arc::new(Mutex::new(mirror)),
            max_retries,
        })
    }

    /// Append a mutation to the queue
    ///
    /// The mirror append happens before the durable write, so the operation
    /// exists for the session even when the write fails. Returns the new
    /// queue id; queue ids are never reused.
    pub async fn enqueue(
        &self,
        resource: &str,
        kind: OperationKind,
        target_id: Option<String>,
        payload: Value,
    ) -> String {
        let op = PendingOperation {
            queue_id: Uuid::new_v4().to_string(),
            enqueued_at: Utc::now(),
            resource: resource.to_string(),
            kind,
            target_id,
            payload,
            retry_count: 0,
            last_attempt: None,
            error_message: None,
            status: OperationStatus::Pending,
        };
        let queue_id = op.queue_id.clone();
        self.mirror.lock().expect("queue mirror lock").push(op.clone());

        let payload_text = op.payload.to_string();
        let result = sqlx::query(
            "INSERT INTO pending_queue
                 (queue_id, resource, kind, target_id, payload, enqueued_at, retry_count, status)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&op.queue_id)
        .bind(&op.resource)
        .bind(op.kind.as_str())
        .bind(&op.target_id)
        .bind(&payload_text)
        .bind(op.enqueued_at.to_rfc3339())
        .bind(op.status.as_str())
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(
                queue_id = %queue_id,
                "durable enqueue failed, operation kept in memory only for this session: {err}"
            );
        }
        queue_id
    }

    /// Snapshot of the queue contents in enqueue order; does not mutate
    pub fn peek_all(&self) -> Vec<PendingOperation> {
        self.mirror.lock().expect("queue mirror lock").clone()
    }

    /// Number of queued operations, terminal failures included
    pub fn size(&self) -> usize {
        self.mirror.lock().expect("queue mirror lock").len()
    }

    /// Remove an acknowledged operation
    ///
    /// Idempotent: removing an unknown id is a no-op, which guards against
    /// double-ack races.
    pub async fn remove(&self, queue_id: &str) {
        self.mirror
            .lock()
            .expect("queue mirror lock")
            .retain(|op| op.queue_id != queue_id);

        if let Err(err) = sqlx::query("DELETE FROM pending_queue WHERE queue_id = ?")
            .bind(queue_id)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(queue_id, "durable dequeue failed: {err}");
        }
    }

    /// Record a server rejection against an operation
    ///
    /// Bumps the retry count; past the bound the item moves to the terminal
    /// `failed` status and is surfaced through [`failed_operations`].
    ///
    /// [`failed_operations`]: Self::failed_operations
    pub async fn mark_attempt(&self, queue_id: &str, error: &str) {
        let now = Utc::now();
        let mut updated: Option<(i32, OperationStatus)> = None;
        {
            let mut mirror = self.mirror.lock().expect("queue mirror lock");
            if let Some(op) = mirror.iter_mut().find(|op| op.queue_id == queue_id) {
                op.retry_count += 1;
                op.last_attempt = Some(now);
                op.error_message = Some(error.to_string());
                if op.retry_count >= self.max_retries {
                    op.status = OperationStatus::Failed;
                }
                updated = Some((op.retry_count, op.status));
            }
        }

        let Some((retry_count, status)) = updated else {
            return;
        };
        if status == OperationStatus::Failed {
            tracing::warn!(
                queue_id,
                retry_count,
                "operation exhausted its retries, needs manual resolution: {error}"
            );
        } else {
            tracing::debug!(queue_id, retry_count, "operation rejected, will retry: {error}");
        }

        if let Err(err) = sqlx::query(
            "UPDATE pending_queue
             SET retry_count = ?, last_attempt = ?, error_message = ?, status = ?
             WHERE queue_id = ?",
        )
        .bind(retry_count)
        .bind(now.to_rfc3339())
        .bind(error)
        .bind(status.as_str())
        .bind(queue_id)
        .execute(&self.pool)
        .await
        {
            tracing::warn!(queue_id, "durable retry update failed: {err}");
        }
    }

    /// Drop an operation after manual resolution by the user
    pub async fn cancel(&self, queue_id: &str) {
        tracing::info!(queue_id, "operation cancelled by user");
        self.remove(queue_id).await;
    }

    /// Operations in the terminal `failed` state, for the UI to surface
    pub fn failed_operations(&self) -> Vec<PendingOperation> {
        self.mirror
            .lock()
            .expect("queue mirror lock")
            .iter()
            .filter(|op| op.status == OperationStatus::Failed)
            .cloned()
            .collect()
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Option<PendingOperation> {
        let kind: String = row.try_get("kind").ok()?;
        let status: String = row.try_get("status").ok()?;
        let payload: String = row.try_get("payload").ok()?;
        let enqueued_at: String = row.try_get("enqueued_at").ok()?;
        let last_attempt: Option<String> = row.try_get("last_attempt").ok()?;

        Some(PendingOperation {
            queue_id: row.try_get("queue_id").ok()?,
            enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
                .ok()?
                .with_timezone(&Utc),
            resource: row.try_get("resource").ok()?,
            kind: OperationKind::parse(&kind)?,
            target_id: row.try_get("target_id").ok()?,
            payload: serde_json::from_str(&payload).ok()?,
            retry_count: row.try_get("retry_count").ok()?,
            last_attempt: last_attempt
                .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
            error_message: row.try_get("error_message").ok()?,
            status: OperationStatus::parse(&status)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::store::test_util::temp_store;
    use serde_json::json;

    #[tokio::test]
    async fn test_fifo_order() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let queue = store.queue(&config).await.unwrap();

        let first = queue
            .enqueue("orders", OperationKind::Create, None, json!({"id": "o-1"}))
            .await;
        let second = queue
            .enqueue(
                "orders",
                OperationKind::Update,
                Some("o-1".to_string()),
                json!({"state": "done"}),
            )
            .await;

        let ops = queue.peek_all();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].queue_id, first);
        assert_eq!(ops[1].queue_id, second);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let queue = store.queue(&config).await.unwrap();

        let id = queue
            .enqueue("clients", OperationKind::Create, None, json!({"id": "c-1"}))
            .await;
        queue.remove(&id).await;
        assert_eq!(queue.size(), 0);

        // Second remove of the same id, and a remove of an unknown id
        queue.remove(&id).await;
        queue.remove("never-enqueued").await;
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let queue = store.queue(&config).await.unwrap();

        queue
            .enqueue("machines", OperationKind::Create, None, json!({"id": "m-1"}))
            .await;
        queue
            .enqueue(
                "machines",
                OperationKind::Delete,
                Some("m-0".to_string()),
                json!({"id": "m-0"}),
            )
            .await;

        // Simulated app restart: a fresh mirror loaded from the same database
        let reopened = store.queue(&config).await.unwrap();
        let ops = reopened.peek_all();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OperationKind::Create);
        assert_eq!(ops[1].kind, OperationKind::Delete);
        assert_eq!(ops[1].target_id.as_deref(), Some("m-0"));
    }

    #[tokio::test]
    async fn test_retry_bound_moves_to_failed() {
        let mut config = SyncConfig::default();
        config.max_retries = 2;
        let (_dir, store) = temp_store(&mut config).await;
        let queue = store.queue(&config).await.unwrap();

        let id = queue
            .enqueue("reports", OperationKind::Create, None, json!({"id": "r-1"}))
            .await;

        queue.mark_attempt(&id, "validation: missing checklist").await;
        assert!(queue.failed_operations().is_empty());

        queue.mark_attempt(&id, "validation: missing checklist").await;
        let failed = queue.failed_operations();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 2);
        assert_eq!(
            failed[0].error_message.as_deref(),
            Some("validation: missing checklist")
        );

        // Failed items still count as queued until cancelled
        assert_eq!(queue.size(), 1);
        queue.cancel(&id).await;
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_failed_status_survives_reopen() {
        let mut config = SyncConfig::default();
        config.max_retries = 1;
        let (_dir, store) = temp_store(&mut config).await;
        let queue = store.queue(&config).await.unwrap();

        let id = queue
            .enqueue("reports", OperationKind::Update, Some("r-1".to_string()), json!({}))
            .await;
        queue.mark_attempt(&id, "rejected").await;

        let reopened = store.queue(&config).await.unwrap();
        assert_eq!(reopened.failed_operations().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_degrades_when_storage_is_gone() {
        let mut config = SyncConfig::default();
        let (_dir, store) = temp_store(&mut config).await;
        let queue = store.queue(&config).await.unwrap();

        // Closing the pool makes every durable write fail
        store.pool().close().await;
        let id = queue
            .enqueue("clients", OperationKind::Create, None, json!({"id": "c-9"}))
            .await;

        // The operation still lives in the session mirror
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.peek_all()[0].queue_id, id);
    }
}
