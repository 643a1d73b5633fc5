//! SQLite implementation of the OutboxQueue.
//!
//! Uses the same single-statement lease acquisition as the signal queue.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;

use super::{
    format_timestamp, parse_datetime, parse_optional_datetime, parse_uuid, placeholders, MAX_RETRIES_EXCEEDED,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EntityKind, NewOutboxEntry, OutboxEntry, OutboxOperation, QueueHealth, QueueStatus, ReclaimReport};
use crate::domain::ports::OutboxQueue;

/// [`OutboxQueue`] stored in the `outbox_queue` table.
#[derive(Clone)]
pub struct SqliteOutboxQueue {
    pool: SqlitePool,
}

impl SqliteOutboxQueue {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch one entry by id.
    pub async fn get(&self, id: i64) -> DomainResult<Option<OutboxEntry>> {
        let row: Option<OutboxRow> = sqlx::query_as("SELECT * FROM outbox_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OutboxEntry::try_from).transpose()
    }
}

#[async_trait]
impl OutboxQueue for SqliteOutboxQueue {
    async fn enqueue(&self, entry: &NewOutboxEntry) -> DomainResult<i64> {
        let now = format_timestamp(entry.created_at);
        let mut tx = self.pool.begin().await?;

        // The UPDATE takes the write lock, so the check-then-insert is serialized.
        let coalesced: Option<(i64,)> = sqlx::query_as(
            r#"UPDATE outbox_queue SET operation = ?, updated_at = ?
               WHERE id = (
                   SELECT id FROM outbox_queue
                   WHERE entity_type = ? AND entity_id = ? AND status = 'pending'
                   ORDER BY id LIMIT 1
               )
               RETURNING id"#,
        )
        .bind(entry.operation.as_str())
        .bind(&now)
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let id = if let Some((id,)) = coalesced {
            id
        } else {
            sqlx::query(
                r#"INSERT INTO outbox_queue (user_id, entity_type, entity_id, operation, status, created_at, updated_at)
                   VALUES (?, ?, ?, ?, 'pending', ?, ?)"#,
            )
            .bind(entry.user_id.to_string())
            .bind(entry.entity_type.as_str())
            .bind(entry.entity_id.to_string())
            .bind(entry.operation.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid()
        };

        tx.commit().await?;
        Ok(id)
    }

    async fn acquire_batch(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<OutboxEntry>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let lease_until = format_timestamp(now + lease_duration);
        let now = format_timestamp(now);

        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"UPDATE outbox_queue
               SET status = 'processing', lease_holder = ?, lease_until = ?, updated_at = ?
               WHERE id IN (
                   SELECT id FROM outbox_queue WHERE status = 'pending'
                   ORDER BY created_at, id
                   LIMIT ?
               )
               AND status = 'pending'
               RETURNING *"#,
        )
        .bind(worker_id)
        .bind(&lease_until)
        .bind(&now)
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows.into_iter().map(OutboxEntry::try_from).collect::<DomainResult<Vec<_>>>()?;
        entries.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(entries)
    }

    async fn mark_processed(&self, ids: &[i64], worker_id: &str) -> DomainResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = format_timestamp(Utc::now());
        let sql = format!(
            r#"UPDATE outbox_queue
               SET status = 'processed', processed_at = ?, updated_at = ?,
                   lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_holder = ? AND id IN ({})"#,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(&now).bind(&now).bind(worker_id);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    async fn mark_failed(&self, id: i64, worker_id: &str, error: &str, max_retries: u32) -> DomainResult<bool> {
        let now = format_timestamp(Utc::now());
        let status: Option<(String,)> = sqlx::query_as(
            r#"UPDATE outbox_queue
               SET retry_count = retry_count + 1,
                   status = CASE WHEN retry_count + 1 >= ? THEN 'skipped' ELSE 'pending' END,
                   last_error = CASE WHEN retry_count + 1 >= ? THEN ? || ': ' || ? ELSE ? END,
                   processed_at = CASE WHEN retry_count + 1 >= ? THEN ? ELSE NULL END,
                   updated_at = ?, lease_holder = NULL, lease_until = NULL
               WHERE id = ? AND status = 'processing' AND lease_holder = ?
               RETURNING status"#,
        )
        .bind(i64::from(max_retries))
        .bind(i64::from(max_retries))
        .bind(MAX_RETRIES_EXCEEDED)
        .bind(error)
        .bind(error)
        .bind(i64::from(max_retries))
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        let abandoned = matches!(status, Some((ref s,)) if s == QueueStatus::Skipped.as_str());
        if abandoned {
            tracing::warn!(outbox_id = id, error, "Outbox entry abandoned after exhausting retries");
        }
        Ok(abandoned)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>, max_retries: u32) -> DomainResult<ReclaimReport> {
        let now = format_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let abandoned = sqlx::query(
            r#"UPDATE outbox_queue
               SET status = 'skipped', retry_count = retry_count + 1, last_error = ?,
                   processed_at = ?, updated_at = ?, lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_until < ? AND retry_count + 1 >= ?"#,
        )
        .bind(MAX_RETRIES_EXCEEDED)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .bind(i64::from(max_retries))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let reclaimed = sqlx::query(
            r#"UPDATE outbox_queue
               SET status = 'pending', retry_count = retry_count + 1, reclaim_count = reclaim_count + 1,
                   updated_at = ?, lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_until < ?"#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if reclaimed > 0 || abandoned > 0 {
            tracing::info!(reclaimed, abandoned, "Released expired outbox leases");
        }
        Ok(ReclaimReport { reclaimed, abandoned })
    }

    async fn archive_processed(&self, older_than: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM outbox_queue WHERE status = 'processed' AND processed_at < ?")
            .bind(format_timestamp(older_than))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health(&self, now: DateTime<Utc>) -> DomainResult<QueueHealth> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM outbox_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let counts: HashMap<QueueStatus, u64> = rows
            .into_iter()
            .filter_map(|(status, count)| QueueStatus::from_str(&status).map(|s| (s, count as u64)))
            .collect();

        let (oldest_pending, total_reclaims, abandoned): (Option<String>, i64, i64) = sqlx::query_as(
            r#"SELECT
                 (SELECT MIN(created_at) FROM outbox_queue WHERE status = 'pending'),
                 (SELECT COALESCE(SUM(reclaim_count), 0) FROM outbox_queue),
                 (SELECT COUNT(*) FROM outbox_queue WHERE status = 'skipped' AND last_error LIKE ?)"#,
        )
        .bind(format!("{MAX_RETRIES_EXCEEDED}%"))
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueHealth {
            counts,
            oldest_pending_age_secs: parse_optional_datetime(oldest_pending)?.map(|t| (now - t).num_seconds().max(0)),
            total_reclaims: total_reclaims as u64,
            abandoned: abandoned as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    user_id: String,
    entity_type: String,
    entity_id: String,
    operation: String,
    status: String,
    lease_holder: Option<String>,
    lease_until: Option<String>,
    retry_count: i64,
    reclaim_count: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    processed_at: Option<String>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = DomainError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let entity_type = EntityKind::from_str(&row.entity_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid entity kind: {}", row.entity_type)))?;
        let operation = OutboxOperation::from_str(&row.operation)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid operation: {}", row.operation)))?;
        let status = QueueStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        Ok(OutboxEntry {
            id: row.id,
            user_id: parse_uuid(&row.user_id)?,
            entity_type,
            entity_id: parse_uuid(&row.entity_id)?,
            operation,
            status,
            lease_holder: row.lease_holder,
            lease_until: parse_optional_datetime(row.lease_until)?,
            retry_count: row.retry_count as u32,
            reclaim_count: row.reclaim_count as u32,
            last_error: row.last_error,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            processed_at: parse_optional_datetime(row.processed_at)?,
        })
    }
}
