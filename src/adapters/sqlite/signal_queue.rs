//! SQLite implementation of the SignalQueue.
//!
//! Acquisition is one `UPDATE ... RETURNING` statement. SQLite serializes
//! writers, so a row can only move from `pending` to `processing` once per
//! lease; a concurrent acquisition sees it as already taken and moves on to
//! the next candidates instead of waiting on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;

use super::{
    format_timestamp, parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid, placeholders,
    MAX_RETRIES_EXCEEDED,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AcquireRequest, EntityKind, FailedAttemptReport, NewSignal, QueueHealth, QueueStatus, ReclaimReport, SignalEntry,
    SignalEventType, SignalPriority, WindowType,
};
use crate::domain::ports::SignalQueue;

/// [`SignalQueue`] stored in the `signal_queue` table.
#[derive(Clone)]
pub struct SqliteSignalQueue {
    pool: SqlitePool,
}

impl SqliteSignalQueue {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalQueue for SqliteSignalQueue {
    async fn enqueue(&self, signal: &NewSignal) -> DomainResult<i64> {
        let created_at = format_timestamp(signal.created_at);
        let result = sqlx::query(
            r#"INSERT INTO signal_queue (user_id, event_type, priority, window_type,
               target_entity_type, target_entity_id, status, created_at, updated_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)"#,
        )
        .bind(signal.user_id.to_string())
        .bind(signal.event_type.as_str())
        .bind(signal.priority.rank())
        .bind(signal.window_type.as_str())
        .bind(signal.target_entity_type.map(|k| k.as_str()))
        .bind(signal.target_entity_id.map(|id| id.to_string()))
        .bind(&created_at)
        .bind(&created_at)
        .bind(format_timestamp(signal.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn acquire_batch(&self, request: &AcquireRequest) -> DomainResult<Vec<SignalEntry>> {
        if request.batch_size == 0 {
            return Ok(Vec::new());
        }
        if let Some(windows) = &request.windows {
            if windows.is_empty() {
                return Ok(Vec::new());
            }
        }

        let now = format_timestamp(request.now);
        let lease_until = format_timestamp(request.now + request.lease_duration);

        let window_filter = request
            .windows
            .as_ref()
            .map(|w| format!(" AND window_type IN ({})", placeholders(w.len())))
            .unwrap_or_default();

        let sql = format!(
            r#"UPDATE signal_queue
               SET status = 'processing', lease_holder = ?, lease_until = ?,
                   retry_count = retry_count + 1, updated_at = ?
               WHERE id IN (
                   SELECT id FROM signal_queue
                   WHERE status = 'pending' AND priority <= ? AND expires_at > ?{window_filter}
                   ORDER BY priority, created_at, id
                   LIMIT ?
               )
               AND status = 'pending'
               RETURNING *"#
        );

        let mut query = sqlx::query_as::<_, SignalRow>(&sql)
            .bind(&request.worker_id)
            .bind(&lease_until)
            .bind(&now)
            .bind(request.max_priority.rank())
            .bind(&now);
        if let Some(windows) = &request.windows {
            for window in windows {
                query = query.bind(window.as_str());
            }
        }
        let rows = query.bind(request.batch_size as i64).fetch_all(&self.pool).await?;

        // RETURNING order is unspecified
        let mut entries = rows.into_iter().map(SignalEntry::try_from).collect::<DomainResult<Vec<_>>>()?;
        entries.sort_by(|a, b| (a.priority, a.created_at, a.id).cmp(&(b.priority, b.created_at, b.id)));

        if !entries.is_empty() {
            tracing::debug!(worker_id = %request.worker_id, acquired = entries.len(), "Acquired signal batch");
        }
        Ok(entries)
    }

    async fn mark_processed(&self, ids: &[i64], worker_id: &str) -> DomainResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = format_timestamp(Utc::now());
        let sql = format!(
            r#"UPDATE signal_queue
               SET status = 'processed', processed_at = ?, updated_at = ?,
                   lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_holder = ? AND id IN ({})"#,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(&now).bind(&now).bind(worker_id);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn mark_skipped(&self, ids: &[i64], worker_id: &str, reason: &str) -> DomainResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = format_timestamp(Utc::now());
        let sql = format!(
            r#"UPDATE signal_queue
               SET status = 'skipped', last_error = ?, processed_at = ?, updated_at = ?,
                   lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_holder = ? AND id IN ({})"#,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql).bind(reason).bind(&now).bind(&now).bind(worker_id);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn mark_failed(
        &self,
        ids: &[i64],
        worker_id: &str,
        error: &str,
        max_retries: u32,
    ) -> DomainResult<FailedAttemptReport> {
        if ids.is_empty() {
            return Ok(FailedAttemptReport::default());
        }
        let now = format_timestamp(Utc::now());
        let in_list = placeholders(ids.len());
        let mut tx = self.pool.begin().await?;

        let abandon_sql = format!(
            r#"UPDATE signal_queue
               SET status = 'skipped', last_error = ?, processed_at = ?, updated_at = ?,
                   lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_holder = ? AND retry_count >= ? AND id IN ({in_list})"#
        );
        let mut abandon = sqlx::query(&abandon_sql)
            .bind(format!("{MAX_RETRIES_EXCEEDED}: {error}"))
            .bind(&now)
            .bind(&now)
            .bind(worker_id)
            .bind(i64::from(max_retries));
        for id in ids {
            abandon = abandon.bind(id);
        }
        let abandoned = abandon.execute(&mut *tx).await?.rows_affected();

        // The entry stays leased with a lapsed deadline; the next lease sweep
        // moves it back to pending and counts the reclaim.
        let release_sql = format!(
            r#"UPDATE signal_queue
               SET last_error = ?, updated_at = ?, lease_until = ?
               WHERE status = 'processing' AND lease_holder = ? AND id IN ({in_list})"#
        );
        let mut release = sqlx::query(&release_sql).bind(error).bind(&now).bind(&now).bind(worker_id);
        for id in ids {
            release = release.bind(id);
        }
        let released = release.execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;

        if abandoned > 0 {
            tracing::warn!(worker_id, abandoned, error, "Signals abandoned after exhausting retries");
        }
        Ok(FailedAttemptReport { released, abandoned })
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>, max_retries: u32) -> DomainResult<ReclaimReport> {
        let now = format_timestamp(now);
        let mut tx = self.pool.begin().await?;

        let abandoned = sqlx::query(
            r#"UPDATE signal_queue
               SET status = 'skipped',
                   last_error = CASE WHEN last_error IS NULL THEN ? ELSE ? || ': ' || last_error END,
                   processed_at = ?, updated_at = ?, lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_until < ? AND retry_count >= ?"#,
        )
        .bind(MAX_RETRIES_EXCEEDED)
        .bind(MAX_RETRIES_EXCEEDED)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .bind(i64::from(max_retries))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let reclaimed = sqlx::query(
            r#"UPDATE signal_queue
               SET status = 'pending', reclaim_count = reclaim_count + 1, updated_at = ?,
                   lease_holder = NULL, lease_until = NULL
               WHERE status = 'processing' AND lease_until < ?"#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if reclaimed > 0 || abandoned > 0 {
            tracing::info!(reclaimed, abandoned, "Released expired signal leases");
        }
        Ok(ReclaimReport { reclaimed, abandoned })
    }

    async fn expire_old(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let now = format_timestamp(now);
        let result = sqlx::query(
            r#"UPDATE signal_queue SET status = 'expired', updated_at = ?
               WHERE status = 'pending' AND expires_at <= ?"#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            r#"DELETE FROM signal_queue
               WHERE status IN ('processed', 'skipped', 'expired') AND updated_at < ?"#,
        )
        .bind(format_timestamp(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: i64) -> DomainResult<Option<SignalEntry>> {
        let row: Option<SignalRow> = sqlx::query_as("SELECT * FROM signal_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SignalEntry::try_from).transpose()
    }

    async fn health(&self, now: DateTime<Utc>) -> DomainResult<QueueHealth> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM signal_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(status) = QueueStatus::from_str(&status) {
                counts.insert(status, count as u64);
            }
        }

        let (oldest_pending, total_reclaims, abandoned): (Option<String>, i64, i64) = sqlx::query_as(
            r#"SELECT
                 (SELECT MIN(created_at) FROM signal_queue WHERE status = 'pending'),
                 (SELECT COALESCE(SUM(reclaim_count), 0) FROM signal_queue),
                 (SELECT COUNT(*) FROM signal_queue WHERE status = 'skipped' AND last_error LIKE ?)"#,
        )
        .bind(format!("{MAX_RETRIES_EXCEEDED}%"))
        .fetch_one(&self.pool)
        .await?;

        let oldest_pending_age_secs = parse_optional_datetime(oldest_pending)?.map(|t| (now - t).num_seconds().max(0));

        Ok(QueueHealth {
            counts,
            oldest_pending_age_secs,
            total_reclaims: total_reclaims as u64,
            abandoned: abandoned as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: i64,
    user_id: String,
    event_type: String,
    priority: i64,
    window_type: String,
    target_entity_type: Option<String>,
    target_entity_id: Option<String>,
    status: String,
    lease_holder: Option<String>,
    lease_until: Option<String>,
    retry_count: i64,
    reclaim_count: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    expires_at: String,
    processed_at: Option<String>,
}

impl TryFrom<SignalRow> for SignalEntry {
    type Error = DomainError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        let event_type = SignalEventType::from_str(&row.event_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid event type: {}", row.event_type)))?;
        let priority = SignalPriority::from_rank(row.priority)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid priority: {}", row.priority)))?;
        let window_type = WindowType::from_str(&row.window_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid window: {}", row.window_type)))?;
        let status = QueueStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let target_entity_type = row
            .target_entity_type
            .map(|k| {
                EntityKind::from_str(&k).ok_or_else(|| DomainError::SerializationError(format!("Invalid entity kind: {k}")))
            })
            .transpose()?;

        Ok(SignalEntry {
            id: row.id,
            user_id: parse_uuid(&row.user_id)?,
            event_type,
            priority,
            window_type,
            target_entity_type,
            target_entity_id: parse_optional_uuid(row.target_entity_id)?,
            status,
            lease_holder: row.lease_holder,
            lease_until: parse_optional_datetime(row.lease_until)?,
            retry_count: row.retry_count as u32,
            reclaim_count: row.reclaim_count as u32,
            last_error: row.last_error,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            expires_at: parse_datetime(&row.expires_at)?,
            processed_at: parse_optional_datetime(row.processed_at)?,
        })
    }
}
