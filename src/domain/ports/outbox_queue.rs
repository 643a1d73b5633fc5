//! Outbox queue port for entity change capture.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{NewOutboxEntry, OutboxEntry, QueueHealth, ReclaimReport};

/// Leased queue of entity changes awaiting indexing.
#[async_trait]
pub trait OutboxQueue: Send + Sync {
    /// Record a change. A pending entry for the same entity is coalesced
    /// (latest operation wins) rather than duplicated.
    async fn enqueue(&self, entry: &NewOutboxEntry) -> DomainResult<i64>;

    async fn acquire_batch(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<OutboxEntry>>;

    async fn mark_processed(&self, ids: &[i64], worker_id: &str) -> DomainResult<u64>;

    /// Record a failed attempt; the entry is abandoned once `retry_count`
    /// reaches `max_retries`. Returns whether the entry was abandoned.
    async fn mark_failed(&self, id: i64, worker_id: &str, error: &str, max_retries: u32) -> DomainResult<bool>;

    async fn release_expired_leases(&self, now: DateTime<Utc>, max_retries: u32) -> DomainResult<ReclaimReport>;

    /// Delete processed entries older than `older_than`.
    async fn archive_processed(&self, older_than: DateTime<Utc>) -> DomainResult<u64>;

    async fn health(&self, now: DateTime<Utc>) -> DomainResult<QueueHealth>;
}
