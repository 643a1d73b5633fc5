//! Signal queue port.
//!
//! The queue is the only coordination point between workers. Storage
//! implementations must guarantee that no entry is returned by two
//! concurrent acquisitions while both leases are live, and that
//! acquisition never waits on entries another acquisition is claiming.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AcquireRequest, FailedAttemptReport, NewSignal, QueueHealth, ReclaimReport, SignalEntry};

/// Leased queue of signals awaiting triage.
#[async_trait]
pub trait SignalQueue: Send + Sync {
    /// Persist a new signal and return its id.
    async fn enqueue(&self, signal: &NewSignal) -> DomainResult<i64>;

    /// Atomically lease up to `request.batch_size` pending, unexpired entries.
    ///
    /// Entries are ordered by priority (urgent first), then creation time.
    async fn acquire_batch(&self, request: &AcquireRequest) -> DomainResult<Vec<SignalEntry>>;

    /// Mark entries still leased by `worker_id` as processed.
    async fn mark_processed(&self, ids: &[i64], worker_id: &str) -> DomainResult<u64>;

    /// Mark entries still leased by `worker_id` as skipped with a reason.
    async fn mark_skipped(&self, ids: &[i64], worker_id: &str, reason: &str) -> DomainResult<u64>;

    /// Record a failed attempt.
    ///
    /// Entries out of retries are skipped at once. The rest keep their
    /// status with a lease that ends now, so the next
    /// [`release_expired_leases`](Self::release_expired_leases) sweep returns
    /// them to pending.
    async fn mark_failed(
        &self,
        ids: &[i64],
        worker_id: &str,
        error: &str,
        max_retries: u32,
    ) -> DomainResult<FailedAttemptReport>;

    /// Return lapsed leases to pending, abandoning entries out of retries.
    async fn release_expired_leases(&self, now: DateTime<Utc>, max_retries: u32) -> DomainResult<ReclaimReport>;

    /// Mark pending entries whose TTL has passed as expired.
    async fn expire_old(&self, now: DateTime<Utc>) -> DomainResult<u64>;

    /// Delete finished entries last touched before `older_than`.
    async fn purge_finished(&self, older_than: DateTime<Utc>) -> DomainResult<u64>;

    async fn get(&self, id: i64) -> DomainResult<Option<SignalEntry>>;

    async fn health(&self, now: DateTime<Utc>) -> DomainResult<QueueHealth>;
}
