//! Multi-worker queue coordination against a file database.
//!
//! Each worker gets its own pool, as separate processes would.

mod common;

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use lodestar::adapters::sqlite::{create_pool, SqliteOutboxQueue, SqliteSignalQueue};
use lodestar::domain::models::{
    AcquireRequest, EntityKind, NewOutboxEntry, NewSignal, OutboxOperation, QueueStatus, SignalEventType,
    SignalPriority, WindowType,
};
use lodestar::domain::ports::{OutboxQueue, SignalQueue};

const SIGNALS: usize = 120;
const WORKERS: usize = 4;

fn signal(user_id: Uuid, priority: SignalPriority) -> NewSignal {
    NewSignal::new(
        user_id,
        SignalEventType::TaskCreated,
        priority,
        WindowType::BatchWindow,
        Duration::hours(2),
    )
}

async fn worker_queue(db_url: &str) -> Arc<SqliteSignalQueue> {
    let pool = create_pool(db_url, None).await.expect("worker pool");
    Arc::new(SqliteSignalQueue::new(pool))
}

#[tokio::test]
async fn test_concurrent_workers_never_share_an_entry() {
    common::setup_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let pool = common::file_pool(dir.path()).await;
    let db_url = format!("sqlite:{}", dir.path().join("lodestar.db").display());

    let seed = SqliteSignalQueue::new(pool);
    let mut enqueued = HashSet::new();
    for i in 0..SIGNALS {
        let priority = if i % 3 == 0 { SignalPriority::Urgent } else { SignalPriority::Low };
        enqueued.insert(seed.enqueue(&signal(Uuid::new_v4(), priority)).await.unwrap());
    }

    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let queue = worker_queue(&db_url).await;
        handles.push(tokio::spawn(async move {
            let worker_id = format!("worker-{w}");
            let mut claimed = Vec::new();
            loop {
                let request = AcquireRequest::new(worker_id.clone(), Duration::minutes(5), 7);
                let batch = queue.acquire_batch(&request).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                for entry in &batch {
                    assert_eq!(entry.status, QueueStatus::Processing);
                    assert_eq!(entry.lease_holder.as_deref(), Some(worker_id.as_str()));
                }
                let ids: Vec<i64> = batch.iter().map(|e| e.id).collect();
                let settled = queue.mark_processed(&ids, &worker_id).await.unwrap();
                assert_eq!(settled, ids.len() as u64);
                claimed.extend(ids);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "signal {id} was acquired twice");
        }
    }
    assert_eq!(seen, enqueued);

    let health = seed.health(Utc::now()).await.unwrap();
    assert_eq!(health.count(QueueStatus::Processed), SIGNALS as u64);
    assert_eq!(health.count(QueueStatus::Pending), 0);
    assert_eq!(health.count(QueueStatus::Processing), 0);
}

#[tokio::test]
async fn test_batch_is_ordered_by_priority_then_age() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqliteSignalQueue::new(common::file_pool(dir.path()).await);
    let user = Uuid::new_v4();
    let base = Utc::now() - Duration::minutes(30);

    let low = queue
        .enqueue(&signal(user, SignalPriority::Low).created_at(base, Duration::hours(2)))
        .await
        .unwrap();
    let urgent_late = queue
        .enqueue(&signal(user, SignalPriority::Urgent).created_at(base + Duration::minutes(10), Duration::hours(2)))
        .await
        .unwrap();
    let urgent_early = queue
        .enqueue(&signal(user, SignalPriority::Urgent).created_at(base + Duration::minutes(5), Duration::hours(2)))
        .await
        .unwrap();
    let window = queue
        .enqueue(&signal(user, SignalPriority::WindowAligned).created_at(base, Duration::hours(2)))
        .await
        .unwrap();

    let batch = queue
        .acquire_batch(&AcquireRequest::new("w", Duration::minutes(5), 10))
        .await
        .unwrap();
    let ids: Vec<i64> = batch.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![urgent_early, urgent_late, window, low]);
}

#[tokio::test]
async fn test_live_lease_is_not_handed_out_again() {
    let dir = tempfile::tempdir().unwrap();
    let pool = common::file_pool(dir.path()).await;
    let queue = SqliteSignalQueue::new(pool);
    queue.enqueue(&signal(Uuid::new_v4(), SignalPriority::Urgent)).await.unwrap();

    let first = queue
        .acquire_batch(&AcquireRequest::new("a", Duration::minutes(5), 10))
        .await
        .unwrap();
    let second = queue
        .acquire_batch(&AcquireRequest::new("b", Duration::minutes(5), 10))
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_lapsed_lease_is_reclaimed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqliteSignalQueue::new(common::file_pool(dir.path()).await);
    let id = queue.enqueue(&signal(Uuid::new_v4(), SignalPriority::Urgent)).await.unwrap();

    let now = Utc::now();
    let crashed = queue
        .acquire_batch(&AcquireRequest::new("crashed", Duration::seconds(30), 10).at(now))
        .await
        .unwrap();
    assert_eq!(crashed.len(), 1);

    // Still leased: nothing to reclaim yet.
    let early = queue.release_expired_leases(now, 3).await.unwrap();
    assert_eq!(early.reclaimed, 0);

    let later = now + Duration::minutes(1);
    let report = queue.release_expired_leases(later, 3).await.unwrap();
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.abandoned, 0);
    let again = queue.release_expired_leases(later, 3).await.unwrap();
    assert_eq!(again.reclaimed, 0);

    let entry = queue.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.reclaim_count, 1);

    let rescued = queue
        .acquire_batch(&AcquireRequest::new("rescuer", Duration::minutes(5), 10).at(later))
        .await
        .unwrap();
    assert_eq!(rescued.len(), 1);

    // The crashed worker cannot settle an entry it no longer holds.
    assert_eq!(queue.mark_processed(&[id], "crashed").await.unwrap(), 0);
    assert_eq!(queue.mark_processed(&[id], "rescuer").await.unwrap(), 1);
}

#[tokio::test]
async fn test_entry_is_abandoned_after_max_retries() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqliteSignalQueue::new(common::file_pool(dir.path()).await);
    let id = queue.enqueue(&signal(Uuid::new_v4(), SignalPriority::Urgent)).await.unwrap();

    let mut now = Utc::now();
    for _ in 0..2 {
        let batch = queue
            .acquire_batch(&AcquireRequest::new("flaky", Duration::seconds(10), 10).at(now))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        now += Duration::minutes(1);
        queue.release_expired_leases(now, 2).await.unwrap();
    }

    let entry = queue.get(id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Skipped);
    assert!(entry.last_error.is_some());
    assert_eq!(queue.health(now).await.unwrap().abandoned, 1);
}

#[tokio::test]
async fn test_expired_signals_are_not_acquired() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqliteSignalQueue::new(common::file_pool(dir.path()).await);
    let stale = Utc::now() - Duration::hours(3);
    let id = queue
        .enqueue(&signal(Uuid::new_v4(), SignalPriority::Urgent).created_at(stale, Duration::hours(1)))
        .await
        .unwrap();

    let batch = queue
        .acquire_batch(&AcquireRequest::new("w", Duration::minutes(5), 10))
        .await
        .unwrap();
    assert!(batch.is_empty());

    assert_eq!(queue.expire_old(Utc::now()).await.unwrap(), 1);
    assert_eq!(queue.get(id).await.unwrap().unwrap().status, QueueStatus::Expired);
}

#[tokio::test]
async fn test_outbox_workers_split_a_batch() {
    let dir = tempfile::tempdir().unwrap();
    let pool = common::file_pool(dir.path()).await;
    let outbox = SqliteOutboxQueue::new(pool);
    let user = Uuid::new_v4();
    for _ in 0..10 {
        outbox
            .enqueue(&NewOutboxEntry::new(user, EntityKind::Task, Uuid::new_v4(), OutboxOperation::Created))
            .await
            .unwrap();
    }

    let now = Utc::now();
    let a = outbox.acquire_batch("a", Duration::minutes(2), 6, now).await.unwrap();
    let b = outbox.acquire_batch("b", Duration::minutes(2), 6, now).await.unwrap();
    assert_eq!(a.len(), 6);
    assert_eq!(b.len(), 4);

    let a_ids: HashSet<i64> = a.iter().map(|e| e.id).collect();
    assert!(b.iter().all(|e| !a_ids.contains(&e.id)));
}
