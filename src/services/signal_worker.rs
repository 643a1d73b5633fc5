//! Signal worker.
//!
//! Leases a batch from the signal queue, groups it by user and runs the
//! escalation pipeline once per user. Workers share nothing but the queue;
//! any number can run side by side.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AcquireRequest, QueueConfig, SignalEntry, SignalPriority, WindowType};
use crate::domain::ports::SignalQueue;
use crate::services::pipeline::{EscalationPipeline, PipelineOutcome};

/// Reason recorded on signals whose user has no snapshot.
pub const USER_NOT_FOUND: &str = "user not found";

/// Worker settings, usually derived from [`QueueConfig`].
#[derive(Debug, Clone)]
pub struct SignalWorkerConfig {
    /// Lease holder name
    pub worker_id: String,
    /// Lease length per batch
    pub lease_duration: chrono::Duration,
    /// Signals acquired per poll
    pub batch_size: usize,
    /// Acquisitions before a failing signal is abandoned
    pub max_retries: u32,
    /// Least urgent priority taken
    pub max_priority: SignalPriority,
    /// Only acquire signals aligned to these windows
    pub windows: Option<Vec<WindowType>>,
    /// Sleep after an idle poll or a failed batch
    pub poll_interval: Duration,
}

impl SignalWorkerConfig {
    /// Settings from the `queue` section; no window filter.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            worker_id: config.resolved_worker_id(),
            lease_duration: config.lease_duration(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            max_priority: config.max_priority,
            windows: None,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// What one batch did.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Signals leased
    pub acquired: usize,
    /// Distinct users in the batch
    pub users: usize,
    /// Signals settled as processed
    pub processed: u64,
    /// Signals skipped for unknown users
    pub skipped: u64,
    /// Failed with retries left; the next lease sweep requeues them
    pub retried: u64,
    /// Out of retries and permanently skipped
    pub abandoned: u64,
    /// One outcome per successful user run
    pub outcomes: Vec<PipelineOutcome>,
}

/// Stops a running worker from another task.
#[derive(Clone)]
pub struct WorkerHandle {
    stop_flag: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Stop after the current batch.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }
}

/// Leases signal batches and runs the pipeline once per user in each batch.
pub struct SignalWorker {
    queue: Arc<dyn SignalQueue>,
    pipeline: Arc<EscalationPipeline>,
    config: SignalWorkerConfig,
    stop_flag: Arc<AtomicBool>,
}

impl SignalWorker {
    /// Worker over `queue` feeding `pipeline`.
    pub fn new(queue: Arc<dyn SignalQueue>, pipeline: Arc<EscalationPipeline>, config: SignalWorkerConfig) -> Self {
        Self {
            queue,
            pipeline,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping the worker.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            stop_flag: self.stop_flag.clone(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SignalWorkerConfig {
        &self.config
    }

    /// Poll until stopped. Idle polls and failed batches wait one poll interval.
    pub async fn run(&self) {
        tracing::info!(worker_id = %self.config.worker_id, batch_size = self.config.batch_size, "Signal worker started");

        while !self.stop_flag.load(Ordering::Acquire) {
            let idle = match self.process_once().await {
                Ok(report) => report.acquired == 0,
                Err(e) => {
                    tracing::error!(worker_id = %self.config.worker_id, error = %e, "Signal batch failed");
                    true
                }
            };
            if idle && !self.stop_flag.load(Ordering::Acquire) {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Signal worker stopped");
    }

    /// Acquire and settle one batch.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn process_once(&self) -> DomainResult<BatchReport> {
        let mut request = AcquireRequest::new(
            self.config.worker_id.clone(),
            self.config.lease_duration,
            self.config.batch_size,
        )
        .with_max_priority(self.config.max_priority);
        if let Some(windows) = &self.config.windows {
            request = request.with_windows(windows.clone());
        }

        let batch = self.queue.acquire_batch(&request).await?;
        let mut report = BatchReport {
            acquired: batch.len(),
            ..BatchReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let by_user = group_by_user(batch);
        report.users = by_user.len();
        tracing::debug!(acquired = report.acquired, users = report.users, "Acquired signal batch");

        for (user_id, signals) in by_user {
            let ids: Vec<i64> = signals.iter().map(|s| s.id).collect();
            match self.pipeline.process(user_id, &signals).await {
                Ok(outcome) => {
                    report.processed += self.queue.mark_processed(&ids, &self.config.worker_id).await?;
                    report.outcomes.push(outcome);
                }
                Err(DomainError::UserNotFound(_)) => {
                    tracing::warn!(%user_id, signals = ids.len(), "Skipping signals for unknown user");
                    report.skipped += self
                        .queue
                        .mark_skipped(&ids, &self.config.worker_id, USER_NOT_FOUND)
                        .await?;
                }
                Err(e) => {
                    tracing::warn!(%user_id, error = %e, "Pipeline failed, returning signals");
                    let settled = self
                        .queue
                        .mark_failed(&ids, &self.config.worker_id, &e.to_string(), self.config.max_retries)
                        .await?;
                    report.retried += settled.released;
                    report.abandoned += settled.abandoned;
                }
            }
        }

        tracing::info!(
            acquired = report.acquired,
            processed = report.processed,
            skipped = report.skipped,
            retried = report.retried,
            abandoned = report.abandoned,
            "Signal batch settled"
        );
        Ok(report)
    }
}

/// Batch order (priority, then age) is kept within each user.
fn group_by_user(batch: Vec<SignalEntry>) -> BTreeMap<Uuid, Vec<SignalEntry>> {
    let mut by_user: BTreeMap<Uuid, Vec<SignalEntry>> = BTreeMap::new();
    for signal in batch {
        by_user.entry(signal.user_id).or_default().push(signal);
    }
    by_user
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generative::mock::MockGenerativeService;
    use crate::adapters::snapshot::JsonDirSnapshotProvider;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAssessmentHistory, SqliteSignalQueue, SqliteVectorStore,
    };
    use crate::domain::models::{Config, NewSignal, QueueStatus, SignalEventType, UserStateSnapshot};
    use crate::domain::ports::NullEmbeddingProvider;
    use crate::services::pipeline::PipelineServices;
    use chrono::Utc;

    struct Harness {
        worker: SignalWorker,
        queue: Arc<SqliteSignalQueue>,
        snapshots: JsonDirSnapshotProvider,
        _dir: tempfile::TempDir,
    }

    async fn harness(max_retries: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_migrated_test_pool().await.unwrap();
        let queue = Arc::new(SqliteSignalQueue::new(pool.clone()));
        let snapshots = JsonDirSnapshotProvider::new(dir.path());
        let pipeline = EscalationPipeline::new(
            PipelineServices {
                snapshots: Arc::new(snapshots.clone()),
                embeddings: Arc::new(NullEmbeddingProvider::new()),
                vectors: Arc::new(SqliteVectorStore::new(pool.clone())),
                generative: Arc::new(MockGenerativeService::quiet()),
                history: Arc::new(SqliteAssessmentHistory::new(pool)),
            },
            &Config::default(),
        );
        let mut config = SignalWorkerConfig::from_config(&QueueConfig::default());
        config.worker_id = "test-worker".to_string();
        config.max_retries = max_retries;

        Harness {
            worker: SignalWorker::new(queue.clone(), Arc::new(pipeline), config),
            queue,
            snapshots,
            _dir: dir,
        }
    }

    fn new_signal(user_id: Uuid) -> NewSignal {
        NewSignal::new(
            user_id,
            SignalEventType::TaskCreated,
            SignalPriority::WindowAligned,
            WindowType::BatchWindow,
            chrono::Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn test_batch_is_grouped_and_settled_per_user() {
        let h = harness(3).await;
        let known = UserStateSnapshot::empty(Uuid::new_v4(), Utc::now());
        h.snapshots.save(&known).await.unwrap();
        let stranger = Uuid::new_v4();

        let a = h.queue.enqueue(&new_signal(known.user_id)).await.unwrap();
        let b = h.queue.enqueue(&new_signal(known.user_id)).await.unwrap();
        let c = h.queue.enqueue(&new_signal(stranger)).await.unwrap();

        let report = h.worker.process_once().await.unwrap();
        assert_eq!(report.acquired, 3);
        assert_eq!(report.users, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.outcomes.len(), 1);

        for id in [a, b] {
            assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Processed);
        }
        let skipped = h.queue.get(c).await.unwrap().unwrap();
        assert_eq!(skipped.status, QueueStatus::Skipped);
        assert_eq!(skipped.last_error.as_deref(), Some(USER_NOT_FOUND));

        assert_eq!(h.worker.process_once().await.unwrap().acquired, 0);
    }

    #[tokio::test]
    async fn test_broken_snapshot_is_retried_then_abandoned() {
        let h = harness(2).await;
        let user_id = Uuid::new_v4();
        std::fs::write(h.snapshots.directory().join(format!("{user_id}.json")), b"{ nope").unwrap();
        let id = h.queue.enqueue(&new_signal(user_id)).await.unwrap();

        let first = h.worker.process_once().await.unwrap();
        assert_eq!(first.retried, 1);
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Processing);

        // Nothing to pick up until the lease sweep requeues the entry.
        assert_eq!(h.worker.process_once().await.unwrap().acquired, 0);
        let sweep = h
            .queue
            .release_expired_leases(chrono::Utc::now() + chrono::Duration::seconds(1), 2)
            .await
            .unwrap();
        assert_eq!(sweep.reclaimed, 1);
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Pending);

        let second = h.worker.process_once().await.unwrap();
        assert_eq!(second.abandoned, 1);
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, QueueStatus::Skipped);
    }

    #[tokio::test]
    async fn test_run_exits_when_stopped() {
        let h = harness(3).await;
        let handle = h.worker.handle();
        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), h.worker.run()).await.unwrap();
        assert!(handle.is_stop_requested());
    }

    #[test]
    fn test_grouping_keeps_batch_order() {
        let user = Uuid::new_v4();
        let mut first = crate::services::rules::test_support::signal(user, SignalEventType::HabitMissed, None);
        first.id = 7;
        let mut second = first.clone();
        second.id = 3;
        let grouped = group_by_user(vec![first, second]);
        let ids: Vec<i64> = grouped[&user].iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![7, 3]);
    }
}
