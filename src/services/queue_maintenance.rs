//! Queue maintenance background daemon.
//!
//! Each cycle sweeps both queues:
//! - Returning lapsed signal and outbox leases (or abandoning exhausted entries)
//! - Expiring pending signals past their TTL
//! - Purging finished signals and archiving processed outbox rows past retention
//!
//! The sweep is idempotent and safe to run next to live workers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant};

use crate::domain::errors::DomainResult;
use crate::domain::models::Config;
use crate::domain::ports::{OutboxQueue, SignalQueue};

/// Configuration for the maintenance daemon.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Time between sweeps
    pub sweep_interval: Duration,
    /// Sweep once before the first tick
    pub run_on_startup: bool,
    /// Stop after this many failed sweeps in a row
    pub max_consecutive_failures: u32,
    /// Acquisitions before a lapsed signal is abandoned
    pub signal_max_retries: u32,
    /// Attempts before a lapsed outbox entry is abandoned
    pub outbox_max_retries: u32,
    /// Age after which finished signals are purged
    pub signal_retention: chrono::Duration,
    /// Age after which processed outbox entries are archived
    pub outbox_retention: chrono::Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl MaintenanceConfig {
    /// Derive sweep settings from the queue and outbox sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.queue.sweep_interval_secs.max(1)),
            run_on_startup: true,
            max_consecutive_failures: config.queue.max_consecutive_sweep_failures,
            signal_max_retries: config.queue.max_retries,
            outbox_max_retries: config.outbox.max_retries,
            signal_retention: chrono::Duration::days(config.queue.retention_days),
            outbox_retention: chrono::Duration::days(config.outbox.retention_days),
        }
    }

    /// Override the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Lapsed signal leases returned to pending
    pub signals_reclaimed: u64,
    /// Lapsed signals skipped after exhausting retries
    pub signals_abandoned: u64,
    /// Pending signals past their TTL
    pub signals_expired: u64,
    /// Finished signals deleted
    pub signals_purged: u64,
    /// Lapsed outbox leases returned to pending
    pub outbox_reclaimed: u64,
    /// Lapsed outbox entries skipped
    pub outbox_abandoned: u64,
    /// Processed outbox entries archived
    pub outbox_archived: u64,
}

impl MaintenanceReport {
    /// Whether the sweep changed nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Event emitted by the maintenance daemon.
#[derive(Debug, Clone)]
pub enum MaintenanceEvent {
    Started,
    SweepStarted { run_number: u64 },
    SweepCompleted {
        run_number: u64,
        report: MaintenanceReport,
        duration_ms: u64,
    },
    SweepFailed { run_number: u64, error: String },
    Stopped { reason: StopReason },
}

/// Why the daemon stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Requested to stop.
    Requested,
    /// Too many consecutive failures.
    TooManyFailures,
}

/// Running totals kept by the daemon.
#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    pub running: bool,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<Instant>,
    pub total_reclaimed: u64,
    pub total_abandoned: u64,
}

/// Handle to control a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<DaemonStatus>>,
}

impl DaemonHandle {
    /// Ask the daemon to stop after the current sweep.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Current totals.
    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }
}

/// Periodic sweeper over the signal queue and the outbox.
///
/// Each sweep reclaims lapsed leases before applying TTLs and retention.
pub struct QueueMaintenanceDaemon {
    signals: Arc<dyn SignalQueue>,
    outbox: Arc<dyn OutboxQueue>,
    config: MaintenanceConfig,
    status: Arc<RwLock<DaemonStatus>>,
    stop_flag: Arc<AtomicBool>,
}

impl QueueMaintenanceDaemon {
    /// Daemon over both queues; call [`run`](Self::run) to start it.
    pub fn new(signals: Arc<dyn SignalQueue>, outbox: Arc<dyn OutboxQueue>, config: MaintenanceConfig) -> Self {
        Self {
            signals,
            outbox,
            config,
            status: Arc::new(RwLock::new(DaemonStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping and observing the daemon.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// Spawn the daemon, returning a channel for its events.
    pub fn run(self) -> mpsc::Receiver<MaintenanceEvent> {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            self.run_loop(tx).await;
        });
        rx
    }

    async fn run_loop(self, tx: mpsc::Sender<MaintenanceEvent>) {
        self.status.write().await.running = true;
        let _ = tx.send(MaintenanceEvent::Started).await;

        let mut consecutive_failures = 0u32;
        let mut timer = interval(self.config.sweep_interval);
        // The first tick completes immediately
        if self.config.run_on_startup {
            timer.tick().await;
            self.run_cycle(&tx, &mut consecutive_failures).await;
        }

        let reason = loop {
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
            if consecutive_failures >= self.config.max_consecutive_failures {
                tracing::error!(consecutive_failures, "Queue maintenance giving up");
                break StopReason::TooManyFailures;
            }

            timer.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
            self.run_cycle(&tx, &mut consecutive_failures).await;
        };

        self.status.write().await.running = false;
        let _ = tx.send(MaintenanceEvent::Stopped { reason }).await;
    }

    async fn run_cycle(&self, tx: &mpsc::Sender<MaintenanceEvent>, consecutive_failures: &mut u32) {
        let run_number = {
            let mut status = self.status.write().await;
            status.total_runs += 1;
            status.total_runs
        };
        let _ = tx.send(MaintenanceEvent::SweepStarted { run_number }).await;

        let start = Instant::now();
        let result = self.sweep(Utc::now()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(report) => {
                *consecutive_failures = 0;
                {
                    let mut status = self.status.write().await;
                    status.successful_runs += 1;
                    status.last_run = Some(Instant::now());
                    status.total_reclaimed += report.signals_reclaimed + report.outbox_reclaimed;
                    status.total_abandoned += report.signals_abandoned + report.outbox_abandoned;
                }
                let _ = tx
                    .send(MaintenanceEvent::SweepCompleted {
                        run_number,
                        report,
                        duration_ms,
                    })
                    .await;
            }
            Err(e) => {
                *consecutive_failures += 1;
                self.status.write().await.failed_runs += 1;
                tracing::warn!(run_number, error = %e, consecutive_failures = *consecutive_failures, "Queue sweep failed");
                let _ = tx
                    .send(MaintenanceEvent::SweepFailed {
                        run_number,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }

    /// One sweep at the current time (CLI and tests).
    pub async fn run_once(&self) -> DomainResult<MaintenanceReport> {
        self.sweep(Utc::now()).await
    }

    /// One sweep as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> DomainResult<MaintenanceReport> {
        let signal_leases = self
            .signals
            .release_expired_leases(now, self.config.signal_max_retries)
            .await?;
        let signals_expired = self.signals.expire_old(now).await?;
        let outbox_leases = self
            .outbox
            .release_expired_leases(now, self.config.outbox_max_retries)
            .await?;
        let signals_purged = self
            .signals
            .purge_finished(now - self.config.signal_retention)
            .await?;
        let outbox_archived = self
            .outbox
            .archive_processed(now - self.config.outbox_retention)
            .await?;

        let report = MaintenanceReport {
            signals_reclaimed: signal_leases.reclaimed,
            signals_abandoned: signal_leases.abandoned,
            signals_expired,
            signals_purged,
            outbox_reclaimed: outbox_leases.reclaimed,
            outbox_abandoned: outbox_leases.abandoned,
            outbox_archived,
        };
        if report.is_empty() {
            tracing::debug!("Queue sweep found nothing to do");
        } else {
            tracing::info!(
                signals_reclaimed = report.signals_reclaimed,
                signals_abandoned = report.signals_abandoned,
                signals_expired = report.signals_expired,
                signals_purged = report.signals_purged,
                outbox_reclaimed = report.outbox_reclaimed,
                outbox_abandoned = report.outbox_abandoned,
                outbox_archived = report.outbox_archived,
                "Queue sweep completed"
            );
        }
        Ok(report)
    }

    /// Current totals.
    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }

    /// Active configuration.
    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteOutboxQueue, SqliteSignalQueue};
    use crate::domain::models::{
        AcquireRequest, NewSignal, QueueStatus, SignalEventType, SignalPriority, WindowType,
    };
    use uuid::Uuid;

    async fn daemon(config: MaintenanceConfig) -> (QueueMaintenanceDaemon, Arc<SqliteSignalQueue>, sqlx::SqlitePool) {
        let pool = create_migrated_test_pool().await.unwrap();
        let signals = Arc::new(SqliteSignalQueue::new(pool.clone()));
        let outbox = Arc::new(SqliteOutboxQueue::new(pool.clone()));
        (QueueMaintenanceDaemon::new(signals.clone(), outbox, config), signals, pool)
    }

    fn new_signal(ttl: chrono::Duration) -> NewSignal {
        NewSignal::new(
            Uuid::new_v4(),
            SignalEventType::HabitMissed,
            SignalPriority::Urgent,
            WindowType::Immediate,
            ttl,
        )
    }

    #[test]
    fn test_config_follows_queue_settings() {
        let mut config = Config::default();
        config.queue.max_retries = 7;
        config.queue.sweep_interval_secs = 0;
        let maintenance = MaintenanceConfig::from_config(&config);
        assert_eq!(maintenance.signal_max_retries, 7);
        assert_eq!(maintenance.sweep_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sweep_reclaims_and_expires() {
        let (daemon, signals, _pool) = daemon(MaintenanceConfig::default()).await;
        let leased = signals.enqueue(&new_signal(chrono::Duration::hours(6))).await.unwrap();
        let stale = signals.enqueue(&new_signal(chrono::Duration::minutes(1))).await.unwrap();

        let now = Utc::now();
        let acquired = signals
            .acquire_batch(&AcquireRequest::new("w1", chrono::Duration::seconds(30), 1).at(now))
            .await
            .unwrap();
        assert_eq!(acquired[0].id, leased);

        let report = daemon.sweep(now + chrono::Duration::minutes(10)).await.unwrap();
        assert_eq!(report.signals_reclaimed, 1);
        assert_eq!(report.signals_expired, 1);
        assert_eq!(signals.get(leased).await.unwrap().unwrap().status, QueueStatus::Pending);
        assert_eq!(signals.get(stale).await.unwrap().unwrap().status, QueueStatus::Expired);

        let again = daemon.sweep(now + chrono::Duration::minutes(10)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_daemon_stops_after_consecutive_failures() {
        let config = MaintenanceConfig {
            max_consecutive_failures: 2,
            ..MaintenanceConfig::default()
        }
        .with_interval(Duration::from_millis(10));
        let (daemon, _signals, pool) = daemon(config).await;
        pool.close().await;
        let handle = daemon.handle();

        let mut events = daemon.run();
        let mut failures = 0;
        let mut stop = None;
        while let Some(event) = events.recv().await {
            match event {
                MaintenanceEvent::SweepFailed { .. } => failures += 1,
                MaintenanceEvent::Stopped { reason } => stop = Some(reason),
                _ => {}
            }
        }

        assert_eq!(failures, 2);
        assert_eq!(stop, Some(StopReason::TooManyFailures));
        let status = handle.status().await;
        assert!(!status.running);
        assert_eq!(status.failed_runs, 2);
    }

    #[tokio::test]
    async fn test_daemon_stops_on_request() {
        let (daemon, _signals, _pool) =
            daemon(MaintenanceConfig::default().with_interval(Duration::from_millis(10))).await;
        let handle = daemon.handle();
        let mut events = daemon.run();

        assert!(matches!(events.recv().await, Some(MaintenanceEvent::Started)));
        handle.stop();

        let mut stop = None;
        while let Some(event) = events.recv().await {
            if let MaintenanceEvent::Stopped { reason } = event {
                stop = Some(reason);
            }
        }
        assert_eq!(stop, Some(StopReason::Requested));
        assert!(handle.status().await.successful_runs >= 1);
    }
}
