//! Configuration model for Lodestar.
//!
//! Every section has programmatic defaults; the loader layers YAML files
//! and `LODESTAR_*` environment variables on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::signal::{SignalPriority, WindowType};
use super::snapshot::EntityKind;

/// Main configuration structure for Lodestar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Signal queue and worker settings
    pub queue: QueueConfig,
    /// Embedding outbox settings
    pub outbox: OutboxConfig,
    /// Tier 0 rule thresholds
    pub rules: RuleThresholds,
    /// Delta score weights
    pub delta: DeltaWeights,
    /// Tier 1 scoring and escalation
    pub quick_assessment: QuickAssessmentConfig,
    /// Context retrieval
    pub rag: RagConfig,
    /// Tier 2 model access
    pub generative: GenerativeConfig,
    /// Embedding provider
    pub embeddings: EmbeddingsConfig,
    /// Where user snapshots are read from
    pub snapshots: SnapshotConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    pub path: String,
    /// Pool size shared by workers and the maintenance loop
    pub max_connections: u32,
    /// Wait for a free pooled connection
    pub connect_timeout_secs: u64,
    /// Wait on SQLite's write lock before a statement fails as busy
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".lodestar/lodestar.db".to_string(),
            max_connections: 5,
            connect_timeout_secs: 30,
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    /// `sqlite:` URL for the configured path.
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable, colored on a terminal
    Pretty,
}

/// How often file logs roll over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// New file each day
    Daily,
    /// New file each hour
    Hourly,
    /// Single ever-growing file
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Directory for log files; stdout only when unset
    pub log_dir: Option<PathBuf>,
    /// Also log to stdout when a log directory is set
    pub enable_stdout: bool,
    /// File rotation policy
    pub rotation: RotationPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::Daily,
        }
    }
}

/// Hours a signal stays acquirable, per delivery window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalTtlConfig {
    /// Immediate-window TTL
    pub immediate_hours: i64,
    /// Morning-window TTL
    pub morning_window_hours: i64,
    /// Evening-window TTL
    pub evening_window_hours: i64,
    /// Weekly-review TTL
    pub weekly_review_hours: i64,
    /// Batch-window TTL
    pub batch_window_hours: i64,
}

impl Default for SignalTtlConfig {
    fn default() -> Self {
        Self {
            immediate_hours: 6,
            morning_window_hours: 24,
            evening_window_hours: 24,
            weekly_review_hours: 168,
            batch_window_hours: 48,
        }
    }
}

impl SignalTtlConfig {
    /// TTL for signals aligned to `window`.
    pub fn ttl_for(&self, window: WindowType) -> chrono::Duration {
        let hours = match window {
            WindowType::Immediate => self.immediate_hours,
            WindowType::MorningWindow => self.morning_window_hours,
            WindowType::EveningWindow => self.evening_window_hours,
            WindowType::WeeklyReview => self.weekly_review_hours,
            WindowType::BatchWindow => self.batch_window_hours,
        };
        chrono::Duration::hours(hours)
    }
}

/// Signal queue, worker and maintenance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Worker identity; defaults to `<hostname-ish>-<pid>` when unset
    pub worker_id: Option<String>,
    /// How long an acquired batch stays leased
    pub lease_duration_secs: i64,
    /// Signals acquired per batch
    pub batch_size: usize,
    /// Acquisitions allowed before a signal is abandoned
    pub max_retries: u32,
    /// Least urgent priority this worker takes
    pub max_priority: SignalPriority,
    /// Sleep between empty polls
    pub poll_interval_ms: u64,
    /// Keep finished signals this long
    pub retention_days: i64,
    /// Period of the maintenance sweep
    pub sweep_interval_secs: u64,
    /// Failed sweeps in a row before the maintenance loop stops
    pub max_consecutive_sweep_failures: u32,
    /// Per-window signal TTLs
    pub ttl: SignalTtlConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            lease_duration_secs: 300,
            batch_size: 25,
            max_retries: 3,
            max_priority: SignalPriority::Low,
            poll_interval_ms: 2_000,
            retention_days: 30,
            sweep_interval_secs: 60,
            max_consecutive_sweep_failures: 5,
            ttl: SignalTtlConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Lease length as a duration.
    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_duration_secs)
    }

    /// Configured worker id, or one derived from the process id.
    pub fn resolved_worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", std::process::id()))
    }
}

/// Embedding outbox processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// How long an acquired batch stays leased
    pub lease_duration_secs: i64,
    /// Entries acquired per batch
    pub batch_size: usize,
    /// Failed attempts before an entry is abandoned
    pub max_retries: u32,
    /// Keep finished entries this long
    pub retention_days: i64,
    /// Sleep between empty polls
    pub poll_interval_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: 120,
            batch_size: 50,
            max_retries: 5,
            retention_days: 7,
            poll_interval_ms: 5_000,
        }
    }
}

impl OutboxConfig {
    /// Lease length as a duration.
    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_duration_secs)
    }
}

/// Thresholds used by the deterministic rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    /// Days overdue before a task is a medium finding
    pub overdue_medium_days: i64,
    /// Days overdue before a task is a high finding
    pub overdue_high_days: i64,
    /// Reschedules after which archiving is suggested
    pub archive_reschedule_count: u32,
    /// Missed periods for a medium habit finding
    pub habit_missed_medium: u32,
    /// Missed periods for a high habit finding
    pub habit_missed_high: u32,
    /// Adherence rate below which a habit is struggling
    pub habit_low_adherence: f64,
    /// Shortest streak worth protecting
    pub streak_at_risk_min: u32,
    /// Open tasks that count as a backlog
    pub backlog_open_tasks: usize,
    /// Overdue tasks that count as a backlog
    pub backlog_overdue_tasks: usize,
    /// Days before a goal's target date that count as near
    pub goal_deadline_days: i64,
    /// Progress over elapsed-time ratio below which a goal is behind
    pub goal_behind_ratio: f64,
    /// Idle days before a project is stalled
    pub stalled_project_days: i64,
    /// Idle days before a stalled project is high severity
    pub stalled_project_high_days: i64,
    /// Average check-in energy below this is low
    pub low_energy_threshold: f64,
    /// Check-in days averaged for the energy rule
    pub low_energy_window_days: i64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            overdue_medium_days: 3,
            overdue_high_days: 7,
            archive_reschedule_count: 4,
            habit_missed_medium: 2,
            habit_missed_high: 4,
            habit_low_adherence: 0.4,
            streak_at_risk_min: 7,
            backlog_open_tasks: 25,
            backlog_overdue_tasks: 5,
            goal_deadline_days: 7,
            goal_behind_ratio: 0.5,
            stalled_project_days: 14,
            stalled_project_high_days: 30,
            low_energy_threshold: 3.5,
            low_energy_window_days: 3,
        }
    }
}

/// One contributing factor of a capped weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeight {
    /// Contribution per counted item
    pub weight: f64,
    /// Ceiling on the factor's total contribution
    pub cap: f64,
}

impl FactorWeight {
    /// Factor worth `weight` per item, capped at `cap`.
    pub const fn new(weight: f64, cap: f64) -> Self {
        Self { weight, cap }
    }

    /// `min(count * weight, cap)`, never negative.
    ///
    /// # Examples
    /// ```
    /// use lodestar::domain::models::FactorWeight;
    ///
    /// let missed = FactorWeight::new(0.1, 0.3);
    /// assert!((missed.apply(2.0) - 0.2).abs() < 1e-9);
    /// assert!((missed.apply(10.0) - 0.3).abs() < 1e-9);
    /// assert_eq!(missed.apply(-4.0), 0.0);
    /// ```
    pub fn apply(&self, count: f64) -> f64 {
        (count.max(0.0) * self.weight).min(self.cap).max(0.0)
    }
}

/// Weights of the delta score factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaWeights {
    /// Baseline window when a user has no prior assessment
    pub lookback_days: i64,
    /// Entities created since the baseline
    pub new_entities: FactorWeight,
    /// Entities changed since the baseline
    pub modified_entities: FactorWeight,
    /// Items finished since the baseline
    pub completed_items: FactorWeight,
    /// Items missed since the baseline
    pub missed_items: FactorWeight,
    /// Signals captured since the baseline
    pub new_signals: FactorWeight,
}

impl Default for DeltaWeights {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            new_entities: FactorWeight::new(0.05, 0.2),
            modified_entities: FactorWeight::new(0.03, 0.15),
            completed_items: FactorWeight::new(0.04, 0.2),
            missed_items: FactorWeight::new(0.1, 0.3),
            new_signals: FactorWeight::new(0.02, 0.15),
        }
    }
}

/// Tier 1 scoring weights and escalation overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickAssessmentConfig {
    /// Combined score at or above which Tier 2 runs
    pub escalation_threshold: f64,
    /// Share of the combined score from retrieval relevance
    pub relevance_weight: f64,
    /// Share of the combined score from the delta score
    pub delta_weight: f64,
    /// Share of the combined score from urgency
    pub urgency_weight: f64,
    /// Urgency per urgent signal in the batch
    pub urgent_signals: FactorWeight,
    /// Urgency per window-aligned signal
    pub window_signals: FactorWeight,
    /// Urgency per low-priority signal
    pub low_signals: FactorWeight,
    /// Cap on the Tier 0 severity contribution to urgency
    pub severity_cap: f64,
    /// Relevance bonus per retrieved document
    pub result_count_bonus: f64,
    /// Ceiling on the result count bonus
    pub max_result_count_bonus: f64,
    /// Urgency that escalates whatever the combined score
    pub urgency_override: f64,
    /// Delta score that, with critical rule findings, escalates
    pub delta_override: f64,
    /// Missed items that force escalation
    pub missed_items_threshold: u32,
}

impl Default for QuickAssessmentConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 0.5,
            relevance_weight: 0.3,
            delta_weight: 0.3,
            urgency_weight: 0.4,
            urgent_signals: FactorWeight::new(0.25, 0.5),
            window_signals: FactorWeight::new(0.1, 0.2),
            low_signals: FactorWeight::new(0.02, 0.1),
            severity_cap: 0.5,
            result_count_bonus: 0.02,
            max_result_count_bonus: 0.1,
            urgency_override: 0.7,
            delta_override: 0.3,
            missed_items_threshold: 3,
        }
    }
}

/// Retrieval parameters for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRetrievalConfig {
    /// Documents to retrieve
    pub top_k: usize,
    /// Empty means every entity type
    #[serde(default)]
    pub entity_types: Vec<EntityKind>,
}

impl StageRetrievalConfig {
    /// Retrieve `top_k` documents of `entity_types`.
    pub fn new(top_k: usize, entity_types: Vec<EntityKind>) -> Self {
        Self { top_k, entity_types }
    }

    /// Entity types to filter on; `None` when unrestricted.
    pub fn entity_filter(&self) -> Option<Vec<EntityKind>> {
        (!self.entity_types.is_empty()).then(|| self.entity_types.clone())
    }
}

/// Context retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Skip retrieval entirely when false
    pub enabled: bool,
    /// Minimum cosine similarity for a document to count
    pub similarity_threshold: f64,
    /// Truncate retrieved documents to this length
    pub max_content_chars: usize,
    /// Retrieval budget; slower lookups return no context
    pub timeout_ms: u64,
    /// Tier 1 relevance lookup
    pub quick_assessment: StageRetrievalConfig,
    /// Stage 1 context
    pub assessment: StageRetrievalConfig,
    /// Stage 2 context
    pub strategy: StageRetrievalConfig,
    /// Stage 3 context
    pub generation: StageRetrievalConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.3,
            max_content_chars: 400,
            timeout_ms: 1_500,
            quick_assessment: StageRetrievalConfig::new(5, vec![]),
            assessment: StageRetrievalConfig::new(
                8,
                vec![EntityKind::Goal, EntityKind::Habit, EntityKind::CheckIn, EntityKind::Task],
            ),
            strategy: StageRetrievalConfig::new(
                5,
                vec![EntityKind::Goal, EntityKind::Experiment, EntityKind::Project],
            ),
            generation: StageRetrievalConfig::new(4, vec![]),
        }
    }
}

/// Output token budget per generative stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTokenLimits {
    /// Situational assessment
    pub assessment: u32,
    /// Strategy selection
    pub strategy: u32,
    /// Candidate generation, per domain
    pub generation: u32,
}

impl Default for StageTokenLimits {
    fn default() -> Self {
        Self {
            assessment: 1_500,
            strategy: 1_200,
            generation: 1_500,
        }
    }
}

/// Tier 2 model access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerativeConfig {
    /// "anthropic" or "mock"
    pub provider: String,
    /// Model name sent with each request
    pub model: String,
    /// API root
    pub base_url: String,
    /// Value of the `anthropic-version` header
    pub api_version: String,
    /// Falls back to `ANTHROPIC_API_KEY`
    pub api_key: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Output token budgets
    pub max_output_tokens: StageTokenLimits,
    /// Deadline for the assessment and strategy stages
    pub stage_timeout_secs: u64,
    /// Deadline for the whole generation stage
    pub generation_timeout_secs: u64,
    /// Interventions kept from the strategy stage
    pub max_interventions: usize,
    /// Candidates kept after generation
    pub max_recommendations: u32,
    /// Client-side rate limit
    pub requests_per_second: u32,
    /// Give up retrying a request after this long
    pub max_retry_elapsed_secs: u64,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            api_key: None,
            temperature: 0.3,
            max_output_tokens: StageTokenLimits::default(),
            stage_timeout_secs: 60,
            generation_timeout_secs: 90,
            max_interventions: 6,
            max_recommendations: 5,
            requests_per_second: 2,
            max_retry_elapsed_secs: 30,
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// "openai" or "null"
    pub provider: String,
    /// API root
    pub base_url: String,
    /// Embedding model name
    pub model: String,
    /// Vector length the model produces
    pub dimension: usize,
    /// Falls back to `OPENAI_API_KEY`
    pub api_key: Option<String>,
    /// HTTP timeout per request
    pub timeout_secs: u64,
    /// Texts sent per request
    pub max_batch_size: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key: None,
            timeout_secs: 30,
            max_batch_size: 256,
        }
    }
}

/// Snapshot source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory holding `<user_id>.json` snapshot documents
    pub directory: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".lodestar/snapshots"),
        }
    }
}
