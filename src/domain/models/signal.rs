//! Signal queue domain model.
//!
//! A signal is a queued record of a domain occurrence awaiting triage by
//! the escalation pipeline. Signals are leased by workers, never deleted
//! except by the retention sweep.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::snapshot::EntityKind;

/// Triage priority. Lower discriminant is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPriority {
    /// Handled as soon as a worker is free
    Urgent = 0,
    /// Held for the user's next delivery window
    WindowAligned = 1,
    /// Background work, processed when nothing else is waiting
    Low = 2,
}

impl SignalPriority {
    /// Stable lowercase name used in storage and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::WindowAligned => "window_aligned",
            Self::Low => "low",
        }
    }

    /// Parse a stored or user-supplied name, case-insensitively.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "urgent" => Some(Self::Urgent),
            "window_aligned" | "windowaligned" => Some(Self::WindowAligned),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Numeric rank stored in the queue table; ascending order is urgency order.
    pub fn rank(&self) -> i64 {
        *self as i64
    }

    /// Inverse of [`rank`](Self::rank).
    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::Urgent),
            1 => Some(Self::WindowAligned),
            2 => Some(Self::Low),
            _ => None,
        }
    }
}

/// Delivery window a signal is aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Deliver as soon as processed
    Immediate,
    /// Morning planning slot
    MorningWindow,
    /// Evening wind-down slot
    EveningWindow,
    /// Folded into the weekly review
    WeeklyReview,
    /// Periodic catch-all batch
    BatchWindow,
}

impl WindowType {
    /// Every window, in declaration order.
    pub const ALL: [WindowType; 5] = [
        Self::Immediate,
        Self::MorningWindow,
        Self::EveningWindow,
        Self::WeeklyReview,
        Self::BatchWindow,
    ];

    /// Stable lowercase name used in storage and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::MorningWindow => "morning_window",
            Self::EveningWindow => "evening_window",
            Self::WeeklyReview => "weekly_review",
            Self::BatchWindow => "batch_window",
        }
    }

    /// Parse a window name; short forms like `morning` are accepted.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "immediate" => Some(Self::Immediate),
            "morning_window" | "morning" => Some(Self::MorningWindow),
            "evening_window" | "evening" => Some(Self::EveningWindow),
            "weekly_review" | "weekly" => Some(Self::WeeklyReview),
            "batch_window" | "batch" => Some(Self::BatchWindow),
            _ => None,
        }
    }
}

/// Lifecycle status shared by signal and outbox queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be acquired
    Pending,
    /// Leased by a worker
    Processing,
    /// Handled successfully
    Processed,
    /// Dropped with a reason, including exhausted retries
    Skipped,
    /// TTL passed before anyone acquired it
    Expired,
}

impl Default for QueueStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl QueueStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [QueueStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Processed,
        Self::Skipped,
        Self::Expired,
    ];

    /// Stable lowercase name stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::Expired => "expired",
        }
    }

    /// Parse a stored status name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "skipped" => Some(Self::Skipped),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Skipped | Self::Expired)
    }

    /// Valid transitions from this status.
    ///
    /// `Processing -> Pending` is the only backward edge and is taken solely
    /// by lease-expiry reclamation. A failed attempt cuts its lease short and
    /// leaves the move to the next sweep.
    ///
    /// # Examples
    /// ```
    /// use lodestar::domain::models::QueueStatus;
    ///
    /// assert!(QueueStatus::Processing.can_transition_to(QueueStatus::Pending));
    /// assert!(!QueueStatus::Pending.can_transition_to(QueueStatus::Processed));
    /// assert!(QueueStatus::Skipped.valid_transitions().is_empty());
    /// ```
    pub fn valid_transitions(&self) -> Vec<QueueStatus> {
        match self {
            Self::Pending => vec![Self::Processing, Self::Expired],
            Self::Processing => vec![Self::Processed, Self::Skipped, Self::Pending],
            Self::Processed | Self::Skipped | Self::Expired => vec![],
        }
    }

    /// Check if moving to `new_status` is allowed.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Known domain event types that produce signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalEventType {
    /// A task was added
    TaskCreated,
    /// A task was finished
    TaskCompleted,
    /// A task passed its due date
    TaskOverdue,
    /// A task's due date moved
    TaskRescheduled,
    /// A habit was done for the period
    HabitCompleted,
    /// A habit period went by undone
    HabitMissed,
    /// A running habit streak reset
    HabitStreakBroken,
    /// A goal was added
    GoalCreated,
    /// Goal progress changed
    GoalProgressUpdated,
    /// A goal's target date is near
    GoalDeadlineApproaching,
    /// A project was added
    ProjectCreated,
    /// A project stopped moving
    ProjectStalled,
    /// A personal experiment began
    ExperimentStarted,
    /// A personal experiment finished
    ExperimentEnded,
    /// The user filed a check-in
    CheckInSubmitted,
    /// A check-in reported low energy
    LowEnergyReported,
    /// Profile settings changed
    ProfileUpdated,
    /// The user asked for today's plan
    DailyPlanRequested,
    /// The weekly review is due
    WeeklyReviewDue,
}

impl SignalEventType {
    /// Every event type, grouped by entity.
    pub const ALL: [SignalEventType; 19] = [
        Self::TaskCreated,
        Self::TaskCompleted,
        Self::TaskOverdue,
        Self::TaskRescheduled,
        Self::HabitCompleted,
        Self::HabitMissed,
        Self::HabitStreakBroken,
        Self::GoalCreated,
        Self::GoalProgressUpdated,
        Self::GoalDeadlineApproaching,
        Self::ProjectCreated,
        Self::ProjectStalled,
        Self::ExperimentStarted,
        Self::ExperimentEnded,
        Self::CheckInSubmitted,
        Self::LowEnergyReported,
        Self::ProfileUpdated,
        Self::DailyPlanRequested,
        Self::WeeklyReviewDue,
    ];

    /// Stable snake_case name used in storage and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskCompleted => "task_completed",
            Self::TaskOverdue => "task_overdue",
            Self::TaskRescheduled => "task_rescheduled",
            Self::HabitCompleted => "habit_completed",
            Self::HabitMissed => "habit_missed",
            Self::HabitStreakBroken => "habit_streak_broken",
            Self::GoalCreated => "goal_created",
            Self::GoalProgressUpdated => "goal_progress_updated",
            Self::GoalDeadlineApproaching => "goal_deadline_approaching",
            Self::ProjectCreated => "project_created",
            Self::ProjectStalled => "project_stalled",
            Self::ExperimentStarted => "experiment_started",
            Self::ExperimentEnded => "experiment_ended",
            Self::CheckInSubmitted => "check_in_submitted",
            Self::LowEnergyReported => "low_energy_reported",
            Self::ProfileUpdated => "profile_updated",
            Self::DailyPlanRequested => "daily_plan_requested",
            Self::WeeklyReviewDue => "weekly_review_due",
        }
    }

    /// Parse an event name, case-insensitively.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.to_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == normalized)
    }

    /// Whether this event records something the user failed to do.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            Self::HabitMissed | Self::HabitStreakBroken | Self::TaskOverdue
        )
    }
}

/// A queued signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEntry {
    /// Monotonic queue id
    pub id: i64,
    /// Owner of the signal
    pub user_id: Uuid,
    /// What happened
    pub event_type: SignalEventType,
    /// Triage priority assigned at intake
    pub priority: SignalPriority,
    /// Delivery window assigned at intake
    pub window_type: WindowType,
    /// Kind of entity the event is about, if any
    pub target_entity_type: Option<EntityKind>,
    /// Id of the entity the event is about, if any
    pub target_entity_id: Option<Uuid>,
    /// Lifecycle status
    pub status: QueueStatus,
    /// Worker holding the current lease
    pub lease_holder: Option<String>,
    /// When the current lease lapses
    pub lease_until: Option<DateTime<Utc>>,
    /// Number of times this entry has been acquired
    pub retry_count: u32,
    /// Number of times a lapsed lease on this entry was reclaimed
    pub reclaim_count: u32,
    /// Error or skip reason from the latest attempt
    pub last_error: Option<String>,
    /// When the event was captured
    pub created_at: DateTime<Utc>,
    /// Last time a queue operation touched the row
    pub updated_at: DateTime<Utc>,
    /// Hard TTL, enforced whatever the lease state
    pub expires_at: DateTime<Utc>,
    /// When the entry reached a terminal status
    pub processed_at: Option<DateTime<Utc>>,
}

impl SignalEntry {
    /// Whether the entry's lease is live at `now`.
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Processing && self.lease_until.is_some_and(|until| until > now)
    }

    /// Whether the TTL has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A signal ready to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    /// Owner of the signal
    pub user_id: Uuid,
    /// What happened
    pub event_type: SignalEventType,
    /// Triage priority
    pub priority: SignalPriority,
    /// Delivery window
    pub window_type: WindowType,
    /// Kind of the targeted entity
    pub target_entity_type: Option<EntityKind>,
    /// Id of the targeted entity
    pub target_entity_id: Option<Uuid>,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Capture time plus TTL
    pub expires_at: DateTime<Utc>,
}

impl NewSignal {
    /// Untargeted signal captured now, expiring after `ttl`.
    pub fn new(
        user_id: Uuid,
        event_type: SignalEventType,
        priority: SignalPriority,
        window_type: WindowType,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            event_type,
            priority,
            window_type,
            target_entity_type: None,
            target_entity_id: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Attach the entity the event is about.
    pub fn with_target(mut self, kind: EntityKind, id: Uuid) -> Self {
        self.target_entity_type = Some(kind);
        self.target_entity_id = Some(id);
        self
    }

    /// Backdate capture, moving the expiry with it.
    pub fn created_at(mut self, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        self.created_at = created_at;
        self.expires_at = created_at + ttl;
        self
    }
}

/// Parameters for a batch acquisition.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    /// Lease holder to stamp on acquired rows
    pub worker_id: String,
    /// Least urgent priority to include (inclusive)
    pub max_priority: SignalPriority,
    /// How long the lease lasts from `now`
    pub lease_duration: Duration,
    /// Upper bound on rows returned
    pub batch_size: usize,
    /// Restrict to these windows; `None` accepts all windows
    pub windows: Option<Vec<WindowType>>,
    /// Clock reading used for expiry and lease stamps
    pub now: DateTime<Utc>,
}

impl AcquireRequest {
    /// Accept every priority and window, starting now.
    pub fn new(worker_id: impl Into<String>, lease_duration: Duration, batch_size: usize) -> Self {
        Self {
            worker_id: worker_id.into(),
            max_priority: SignalPriority::Low,
            lease_duration,
            batch_size,
            windows: None,
            now: Utc::now(),
        }
    }

    /// Exclude priorities less urgent than `max_priority`.
    pub fn with_max_priority(mut self, max_priority: SignalPriority) -> Self {
        self.max_priority = max_priority;
        self
    }

    /// Only acquire entries aligned to `windows`.
    pub fn with_windows(mut self, windows: Vec<WindowType>) -> Self {
        self.windows = Some(windows);
        self
    }

    /// Pin the clock, mostly for tests.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Result of a lease reclamation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Entries returned to Pending
    pub reclaimed: u64,
    /// Entries permanently skipped because retries were exhausted
    pub abandoned: u64,
}

/// Result of settling a failed processing attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailedAttemptReport {
    /// Entries whose lease now ends immediately, left for the next sweep
    pub released: u64,
    /// Entries permanently skipped because retries were exhausted
    pub abandoned: u64,
}

/// Operational snapshot of a queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueHealth {
    /// Entry count per status; missing statuses are zero
    pub counts: HashMap<QueueStatus, u64>,
    /// Age of the oldest pending entry
    pub oldest_pending_age_secs: Option<i64>,
    /// Lapsed leases reclaimed over the queue's lifetime
    pub total_reclaims: u64,
    /// Entries skipped after exhausting retries
    pub abandoned: u64,
}

impl QueueHealth {
    /// Count for `status`, zero when absent.
    pub fn count(&self, status: QueueStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(SignalPriority::Urgent < SignalPriority::WindowAligned);
        assert!(SignalPriority::WindowAligned < SignalPriority::Low);
        assert_eq!(SignalPriority::from_rank(SignalPriority::Low.rank()), Some(SignalPriority::Low));
    }

    #[test]
    fn test_event_type_round_trip_names() {
        for event in SignalEventType::ALL {
            assert_eq!(SignalEventType::from_str(event.as_str()), Some(event));
        }
        assert_eq!(SignalEventType::from_str("nonsense"), None);
    }

    #[test]
    fn test_status_transitions() {
        assert!(QueueStatus::Pending.can_transition_to(QueueStatus::Processing));
        assert!(QueueStatus::Processing.can_transition_to(QueueStatus::Pending));
        assert!(!QueueStatus::Pending.can_transition_to(QueueStatus::Processed));
        assert!(QueueStatus::Expired.valid_transitions().is_empty());
    }

    #[test]
    fn test_lease_liveness() {
        let now = Utc::now();
        let mut entry = SignalEntry {
            id: 1,
            user_id: Uuid::new_v4(),
            event_type: SignalEventType::HabitMissed,
            priority: SignalPriority::Urgent,
            window_type: WindowType::Immediate,
            target_entity_type: None,
            target_entity_id: None,
            status: QueueStatus::Processing,
            lease_holder: Some("w1".to_string()),
            lease_until: Some(now + Duration::seconds(30)),
            retry_count: 1,
            reclaim_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(1),
            processed_at: None,
        };
        assert!(entry.is_leased_at(now));
        assert!(!entry.is_leased_at(now + Duration::seconds(31)));
        entry.status = QueueStatus::Pending;
        assert!(!entry.is_leased_at(now));
    }
}
