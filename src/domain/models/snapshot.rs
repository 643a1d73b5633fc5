//! User state snapshot domain model.
//!
//! A snapshot is an immutable, point-in-time view of one user's
//! life-management state. It is built once per pipeline run and shared
//! read-only by every tier of that run.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Kinds of user-owned entities the pipeline reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Goal,
    Task,
    Habit,
    Project,
    Experiment,
    CheckIn,
}

impl EntityKind {
    /// Every kind, in prompt ordering.
    pub const ALL: [EntityKind; 6] = [
        Self::Goal,
        Self::Task,
        Self::Habit,
        Self::Project,
        Self::Experiment,
        Self::CheckIn,
    ];

    /// Stable snake_case name used in storage and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::Task => "task",
            Self::Habit => "habit",
            Self::Project => "project",
            Self::Experiment => "experiment",
            Self::CheckIn => "check_in",
        }
    }

    /// Parse a kind name; `checkin` is accepted for `check_in`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "goal" => Some(Self::Goal),
            "task" => Some(Self::Task),
            "habit" => Some(Self::Habit),
            "project" => Some(Self::Project),
            "experiment" => Some(Self::Experiment),
            "check_in" | "checkin" => Some(Self::CheckIn),
            _ => None,
        }
    }
}

/// Lifecycle of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Todo,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskState {
    /// Whether the task still needs doing.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Todo | Self::InProgress)
    }
}

/// Lifecycle of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Active,
    OnHold,
    Completed,
}

/// Lifecycle of a personal experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Planned,
    Running,
    Completed,
    Abandoned,
}

/// A goal as of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSnapshot {
    pub id: Uuid,
    pub title: String,
    pub status: GoalStatus,
    /// Fraction complete in [0, 1]
    pub progress: f64,
    /// Date the user aims to finish by
    pub target_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task as of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub title: String,
    pub status: TaskState,
    /// Goal the task serves
    pub goal_id: Option<Uuid>,
    /// Project the task belongs to
    pub project_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    /// Times the due date was pushed back
    #[serde(default)]
    pub reschedule_count: u32,
    /// 1 (highest) to 4 (lowest)
    #[serde(default = "default_task_priority")]
    pub priority: u8,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_task_priority() -> u8 {
    3
}

impl TaskSnapshot {
    /// Days past due as of `today`; `None` when not overdue.
    pub fn days_overdue(&self, today: NaiveDate) -> Option<i64> {
        if !self.status.is_open() {
            return None;
        }
        let due = self.due_date?;
        let days = (today - due).num_days();
        (days > 0).then_some(days)
    }
}

/// A recurring habit as of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitSnapshot {
    pub id: Uuid,
    pub title: String,
    pub goal_id: Option<Uuid>,
    /// Consecutive periods completed, up to today
    #[serde(default)]
    pub current_streak: u32,
    /// Best streak on record
    #[serde(default)]
    pub longest_streak: u32,
    /// Completion ratio over the trailing two weeks, in [0, 1]
    #[serde(default)]
    pub adherence_rate: f64,
    /// Most recent completion day
    pub last_completed_on: Option<NaiveDate>,
    /// Paused habits are ignored by the rules
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// A project as of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: Uuid,
    pub title: String,
    pub status: ProjectStatus,
    pub goal_id: Option<Uuid>,
    /// Fraction complete in [0, 1]
    #[serde(default)]
    pub progress: f64,
    /// Last time any work was recorded
    pub last_activity_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A personal experiment as of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub id: Uuid,
    pub title: String,
    /// What the user expects to learn
    pub hypothesis: Option<String>,
    pub status: ExperimentStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Check-ins logged against the experiment
    #[serde(default)]
    pub check_in_count: u32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A self-reported check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInSnapshot {
    pub id: Uuid,
    /// Self-reported energy, 1 (depleted) to 10 (energized)
    pub energy_level: u8,
    /// Self-reported mood, 1 to 10
    pub mood: Option<u8>,
    /// Self-reported stress, 1 to 10
    pub stress: Option<u8>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Profile settings that shape recommendations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    /// IANA zone name
    pub timezone: Option<String>,
    /// Open tasks the user considers a sustainable load
    #[serde(default = "default_capacity")]
    pub daily_task_capacity: u32,
}

fn default_capacity() -> u32 {
    5
}

/// Immutable point-in-time view of one user's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStateSnapshot {
    /// Owner of every entity in the snapshot
    pub user_id: Uuid,
    /// When the snapshot was taken; rules treat it as "now"
    pub captured_at: DateTime<Utc>,
    pub profile: UserProfile,
    #[serde(default)]
    pub goals: Vec<GoalSnapshot>,
    #[serde(default)]
    pub tasks: Vec<TaskSnapshot>,
    #[serde(default)]
    pub habits: Vec<HabitSnapshot>,
    #[serde(default)]
    pub projects: Vec<ProjectSnapshot>,
    #[serde(default)]
    pub experiments: Vec<ExperimentSnapshot>,
    #[serde(default)]
    pub check_ins: Vec<CheckInSnapshot>,
}

impl UserStateSnapshot {
    /// Snapshot with a default profile and no entities.
    pub fn empty(user_id: Uuid, captured_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            captured_at,
            profile: UserProfile {
                user_id,
                display_name: None,
                timezone: None,
                daily_task_capacity: default_capacity(),
            },
            goals: Vec::new(),
            tasks: Vec::new(),
            habits: Vec::new(),
            projects: Vec::new(),
            experiments: Vec::new(),
            check_ins: Vec::new(),
        }
    }

    /// Calendar date the snapshot was captured on.
    pub fn today(&self) -> NaiveDate {
        self.captured_at.date_naive()
    }

    /// Tasks still to do.
    pub fn open_tasks(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.tasks.iter().filter(|t| t.status.is_open())
    }

    /// Goals in the active state.
    pub fn active_goals(&self) -> impl Iterator<Item = &GoalSnapshot> {
        self.goals.iter().filter(|g| g.status == GoalStatus::Active)
    }

    /// Habits not paused.
    pub fn active_habits(&self) -> impl Iterator<Item = &HabitSnapshot> {
        self.habits.iter().filter(|h| h.active)
    }

    /// Check-ins newer than `window`, most recent first.
    pub fn recent_check_ins(&self, window: Duration) -> Vec<&CheckInSnapshot> {
        let cutoff = self.captured_at - window;
        let mut recent: Vec<_> = self.check_ins.iter().filter(|c| c.created_at >= cutoff).collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent
    }

    /// Ids of every entity of `kind` in the snapshot.
    pub fn ids_of(&self, kind: EntityKind) -> HashSet<Uuid> {
        match kind {
            EntityKind::Goal => self.goals.iter().map(|g| g.id).collect(),
            EntityKind::Task => self.tasks.iter().map(|t| t.id).collect(),
            EntityKind::Habit => self.habits.iter().map(|h| h.id).collect(),
            EntityKind::Project => self.projects.iter().map(|p| p.id).collect(),
            EntityKind::Experiment => self.experiments.iter().map(|e| e.id).collect(),
            EntityKind::CheckIn => self.check_ins.iter().map(|c| c.id).collect(),
        }
    }

    /// Human-readable title of an entity, if present.
    pub fn title_of(&self, kind: EntityKind, id: Uuid) -> Option<&str> {
        match kind {
            EntityKind::Goal => self.goals.iter().find(|g| g.id == id).map(|g| g.title.as_str()),
            EntityKind::Task => self.tasks.iter().find(|t| t.id == id).map(|t| t.title.as_str()),
            EntityKind::Habit => self.habits.iter().find(|h| h.id == id).map(|h| h.title.as_str()),
            EntityKind::Project => self.projects.iter().find(|p| p.id == id).map(|p| p.title.as_str()),
            EntityKind::Experiment => {
                self.experiments.iter().find(|e| e.id == id).map(|e| e.title.as_str())
            }
            EntityKind::CheckIn => None,
        }
    }

    /// Mean energy of check-ins in `window`, if any.
    pub fn average_energy(&self, window: Duration) -> Option<f64> {
        let recent = self.recent_check_ins(window);
        if recent.is_empty() {
            return None;
        }
        let total: f64 = recent.iter().map(|c| f64::from(c.energy_level)).sum();
        Some(total / recent.len() as f64)
    }
}
