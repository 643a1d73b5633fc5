//! Delta and quick-assessment models (Tier 1 inputs and outputs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::snapshot::EntityKind;

/// Where the delta window's start came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaBaseline {
    /// The user's last completed assessment
    LastAssessment,
    /// No assessment on record; fixed lookback window
    Lookback,
}

/// Change counts for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDelta {
    /// Created since the baseline
    pub new: u32,
    /// Updated since the baseline, excluding new ones
    pub modified: u32,
    /// Finished since the baseline
    pub completed: u32,
    /// Overdue or lapsed as of the snapshot
    pub missed: u32,
}

/// What changed for a user since the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDeltaSummary {
    pub user_id: Uuid,
    /// Start of the delta window
    pub since: DateTime<Utc>,
    /// How `since` was chosen
    pub baseline: DeltaBaseline,
    /// Change counts per entity kind
    pub per_entity: BTreeMap<EntityKind, EntityDelta>,
    /// Signals in the batch captured after `since`
    pub new_signals: u32,
    /// Misses reported by the batch that the snapshot did not already show,
    /// one per targeted entity
    pub signalled_misses: u32,
    /// Capped weighted change magnitude in [0, 1]
    pub overall_delta_score: f64,
}

impl StateDeltaSummary {
    /// New entities across all kinds.
    pub fn total_new(&self) -> u32 {
        self.per_entity.values().map(|d| d.new).sum()
    }

    /// Modified entities across all kinds.
    pub fn total_modified(&self) -> u32 {
        self.per_entity.values().map(|d| d.modified).sum()
    }

    /// Completed items across all kinds.
    pub fn total_completed(&self) -> u32 {
        self.per_entity.values().map(|d| d.completed).sum()
    }

    /// Distinct missed items: snapshot-detected misses plus signalled misses
    /// the snapshot did not account for.
    pub fn total_missed(&self) -> u32 {
        self.per_entity.values().map(|d| d.missed).sum::<u32>() + self.signalled_misses
    }
}

/// Pipeline stage a retrieval is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStage {
    QuickAssessment,
    Assessment,
    Strategy,
    Generation,
}

impl RetrievalStage {
    /// Stage name used in logs and traces.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuickAssessment => "quick_assessment",
            Self::Assessment => "assessment",
            Self::Strategy => "strategy",
            Self::Generation => "generation",
        }
    }
}

/// A retrieved historical item used to ground a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantContextItem {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    /// Indexed text, truncated to the configured length
    pub content: String,
    /// Cosine similarity to the query
    pub similarity: f64,
}

/// Tier 1 decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickAssessmentResult {
    /// Mean similarity of retrieved context plus a count bonus
    pub relevance_score: f64,
    /// Delta score carried over from the delta summary
    pub delta_score: f64,
    /// Batch priority mix plus rule severity
    pub urgency_score: f64,
    /// Weighted blend of the three scores
    pub combined_score: f64,
    /// Whether Tier 2 runs
    pub should_escalate: bool,
    /// Which threshold or override fired
    pub escalation_reason: Option<String>,
    /// Context retrieved for scoring, reused by later stages
    pub relevant_context: Vec<RelevantContextItem>,
}
