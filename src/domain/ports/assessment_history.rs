//! Assessment history port.
//!
//! Records completed pipeline runs. The delta calculator uses the most
//! recent record as its baseline; the stored candidates and trace are the
//! audit trail consumed downstream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{RecommendationCandidate, SelectionMethod};

/// Highest tier a run reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 0 rules
    Rules = 0,
    /// Tier 1 quick assessment
    Quick = 1,
    /// Tier 2 generative orchestration
    Generative = 2,
}

impl Tier {
    /// Name stored in `assessment_runs.tier_reached`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Quick => "quick",
            Self::Generative => "generative",
        }
    }

    /// Parse a stored tier name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rules" => Some(Self::Rules),
            "quick" => Some(Self::Quick),
            "generative" => Some(Self::Generative),
            _ => None,
        }
    }
}

/// One completed pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub run_id: Uuid,
    pub user_id: Uuid,
    /// Highest tier that ran
    pub tier_reached: Tier,
    /// How the candidates were chosen
    pub selection_method: SelectionMethod,
    /// Delivered candidates
    pub candidates: Vec<RecommendationCandidate>,
    /// Serialized orchestration trace, when Tier 2 ran
    pub trace: Option<serde_json::Value>,
    pub completed_at: DateTime<Utc>,
}

/// Store of completed runs.
#[async_trait]
pub trait AssessmentHistoryRepository: Send + Sync {
    /// Persist a completed run.
    async fn record(&self, record: &AssessmentRecord) -> DomainResult<()>;

    /// Completion time of the user's most recent run.
    async fn last_completed_at(&self, user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>>;

    /// Most recent runs for a user, newest first.
    async fn recent(&self, user_id: Uuid, limit: usize) -> DomainResult<Vec<AssessmentRecord>>;
}
