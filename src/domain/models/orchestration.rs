//! Tier 2 orchestration models.
//!
//! Each stage of the generative orchestrator produces one of these records.
//! They are parsed from schema-constrained model output, passed forward to
//! the next stage, and recorded in the trace. None are mutated once built.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::recommendation::RecommendationCandidate;
use super::snapshot::EntityKind;

/// Direction the user's progress is heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    Building,
    Steady,
    Declining,
    Stalled,
}

/// Load relative to what the user can sustain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityStatus {
    Underloaded,
    Balanced,
    Stretched,
    Overloaded,
}

/// How a goal is tracking against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    OnTrack,
    AtRisk,
    OffTrack,
}

/// A risk called out by the assessment stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiedRisk {
    pub description: String,
    /// Free-form label such as "high"
    pub severity: String,
    /// Entities the risk concerns
    #[serde(default)]
    pub entity_ids: Vec<Uuid>,
}

/// Assessment of one goal's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProgressAssessment {
    pub goal_id: Uuid,
    pub status: ProgressStatus,
    #[serde(default)]
    pub note: String,
}

/// Stage 1 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationalAssessment {
    /// Short narrative of the user's situation
    pub summary: String,
    #[serde(default)]
    pub risks: Vec<IdentifiedRisk>,
    /// Recurring behaviors worth acting on
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub goal_progress: Vec<GoalProgressAssessment>,
    pub momentum: Momentum,
    pub capacity_status: CapacityStatus,
    #[serde(default)]
    pub energy_trend: Option<String>,
}

/// Intervention categories the strategy stage may plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    TaskTriage,
    TaskScheduling,
    TaskBreakdown,
    HabitRecovery,
    HabitFormation,
    HabitAdjustment,
    ExperimentDesign,
    ExperimentReview,
    GoalRealignment,
    GoalMetricUpdate,
    ProjectRescue,
    ProjectPlanning,
    /// Anything the model invents; dropped before generation
    #[serde(other)]
    Unknown,
}

/// Output partition used by the generation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationDomain {
    Task,
    Habit,
    Experiment,
    GoalMetric,
    Project,
}

impl GenerationDomain {
    /// Every domain, in generation order.
    pub const ALL: [GenerationDomain; 5] = [
        Self::Task,
        Self::Habit,
        Self::Experiment,
        Self::GoalMetric,
        Self::Project,
    ];

    /// Label suffix used for generation calls.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Habit => "habit",
            Self::Experiment => "experiment",
            Self::GoalMetric => "goal_metric",
            Self::Project => "project",
        }
    }

    /// Entity kind candidates of this domain must target.
    pub fn target_kind(&self) -> EntityKind {
        match self {
            Self::Task => EntityKind::Task,
            Self::Habit => EntityKind::Habit,
            Self::Experiment => EntityKind::Experiment,
            Self::GoalMetric => EntityKind::Goal,
            Self::Project => EntityKind::Project,
        }
    }

    /// Entity kinds worth retrieving as grounding for this domain.
    pub fn context_kinds(&self) -> Vec<EntityKind> {
        match self {
            Self::Task => vec![EntityKind::Task, EntityKind::Project],
            Self::Habit => vec![EntityKind::Habit, EntityKind::CheckIn],
            Self::Experiment => vec![EntityKind::Experiment, EntityKind::CheckIn],
            Self::GoalMetric => vec![EntityKind::Goal],
            Self::Project => vec![EntityKind::Project, EntityKind::Task],
        }
    }
}

impl InterventionType {
    /// Fixed type-to-domain mapping; `None` for unrecognized types.
    pub fn domain(&self) -> Option<GenerationDomain> {
        match self {
            Self::TaskTriage | Self::TaskScheduling | Self::TaskBreakdown => Some(GenerationDomain::Task),
            Self::HabitRecovery | Self::HabitFormation | Self::HabitAdjustment => {
                Some(GenerationDomain::Habit)
            }
            Self::ExperimentDesign | Self::ExperimentReview => Some(GenerationDomain::Experiment),
            Self::GoalRealignment | Self::GoalMetricUpdate => Some(GenerationDomain::GoalMetric),
            Self::ProjectRescue | Self::ProjectPlanning => Some(GenerationDomain::Project),
            Self::Unknown => None,
        }
    }
}

/// One planned intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionPlanItem {
    pub intervention_type: InterventionType,
    /// Entity the intervention is about, if one
    #[serde(default)]
    pub target_entity_id: Option<Uuid>,
    pub reasoning: String,
    /// 1 (most important) upward
    #[serde(default = "default_plan_priority")]
    pub priority: u8,
}

fn default_plan_priority() -> u8 {
    3
}

/// Stage 2 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationStrategy {
    /// Theme the recommendations should share
    pub focus: String,
    /// Candidates the model thinks are worth sending
    pub max_recommendations: u32,
    #[serde(default)]
    pub interventions: Vec<InterventionPlanItem>,
}

/// The three orchestrator stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Situational assessment
    Assessment,
    /// Strategy selection
    Strategy,
    /// Candidate generation
    Generation,
}

impl PipelineStage {
    /// Short stage label used in selection tags.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Assessment => "Stage1",
            Self::Strategy => "Stage2",
            Self::Generation => "Stage3",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StageFailureKind {
    /// Deadline passed before a reply
    Timeout,
    /// Reply had no content
    EmptyResponse,
    /// Reply was not JSON
    MalformedJson(String),
    /// JSON of the wrong shape
    SchemaViolation(String),
    /// The model service itself failed
    Service(String),
}

/// Why a stage produced no usable output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub kind: StageFailureKind,
}

impl StageFailure {
    /// Failure of `stage`.
    pub fn new(stage: PipelineStage, kind: StageFailureKind) -> Self {
        Self { stage, kind }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StageFailureKind::Timeout => write!(f, "{} timed out", self.stage),
            StageFailureKind::EmptyResponse => write!(f, "{} returned an empty response", self.stage),
            StageFailureKind::MalformedJson(e) => write!(f, "{} returned malformed JSON: {e}", self.stage),
            StageFailureKind::SchemaViolation(e) => write!(f, "{} violated its schema: {e}", self.stage),
            StageFailureKind::Service(e) => write!(f, "{} service error: {e}", self.stage),
        }
    }
}

/// How a run's final candidate list was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionMethod {
    /// Rule candidates, no model involved
    #[serde(rename = "Tier0-Rules")]
    Tier0Rules,
    /// Quick assessment declined to escalate
    #[serde(rename = "Tier1-NoEscalation")]
    Tier1NoEscalation,
    /// Generated candidates
    #[serde(rename = "Tier2-Generative")]
    Tier2Generative,
    /// Strategy planned nothing
    #[serde(rename = "Tier2-NoInterventions")]
    Tier2NoInterventions,
    /// Assessment failed; rule fallback
    #[serde(rename = "Stage1-Failed")]
    Stage1Failed,
    /// Strategy failed; rule fallback
    #[serde(rename = "Stage2-Failed")]
    Stage2Failed,
    /// Generation failed; rule fallback
    #[serde(rename = "Stage3-Failed")]
    Stage3Failed,
}

impl SelectionMethod {
    /// Tag stored in history and shown by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier0Rules => "Tier0-Rules",
            Self::Tier1NoEscalation => "Tier1-NoEscalation",
            Self::Tier2Generative => "Tier2-Generative",
            Self::Tier2NoInterventions => "Tier2-NoInterventions",
            Self::Stage1Failed => "Stage1-Failed",
            Self::Stage2Failed => "Stage2-Failed",
            Self::Stage3Failed => "Stage3-Failed",
        }
    }

    /// Parse a stored tag.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        [
            Self::Tier0Rules,
            Self::Tier1NoEscalation,
            Self::Tier2Generative,
            Self::Tier2NoInterventions,
            Self::Stage1Failed,
            Self::Stage2Failed,
            Self::Stage3Failed,
        ]
        .into_iter()
        .find(|m| m.as_str() == s)
    }

    /// Tag for a run that stopped at `stage`.
    pub fn failed(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Assessment => Self::Stage1Failed,
            PipelineStage::Strategy => Self::Stage2Failed,
            PipelineStage::Generation => Self::Stage3Failed,
        }
    }

    /// Whether a stage failure decided the selection.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Stage1Failed | Self::Stage2Failed | Self::Stage3Failed)
    }
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokens billed for one or more model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Accumulate `other`, saturating.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// One model call as seen by the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCallTrace {
    pub stage: PipelineStage,
    /// Set for generation calls
    pub domain: Option<GenerationDomain>,
    pub user_prompt: String,
    /// Reply text, kept even when it failed to parse
    pub raw_response: Option<String>,
    pub duration_ms: u64,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
    /// Retrieved documents included in the prompt
    pub context_items: usize,
}

/// Explainability trace of a Tier 2 run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationTrace {
    pub calls: Vec<StageCallTrace>,
    pub assessment: Option<SituationalAssessment>,
    pub strategy: Option<RecommendationStrategy>,
    /// Every parsed candidate, before validation and trimming
    pub generated: Vec<RecommendationCandidate>,
    /// First stage that failed, if any
    pub failed_stage: Option<PipelineStage>,
    pub total_usage: TokenUsage,
}

/// Result of a Tier 2 run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// Candidates to deliver
    pub candidates: Vec<RecommendationCandidate>,
    pub selection_method: SelectionMethod,
    /// Why a stage failed, if one did
    pub failure: Option<StageFailure>,
    pub trace: OrchestrationTrace,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_intervention_type_parses() {
        let item: InterventionPlanItem = serde_json::from_value(serde_json::json!({
            "intervention_type": "astrology_reading",
            "reasoning": "?"
        }))
        .unwrap();
        assert_eq!(item.intervention_type, InterventionType::Unknown);
        assert_eq!(item.intervention_type.domain(), None);
        assert_eq!(item.priority, 3);
    }

    #[test]
    fn test_selection_method_tags() {
        assert_eq!(SelectionMethod::failed(PipelineStage::Assessment).as_str(), "Stage1-Failed");
        assert_eq!(
            serde_json::to_value(SelectionMethod::Stage3Failed).unwrap(),
            serde_json::json!("Stage3-Failed")
        );
        assert!(SelectionMethod::Stage2Failed.is_failure());
        assert!(!SelectionMethod::Tier2Generative.is_failure());
    }

    #[test]
    fn test_domain_mapping_is_total_over_known_types() {
        for t in [
            InterventionType::TaskTriage,
            InterventionType::HabitRecovery,
            InterventionType::ExperimentReview,
            InterventionType::GoalMetricUpdate,
            InterventionType::ProjectRescue,
        ] {
            assert!(t.domain().is_some());
        }
        assert_eq!(GenerationDomain::GoalMetric.target_kind(), EntityKind::Goal);
    }
}
