//! Domain models for the escalation pipeline.

pub mod assessment;
pub mod config;
pub mod orchestration;
pub mod outbox;
pub mod recommendation;
pub mod rules;
pub mod signal;
pub mod snapshot;

pub use assessment::{
    DeltaBaseline, EntityDelta, QuickAssessmentResult, RelevantContextItem, RetrievalStage,
    StateDeltaSummary,
};
pub use config::{
    Config, DatabaseConfig, DeltaWeights, EmbeddingsConfig, FactorWeight, GenerativeConfig,
    LogFormat, LoggingConfig, OutboxConfig, QueueConfig, QuickAssessmentConfig, RagConfig,
    RotationPolicy, RuleThresholds, SignalTtlConfig, SnapshotConfig, StageRetrievalConfig,
    StageTokenLimits,
};
pub use orchestration::{
    CapacityStatus, GenerationDomain, GoalProgressAssessment, IdentifiedRisk, InterventionPlanItem,
    InterventionType, Momentum, OrchestrationResult, OrchestrationTrace, PipelineStage,
    ProgressStatus, RecommendationStrategy, SelectionMethod, SituationalAssessment, StageCallTrace,
    StageFailure, StageFailureKind, TokenUsage,
};
pub use outbox::{NewOutboxEntry, OutboxEntry, OutboxOperation};
pub use recommendation::{
    ActionKind, DirectActionKind, DirectRecommendationCandidate, RecommendationCandidate,
    RecommendationTarget,
};
pub use rules::{RuleEvaluationResult, RuleResult, Severity};
pub use signal::{
    AcquireRequest, FailedAttemptReport, NewSignal, QueueHealth, QueueStatus, ReclaimReport, SignalEntry,
    SignalEventType, SignalPriority, WindowType,
};
pub use snapshot::{
    CheckInSnapshot, EntityKind, ExperimentSnapshot, ExperimentStatus, GoalSnapshot, GoalStatus,
    HabitSnapshot, ProjectSnapshot, ProjectStatus, TaskSnapshot, TaskState, UserProfile,
    UserStateSnapshot,
};
