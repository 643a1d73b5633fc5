//! Service layer: the escalation tiers and the workers that drive them.
//!
//! Services depend only on domain ports; adapters are injected.

pub mod candidate_validator;
pub mod context_retriever;
pub mod delta_calculator;
pub mod event_registry;
pub mod orchestrator;
pub mod outbox_processor;
pub mod pipeline;
pub mod queue_maintenance;
pub mod quick_assessment;
pub mod rules;
pub mod signal_intake;
pub mod signal_worker;

pub use candidate_validator::{filter_candidates, CandidateValidator, ValidationOutcome};
pub use context_retriever::{ContextRetriever, EmbeddingCache, RetrievalRequest};
pub use delta_calculator::DeltaCalculator;
pub use event_registry::{SignalClassification, SignalClassificationRegistry};
pub use orchestrator::{GenerativeOrchestrator, OrchestrationInput};
pub use outbox_processor::{OutboxProcessor, OutboxProcessorConfig, OutboxReport};
pub use pipeline::{EscalationPipeline, PipelineOutcome, PipelineRun, PipelineServices};
pub use queue_maintenance::{MaintenanceConfig, MaintenanceReport, QueueMaintenanceDaemon};
pub use quick_assessment::QuickAssessor;
pub use rules::{Rule, RuleEngine};
pub use signal_intake::SignalIntake;
pub use signal_worker::{BatchReport, SignalWorker, SignalWorkerConfig};
