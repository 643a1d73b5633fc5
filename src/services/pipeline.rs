//! Escalation pipeline.
//!
//! Runs one user's signal batch through the tiers, cheapest first:
//! 1. Tier 0 rules; a resolved evaluation ends the run
//! 2. Tier 1 quick assessment; no escalation ends the run
//! 3. Tier 2 generative orchestration
//!
//! Whatever tier answers, its candidates go through the validator and the
//! run is recorded in the assessment history.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Config, OrchestrationTrace, QuickAssessmentResult, RecommendationCandidate,
    RuleEvaluationResult, SelectionMethod, SignalEntry, StateDeltaSummary,
};
use crate::domain::ports::{
    AssessmentHistoryRepository, AssessmentRecord, EmbeddingProvider, GenerativeTextService,
    SnapshotProvider, Tier, VectorStore,
};
use crate::services::candidate_validator::filter_candidates;
use crate::services::context_retriever::{ContextRetriever, EmbeddingCache};
use crate::services::delta_calculator::DeltaCalculator;
use crate::services::orchestrator::{GenerativeOrchestrator, OrchestrationInput};
use crate::services::quick_assessment::QuickAssessor;
use crate::services::rules::RuleEngine;

/// State owned by exactly one pipeline invocation.
///
/// The embedding cache lives here so nothing embedded for one user can be
/// served to another.
pub struct PipelineRun {
    /// Id recorded in history and traces
    pub run_id: Uuid,
    pub user_id: Uuid,
    /// When the run began
    pub started_at: DateTime<Utc>,
    /// Embeddings computed during this run only
    pub cache: EmbeddingCache,
}

impl PipelineRun {
    /// Fresh run for `user_id`.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            user_id,
            started_at: Utc::now(),
            cache: EmbeddingCache::new(),
        }
    }
}

/// Everything a run decided, for the caller and for audit.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    pub user_id: Uuid,
    /// Highest tier that ran
    pub tier_reached: Tier,
    /// How `candidates` were chosen
    pub selection_method: SelectionMethod,
    /// Rule findings
    pub tier0: RuleEvaluationResult,
    /// Changes since the baseline
    pub delta: StateDeltaSummary,
    /// Tier 1 decision; `None` when the rules answered
    pub quick_assessment: Option<QuickAssessmentResult>,
    /// Validated candidates, best first
    pub candidates: Vec<RecommendationCandidate>,
    /// Candidates rejected by validation
    pub dropped_candidates: usize,
    /// Tier 2 trace, when Tier 2 ran
    pub trace: Option<OrchestrationTrace>,
    pub completed_at: DateTime<Utc>,
}

/// External collaborators the pipeline is built from.
#[derive(Clone)]
pub struct PipelineServices {
    /// Source of user state
    pub snapshots: Arc<dyn SnapshotProvider>,
    /// Embeds retrieval queries
    pub embeddings: Arc<dyn EmbeddingProvider>,
    /// Index searched for context
    pub vectors: Arc<dyn VectorStore>,
    /// Tier 2 model
    pub generative: Arc<dyn GenerativeTextService>,
    /// Completed runs, also the delta baseline
    pub history: Arc<dyn AssessmentHistoryRepository>,
}

/// Tiered escalation pipeline: rules, then quick assessment, then the generative orchestrator.
pub struct EscalationPipeline {
    snapshots: Arc<dyn SnapshotProvider>,
    history: Arc<dyn AssessmentHistoryRepository>,
    rules: RuleEngine,
    delta: DeltaCalculator,
    quick: QuickAssessor,
    orchestrator: GenerativeOrchestrator,
}

impl EscalationPipeline {
    /// Build every tier from config.
    pub fn new(services: PipelineServices, config: &Config) -> Self {
        let retriever = Arc::new(ContextRetriever::new(
            services.embeddings,
            services.vectors,
            config.rag.clone(),
        ));

        Self {
            rules: RuleEngine::standard(&config.rules),
            delta: DeltaCalculator::new(services.history.clone(), config.delta.clone()),
            quick: QuickAssessor::new(retriever.clone(), config.quick_assessment.clone()),
            orchestrator: GenerativeOrchestrator::new(
                services.generative,
                retriever,
                config.generative.clone(),
            ),
            snapshots: services.snapshots,
            history: services.history,
        }
    }

    /// Run the tiers for one user's batch.
    ///
    /// Fails only when the snapshot cannot be built; every downstream
    /// degradation produces a (possibly empty) outcome instead.
    #[instrument(skip(self, signals), fields(signals = signals.len()))]
    pub async fn process(&self, user_id: Uuid, signals: &[SignalEntry]) -> DomainResult<PipelineOutcome> {
        let snapshot = self.snapshots.build_snapshot(user_id).await?;
        let run = PipelineRun::new(user_id);

        let tier0 = self.rules.evaluate(&snapshot, signals);
        let delta = self.delta.calculate(user_id, &snapshot, signals).await;
        let urgent_batch = self.quick.should_escalate_to_urgent(signals);

        let mut quick_assessment = None;
        let mut trace = None;

        let (tier_reached, selection_method, proposed) = if tier0.is_resolved() && !urgent_batch {
            (Tier::Rules, SelectionMethod::Tier0Rules, direct_candidates(&tier0))
        } else {
            let quick = self
                .quick
                .assess(&run.cache, &snapshot, signals, &tier0, &delta)
                .await;
            let escalate = quick.should_escalate;
            quick_assessment = Some(quick);

            match quick_assessment.as_ref().filter(|_| escalate) {
                None => (Tier::Quick, SelectionMethod::Tier1NoEscalation, direct_candidates(&tier0)),
                Some(quick) => {
                    let input = OrchestrationInput {
                        snapshot: &snapshot,
                        signals,
                        tier0: &tier0,
                        delta: &delta,
                        quick,
                    };
                    let result = self.orchestrator.run(&run.cache, input).await;
                    let candidates = if result.selection_method.is_failure() {
                        // Fall back to whatever the rules proposed.
                        direct_candidates(&tier0)
                    } else {
                        result.candidates
                    };
                    trace = Some(result.trace);
                    (Tier::Generative, result.selection_method, candidates)
                }
            }
        };

        let validation = filter_candidates(proposed, &snapshot);
        let outcome = PipelineOutcome {
            run_id: run.run_id,
            user_id,
            tier_reached,
            selection_method,
            tier0,
            delta,
            quick_assessment,
            candidates: validation.kept,
            dropped_candidates: validation.dropped,
            trace,
            completed_at: Utc::now(),
        };

        tracing::info!(
            run_id = %outcome.run_id,
            tier = outcome.tier_reached.as_str(),
            selection = outcome.selection_method.as_str(),
            candidates = outcome.candidates.len(),
            dropped = outcome.dropped_candidates,
            cache_hits = run.cache.hits(),
            cache_misses = run.cache.misses(),
            elapsed_ms = (outcome.completed_at - run.started_at).num_milliseconds(),
            "Pipeline run completed"
        );

        self.record(&outcome).await;
        Ok(outcome)
    }

    /// A failed history write costs the next run its baseline, not this
    /// run its result.
    async fn record(&self, outcome: &PipelineOutcome) {
        let trace = outcome
            .trace
            .as_ref()
            .and_then(|t| serde_json::to_value(t).ok());
        let record = AssessmentRecord {
            run_id: outcome.run_id,
            user_id: outcome.user_id,
            tier_reached: outcome.tier_reached,
            selection_method: outcome.selection_method,
            candidates: outcome.candidates.clone(),
            trace,
            completed_at: outcome.completed_at,
        };
        if let Err(e) = self.history.record(&record).await {
            tracing::warn!(run_id = %outcome.run_id, error = %e, "Failed to record assessment run");
        }
    }
}

fn direct_candidates(tier0: &RuleEvaluationResult) -> Vec<RecommendationCandidate> {
    let mut candidates: Vec<_> = tier0
        .direct_recommendations
        .iter()
        .map(|d| d.to_candidate())
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generative::mock::{MockGenerativeService, MockResponse};
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAssessmentHistory, SqliteVectorStore};
    use crate::domain::errors::DomainError;
    use crate::domain::models::{ActionKind, EntityKind, SignalEventType, UserStateSnapshot};
    use crate::domain::ports::NullEmbeddingProvider;
    use crate::services::rules::test_support::{days_ago, habit, signal, snapshot, task};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    struct InMemorySnapshots(HashMap<Uuid, UserStateSnapshot>);

    #[async_trait]
    impl SnapshotProvider for InMemorySnapshots {
        async fn build_snapshot(&self, user_id: Uuid) -> DomainResult<UserStateSnapshot> {
            self.0.get(&user_id).cloned().ok_or(DomainError::UserNotFound(user_id))
        }
    }

    struct Harness {
        pipeline: EscalationPipeline,
        history: Arc<SqliteAssessmentHistory>,
    }

    async fn harness(snapshot: &UserStateSnapshot, mock: MockGenerativeService) -> Harness {
        let pool = create_migrated_test_pool().await.unwrap();
        let history = Arc::new(SqliteAssessmentHistory::new(pool.clone()));
        let services = PipelineServices {
            snapshots: Arc::new(InMemorySnapshots(HashMap::from([(snapshot.user_id, snapshot.clone())]))),
            embeddings: Arc::new(NullEmbeddingProvider::new()),
            vectors: Arc::new(SqliteVectorStore::new(pool)),
            generative: Arc::new(mock),
            history: history.clone(),
        };
        Harness {
            pipeline: EscalationPipeline::new(services, &Config::default()),
            history,
        }
    }

    #[tokio::test]
    async fn test_resolved_rules_answer_without_models() {
        let mut snap = snapshot();
        snap.tasks.push(task("Renew passport", Some(days_ago(4)), 0));
        let mock = MockGenerativeService::new();
        let h = harness(&snap, mock.clone()).await;

        let outcome = h.pipeline.process(snap.user_id, &[]).await.unwrap();

        assert_eq!(outcome.selection_method, SelectionMethod::Tier0Rules);
        assert_eq!(outcome.tier_reached, Tier::Rules);
        assert!(outcome.quick_assessment.is_none());
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].action_kind, ActionKind::ExecuteToday);
        assert!(mock.calls().await.is_empty());

        let recorded = h.history.recent(snap.user_id, 5).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].run_id, outcome.run_id);
    }

    #[tokio::test]
    async fn test_quiet_batch_stops_at_tier1() {
        let snap = snapshot();
        let mock = MockGenerativeService::new();
        let h = harness(&snap, mock.clone()).await;
        let signals = vec![signal(snap.user_id, SignalEventType::TaskCreated, None)];

        let outcome = h.pipeline.process(snap.user_id, &signals).await.unwrap();

        assert_eq!(outcome.selection_method, SelectionMethod::Tier1NoEscalation);
        assert!(!outcome.quick_assessment.unwrap().should_escalate);
        assert!(outcome.candidates.is_empty());
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_tier2_falls_back_to_rule_candidates() {
        let mut snap = snapshot();
        snap.habits.push(habit("Evening walk", 0, Some(days_ago(5)), 0.5));
        let habit_id = snap.habits[0].id;
        let mock = MockGenerativeService::new().with_response("assessment", MockResponse::success("not json"));
        let h = harness(&snap, mock.clone()).await;
        let signals: Vec<_> = (0..4)
            .map(|_| signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, habit_id))))
            .collect();

        let outcome = h.pipeline.process(snap.user_id, &signals).await.unwrap();

        assert_eq!(outcome.tier_reached, Tier::Generative);
        assert_eq!(outcome.selection_method.as_str(), "Stage1-Failed");
        assert_eq!(mock.call_count("strategy").await, 0);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].target.entity_id, Some(habit_id));
        assert!(outcome.trace.is_some());
    }

    #[tokio::test]
    async fn test_generated_candidates_are_validated() {
        let mut snap = snapshot();
        snap.habits.push(habit("Evening walk", 0, Some(days_ago(5)), 0.5));
        let habit_id = snap.habits[0].id;
        let candidate = |id: Uuid, title: &str| {
            json!({
                "type": "habit_recovery",
                "target": {"kind": "habit", "entityId": id},
                "actionKind": "update",
                "title": title,
                "rationale": "r",
                "score": 0.8
            })
        };
        let mock = MockGenerativeService::quiet()
            .with_response(
                "strategy",
                MockResponse::json(&json!({
                    "focus": "walks",
                    "max_recommendations": 3,
                    "interventions": [{"intervention_type": "habit_recovery", "target_entity_id": habit_id, "reasoning": "r", "priority": 1}]
                })),
            )
            .with_response(
                "generation",
                MockResponse::json(&json!({"candidates": [
                    candidate(habit_id, "Walk around the block"),
                    candidate(Uuid::new_v4(), "Walk the imaginary dog")
                ]})),
            );
        let h = harness(&snap, mock).await;
        let signals: Vec<_> = (0..4)
            .map(|_| signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, habit_id))))
            .collect();

        let outcome = h.pipeline.process(snap.user_id, &signals).await.unwrap();

        assert_eq!(outcome.selection_method, SelectionMethod::Tier2Generative);
        assert_eq!(outcome.dropped_candidates, 1);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].title, "Walk around the block");

        let recorded = h.history.recent(snap.user_id, 1).await.unwrap();
        assert_eq!(recorded[0].selection_method, SelectionMethod::Tier2Generative);
        assert!(recorded[0].trace.is_some());
    }

    #[tokio::test]
    async fn test_unknown_user_is_an_error() {
        let snap = snapshot();
        let h = harness(&snap, MockGenerativeService::new()).await;
        let err = h.pipeline.process(Uuid::new_v4(), &[]).await.unwrap_err();
        assert!(matches!(err, DomainError::UserNotFound(_)));
    }
}
