//! Generative orchestrator (Tier 2).
//!
//! Three sequential stages against the generative service:
//! 1. Assessment: a [`SituationalAssessment`] of the user's state
//! 2. Strategy: a bounded intervention plan and recommendation budget
//! 3. Generation: one call per domain in the plan, run concurrently
//!
//! Every stage call returns `Result<_, StageFailure>`. A failure ends the
//! run with no candidates and a selection method naming the stage; later
//! stages never run on a failed earlier one.

mod parsing;
pub mod prompts;

pub use parsing::{parse_stage_output, GeneratedCandidates};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::domain::errors::DomainError;
use crate::domain::models::{
    GenerationDomain, GenerativeConfig, InterventionPlanItem, InterventionType,
    OrchestrationResult, OrchestrationTrace, PipelineStage, QuickAssessmentResult,
    RecommendationCandidate, RecommendationStrategy, RetrievalStage, RuleEvaluationResult,
    SelectionMethod, SignalEntry, SituationalAssessment, StageCallTrace, StageFailure,
    StageFailureKind, StateDeltaSummary, UserStateSnapshot,
};
use crate::domain::ports::{CompletionRequest, GenerativeTextService};
use crate::services::context_retriever::{
    assessment_query, generation_query, strategy_query, ContextRetriever, EmbeddingCache,
    RetrievalRequest,
};

/// Everything the lower tiers learned, handed to Tier 2.
#[derive(Debug, Clone, Copy)]
pub struct OrchestrationInput<'a> {
    /// User state
    pub snapshot: &'a UserStateSnapshot,
    /// Batch that triggered the run
    pub signals: &'a [SignalEntry],
    /// Rule findings
    pub tier0: &'a RuleEvaluationResult,
    /// Changes since the baseline
    pub delta: &'a StateDeltaSummary,
    /// Tier 1 decision and its context
    pub quick: &'a QuickAssessmentResult,
}

/// Tier 2: assessment, strategy and per-domain generation, in that order.
pub struct GenerativeOrchestrator {
    service: Arc<dyn GenerativeTextService>,
    retriever: Arc<ContextRetriever>,
    config: GenerativeConfig,
}

/// One model call's outcome plus its trace record.
struct StageCall<T> {
    trace: StageCallTrace,
    outcome: Result<T, StageFailure>,
}

impl GenerativeOrchestrator {
    /// Orchestrator calling `service` for completions.
    pub fn new(
        service: Arc<dyn GenerativeTextService>,
        retriever: Arc<ContextRetriever>,
        config: GenerativeConfig,
    ) -> Self {
        Self {
            service,
            retriever,
            config,
        }
    }

    /// Run all three stages. A failed stage ends the run with no candidates; the caller falls back to rules.
    #[instrument(skip_all, fields(user_id = %input.snapshot.user_id))]
    pub async fn run(&self, cache: &EmbeddingCache, input: OrchestrationInput<'_>) -> OrchestrationResult {
        let mut trace = OrchestrationTrace::default();

        let assessment = match self.assess(cache, input, &mut trace).await {
            Ok(assessment) => assessment,
            Err(failure) => return Self::failed(failure, trace),
        };
        trace.assessment = Some(assessment.clone());

        let strategy = match self.strategize(cache, input, &assessment, &mut trace).await {
            Ok(strategy) => strategy,
            Err(failure) => return Self::failed(failure, trace),
        };
        trace.strategy = Some(strategy.clone());

        let plan = self.plan(&strategy);
        let budget = strategy.max_recommendations.min(self.config.max_recommendations) as usize;
        if plan.is_empty() || budget == 0 {
            tracing::info!(
                interventions = plan.len(),
                budget,
                "Strategy planned no usable interventions"
            );
            return OrchestrationResult {
                candidates: Vec::new(),
                selection_method: SelectionMethod::Tier2NoInterventions,
                failure: None,
                trace,
            };
        }

        let generated = match self.generate(cache, input, &strategy, plan, &mut trace).await {
            Ok(generated) => generated,
            Err(failure) => return Self::failed(failure, trace),
        };
        trace.generated = generated.clone();

        let candidates = rank_and_truncate(generated, budget);
        tracing::info!(
            candidates = candidates.len(),
            budget,
            input_tokens = trace.total_usage.input_tokens,
            output_tokens = trace.total_usage.output_tokens,
            "Tier 2 completed"
        );

        OrchestrationResult {
            candidates,
            selection_method: SelectionMethod::Tier2Generative,
            failure: None,
            trace,
        }
    }

    fn failed(failure: StageFailure, mut trace: OrchestrationTrace) -> OrchestrationResult {
        tracing::warn!(stage = %failure.stage, error = %failure, "Tier 2 stage failed");
        trace.failed_stage = Some(failure.stage);
        OrchestrationResult {
            candidates: Vec::new(),
            selection_method: SelectionMethod::failed(failure.stage),
            failure: Some(failure),
            trace,
        }
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn assess(
        &self,
        cache: &EmbeddingCache,
        input: OrchestrationInput<'_>,
        trace: &mut OrchestrationTrace,
    ) -> Result<SituationalAssessment, StageFailure> {
        let context = self
            .retriever
            .retrieve(
                cache,
                input.snapshot.user_id,
                RetrievalRequest::new(RetrievalStage::Assessment, assessment_query(input.snapshot, input.delta)),
            )
            .await;

        let request = self.request(
            "assessment".to_string(),
            prompts::ASSESSMENT_SYSTEM,
            prompts::assessment_prompt(input.snapshot, input.signals, input.tier0, input.delta, input.quick, &context),
            prompts::assessment_schema(),
            self.config.max_output_tokens.assessment,
            self.config.stage_timeout_secs,
        );

        let call = self
            .call::<SituationalAssessment>(PipelineStage::Assessment, None, request, context.len())
            .await;
        record(trace, call)
    }

    async fn strategize(
        &self,
        cache: &EmbeddingCache,
        input: OrchestrationInput<'_>,
        assessment: &SituationalAssessment,
        trace: &mut OrchestrationTrace,
    ) -> Result<RecommendationStrategy, StageFailure> {
        let context = self
            .retriever
            .retrieve(
                cache,
                input.snapshot.user_id,
                RetrievalRequest::new(RetrievalStage::Strategy, strategy_query(assessment)),
            )
            .await;

        let request = self.request(
            "strategy".to_string(),
            prompts::STRATEGY_SYSTEM,
            prompts::strategy_prompt(
                input.snapshot,
                assessment,
                self.config.max_interventions,
                self.config.max_recommendations,
                &context,
            ),
            prompts::strategy_schema(self.config.max_interventions),
            self.config.max_output_tokens.strategy,
            self.config.stage_timeout_secs,
        );

        let call = self
            .call::<RecommendationStrategy>(PipelineStage::Strategy, None, request, context.len())
            .await;
        record(trace, call)
    }

    /// Fan out one call per domain and wait for all of them.
    ///
    /// A failing domain fails the stage, but its siblings still finish and
    /// are traced.
    async fn generate(
        &self,
        cache: &EmbeddingCache,
        input: OrchestrationInput<'_>,
        strategy: &RecommendationStrategy,
        plan: BTreeMap<GenerationDomain, Vec<InterventionPlanItem>>,
        trace: &mut OrchestrationTrace,
    ) -> Result<Vec<RecommendationCandidate>, StageFailure> {
        let calls = plan
            .iter()
            .map(|(domain, items)| self.generate_domain(cache, input, strategy, *domain, items));
        let results = join_all(calls).await;

        let mut candidates = Vec::new();
        let mut first_failure = None;
        for (domain, call) in plan.keys().zip(results) {
            match record(trace, call) {
                Ok(generated) => {
                    let expected = domain.target_kind();
                    for candidate in generated.candidates {
                        if candidate.target.kind == expected {
                            candidates.push(candidate.normalized());
                        } else {
                            tracing::warn!(
                                domain = domain.as_str(),
                                kind = candidate.target.kind.as_str(),
                                title = %candidate.title,
                                "Dropping generated candidate outside its domain"
                            );
                        }
                    }
                }
                Err(failure) => {
                    tracing::warn!(domain = domain.as_str(), error = %failure, "Domain generation failed");
                    first_failure.get_or_insert(failure);
                }
            }
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(candidates),
        }
    }

    async fn generate_domain(
        &self,
        cache: &EmbeddingCache,
        input: OrchestrationInput<'_>,
        strategy: &RecommendationStrategy,
        domain: GenerationDomain,
        items: &[InterventionPlanItem],
    ) -> StageCall<GeneratedCandidates> {
        let context = self
            .retriever
            .retrieve(
                cache,
                input.snapshot.user_id,
                RetrievalRequest::new(RetrievalStage::Generation, generation_query(domain, items))
                    .with_entity_types(domain.context_kinds()),
            )
            .await;

        let request = self.request(
            format!("generation:{}", domain.as_str()),
            prompts::GENERATION_SYSTEM,
            prompts::generation_prompt(input.snapshot, domain, strategy, items, &context),
            prompts::generation_schema(domain),
            self.config.max_output_tokens.generation,
            self.config.generation_timeout_secs,
        );

        self.call(PipelineStage::Generation, Some(domain), request, context.len())
            .await
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Known interventions, capped and grouped by domain.
    fn plan(&self, strategy: &RecommendationStrategy) -> BTreeMap<GenerationDomain, Vec<InterventionPlanItem>> {
        let mut known: Vec<&InterventionPlanItem> = strategy
            .interventions
            .iter()
            .filter(|item| {
                let keep = item.intervention_type != InterventionType::Unknown;
                if !keep {
                    tracing::warn!(reasoning = %item.reasoning, "Ignoring unknown intervention type");
                }
                keep
            })
            .collect();
        known.sort_by_key(|item| item.priority);
        known.truncate(self.config.max_interventions);

        let mut plan: BTreeMap<GenerationDomain, Vec<InterventionPlanItem>> = BTreeMap::new();
        for item in known {
            if let Some(domain) = item.intervention_type.domain() {
                plan.entry(domain).or_default().push(item.clone());
            }
        }
        plan
    }

    fn request(
        &self,
        label: String,
        system: &str,
        user_prompt: String,
        schema: serde_json::Value,
        max_output_tokens: u32,
        timeout_secs: u64,
    ) -> CompletionRequest {
        CompletionRequest {
            label,
            system_prompt: system.to_string(),
            user_prompt,
            schema,
            max_output_tokens,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        stage: PipelineStage,
        domain: Option<GenerationDomain>,
        request: CompletionRequest,
        context_items: usize,
    ) -> StageCall<T> {
        let user_prompt = request.user_prompt.clone();
        let timeout = request.timeout;
        let started = Instant::now();

        let response = tokio::time::timeout(timeout, self.service.complete(request)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (raw_response, usage, outcome) = match response {
            Err(_) => (None, None, Err(StageFailure::new(stage, StageFailureKind::Timeout))),
            Ok(Err(DomainError::Timeout { .. })) => {
                (None, None, Err(StageFailure::new(stage, StageFailureKind::Timeout)))
            }
            Ok(Err(e)) => (
                None,
                None,
                Err(StageFailure::new(stage, StageFailureKind::Service(e.to_string()))),
            ),
            Ok(Ok(response)) => {
                let outcome = parse_stage_output::<T>(stage, &response.content);
                (Some(response.content), response.usage, outcome)
            }
        };

        tracing::debug!(
            stage = %stage,
            domain = ?domain,
            duration_ms,
            ok = outcome.is_ok(),
            "Stage call finished"
        );

        StageCall {
            trace: StageCallTrace {
                stage,
                domain,
                user_prompt,
                raw_response,
                duration_ms,
                usage,
                error: outcome.as_ref().err().map(ToString::to_string),
                context_items,
            },
            outcome,
        }
    }
}

fn record<T>(trace: &mut OrchestrationTrace, call: StageCall<T>) -> Result<T, StageFailure> {
    if let Some(usage) = call.trace.usage {
        trace.total_usage.add(usage);
    }
    trace.calls.push(call.trace);
    call.outcome
}

/// Highest score first, ties keep generation order; at most `budget`.
pub fn rank_and_truncate(mut candidates: Vec<RecommendationCandidate>, budget: usize) -> Vec<RecommendationCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(budget);
    candidates
}
