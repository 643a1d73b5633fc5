//! RAG context retriever.
//!
//! Builds a stage-specific query, embeds it through the run's
//! [`EmbeddingCache`], searches the user's vector index and returns the
//! hits above the similarity threshold. Retrieval is advisory: any failure
//! or timeout yields an empty context and the stage carries on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    EntityKind, GenerationDomain, InterventionPlanItem, RagConfig, RelevantContextItem,
    RetrievalStage, RuleEvaluationResult, SignalEntry, SituationalAssessment, StageRetrievalConfig,
    StateDeltaSummary, UserStateSnapshot,
};
use crate::domain::ports::{EmbeddingProvider, VectorQuery, VectorStore};

// ---------------------------------------------------------------------------
// Per-run embedding cache
// ---------------------------------------------------------------------------

/// Query embeddings keyed by exact query text.
///
/// Owned by a single pipeline run and dropped with it.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: Mutex<HashMap<String, Arc<Vec<f32>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached vector for `text`, embedding it on a miss.
    ///
    /// The lock is not held across the embedding call; two concurrent misses
    /// on the same text may both embed, and the later insert wins.
    pub async fn get_or_embed(&self, text: &str, provider: &dyn EmbeddingProvider) -> DomainResult<Arc<Vec<f32>>> {
        if let Some(vector) = self.entries.lock().await.get(text) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(vector));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = Arc::new(provider.embed(text).await?);
        self.entries
            .lock()
            .await
            .insert(text.to_string(), Arc::clone(&vector));
        Ok(vector)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that called the provider.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// One retrieval: the stage it serves, its query text, and an optional
/// entity-type whitelist overriding the stage's configured one.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Stage whose retrieval settings apply
    pub stage: RetrievalStage,
    /// Natural-language query to embed
    pub query: String,
    /// Overrides the stage's entity filter
    pub entity_types: Option<Vec<EntityKind>>,
}

impl RetrievalRequest {
    /// Query with the stage's own filter.
    pub fn new(stage: RetrievalStage, query: impl Into<String>) -> Self {
        Self {
            stage,
            query: query.into(),
            entity_types: None,
        }
    }

    /// Restrict the query to `types`.
    pub fn with_entity_types(mut self, types: Vec<EntityKind>) -> Self {
        self.entity_types = Some(types);
        self
    }
}

/// Fetches grounding context from the vector index for each pipeline stage.
///
/// Retrieval never fails a run: errors and timeouts yield no context.
pub struct ContextRetriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    config: RagConfig,
}

impl ContextRetriever {
    /// Retriever over `store`, embedding queries with `embeddings`.
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>, config: RagConfig) -> Self {
        Self {
            embeddings,
            store,
            config,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    fn stage_config(&self, stage: RetrievalStage) -> &StageRetrievalConfig {
        match stage {
            RetrievalStage::QuickAssessment => &self.config.quick_assessment,
            RetrievalStage::Assessment => &self.config.assessment,
            RetrievalStage::Strategy => &self.config.strategy,
            RetrievalStage::Generation => &self.config.generation,
        }
    }

    /// Relevant context for one stage, most similar first. Never fails.
    pub async fn retrieve(
        &self,
        cache: &EmbeddingCache,
        user_id: Uuid,
        request: RetrievalRequest,
    ) -> Vec<RelevantContextItem> {
        if !self.config.enabled || request.query.trim().is_empty() {
            return Vec::new();
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let stage = request.stage;
        match tokio::time::timeout(timeout, self.search(cache, user_id, request)).await {
            Ok(Ok(items)) => {
                tracing::debug!(%user_id, stage = stage.as_str(), items = items.len(), "Context retrieved");
                items
            }
            Ok(Err(e)) => {
                tracing::warn!(%user_id, stage = stage.as_str(), error = %e, "Context retrieval failed, continuing without context");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    %user_id,
                    stage = stage.as_str(),
                    timeout_ms = self.config.timeout_ms,
                    "Context retrieval timed out, continuing without context"
                );
                Vec::new()
            }
        }
    }

    async fn search(
        &self,
        cache: &EmbeddingCache,
        user_id: Uuid,
        request: RetrievalRequest,
    ) -> DomainResult<Vec<RelevantContextItem>> {
        let vector = cache.get_or_embed(&request.query, self.embeddings.as_ref()).await?;
        if vector.is_empty() {
            return Ok(Vec::new());
        }

        let stage_config = self.stage_config(request.stage);
        let entity_types = request
            .entity_types
            .filter(|types| !types.is_empty())
            .or_else(|| stage_config.entity_filter());

        let query = VectorQuery {
            user_id,
            vector: vector.as_ref().clone(),
            top_k: stage_config.top_k,
            entity_types,
        };
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let results = self.store.search(&query).await?;
        let items = results
            .into_iter()
            .filter(|r| r.similarity >= self.config.similarity_threshold)
            .map(|r| RelevantContextItem {
                entity_type: r.entity_type,
                entity_id: r.entity_id,
                content: truncate_at_word_boundary(&r.content, self.config.max_content_chars),
                similarity: r.similarity,
            })
            .collect();
        Ok(items)
    }
}

/// Cut `text` to at most `max_chars` characters, backing up to the last
/// whitespace so no word is split.
pub fn truncate_at_word_boundary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let byte_end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..byte_end];

    // The cut lands mid-word unless the next char is whitespace.
    let next_is_space = text[byte_end..].starts_with(char::is_whitespace);
    let cut = if next_is_space {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(i) if i > 0 => &head[..i],
            _ => head,
        }
    };
    cut.trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Stage query builders
// ---------------------------------------------------------------------------

fn push_list(out: &mut Vec<String>, label: &str, items: Vec<String>) {
    if !items.is_empty() {
        out.push(format!("{label}: {}.", items.join(", ")));
    }
}

/// Tier 1 query: what just happened and what Tier 0 noticed.
pub fn quick_assessment_query(
    snapshot: &UserStateSnapshot,
    signals: &[SignalEntry],
    tier0: &RuleEvaluationResult,
) -> String {
    let mut parts = Vec::new();

    let mut events: Vec<&str> = signals.iter().map(|s| s.event_type.as_str()).collect();
    events.sort_unstable();
    events.dedup();
    push_list(&mut parts, "Recent events", events.iter().map(|e| e.replace('_', " ")).collect());

    for signal in signals {
        if let (Some(kind), Some(id)) = (signal.target_entity_type, signal.target_entity_id) {
            if let Some(title) = snapshot.title_of(kind, id) {
                parts.push(format!("{} \"{}\".", kind.as_str(), title));
            }
        }
    }

    push_list(&mut parts, "Concerns", tier0.triggered_rules.iter().map(|r| r.replace('_', " ")).collect());
    push_list(&mut parts, "Active goals", snapshot.active_goals().map(|g| g.title.clone()).collect());
    parts.join(" ")
}

/// Stage 1 query: energy, load and goals.
pub fn assessment_query(snapshot: &UserStateSnapshot, delta: &StateDeltaSummary) -> String {
    let mut parts = Vec::new();

    if let Some(avg) = snapshot.average_energy(chrono::Duration::days(7)) {
        parts.push(format!("Energy trend averaging {avg:.1} out of 10."));
    }

    let open = snapshot.open_tasks().count();
    parts.push(format!(
        "Capacity: {open} open tasks against a daily capacity of {}.",
        snapshot.profile.daily_task_capacity
    ));

    if delta.total_missed() > 0 {
        parts.push(format!("{} missed items recently.", delta.total_missed()));
    }
    if delta.total_completed() > 0 {
        parts.push(format!("{} items completed recently.", delta.total_completed()));
    }

    push_list(&mut parts, "Goals", snapshot.active_goals().map(|g| g.title.clone()).collect());
    push_list(&mut parts, "Habits", snapshot.active_habits().map(|h| h.title.clone()).collect());
    parts.join(" ")
}

/// Stage 2 query: the assessment's risks and patterns.
pub fn strategy_query(assessment: &SituationalAssessment) -> String {
    let mut parts = vec![format!(
        "Momentum {:?}, capacity {:?}.",
        assessment.momentum, assessment.capacity_status
    )
    .to_lowercase()];

    if let Some(trend) = &assessment.energy_trend {
        parts.push(format!("Energy {trend}."));
    }
    push_list(&mut parts, "Risks", assessment.risks.iter().map(|r| r.description.clone()).collect());
    push_list(&mut parts, "Patterns", assessment.patterns.clone());
    parts.join(" ")
}

/// Stage 3 query for one domain: the reasoning behind its interventions.
pub fn generation_query(domain: GenerationDomain, items: &[InterventionPlanItem]) -> String {
    let mut parts = vec![format!("{} interventions.", domain.as_str().replace('_', " "))];
    parts.extend(items.iter().map(|i| i.reasoning.trim().to_string()).filter(|r| !r.is_empty()));
    parts.join(" ")
}
