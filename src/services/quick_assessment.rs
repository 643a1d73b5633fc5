//! Quick assessment (Tier 1).
//!
//! Scores relevance, change and urgency, combines them, and decides
//! whether the run is worth a generative pass.

use std::sync::Arc;
use tracing::instrument;

use crate::domain::models::{
    QuickAssessmentConfig, QuickAssessmentResult, RelevantContextItem, RetrievalStage,
    RuleEvaluationResult, Severity, SignalEntry, SignalPriority, StateDeltaSummary,
    UserStateSnapshot,
};
use crate::services::context_retriever::{
    quick_assessment_query, ContextRetriever, EmbeddingCache, RetrievalRequest,
};

/// Urgency contributed by Tier 0's maximum severity, before the cap.
fn severity_weight(severity: Option<Severity>) -> f64 {
    match severity {
        Some(Severity::Critical) => 0.5,
        Some(Severity::High) => 0.35,
        Some(Severity::Medium) => 0.2,
        Some(Severity::Low) => 0.1,
        None => 0.0,
    }
}

/// Tier 1: cheap scoring that decides whether the generative tier runs.
pub struct QuickAssessor {
    retriever: Arc<ContextRetriever>,
    config: QuickAssessmentConfig,
}

impl QuickAssessor {
    /// Assessor retrieving relevance context through `retriever`.
    pub fn new(retriever: Arc<ContextRetriever>, config: QuickAssessmentConfig) -> Self {
        Self { retriever, config }
    }

    pub fn config(&self) -> &QuickAssessmentConfig {
        &self.config
    }

    #[instrument(skip_all, fields(user_id = %snapshot.user_id, signals = signals.len()))]
    pub async fn assess(
        &self,
        cache: &EmbeddingCache,
        snapshot: &UserStateSnapshot,
        signals: &[SignalEntry],
        tier0: &RuleEvaluationResult,
        delta: &StateDeltaSummary,
    ) -> QuickAssessmentResult {
        let query = quick_assessment_query(snapshot, signals, tier0);
        let context = self
            .retriever
            .retrieve(
                cache,
                snapshot.user_id,
                RetrievalRequest::new(RetrievalStage::QuickAssessment, query),
            )
            .await;

        let result = self.score(signals, tier0, delta.overall_delta_score, delta.total_missed(), context);
        tracing::info!(
            relevance = result.relevance_score,
            delta = result.delta_score,
            urgency = result.urgency_score,
            combined = result.combined_score,
            escalate = result.should_escalate,
            reason = result.escalation_reason.as_deref().unwrap_or(""),
            "Tier 1 assessed"
        );
        result
    }

    /// Everything but retrieval.
    pub fn score(
        &self,
        signals: &[SignalEntry],
        tier0: &RuleEvaluationResult,
        delta_score: f64,
        missed_items: u32,
        context: Vec<RelevantContextItem>,
    ) -> QuickAssessmentResult {
        let relevance_score = self.relevance_score(&context);
        let urgency_score = self.urgency_score(signals, tier0.max_severity);
        let delta_score = delta_score.clamp(0.0, 1.0);
        let combined_score = self.combined_score(relevance_score, delta_score, urgency_score);
        let escalation_reason = self
            .escalation_reason(combined_score, urgency_score, delta_score, tier0, missed_items)
            .or_else(|| self.urgent_batch_reason(signals));

        QuickAssessmentResult {
            relevance_score,
            delta_score,
            urgency_score,
            combined_score,
            should_escalate: escalation_reason.is_some(),
            escalation_reason,
            relevant_context: context,
        }
    }

    /// Position-weighted mean similarity (weight `1/(rank+1)`) plus a small
    /// bonus per result.
    pub fn relevance_score(&self, context: &[RelevantContextItem]) -> f64 {
        if context.is_empty() {
            return 0.0;
        }

        let (weighted, weights) = context
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sum, total), (rank, item)| {
                let w = 1.0 / (rank as f64 + 1.0);
                (sum + item.similarity.clamp(0.0, 1.0) * w, total + w)
            });

        let bonus = (self.config.result_count_bonus * context.len() as f64)
            .min(self.config.max_result_count_bonus);
        (weighted / weights + bonus).clamp(0.0, 1.0)
    }

    /// Capped per-priority signal contributions plus Tier 0 severity.
    pub fn urgency_score(&self, signals: &[SignalEntry], max_severity: Option<Severity>) -> f64 {
        let count = |p: SignalPriority| signals.iter().filter(|s| s.priority == p).count() as f64;

        let from_signals = self.config.urgent_signals.apply(count(SignalPriority::Urgent))
            + self.config.window_signals.apply(count(SignalPriority::WindowAligned))
            + self.config.low_signals.apply(count(SignalPriority::Low));
        let from_severity = severity_weight(max_severity).min(self.config.severity_cap);

        (from_signals + from_severity).clamp(0.0, 1.0)
    }

    /// Fixed weighted combination; inputs are clamped to [0, 1] first.
    pub fn combined_score(&self, relevance: f64, delta: f64, urgency: f64) -> f64 {
        let c = &self.config;
        (c.relevance_weight * relevance.clamp(0.0, 1.0)
            + c.delta_weight * delta.clamp(0.0, 1.0)
            + c.urgency_weight * urgency.clamp(0.0, 1.0))
        .clamp(0.0, 1.0)
    }

    /// Why the run should escalate, or `None` when it should not.
    pub fn escalation_reason(
        &self,
        combined: f64,
        urgency: f64,
        delta: f64,
        tier0: &RuleEvaluationResult,
        missed_items: u32,
    ) -> Option<String> {
        let c = &self.config;
        if combined > c.escalation_threshold {
            return Some(format!(
                "combined score {combined:.2} exceeds threshold {:.2}",
                c.escalation_threshold
            ));
        }
        if tier0.requires_escalation {
            return Some(format!(
                "rules requested escalation ({})",
                tier0.triggered_rules.join(", ")
            ));
        }
        if tier0.is_critical() {
            return Some("rules reported critical severity".to_string());
        }
        if urgency > c.urgency_override && delta > c.delta_override {
            return Some(format!(
                "high urgency {urgency:.2} with significant change {delta:.2}"
            ));
        }
        if missed_items >= c.missed_items_threshold {
            return Some(format!("{missed_items} missed items"));
        }
        None
    }

    /// Whether the batch alone carries enough misses to warrant urgent handling.
    pub fn should_escalate_to_urgent(&self, signals: &[SignalEntry]) -> bool {
        miss_signals(signals) >= self.config.missed_items_threshold
    }

    /// Repeated miss reports about one entity count once toward the missed
    /// items, but a batch full of them still goes to Tier 2.
    fn urgent_batch_reason(&self, signals: &[SignalEntry]) -> Option<String> {
        self.should_escalate_to_urgent(signals)
            .then(|| format!("{} miss signals in batch", miss_signals(signals)))
    }
}

fn miss_signals(signals: &[SignalEntry]) -> u32 {
    signals.iter().filter(|s| s.event_type.is_miss()).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EntityKind, RagConfig, RuleResult, SignalEventType};
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAssessmentHistory};
    use crate::domain::errors::DomainResult;
    use crate::domain::ports::{
        NullEmbeddingProvider, VectorDocument, VectorQuery, VectorSearchResult, VectorStore,
    };
    use crate::services::delta_calculator::DeltaCalculator;
    use crate::domain::models::DeltaBaseline;
    use crate::domain::ports::{AssessmentHistoryRepository, AssessmentRecord};
    use crate::services::rules::test_support::{days_ago, habit, now, signal, snapshot};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    struct NoHistory;

    #[async_trait]
    impl AssessmentHistoryRepository for NoHistory {
        async fn record(&self, _record: &AssessmentRecord) -> DomainResult<()> {
            Ok(())
        }

        async fn last_completed_at(&self, _user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn recent(&self, _user_id: Uuid, _limit: usize) -> DomainResult<Vec<AssessmentRecord>> {
            Ok(vec![])
        }
    }

    struct NoStore;

    #[async_trait]
    impl VectorStore for NoStore {
        async fn search(&self, _query: &VectorQuery) -> DomainResult<Vec<VectorSearchResult>> {
            Ok(vec![])
        }

        async fn upsert(&self, _document: &VectorDocument) -> DomainResult<()> {
            Ok(())
        }

        async fn delete(&self, _entity_type: EntityKind, _entity_id: Uuid) -> DomainResult<bool> {
            Ok(false)
        }
    }

    fn assessor() -> QuickAssessor {
        let retriever = ContextRetriever::new(Arc::new(NullEmbeddingProvider::new()), Arc::new(NoStore), RagConfig::default());
        QuickAssessor::new(Arc::new(retriever), QuickAssessmentConfig::default())
    }

    fn tier0(severity: Severity, escalate: bool) -> RuleEvaluationResult {
        let mut result = RuleResult::triggered("r", severity);
        if escalate {
            result = result.escalate();
        }
        RuleEvaluationResult::from_results(vec![result])
    }

    fn context(similarities: &[f64]) -> Vec<RelevantContextItem> {
        similarities
            .iter()
            .map(|s| RelevantContextItem {
                entity_type: EntityKind::Goal,
                entity_id: Uuid::new_v4(),
                content: String::new(),
                similarity: *s,
            })
            .collect()
    }

    #[test]
    fn test_moderate_scores_do_not_escalate() {
        let a = assessor();
        let reason = a.escalation_reason(0.42, 0.3, 0.2, &tier0(Severity::Medium, false), 1);
        assert!(reason.is_none());
    }

    #[test]
    fn test_each_override_has_its_own_reason() {
        let a = assessor();
        let quiet = tier0(Severity::Low, false);

        let reasons = [
            a.escalation_reason(0.6, 0.0, 0.0, &quiet, 0),
            a.escalation_reason(0.1, 0.0, 0.0, &tier0(Severity::Medium, true), 0),
            a.escalation_reason(0.1, 0.0, 0.0, &tier0(Severity::Critical, false), 0),
            a.escalation_reason(0.1, 0.8, 0.4, &quiet, 0),
            a.escalation_reason(0.1, 0.0, 0.0, &quiet, 3),
        ];
        let reasons: Vec<String> = reasons.into_iter().map(|r| r.unwrap()).collect();
        let unique: std::collections::HashSet<_> = reasons.iter().collect();
        assert_eq!(unique.len(), reasons.len());
    }

    #[test]
    fn test_four_missed_habits_escalate_to_urgent() {
        let snap = snapshot();
        let signals: Vec<_> = (0..4)
            .map(|_| signal(snap.user_id, SignalEventType::HabitMissed, None))
            .collect();
        assert!(assessor().should_escalate_to_urgent(&signals));
        assert!(!assessor().should_escalate_to_urgent(&signals[..2]));
    }

    #[test]
    fn test_repeated_reports_of_one_missed_habit_do_not_escalate() {
        let mut snap = snapshot();
        snap.habits.push(habit("Stretch", 0, Some(days_ago(4)), 0.3));
        let stale = snap.habits[0].id;
        let signals = vec![
            signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, stale))),
            signal(snap.user_id, SignalEventType::HabitStreakBroken, Some((EntityKind::Habit, stale))),
        ];
        let delta = DeltaCalculator::new(Arc::new(NoHistory), Default::default()).summarize(
            &snap,
            &signals,
            now() - chrono::Duration::days(7),
            DeltaBaseline::Lookback,
        );
        assert_eq!(delta.total_missed(), 1);

        let a = assessor();
        let result = a.score(
            &signals,
            &RuleEvaluationResult::default(),
            delta.overall_delta_score,
            delta.total_missed(),
            vec![],
        );
        assert!(!result.should_escalate, "unexpected reason {:?}", result.escalation_reason);
    }

    #[test]
    fn test_miss_heavy_batch_escalates_with_its_own_reason() {
        let mut snap = snapshot();
        snap.habits.push(habit("Stretch", 0, Some(days_ago(4)), 0.3));
        let stale = snap.habits[0].id;
        let signals: Vec<_> = (0..4)
            .map(|_| signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, stale))))
            .collect();

        let result = assessor().score(&signals, &RuleEvaluationResult::default(), 0.1, 1, vec![]);
        assert!(result.should_escalate);
        assert_eq!(result.escalation_reason.as_deref(), Some("4 miss signals in batch"));
    }

    #[test]
    fn test_relevance_weights_top_results() {
        let a = assessor();
        assert_eq!(a.relevance_score(&[]), 0.0);

        let strong_first = a.relevance_score(&context(&[0.9, 0.3]));
        let strong_last = a.relevance_score(&context(&[0.3, 0.9]));
        assert!(strong_first > strong_last);

        let single = a.relevance_score(&context(&[0.5]));
        assert!((single - 0.52).abs() < 1e-9);
    }

    #[test]
    fn test_urgency_caps() {
        let a = assessor();
        let snap = snapshot();
        let many: Vec<_> = (0..20)
            .map(|_| signal(snap.user_id, SignalEventType::HabitMissed, None))
            .collect();
        let urgency = a.urgency_score(&many, Some(Severity::Critical));
        assert!((urgency - 1.0).abs() < 1e-9);
        assert!((a.urgency_score(&[], Some(Severity::Medium)) - 0.2).abs() < 1e-9);
        assert_eq!(a.urgency_score(&[], None), 0.0);
    }

    #[tokio::test]
    async fn test_assess_without_index_uses_other_scores() {
        let a = assessor();
        let snap = snapshot();
        let signals: Vec<_> = (0..4)
            .map(|_| signal(snap.user_id, SignalEventType::HabitMissed, None))
            .collect();
        let history = SqliteAssessmentHistory::new(create_migrated_test_pool().await.unwrap());
        let delta = DeltaCalculator::new(Arc::new(history), Default::default())
        .calculate(snap.user_id, &snap, &signals)
        .await;

        let result = a
            .assess(&EmbeddingCache::new(), &snap, &signals, &RuleEvaluationResult::default(), &delta)
            .await;
        assert!(result.relevant_context.is_empty());
        assert_eq!(result.relevance_score, 0.0);
        assert!(result.urgency_score > 0.0);
        assert!(result.should_escalate);
    }
}
