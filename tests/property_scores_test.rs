//! Property-based tests for the scoring functions
//!
//! Tests the following properties:
//! 1. Combined Tier 1 score stays in [0, 1] and never drops when an input grows
//! 2. Delta score stays in [0, 1] and never drops when a factor grows
//! 3. Recommendation candidates survive the JSON wire format unchanged, whatever the payload

mod common;

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use lodestar::domain::errors::DomainResult;
use lodestar::domain::models::{
    ActionKind, DeltaWeights, EntityKind, QuickAssessmentConfig, RagConfig, RecommendationCandidate,
    RecommendationTarget,
};
use lodestar::domain::ports::{NullEmbeddingProvider, VectorDocument, VectorQuery, VectorSearchResult, VectorStore};
use lodestar::services::delta_calculator::DeltaFactors;
use lodestar::services::{ContextRetriever, QuickAssessor};

struct EmptyStore;

#[async_trait]
impl VectorStore for EmptyStore {
    async fn search(&self, _query: &VectorQuery) -> DomainResult<Vec<VectorSearchResult>> {
        Ok(Vec::new())
    }

    async fn upsert(&self, _document: &VectorDocument) -> DomainResult<()> {
        Ok(())
    }

    async fn delete(&self, _entity_type: EntityKind, _entity_id: Uuid) -> DomainResult<bool> {
        Ok(false)
    }
}

fn assessor() -> QuickAssessor {
    let retriever = ContextRetriever::new(
        Arc::new(NullEmbeddingProvider::new()),
        Arc::new(EmptyStore),
        RagConfig::default(),
    );
    QuickAssessor::new(Arc::new(retriever), QuickAssessmentConfig::default())
}

fn factors_strategy() -> impl Strategy<Value = DeltaFactors> {
    (0u32..200, 0u32..200, 0u32..200, 0u32..200, 0u32..200).prop_map(
        |(new_entities, modified_entities, completed_items, missed_items, new_signals)| DeltaFactors {
            new_entities,
            modified_entities,
            completed_items,
            missed_items,
            new_signals,
        },
    )
}

fn action_kind_strategy() -> impl Strategy<Value = ActionKind> {
    prop_oneof![
        Just(ActionKind::Create),
        Just(ActionKind::Update),
        Just(ActionKind::ExecuteToday),
        Just(ActionKind::Defer),
        Just(ActionKind::Remove),
        Just(ActionKind::ReflectPrompt),
        Just(ActionKind::LearnPrompt),
    ]
}

/// Any JSON payload, `null` included. Numbers stay integral so equality is exact.
fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "\\PC{0,20}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-zA-Z]{1,8}", inner, 0..4)
                .prop_map(|fields| serde_json::Value::Object(fields.into_iter().collect())),
        ]
    })
}

fn candidate_strategy() -> impl Strategy<Value = RecommendationCandidate> {
    (
        "[a-z_]{1,20}",
        prop::sample::select(EntityKind::ALL.to_vec()),
        any::<bool>(),
        action_kind_strategy(),
        "\\PC{0,60}",
        "\\PC{0,120}",
        // Quarters are exact in binary, so equality after a round trip is exact too.
        0u8..=4,
        proptest::option::of("\\PC{0,30}"),
        proptest::option::of(payload_strategy()),
    )
        .prop_map(|(kind_label, kind, targeted, action_kind, title, rationale, quarters, summary, payload)| {
            let target = if targeted {
                RecommendationTarget::entity(kind, Uuid::new_v4(), title.clone())
            } else {
                RecommendationTarget::kind(kind)
            };
            RecommendationCandidate {
                recommendation_type: kind_label,
                target,
                action_kind,
                title,
                rationale,
                score: f64::from(quarters) / 4.0,
                action_payload: payload,
                action_summary: summary,
            }
        })
}

proptest! {
    #[test]
    fn proptest_combined_score_is_bounded_and_monotone(
        relevance in 0.0f64..1.0,
        delta in 0.0f64..1.0,
        urgency in 0.0f64..1.0,
        bump in 0.0f64..0.5,
    ) {
        let quick = assessor();
        let base = quick.combined_score(relevance, delta, urgency);
        prop_assert!((0.0..=1.0).contains(&base));

        prop_assert!(quick.combined_score(relevance + bump, delta, urgency) >= base);
        prop_assert!(quick.combined_score(relevance, delta + bump, urgency) >= base);
        prop_assert!(quick.combined_score(relevance, delta, urgency + bump) >= base);
    }

    #[test]
    fn proptest_delta_score_is_bounded_and_monotone(factors in factors_strategy(), bump in 1u32..20) {
        let weights = DeltaWeights::default();
        let base = factors.score(&weights);
        prop_assert!((0.0..=1.0).contains(&base));

        let bumped = [
            DeltaFactors { new_entities: factors.new_entities + bump, ..factors },
            DeltaFactors { modified_entities: factors.modified_entities + bump, ..factors },
            DeltaFactors { completed_items: factors.completed_items + bump, ..factors },
            DeltaFactors { missed_items: factors.missed_items + bump, ..factors },
            DeltaFactors { new_signals: factors.new_signals + bump, ..factors },
        ];
        for grown in bumped {
            prop_assert!(grown.score(&weights) >= base);
        }
    }

    #[test]
    fn proptest_candidate_survives_json(candidate in candidate_strategy()) {
        let json = serde_json::to_string(&candidate).unwrap();
        let back: RecommendationCandidate = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, candidate);
    }
}
