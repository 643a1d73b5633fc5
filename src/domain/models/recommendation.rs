//! Recommendation candidate model.
//!
//! Candidates are proposed recommendations produced by any tier. They are
//! unvalidated until they pass the candidate validator.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::snapshot::EntityKind;

/// What the recommendation asks the user (or the executor) to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    ExecuteToday,
    Defer,
    Remove,
    ReflectPrompt,
    LearnPrompt,
}

impl ActionKind {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::ExecuteToday => "execute_today",
            Self::Defer => "defer",
            Self::Remove => "remove",
            Self::ReflectPrompt => "reflect_prompt",
            Self::LearnPrompt => "learn_prompt",
        }
    }

    /// Prompts are never bound to an entity.
    pub fn is_prompt(&self) -> bool {
        matches!(self, Self::ReflectPrompt | Self::LearnPrompt)
    }
}

/// The entity (or entity kind) a recommendation is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationTarget {
    pub kind: EntityKind,
    /// Concrete entity; `None` targets the kind in general
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    /// Entity title, for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl RecommendationTarget {
    /// Target a kind of entity rather than one entity.
    pub fn kind(kind: EntityKind) -> Self {
        Self {
            kind,
            entity_id: None,
            title: None,
        }
    }

    /// Target one entity.
    pub fn entity(kind: EntityKind, id: Uuid, title: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: Some(id),
            title: Some(title.into()),
        }
    }
}

/// A proposed recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationCandidate {
    /// Free-form recommendation category, e.g. "task_triage"
    #[serde(rename = "type")]
    pub recommendation_type: String,
    /// What the recommendation is about
    pub target: RecommendationTarget,
    /// What to do about it
    pub action_kind: ActionKind,
    /// One-line headline
    pub title: String,
    /// Why the recommendation is being made
    pub rationale: String,
    /// Confidence/importance in [0, 1]
    pub score: f64,
    /// Structured action details; an explicit `null` is kept as `Some(Null)`
    /// on the wire and dropped by [`normalized`](Self::normalized)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_payload"
    )]
    pub action_payload: Option<serde_json::Value>,
    /// Short label of the action for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_summary: Option<String>,
}

impl RecommendationCandidate {
    /// Clamp the score into [0, 1]; NaN becomes 0. A null payload becomes no payload.
    pub fn normalized(mut self) -> Self {
        self.score = if self.score.is_nan() { 0.0 } else { self.score.clamp(0.0, 1.0) };
        if self.action_payload.as_ref().is_some_and(serde_json::Value::is_null) {
            self.action_payload = None;
        }
        self
    }
}

/// Only called when the field is present, so `null` stays distinct from absent.
fn present_payload<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Actions a deterministic rule can propose directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectActionKind {
    ExecuteToday,
    Reschedule,
    Archive,
    RestartSmall,
    Review,
    Reflect,
    Learn,
}

impl DirectActionKind {
    /// The candidate action this direct action becomes.
    pub fn action_kind(&self) -> ActionKind {
        match self {
            Self::ExecuteToday => ActionKind::ExecuteToday,
            Self::Reschedule => ActionKind::Defer,
            Self::Archive => ActionKind::Remove,
            Self::RestartSmall | Self::Review => ActionKind::Update,
            Self::Reflect => ActionKind::ReflectPrompt,
            Self::Learn => ActionKind::LearnPrompt,
        }
    }
}

/// A recommendation produced by a Tier 0 rule, usable without model help.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectRecommendationCandidate {
    /// Rule that produced the recommendation
    pub rule_id: String,
    /// Proposed action
    pub kind: DirectActionKind,
    pub target: RecommendationTarget,
    pub title: String,
    pub rationale: String,
    /// Importance in [0, 1]
    pub score: f64,
}

impl DirectRecommendationCandidate {
    /// Convert into a regular candidate tagged `rule:<id>`.
    pub fn to_candidate(&self) -> RecommendationCandidate {
        RecommendationCandidate {
            recommendation_type: format!("rule:{}", self.rule_id),
            target: self.target.clone(),
            action_kind: self.kind.action_kind(),
            title: self.title.clone(),
            rationale: self.rationale.clone(),
            score: self.score,
            action_payload: None,
            action_summary: Some(format!("{:?}", self.kind).to_lowercase()),
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_archive_maps_to_remove() {
        let direct = DirectRecommendationCandidate {
            rule_id: "overdue_tasks".to_string(),
            kind: DirectActionKind::Archive,
            target: RecommendationTarget::entity(EntityKind::Task, Uuid::new_v4(), "Old task"),
            title: "Archive Old task".to_string(),
            rationale: "Rescheduled too often".to_string(),
            score: 1.4,
        };
        let candidate = direct.to_candidate();
        assert_eq!(candidate.action_kind, ActionKind::Remove);
        assert!((candidate.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(candidate.recommendation_type, "rule:overdue_tasks");
    }

    #[test]
    fn test_candidate_wire_format() {
        let json = serde_json::json!({
            "type": "habit_recovery",
            "target": {"kind": "habit"},
            "actionKind": "create",
            "title": "Start a 2-minute stretch",
            "rationale": "Low adherence",
            "score": 0.7
        });
        let candidate: RecommendationCandidate = serde_json::from_value(json).unwrap();
        assert_eq!(candidate.action_kind, ActionKind::Create);
        assert!(candidate.target.entity_id.is_none());
        assert!(candidate.action_payload.is_none());
    }

    #[test]
    fn test_null_payload_survives_json_and_normalizes_away() {
        let candidate = RecommendationCandidate {
            recommendation_type: "habit_recovery".to_string(),
            target: RecommendationTarget::kind(EntityKind::Habit),
            action_kind: ActionKind::Create,
            title: "Start a 2-minute stretch".to_string(),
            rationale: "Low adherence".to_string(),
            score: 0.5,
            action_payload: Some(serde_json::Value::Null),
            action_summary: None,
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["actionPayload"], serde_json::Value::Null);
        let back: RecommendationCandidate = serde_json::from_value(json).unwrap();
        assert_eq!(back, candidate);

        assert!(candidate.normalized().action_payload.is_none());
    }
}
