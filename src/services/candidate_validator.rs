//! Candidate validator.
//!
//! Drops candidates that reference entities the user does not have. The
//! snapshot is the source of truth; anything a model (or a stale rule)
//! points at outside of it is treated as hallucinated.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::models::{ActionKind, EntityKind, RecommendationCandidate, UserStateSnapshot};

/// Action payload keys that carry entity references.
const PAYLOAD_ID_FIELDS: [(&str, EntityKind); 10] = [
    ("taskId", EntityKind::Task),
    ("task_id", EntityKind::Task),
    ("habitId", EntityKind::Habit),
    ("habit_id", EntityKind::Habit),
    ("goalId", EntityKind::Goal),
    ("goal_id", EntityKind::Goal),
    ("projectId", EntityKind::Project),
    ("project_id", EntityKind::Project),
    ("experimentId", EntityKind::Experiment),
    ("experiment_id", EntityKind::Experiment),
];

/// Why a candidate was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// Target id is not one of the user's entities of that kind
    UnknownTarget { kind: EntityKind, id: Uuid },
    /// A non-create, non-prompt action with nothing to act on
    MissingTarget,
    /// A payload field names an entity the user does not have
    UnknownPayloadReference { field: String, id: Uuid },
    /// A payload field that should hold an id does not parse as one
    MalformedPayloadReference { field: String },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTarget { kind, id } => write!(f, "unknown {} {id}", kind.as_str()),
            Self::MissingTarget => write!(f, "action needs a target entity"),
            Self::UnknownPayloadReference { field, id } => {
                write!(f, "payload field {field} references unknown entity {id}")
            }
            Self::MalformedPayloadReference { field } => {
                write!(f, "payload field {field} is not an entity id")
            }
        }
    }
}

/// Candidates that survived, plus how many did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    /// Candidates that passed, best first
    pub kept: Vec<RecommendationCandidate>,
    /// Candidates rejected
    pub dropped: usize,
}

/// Validates candidates against one snapshot's entity ids.
pub struct CandidateValidator {
    ids: HashMap<EntityKind, HashSet<Uuid>>,
}

impl CandidateValidator {
    /// Validator for candidates about `snapshot`'s entities.
    pub fn new(snapshot: &UserStateSnapshot) -> Self {
        let ids = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, snapshot.ids_of(kind)))
            .collect();
        Self { ids }
    }

    fn contains(&self, kind: EntityKind, id: Uuid) -> bool {
        self.ids.get(&kind).is_some_and(|set| set.contains(&id))
    }

    /// Check one candidate; `Ok(())` when it may be shown.
    pub fn check(&self, candidate: &RecommendationCandidate) -> Result<(), RejectionReason> {
        let action = candidate.action_kind;
        match candidate.target.entity_id {
            Some(id) if !action.is_prompt() => {
                if !self.contains(candidate.target.kind, id) {
                    return Err(RejectionReason::UnknownTarget {
                        kind: candidate.target.kind,
                        id,
                    });
                }
            }
            None if action != ActionKind::Create && !action.is_prompt() => {
                return Err(RejectionReason::MissingTarget);
            }
            _ => {}
        }

        if action.is_prompt() {
            return Ok(());
        }
        self.check_payload(candidate.action_payload.as_ref())
    }

    fn check_payload(&self, payload: Option<&serde_json::Value>) -> Result<(), RejectionReason> {
        let Some(object) = payload.and_then(|p| p.as_object()) else {
            return Ok(());
        };

        for (field, kind) in PAYLOAD_ID_FIELDS {
            let Some(value) = object.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let id = value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| RejectionReason::MalformedPayloadReference {
                    field: field.to_string(),
                })?;
            if !self.contains(kind, id) {
                return Err(RejectionReason::UnknownPayloadReference {
                    field: field.to_string(),
                    id,
                });
            }
        }
        Ok(())
    }

    /// Keep valid candidates in order; log every drop.
    pub fn filter(&self, candidates: Vec<RecommendationCandidate>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        for candidate in candidates {
            match self.check(&candidate) {
                Ok(()) => outcome.kept.push(candidate),
                Err(reason) => {
                    tracing::warn!(
                        title = %candidate.title,
                        action = candidate.action_kind.as_str(),
                        reason = %reason,
                        "Dropping invalid candidate"
                    );
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }
}

/// Validate `candidates` against `snapshot`.
pub fn filter_candidates(
    candidates: Vec<RecommendationCandidate>,
    snapshot: &UserStateSnapshot,
) -> ValidationOutcome {
    CandidateValidator::new(snapshot).filter(candidates)
}
