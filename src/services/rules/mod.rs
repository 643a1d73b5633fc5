//! Deterministic rule engine (Tier 0).
//!
//! Every rule is a pure function of the snapshot and the acquired signal
//! batch. Rules hold only their thresholds, so the engine can evaluate them
//! in any order and the aggregate never depends on evaluation order.

mod goals;
mod habits;
mod tasks;
mod wellbeing;

pub use goals::{ExperimentEndedRule, GoalDeadlineRule, StalledProjectRule};
pub use habits::{HabitMissedRule, StreakAtRiskRule};
pub use tasks::{BacklogRule, OverdueTasksRule};
pub use wellbeing::LowEnergyRule;

use crate::domain::models::{
    DirectActionKind, DirectRecommendationCandidate, RecommendationTarget, RuleEvaluationResult,
    RuleResult, RuleThresholds, SignalEntry, SignalEventType, UserStateSnapshot,
};

/// A Tier 0 rule.
pub trait Rule: Send + Sync {
    /// Stable identifier recorded in results and recommendation types.
    fn id(&self) -> &'static str;

    fn evaluate(&self, snapshot: &UserStateSnapshot, signals: &[SignalEntry]) -> RuleResult;
}

/// Evaluates an injected rule set and aggregates the results.
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
    /// Engine running `rules` in order.
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// The production rule set.
    pub fn standard(thresholds: &RuleThresholds) -> Self {
        Self::new(vec![
            Box::new(OverdueTasksRule::new(thresholds)),
            Box::new(HabitMissedRule::new(thresholds)),
            Box::new(StreakAtRiskRule::new(thresholds)),
            Box::new(BacklogRule::new(thresholds)),
            Box::new(GoalDeadlineRule::new(thresholds)),
            Box::new(ExperimentEndedRule),
            Box::new(LowEnergyRule::new(thresholds)),
            Box::new(StalledProjectRule::new(thresholds)),
        ])
    }

    /// Ids of the registered rules, in evaluation order.
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Run every rule against the snapshot and aggregate the results.
    pub fn evaluate(&self, snapshot: &UserStateSnapshot, signals: &[SignalEntry]) -> RuleEvaluationResult {
        let results: Vec<RuleResult> = self
            .rules
            .iter()
            .map(|rule| rule.evaluate(snapshot, signals))
            .collect();

        let aggregate = RuleEvaluationResult::from_results(results);
        tracing::debug!(
            user_id = %snapshot.user_id,
            triggered = ?aggregate.triggered_rules,
            max_severity = ?aggregate.max_severity,
            requires_escalation = aggregate.requires_escalation,
            direct = aggregate.direct_recommendations.len(),
            "Tier 0 evaluated"
        );
        aggregate
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the rule modules
// ---------------------------------------------------------------------------

/// Signals in the batch whose event type is one of `events`.
pub(crate) fn count_events(signals: &[SignalEntry], events: &[SignalEventType]) -> usize {
    signals
        .iter()
        .filter(|s| events.contains(&s.event_type))
        .count()
}

pub(crate) fn recommend(
    rule_id: &str,
    kind: DirectActionKind,
    target: RecommendationTarget,
    title: String,
    rationale: String,
    score: f64,
) -> DirectRecommendationCandidate {
    DirectRecommendationCandidate {
        rule_id: rule_id.to_string(),
        kind,
        target,
        title,
        rationale,
        score,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    use crate::domain::models::{
        EntityKind, HabitSnapshot, QueueStatus, SignalEntry, SignalEventType, SignalPriority,
        TaskSnapshot, TaskState, UserStateSnapshot, WindowType,
    };

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 11, 12, 0, 0).unwrap()
    }

    pub fn snapshot() -> UserStateSnapshot {
        UserStateSnapshot::empty(Uuid::new_v4(), now())
    }

    pub fn days_ago(days: i64) -> NaiveDate {
        (now() - Duration::days(days)).date_naive()
    }

    pub fn task(title: &str, due: Option<NaiveDate>, reschedules: u32) -> TaskSnapshot {
        TaskSnapshot {
            id: Uuid::new_v4(),
            title: title.to_string(),
            status: TaskState::Todo,
            goal_id: None,
            project_id: None,
            due_date: due,
            reschedule_count: reschedules,
            priority: 2,
            completed_at: None,
            created_at: now() - Duration::days(30),
            updated_at: now() - Duration::days(30),
        }
    }

    pub fn habit(title: &str, streak: u32, last_done: Option<NaiveDate>, adherence: f64) -> HabitSnapshot {
        HabitSnapshot {
            id: Uuid::new_v4(),
            title: title.to_string(),
            goal_id: None,
            current_streak: streak,
            longest_streak: streak,
            adherence_rate: adherence,
            last_completed_on: last_done,
            active: true,
            created_at: now() - Duration::days(60),
            updated_at: now() - Duration::days(1),
        }
    }

    pub fn signal(user_id: Uuid, event: SignalEventType, target: Option<(EntityKind, Uuid)>) -> SignalEntry {
        SignalEntry {
            id: 1,
            user_id,
            event_type: event,
            priority: SignalPriority::Urgent,
            window_type: WindowType::Immediate,
            target_entity_type: target.map(|(k, _)| k),
            target_entity_id: target.map(|(_, id)| id),
            status: QueueStatus::Processing,
            lease_holder: Some("test".to_string()),
            lease_until: Some(now() + Duration::minutes(5)),
            retry_count: 1,
            reclaim_count: 0,
            last_error: None,
            created_at: now() - Duration::minutes(10),
            updated_at: now(),
            expires_at: now() + Duration::hours(6),
            processed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::models::{EntityKind, Severity};

    #[test]
    fn test_empty_snapshot_triggers_nothing() {
        let engine = RuleEngine::standard(&RuleThresholds::default());
        let result = engine.evaluate(&snapshot(), &[]);
        assert!(result.triggered_rules.is_empty());
        assert_eq!(result.max_severity, None);
        assert!(!result.requires_escalation);
    }

    #[test]
    fn test_evaluation_is_order_independent() {
        let mut snap = snapshot();
        snap.tasks.push(task("Taxes", Some(days_ago(10)), 5));
        snap.habits.push(habit("Run", 12, Some(days_ago(1)), 0.9));
        let user = snap.user_id;
        let habit_id = snap.habits[0].id;
        let signals = vec![signal(user, SignalEventType::HabitMissed, Some((EntityKind::Habit, habit_id)))];

        let forward = RuleEngine::standard(&RuleThresholds::default()).evaluate(&snap, &signals);

        let thresholds = RuleThresholds::default();
        let reversed = RuleEngine::new(vec![
            Box::new(StalledProjectRule::new(&thresholds)),
            Box::new(LowEnergyRule::new(&thresholds)),
            Box::new(ExperimentEndedRule),
            Box::new(GoalDeadlineRule::new(&thresholds)),
            Box::new(BacklogRule::new(&thresholds)),
            Box::new(StreakAtRiskRule::new(&thresholds)),
            Box::new(HabitMissedRule::new(&thresholds)),
            Box::new(OverdueTasksRule::new(&thresholds)),
        ])
        .evaluate(&snap, &signals);

        assert_eq!(forward.max_severity, reversed.max_severity);
        assert_eq!(forward.requires_escalation, reversed.requires_escalation);
        let mut a = forward.triggered_rules.clone();
        let mut b = reversed.triggered_rules.clone();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(forward.max_severity, Some(Severity::Critical));
    }

    #[test]
    fn test_standard_rule_ids_are_unique() {
        let ids = RuleEngine::standard(&RuleThresholds::default()).rule_ids();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }
}
