//! Habit rules: misses and streaks.

use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::models::{
    DirectActionKind, DirectRecommendationCandidate, EntityKind, HabitSnapshot, RecommendationTarget, RuleResult, RuleThresholds,
    Severity, SignalEntry, SignalEventType, UserStateSnapshot,
};

use super::{count_events, recommend, Rule};

const MISS_EVENTS: [SignalEventType; 2] = [SignalEventType::HabitMissed, SignalEventType::HabitStreakBroken];

/// Streak length at which a streak at risk becomes High severity.
const LONG_STREAK_DAYS: u32 = 30;

/// Reacts to missed-habit signals, or to chronically low adherence.
pub struct HabitMissedRule {
    medium_misses: u32,
    high_misses: u32,
    low_adherence: f64,
}

impl HabitMissedRule {
    pub const ID: &'static str = "habit_missed";

    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self {
            medium_misses: thresholds.habit_missed_medium,
            high_misses: thresholds.habit_missed_high,
            low_adherence: thresholds.habit_low_adherence,
        }
    }

    /// The active habit with the most misses in the batch.
    fn most_missed<'a>(snapshot: &'a UserStateSnapshot, signals: &[SignalEntry]) -> Option<(&'a HabitSnapshot, usize)> {
        let mut per_habit: HashMap<Uuid, usize> = HashMap::new();
        for signal in signals.iter().filter(|s| MISS_EVENTS.contains(&s.event_type)) {
            if let Some(id) = signal.target_entity_id {
                *per_habit.entry(id).or_default() += 1;
            }
        }

        snapshot
            .active_habits()
            .filter_map(|h| per_habit.get(&h.id).map(|n| (h, *n)))
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.id.cmp(&a.0.id)))
    }

    fn restart_small(habit: &HabitSnapshot, rationale: String, score: f64) -> DirectRecommendationCandidate {
        recommend(
            Self::ID,
            DirectActionKind::RestartSmall,
            RecommendationTarget::entity(EntityKind::Habit, habit.id, habit.title.clone()),
            format!("Shrink \"{}\" to a two-minute version", habit.title),
            rationale,
            score,
        )
    }
}

impl Rule for HabitMissedRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, signals: &[SignalEntry]) -> RuleResult {
        let missed = count_events(signals, &MISS_EVENTS) as u32;

        if missed == 0 {
            let weakest = snapshot
                .active_habits()
                .filter(|h| h.adherence_rate < self.low_adherence)
                .min_by(|a, b| a.adherence_rate.total_cmp(&b.adherence_rate).then(a.id.cmp(&b.id)));

            return match weakest {
                Some(habit) => RuleResult::triggered(Self::ID, Severity::Low)
                    .with_evidence("habit_id", habit.id)
                    .with_evidence("adherence_rate", format!("{:.2}", habit.adherence_rate))
                    .with_recommendation(Self::restart_small(
                        habit,
                        format!("Completed {:.0}% of the time lately.", habit.adherence_rate * 100.0),
                        0.4,
                    )),
                None => RuleResult::abstain(Self::ID),
            };
        }

        let severity = if missed >= self.high_misses {
            Severity::High
        } else if missed >= self.medium_misses {
            Severity::Medium
        } else {
            Severity::Low
        };

        let mut result = RuleResult::triggered(Self::ID, severity).with_evidence("missed_signals", missed);
        if let Some((habit, count)) = Self::most_missed(snapshot, signals) {
            result = result
                .with_evidence("habit_id", habit.id)
                .with_evidence("habit_misses", count)
                .with_recommendation(Self::restart_small(
                    habit,
                    format!("Missed {count} times recently."),
                    match severity {
                        Severity::High | Severity::Critical => 0.8,
                        Severity::Medium => 0.65,
                        Severity::Low => 0.45,
                    },
                ));
        }

        // Repeated misses across habits point at something rules cannot see.
        if severity == Severity::High {
            result = result.escalate();
        }
        result
    }
}

/// A long streak that breaks unless the habit is done today.
pub struct StreakAtRiskRule {
    min_streak: u32,
}

impl StreakAtRiskRule {
    pub const ID: &'static str = "streak_at_risk";

    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self {
            min_streak: thresholds.streak_at_risk_min,
        }
    }
}

impl Rule for StreakAtRiskRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, _signals: &[SignalEntry]) -> RuleResult {
        let today = snapshot.today();
        let at_risk = snapshot
            .active_habits()
            .filter(|h| h.current_streak >= self.min_streak)
            .filter(|h| h.last_completed_on.is_some_and(|d| (today - d).num_days() == 1))
            .max_by(|a, b| a.current_streak.cmp(&b.current_streak).then(b.id.cmp(&a.id)));

        let Some(habit) = at_risk else {
            return RuleResult::abstain(Self::ID);
        };

        let severity = if habit.current_streak >= LONG_STREAK_DAYS {
            Severity::High
        } else {
            Severity::Medium
        };

        RuleResult::triggered(Self::ID, severity)
            .with_evidence("habit_id", habit.id)
            .with_evidence("current_streak", habit.current_streak)
            .with_recommendation(recommend(
                Self::ID,
                DirectActionKind::ExecuteToday,
                RecommendationTarget::entity(EntityKind::Habit, habit.id, habit.title.clone()),
                format!("Keep your {}-day \"{}\" streak alive", habit.current_streak, habit.title),
                "Not done yet today; the streak ends at midnight.".to_string(),
                if severity == Severity::High { 0.8 } else { 0.6 },
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rules::test_support::*;

    #[test]
    fn test_four_misses_is_high_and_escalates() {
        let mut snap = snapshot();
        snap.habits.push(habit("Meditate", 0, Some(days_ago(5)), 0.5));
        let id = snap.habits[0].id;
        let signals: Vec<_> = (0..4)
            .map(|_| signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, id))))
            .collect();

        let result = HabitMissedRule::new(&RuleThresholds::default()).evaluate(&snap, &signals);
        assert_eq!(result.severity, Severity::High);
        assert!(result.requires_escalation);
        assert_eq!(result.direct_recommendation.unwrap().kind, DirectActionKind::RestartSmall);
    }

    #[test]
    fn test_misses_for_unknown_habit_have_no_recommendation() {
        let snap = snapshot();
        let signals = vec![
            signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, Uuid::new_v4()))),
            signal(snap.user_id, SignalEventType::HabitStreakBroken, None),
        ];
        let result = HabitMissedRule::new(&RuleThresholds::default()).evaluate(&snap, &signals);
        assert_eq!(result.severity, Severity::Medium);
        assert!(result.direct_recommendation.is_none());
        assert!(!result.requires_escalation);
    }

    #[test]
    fn test_low_adherence_without_signals() {
        let mut snap = snapshot();
        snap.habits.push(habit("Floss", 0, None, 0.2));
        snap.habits.push(habit("Walk", 3, Some(days_ago(1)), 0.9));
        let result = HabitMissedRule::new(&RuleThresholds::default()).evaluate(&snap, &[]);
        assert_eq!(result.severity, Severity::Low);
        assert_eq!(result.direct_recommendation.unwrap().target.title.as_deref(), Some("Floss"));
    }

    #[test]
    fn test_streak_at_risk() {
        let rule = StreakAtRiskRule::new(&RuleThresholds::default());

        let mut snap = snapshot();
        snap.habits.push(habit("Read", 45, Some(days_ago(1)), 1.0));
        let result = rule.evaluate(&snap, &[]);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.direct_recommendation.unwrap().kind, DirectActionKind::ExecuteToday);

        let mut done_today = snapshot();
        done_today.habits.push(habit("Read", 45, Some(days_ago(0)), 1.0));
        assert!(!rule.evaluate(&done_today, &[]).triggered);

        let mut short = snapshot();
        short.habits.push(habit("Read", 2, Some(days_ago(1)), 1.0));
        assert!(!rule.evaluate(&short, &[]).triggered);
    }
}
