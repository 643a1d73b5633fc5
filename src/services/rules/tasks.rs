//! Task rules: overdue work and backlog pressure.

use crate::domain::models::{
    DirectActionKind, EntityKind, RecommendationTarget, RuleResult, RuleThresholds, Severity,
    SignalEntry, TaskSnapshot, UserStateSnapshot,
};

use super::{recommend, Rule};

/// Flags the most pressing overdue open task.
///
/// A task rescheduled `archive_reschedule_count` times or more is treated
/// as dead weight: Critical, with an archive suggestion. Otherwise the
/// severity follows the days overdue.
pub struct OverdueTasksRule {
    medium_days: i64,
    high_days: i64,
    archive_reschedules: u32,
}

impl OverdueTasksRule {
    pub const ID: &'static str = "overdue_tasks";

    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self {
            medium_days: thresholds.overdue_medium_days,
            high_days: thresholds.overdue_high_days,
            archive_reschedules: thresholds.archive_reschedule_count,
        }
    }

    fn severity(&self, days_overdue: i64, reschedules: u32) -> Severity {
        if reschedules >= self.archive_reschedules {
            Severity::Critical
        } else if days_overdue >= self.high_days {
            Severity::High
        } else if days_overdue >= self.medium_days {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl Rule for OverdueTasksRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, _signals: &[SignalEntry]) -> RuleResult {
        let today = snapshot.today();
        let overdue: Vec<(&TaskSnapshot, i64)> = snapshot
            .open_tasks()
            .filter_map(|t| t.days_overdue(today).map(|d| (t, d)))
            .collect();

        // Worst first: severity, then days overdue, then id for a total order.
        let Some((task, days, severity)) = overdue
            .iter()
            .map(|(t, d)| (*t, *d, self.severity(*d, t.reschedule_count)))
            .max_by(|a, b| {
                a.2.cmp(&b.2)
                    .then(a.1.cmp(&b.1))
                    .then(b.0.id.cmp(&a.0.id))
            })
        else {
            return RuleResult::abstain(Self::ID);
        };

        let target = RecommendationTarget::entity(EntityKind::Task, task.id, task.title.clone());
        let recommendation = match severity {
            Severity::Critical => recommend(
                Self::ID,
                DirectActionKind::Archive,
                target,
                format!("Archive \"{}\"", task.title),
                format!(
                    "Rescheduled {} times and {} days overdue; it may no longer matter.",
                    task.reschedule_count, days
                ),
                0.9,
            ),
            Severity::High => recommend(
                Self::ID,
                DirectActionKind::Reschedule,
                target,
                format!("Pick a realistic date for \"{}\"", task.title),
                format!("{days} days overdue."),
                0.75,
            ),
            Severity::Medium | Severity::Low => recommend(
                Self::ID,
                DirectActionKind::ExecuteToday,
                target,
                format!("Finish \"{}\" today", task.title),
                format!("{days} days overdue."),
                if severity == Severity::Medium { 0.6 } else { 0.45 },
            ),
        };

        RuleResult::triggered(Self::ID, severity)
            .with_evidence("overdue_count", overdue.len())
            .with_evidence("task_id", task.id)
            .with_evidence("days_overdue", days)
            .with_evidence("reschedule_count", task.reschedule_count)
            .with_recommendation(recommendation)
    }
}

/// Too many open or overdue tasks to triage deterministically.
pub struct BacklogRule {
    open_threshold: usize,
    overdue_threshold: usize,
}

impl BacklogRule {
    pub const ID: &'static str = "backlog";

    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self {
            open_threshold: thresholds.backlog_open_tasks,
            overdue_threshold: thresholds.backlog_overdue_tasks,
        }
    }
}

impl Rule for BacklogRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, _signals: &[SignalEntry]) -> RuleResult {
        let today = snapshot.today();
        let open = snapshot.open_tasks().count();
        let overdue = snapshot
            .open_tasks()
            .filter(|t| t.days_overdue(today).is_some())
            .count();

        let large = open >= self.open_threshold;
        let stale = overdue >= self.overdue_threshold;
        let severity = match (large, stale) {
            (true, true) => Severity::High,
            (true, false) | (false, true) => Severity::Medium,
            (false, false) => return RuleResult::abstain(Self::ID),
        };

        RuleResult::triggered(Self::ID, severity)
            .with_evidence("open_tasks", open)
            .with_evidence("overdue_tasks", overdue)
            .with_evidence("capacity", snapshot.profile.daily_task_capacity)
            .escalate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rules::test_support::*;

    #[test]
    fn test_rescheduled_overdue_task_is_critical_archive() {
        let mut snap = snapshot();
        snap.tasks.push(task("Renew passport", Some(days_ago(10)), 5));
        let result = OverdueTasksRule::new(&RuleThresholds::default()).evaluate(&snap, &[]);

        assert!(result.triggered);
        assert_eq!(result.severity, Severity::Critical);
        let rec = result.direct_recommendation.unwrap();
        assert_eq!(rec.kind, DirectActionKind::Archive);
        assert_eq!(rec.target.entity_id, Some(snap.tasks[0].id));
        assert_eq!(result.evidence.get("days_overdue").map(String::as_str), Some("10"));
    }

    #[test]
    fn test_severity_follows_days_overdue() {
        let rule = OverdueTasksRule::new(&RuleThresholds::default());
        for (days, expected) in [(1, Severity::Low), (3, Severity::Medium), (8, Severity::High)] {
            let mut snap = snapshot();
            snap.tasks.push(task("Email", Some(days_ago(days)), 0));
            assert_eq!(rule.evaluate(&snap, &[]).severity, expected, "days = {days}");
        }
    }

    #[test]
    fn test_worst_task_is_selected() {
        let mut snap = snapshot();
        snap.tasks.push(task("Minor", Some(days_ago(1)), 0));
        snap.tasks.push(task("Major", Some(days_ago(9)), 1));
        let result = OverdueTasksRule::new(&RuleThresholds::default()).evaluate(&snap, &[]);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.evidence.get("overdue_count").map(String::as_str), Some("2"));
        assert_eq!(result.direct_recommendation.unwrap().target.title.as_deref(), Some("Major"));
    }

    #[test]
    fn test_not_overdue_abstains() {
        let mut snap = snapshot();
        snap.tasks.push(task("Future", Some(days_ago(-3)), 9));
        snap.tasks.push(task("Undated", None, 0));
        assert!(!OverdueTasksRule::new(&RuleThresholds::default()).evaluate(&snap, &[]).triggered);
    }

    #[test]
    fn test_backlog_escalates_without_recommendation() {
        let thresholds = RuleThresholds {
            backlog_open_tasks: 3,
            ..RuleThresholds::default()
        };
        let mut snap = snapshot();
        for i in 0..3 {
            snap.tasks.push(task(&format!("t{i}"), None, 0));
        }
        let result = BacklogRule::new(&thresholds).evaluate(&snap, &[]);
        assert!(result.triggered);
        assert!(result.requires_escalation);
        assert!(result.direct_recommendation.is_none());
        assert_eq!(result.severity, Severity::Medium);
    }
}
