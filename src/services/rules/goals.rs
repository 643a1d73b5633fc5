//! Goal, project and experiment rules.

use chrono::{DateTime, Utc};

use crate::domain::models::{
    DirectActionKind, EntityKind, ExperimentStatus, ProjectStatus, RecommendationTarget,
    RuleResult, RuleThresholds, Severity, SignalEntry, SignalEventType, UserStateSnapshot,
};

use super::{count_events, recommend, Rule};

/// Active goals close to (or past) their target date while behind.
pub struct GoalDeadlineRule {
    window_days: i64,
    behind_ratio: f64,
}

impl GoalDeadlineRule {
    pub const ID: &'static str = "goal_deadline";

    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self {
            window_days: thresholds.goal_deadline_days,
            behind_ratio: thresholds.goal_behind_ratio,
        }
    }
}

impl Rule for GoalDeadlineRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, _signals: &[SignalEntry]) -> RuleResult {
        let today = snapshot.today();

        // Soonest deadline first; ties by id.
        let nearest = snapshot
            .active_goals()
            .filter(|g| g.progress < self.behind_ratio)
            .filter_map(|g| g.target_date.map(|d| (g, (d - today).num_days())))
            .filter(|(_, days_left)| *days_left <= self.window_days)
            .min_by(|a, b| a.1.cmp(&b.1).then(a.0.id.cmp(&b.0.id)));

        let Some((goal, days_left)) = nearest else {
            return RuleResult::abstain(Self::ID);
        };

        let target = RecommendationTarget::entity(EntityKind::Goal, goal.id, goal.title.clone());
        let result = RuleResult::triggered(Self::ID, if days_left < 0 { Severity::High } else { Severity::Medium })
            .with_evidence("goal_id", goal.id)
            .with_evidence("days_left", days_left)
            .with_evidence("progress", format!("{:.2}", goal.progress));

        if days_left < 0 {
            // Missed deadline: the goal itself needs rethinking.
            return result.escalate();
        }

        result.with_recommendation(recommend(
            Self::ID,
            DirectActionKind::Review,
            target,
            format!("Review the plan for \"{}\"", goal.title),
            format!(
                "{:.0}% done with {} days left.",
                goal.progress * 100.0,
                days_left
            ),
            0.65,
        ))
    }
}

/// Running experiments past their end date, awaiting a conclusion.
pub struct ExperimentEndedRule;

impl ExperimentEndedRule {
    pub const ID: &'static str = "experiment_ended";
}

impl Rule for ExperimentEndedRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, signals: &[SignalEntry]) -> RuleResult {
        let today = snapshot.today();
        let ended = snapshot
            .experiments
            .iter()
            .filter(|e| e.status == ExperimentStatus::Running)
            .filter(|e| e.end_date.is_some_and(|d| d < today))
            .min_by(|a, b| a.end_date.cmp(&b.end_date).then(a.id.cmp(&b.id)));

        let Some(experiment) = ended else {
            return RuleResult::abstain(Self::ID);
        };

        // An experiment with no check-ins has nothing to learn from yet.
        let severity = if experiment.check_in_count == 0 {
            Severity::Medium
        } else {
            Severity::Low
        };

        RuleResult::triggered(Self::ID, severity)
            .with_evidence("experiment_id", experiment.id)
            .with_evidence("check_ins", experiment.check_in_count)
            .with_evidence(
                "ended_signals",
                count_events(signals, &[SignalEventType::ExperimentEnded]),
            )
            .with_recommendation(recommend(
                Self::ID,
                DirectActionKind::Learn,
                RecommendationTarget::entity(
                    EntityKind::Experiment,
                    experiment.id,
                    experiment.title.clone(),
                ),
                format!("What did \"{}\" teach you?", experiment.title),
                match &experiment.hypothesis {
                    Some(h) => format!("The experiment has ended. Hypothesis: {h}"),
                    None => "The experiment has ended.".to_string(),
                },
                0.5,
            ))
    }
}

/// Active projects with no activity for a while.
pub struct StalledProjectRule {
    stalled_days: i64,
    high_days: i64,
}

impl StalledProjectRule {
    pub const ID: &'static str = "stalled_project";

    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self {
            stalled_days: thresholds.stalled_project_days,
            high_days: thresholds.stalled_project_high_days,
        }
    }
}

impl Rule for StalledProjectRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, _signals: &[SignalEntry]) -> RuleResult {
        let idle_days = |last: DateTime<Utc>| (snapshot.captured_at - last).num_days();

        let stalest = snapshot
            .projects
            .iter()
            .filter(|p| p.status == ProjectStatus::Active)
            .map(|p| (p, idle_days(p.last_activity_at.unwrap_or(p.updated_at))))
            .filter(|(_, idle)| *idle >= self.stalled_days)
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.id.cmp(&a.0.id)));

        let Some((project, idle)) = stalest else {
            return RuleResult::abstain(Self::ID);
        };

        let severity = if idle >= self.high_days {
            Severity::High
        } else {
            Severity::Medium
        };

        RuleResult::triggered(Self::ID, severity)
            .with_evidence("project_id", project.id)
            .with_evidence("idle_days", idle)
            .with_recommendation(recommend(
                Self::ID,
                DirectActionKind::Review,
                RecommendationTarget::entity(EntityKind::Project, project.id, project.title.clone()),
                format!("Decide the next step for \"{}\"", project.title),
                format!("No activity for {idle} days."),
                if severity == Severity::High { 0.7 } else { 0.55 },
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        ExperimentSnapshot, GoalSnapshot, GoalStatus, ProjectSnapshot,
    };
    use crate::services::rules::test_support::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn goal(progress: f64, days_left: i64) -> GoalSnapshot {
        GoalSnapshot {
            id: Uuid::new_v4(),
            title: "Run a 10k".to_string(),
            status: GoalStatus::Active,
            progress,
            target_date: Some(days_ago(-days_left)),
            completed_at: None,
            created_at: now() - Duration::days(90),
            updated_at: now() - Duration::days(2),
        }
    }

    #[test]
    fn test_goal_deadline() {
        let rule = GoalDeadlineRule::new(&RuleThresholds::default());

        let mut near = snapshot();
        near.goals.push(goal(0.2, 5));
        let result = rule.evaluate(&near, &[]);
        assert_eq!(result.severity, Severity::Medium);
        assert_eq!(result.direct_recommendation.unwrap().kind, DirectActionKind::Review);

        let mut missed = snapshot();
        missed.goals.push(goal(0.2, -3));
        let result = rule.evaluate(&missed, &[]);
        assert_eq!(result.severity, Severity::High);
        assert!(result.requires_escalation);
        assert!(result.direct_recommendation.is_none());

        let mut on_track = snapshot();
        on_track.goals.push(goal(0.9, 2));
        on_track.goals.push(goal(0.1, 60));
        assert!(!rule.evaluate(&on_track, &[]).triggered);
    }

    #[test]
    fn test_experiment_ended_suggests_learning() {
        let mut snap = snapshot();
        snap.experiments.push(ExperimentSnapshot {
            id: Uuid::new_v4(),
            title: "No coffee after noon".to_string(),
            hypothesis: Some("Better sleep".to_string()),
            status: ExperimentStatus::Running,
            start_date: Some(days_ago(21)),
            end_date: Some(days_ago(1)),
            check_in_count: 12,
            completed_at: None,
            created_at: now() - Duration::days(21),
            updated_at: now() - Duration::days(1),
        });
        let result = ExperimentEndedRule.evaluate(&snap, &[]);
        assert_eq!(result.severity, Severity::Low);
        assert_eq!(result.direct_recommendation.unwrap().kind, DirectActionKind::Learn);
    }

    #[test]
    fn test_stalled_project_uses_last_activity() {
        let rule = StalledProjectRule::new(&RuleThresholds::default());
        let mut snap = snapshot();
        snap.projects.push(ProjectSnapshot {
            id: Uuid::new_v4(),
            title: "Garden shed".to_string(),
            status: ProjectStatus::Active,
            goal_id: None,
            progress: 0.3,
            last_activity_at: Some(now() - Duration::days(40)),
            completed_at: None,
            created_at: now() - Duration::days(100),
            updated_at: now(),
        });
        let result = rule.evaluate(&snap, &[]);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.evidence.get("idle_days").map(String::as_str), Some("40"));
    }
}
