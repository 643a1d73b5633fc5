//! Delta calculator.
//!
//! Measures how much a user's state changed since their last completed
//! assessment. Counts come from the snapshot's own timestamps; the overall
//! score is a capped weighted sum that is monotone in every factor.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::models::{
    DeltaBaseline, DeltaWeights, EntityDelta, EntityKind, SignalEntry, StateDeltaSummary,
    UserStateSnapshot,
};
use crate::domain::ports::AssessmentHistoryRepository;

/// Raw factor counts fed into the delta score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaFactors {
    /// Entities created since the baseline
    pub new_entities: u32,
    /// Entities changed since the baseline
    pub modified_entities: u32,
    /// Items finished since the baseline
    pub completed_items: u32,
    /// Distinct missed items
    pub missed_items: u32,
    /// Batch signals newer than the baseline
    pub new_signals: u32,
}

impl DeltaFactors {
    /// Capped weighted sum, clamped to [0, 1].
    pub fn score(&self, weights: &DeltaWeights) -> f64 {
        let total = weights.new_entities.apply(f64::from(self.new_entities))
            + weights.modified_entities.apply(f64::from(self.modified_entities))
            + weights.completed_items.apply(f64::from(self.completed_items))
            + weights.missed_items.apply(f64::from(self.missed_items))
            + weights.new_signals.apply(f64::from(self.new_signals));
        total.clamp(0.0, 1.0)
    }
}

/// Measures what changed for a user since their last assessment.
pub struct DeltaCalculator {
    history: Arc<dyn AssessmentHistoryRepository>,
    weights: DeltaWeights,
}

impl DeltaCalculator {
    /// Calculator using `history` for baselines.
    pub fn new(history: Arc<dyn AssessmentHistoryRepository>, weights: DeltaWeights) -> Self {
        Self { history, weights }
    }

    /// Delta since the user's last completed assessment, or since the
    /// lookback window when there is none.
    ///
    /// A failing history lookup degrades to the lookback window.
    #[instrument(skip(self, snapshot, signals), fields(signals = signals.len()))]
    pub async fn calculate(
        &self,
        user_id: Uuid,
        snapshot: &UserStateSnapshot,
        signals: &[SignalEntry],
    ) -> StateDeltaSummary {
        let last = match self.history.last_completed_at(user_id).await {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "Assessment history unavailable, using lookback window");
                None
            }
        };

        let (since, baseline) = match last {
            Some(at) if at <= snapshot.captured_at => (at, DeltaBaseline::LastAssessment),
            _ => (
                snapshot.captured_at - Duration::days(self.weights.lookback_days),
                DeltaBaseline::Lookback,
            ),
        };

        self.summarize(snapshot, signals, since, baseline)
    }

    /// Pure part of [`calculate`](Self::calculate).
    pub fn summarize(
        &self,
        snapshot: &UserStateSnapshot,
        signals: &[SignalEntry],
        since: DateTime<Utc>,
        baseline: DeltaBaseline,
    ) -> StateDeltaSummary {
        let (per_entity, missed_ids) = entity_deltas(snapshot, since);
        let new_signals = signals.iter().filter(|s| s.created_at > since).count() as u32;
        let signalled_misses = signalled_misses(signals, &missed_ids);

        let mut summary = StateDeltaSummary {
            user_id: snapshot.user_id,
            since,
            baseline,
            per_entity,
            new_signals,
            signalled_misses,
            overall_delta_score: 0.0,
        };

        let factors = DeltaFactors {
            new_entities: summary.total_new(),
            modified_entities: summary.total_modified(),
            completed_items: summary.total_completed(),
            missed_items: summary.total_missed(),
            new_signals,
        };
        summary.overall_delta_score = factors.score(&self.weights);

        tracing::debug!(
            user_id = %snapshot.user_id,
            ?baseline,
            ?factors,
            score = summary.overall_delta_score,
            "Delta calculated"
        );
        summary
    }
}

fn after(at: Option<DateTime<Utc>>, since: DateTime<Utc>) -> bool {
    at.is_some_and(|t| t > since)
}

/// New vs. modified: an entity created after `since` counts only as new.
fn change(created_at: DateTime<Utc>, updated_at: DateTime<Utc>, since: DateTime<Utc>, delta: &mut EntityDelta) {
    if created_at > since {
        delta.new += 1;
    } else if updated_at > since {
        delta.modified += 1;
    }
}

/// A date that fell due inside `[since, today)`.
fn lapsed(date: Option<NaiveDate>, since: NaiveDate, today: NaiveDate) -> bool {
    date.is_some_and(|d| d >= since && d < today)
}

/// Misses reported by the batch that the snapshot has not already counted.
///
/// Targeted signals count once per entity; untargeted ones count once each.
fn signalled_misses(signals: &[SignalEntry], already_missed: &HashSet<Uuid>) -> u32 {
    let mut targeted = HashSet::new();
    let mut untargeted = 0u32;
    for signal in signals.iter().filter(|s| s.event_type.is_miss()) {
        match signal.target_entity_id {
            Some(id) if !already_missed.contains(&id) => {
                targeted.insert(id);
            }
            Some(_) => {}
            None => untargeted += 1,
        }
    }
    targeted.len() as u32 + untargeted
}

/// Per-kind change counts, plus the ids of every entity counted as missed.
fn entity_deltas(
    snapshot: &UserStateSnapshot,
    since: DateTime<Utc>,
) -> (BTreeMap<EntityKind, EntityDelta>, HashSet<Uuid>) {
    let today = snapshot.today();
    let since_day = since.date_naive();
    let yesterday = today - Duration::days(1);
    let mut deltas: BTreeMap<EntityKind, EntityDelta> = BTreeMap::new();
    let mut missed = HashSet::new();

    let goals = deltas.entry(EntityKind::Goal).or_default();
    for goal in &snapshot.goals {
        change(goal.created_at, goal.updated_at, since, goals);
        if after(goal.completed_at, since) {
            goals.completed += 1;
        } else if goal.completed_at.is_none() && lapsed(goal.target_date, since_day, today) {
            goals.missed += 1;
            missed.insert(goal.id);
        }
    }

    let tasks = deltas.entry(EntityKind::Task).or_default();
    for task in &snapshot.tasks {
        change(task.created_at, task.updated_at, since, tasks);
        if after(task.completed_at, since) {
            tasks.completed += 1;
        } else if task.status.is_open() && lapsed(task.due_date, since_day, today) {
            tasks.missed += 1;
            missed.insert(task.id);
        }
    }

    let habits = deltas.entry(EntityKind::Habit).or_default();
    for habit in snapshot.habits.iter().filter(|h| h.active) {
        change(habit.created_at, habit.updated_at, since, habits);
        match habit.last_completed_on {
            Some(day) if day >= since_day => habits.completed += 1,
            _ => {}
        }
        // Not done yesterday or today, and yesterday is inside the window.
        let stale = habit.last_completed_on.map_or(true, |d| d < yesterday);
        if stale && yesterday >= since_day && habit.created_at.date_naive() < yesterday {
            habits.missed += 1;
            missed.insert(habit.id);
        }
    }

    let projects = deltas.entry(EntityKind::Project).or_default();
    for project in &snapshot.projects {
        change(project.created_at, project.updated_at, since, projects);
        if after(project.completed_at, since) {
            projects.completed += 1;
        }
    }

    let experiments = deltas.entry(EntityKind::Experiment).or_default();
    for experiment in &snapshot.experiments {
        change(experiment.created_at, experiment.updated_at, since, experiments);
        if after(experiment.completed_at, since) {
            experiments.completed += 1;
        }
    }

    let check_ins = deltas.entry(EntityKind::CheckIn).or_default();
    check_ins.new += snapshot.check_ins.iter().filter(|c| c.created_at > since).count() as u32;

    (deltas, missed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{DomainError, DomainResult};
    use crate::domain::models::{SignalEventType, TaskSnapshot, TaskState};
    use crate::domain::ports::AssessmentRecord;
    use crate::services::rules::test_support::{habit, now, signal, snapshot, task};
    use async_trait::async_trait;

    struct FixedHistory(DomainResult<Option<DateTime<Utc>>>);

    #[async_trait]
    impl AssessmentHistoryRepository for FixedHistory {
        async fn record(&self, _record: &AssessmentRecord) -> DomainResult<()> {
            Ok(())
        }

        async fn last_completed_at(&self, _user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
            match &self.0 {
                Ok(v) => Ok(*v),
                Err(_) => Err(DomainError::DatabaseError("down".to_string())),
            }
        }

        async fn recent(&self, _user_id: Uuid, _limit: usize) -> DomainResult<Vec<AssessmentRecord>> {
            Ok(vec![])
        }
    }

    fn calculator(last: DomainResult<Option<DateTime<Utc>>>) -> DeltaCalculator {
        DeltaCalculator::new(Arc::new(FixedHistory(last)), DeltaWeights::default())
    }

    fn completed_task(completed: DateTime<Utc>) -> TaskSnapshot {
        let mut t = task("Done", None, 0);
        t.status = TaskState::Completed;
        t.completed_at = Some(completed);
        t.updated_at = completed;
        t
    }

    #[tokio::test]
    async fn test_baseline_from_last_assessment() {
        let last = now() - Duration::days(2);
        let mut snap = snapshot();
        snap.tasks.push(completed_task(now() - Duration::days(1)));
        snap.tasks.push(completed_task(now() - Duration::days(5)));

        let summary = calculator(Ok(Some(last))).calculate(snap.user_id, &snap, &[]).await;
        assert_eq!(summary.baseline, DeltaBaseline::LastAssessment);
        assert_eq!(summary.since, last);
        assert_eq!(summary.per_entity[&EntityKind::Task].completed, 1);
        assert_eq!(summary.per_entity[&EntityKind::Task].modified, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_lookback() {
        let snap = snapshot();
        for history in [Ok(None), Err(DomainError::DatabaseError("down".to_string()))] {
            let summary = calculator(history).calculate(snap.user_id, &snap, &[]).await;
            assert_eq!(summary.baseline, DeltaBaseline::Lookback);
            assert_eq!(summary.since, now() - Duration::days(7));
            assert_eq!(summary.overall_delta_score, 0.0);
        }
    }

    #[test]
    fn test_missed_items_counted() {
        let calc = calculator(Ok(None));
        let mut snap = snapshot();
        snap.tasks.push(task("Late", Some((now() - Duration::days(2)).date_naive()), 0));
        snap.habits.push(habit("Stretch", 0, Some((now() - Duration::days(4)).date_naive()), 0.3));
        let signals = vec![signal(snap.user_id, SignalEventType::HabitMissed, None)];

        let summary = calc.summarize(&snap, &signals, now() - Duration::days(7), DeltaBaseline::Lookback);
        assert_eq!(summary.per_entity[&EntityKind::Task].missed, 1);
        assert_eq!(summary.per_entity[&EntityKind::Habit].missed, 1);
        assert_eq!(summary.signalled_misses, 1);
        assert_eq!(summary.total_missed(), 3);
        assert_eq!(summary.new_signals, 1);
        assert!(summary.overall_delta_score > 0.0);
    }

    #[test]
    fn test_signalled_miss_of_a_detected_miss_counts_once() {
        let calc = calculator(Ok(None));
        let mut snap = snapshot();
        snap.habits.push(habit("Stretch", 0, Some((now() - Duration::days(4)).date_naive()), 0.3));
        snap.habits.push(habit("Read", 3, Some(now().date_naive()), 0.9));
        let (stale, fresh) = (snap.habits[0].id, snap.habits[1].id);
        let signals = vec![
            signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, stale))),
            signal(snap.user_id, SignalEventType::HabitStreakBroken, Some((EntityKind::Habit, stale))),
            signal(snap.user_id, SignalEventType::HabitMissed, Some((EntityKind::Habit, fresh))),
            signal(snap.user_id, SignalEventType::HabitStreakBroken, Some((EntityKind::Habit, fresh))),
        ];

        let summary = calc.summarize(&snap, &signals, now() - Duration::days(7), DeltaBaseline::Lookback);
        assert_eq!(summary.per_entity[&EntityKind::Habit].missed, 1);
        // Only the habit the snapshot does not show as missed, and only once.
        assert_eq!(summary.signalled_misses, 1);
        assert_eq!(summary.total_missed(), 2);
    }

    #[test]
    fn test_score_is_capped_per_factor_and_overall() {
        let weights = DeltaWeights::default();
        let huge = DeltaFactors {
            new_entities: 1_000,
            modified_entities: 1_000,
            completed_items: 1_000,
            missed_items: 1_000,
            new_signals: 1_000,
        };
        let expected = weights.new_entities.cap
            + weights.modified_entities.cap
            + weights.completed_items.cap
            + weights.missed_items.cap
            + weights.new_signals.cap;
        assert!((huge.score(&weights) - expected.min(1.0)).abs() < 1e-9);

        let only_missed = DeltaFactors {
            missed_items: 1_000,
            ..DeltaFactors::default()
        };
        assert!((only_missed.score(&weights) - weights.missed_items.cap).abs() < 1e-9);
    }
}
