//! Energy rule.

use chrono::Duration;

use crate::domain::models::{
    DirectActionKind, EntityKind, RecommendationTarget, RuleResult, RuleThresholds, Severity,
    SignalEntry, SignalEventType, UserStateSnapshot,
};

use super::{count_events, recommend, Rule};

/// Average energy at or below this is High severity.
const DEPLETED_ENERGY: f64 = 2.0;

/// Sustained low energy from recent check-ins, or an explicit report.
pub struct LowEnergyRule {
    threshold: f64,
    window: Duration,
}

impl LowEnergyRule {
    pub const ID: &'static str = "low_energy";

    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self {
            threshold: thresholds.low_energy_threshold,
            window: Duration::days(thresholds.low_energy_window_days),
        }
    }
}

impl Rule for LowEnergyRule {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn evaluate(&self, snapshot: &UserStateSnapshot, signals: &[SignalEntry]) -> RuleResult {
        let reports = count_events(signals, &[SignalEventType::LowEnergyReported]);
        let average = snapshot.average_energy(self.window);

        let severity = match average {
            Some(avg) if avg <= DEPLETED_ENERGY => Severity::High,
            Some(avg) if avg < self.threshold => Severity::Medium,
            _ if reports > 0 => Severity::Low,
            _ => return RuleResult::abstain(Self::ID),
        };

        let mut result = RuleResult::triggered(Self::ID, severity).with_evidence("reports", reports);
        if let Some(avg) = average {
            result = result.with_evidence("average_energy", format!("{avg:.1}"));
        }

        result.with_recommendation(recommend(
            Self::ID,
            DirectActionKind::Reflect,
            RecommendationTarget::kind(EntityKind::CheckIn),
            "What is draining your energy this week?".to_string(),
            match average {
                Some(avg) => format!("Energy has averaged {avg:.1}/10 recently."),
                None => "You reported low energy.".to_string(),
            },
            match severity {
                Severity::High | Severity::Critical => 0.75,
                Severity::Medium => 0.6,
                Severity::Low => 0.4,
            },
        ))
    }
}
