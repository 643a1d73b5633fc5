//! Tier 0 rule evaluation model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::recommendation::DirectRecommendationCandidate;

/// Severity of a triggered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    /// Lowercase name used in logs and evidence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    /// Stable rule name
    pub rule_id: String,
    /// Whether the rule fired
    pub triggered: bool,
    pub severity: Severity,
    /// Explainability map; ordered so serialized output is stable
    pub evidence: BTreeMap<String, String>,
    /// Candidate the rule can deliver without a model
    pub direct_recommendation: Option<DirectRecommendationCandidate>,
    /// The finding needs Tier 2 whatever Tier 1 says
    pub requires_escalation: bool,
}

impl RuleResult {
    /// The rule abstained.
    pub fn abstain(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            triggered: false,
            severity: Severity::Low,
            evidence: BTreeMap::new(),
            direct_recommendation: None,
            requires_escalation: false,
        }
    }

    /// The rule fired at `severity`.
    pub fn triggered(rule_id: &str, severity: Severity) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            triggered: true,
            severity,
            evidence: BTreeMap::new(),
            direct_recommendation: None,
            requires_escalation: false,
        }
    }

    /// Record why the rule fired.
    pub fn with_evidence(mut self, key: &str, value: impl ToString) -> Self {
        self.evidence.insert(key.to_string(), value.to_string());
        self
    }

    /// Attach the rule's own candidate.
    pub fn with_recommendation(mut self, recommendation: DirectRecommendationCandidate) -> Self {
        self.direct_recommendation = Some(recommendation);
        self
    }

    /// Ask for Tier 2.
    pub fn escalate(mut self) -> Self {
        self.requires_escalation = true;
        self
    }
}

/// Aggregate of every rule evaluated in one run.
///
/// This is the only view of Tier 0 that later tiers receive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluationResult {
    /// Every rule's outcome, abstentions included
    pub results: Vec<RuleResult>,
    /// Highest severity among triggered rules
    pub max_severity: Option<Severity>,
    /// Ids of the rules that fired
    pub triggered_rules: Vec<String>,
    /// Candidates offered by triggered rules
    pub direct_recommendations: Vec<DirectRecommendationCandidate>,
    pub requires_escalation: bool,
}

impl RuleEvaluationResult {
    /// Aggregate per-rule outcomes.
    pub fn from_results(results: Vec<RuleResult>) -> Self {
        let triggered: Vec<&RuleResult> = results.iter().filter(|r| r.triggered).collect();
        let max_severity = triggered.iter().map(|r| r.severity).max();
        let triggered_rules = triggered.iter().map(|r| r.rule_id.clone()).collect();
        let direct_recommendations = triggered
            .iter()
            .filter_map(|r| r.direct_recommendation.clone())
            .collect();
        let requires_escalation = triggered.iter().any(|r| r.requires_escalation);

        Self {
            results,
            max_severity,
            triggered_rules,
            direct_recommendations,
            requires_escalation,
        }
    }

    /// Whether any rule fired at critical severity.
    pub fn is_critical(&self) -> bool {
        self.max_severity == Some(Severity::Critical)
    }

    /// Tier 0 answered the run on its own: it has something to say,
    /// nothing asked for a model, and nothing is critical.
    pub fn is_resolved(&self) -> bool {
        !self.direct_recommendations.is_empty() && !self.requires_escalation && !self.is_critical()
    }
}
