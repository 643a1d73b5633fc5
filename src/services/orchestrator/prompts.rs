//! Prompts and output schemas for the three orchestrator stages.

use serde_json::{json, Value};
use std::fmt::Write as _;

use crate::domain::models::{
    GenerationDomain, InterventionPlanItem, QuickAssessmentResult, RecommendationStrategy,
    RelevantContextItem, RuleEvaluationResult, SignalEntry, SituationalAssessment,
    StateDeltaSummary, UserStateSnapshot,
};

pub const ASSESSMENT_SYSTEM: &str = "You are a calm, practical life coach reviewing one person's \
goals, habits, tasks, projects, experiments and check-ins. Describe their situation honestly: \
risks, recurring patterns, progress per goal, momentum and whether their load fits their capacity. \
Do not recommend anything yet.";

pub const STRATEGY_SYSTEM: &str = "You are a life coach deciding where to intervene. Given a \
situational assessment, choose a small number of interventions that would help most, ordered by \
importance, and a budget for how many recommendations to show. Fewer, better interventions beat \
many. Only use the listed intervention types.";

pub const GENERATION_SYSTEM: &str = "You are a life coach writing concrete recommendations for one \
domain. Each recommendation must be specific, small enough to act on today, and reference only \
entities whose ids appear in the provided state. Use a create action without an entity id for \
new things.";

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

pub fn assessment_schema() -> Value {
    json!({
        "type": "object",
        "required": ["summary", "momentum", "capacity_status"],
        "properties": {
            "summary": {"type": "string"},
            "risks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["description", "severity"],
                    "properties": {
                        "description": {"type": "string"},
                        "severity": {"type": "string", "enum": ["low", "medium", "high", "critical"]},
                        "entity_ids": {"type": "array", "items": {"type": "string", "format": "uuid"}}
                    }
                }
            },
            "patterns": {"type": "array", "items": {"type": "string"}},
            "goal_progress": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["goal_id", "status"],
                    "properties": {
                        "goal_id": {"type": "string", "format": "uuid"},
                        "status": {"type": "string", "enum": ["on_track", "at_risk", "off_track"]},
                        "note": {"type": "string"}
                    }
                }
            },
            "momentum": {"type": "string", "enum": ["building", "steady", "declining", "stalled"]},
            "capacity_status": {"type": "string", "enum": ["underloaded", "balanced", "stretched", "overloaded"]},
            "energy_trend": {"type": "string"}
        }
    })
}

pub fn strategy_schema(max_interventions: usize) -> Value {
    json!({
        "type": "object",
        "required": ["focus", "max_recommendations", "interventions"],
        "properties": {
            "focus": {"type": "string"},
            "max_recommendations": {"type": "integer", "minimum": 0, "maximum": 10},
            "interventions": {
                "type": "array",
                "maxItems": max_interventions,
                "items": {
                    "type": "object",
                    "required": ["intervention_type", "reasoning"],
                    "properties": {
                        "intervention_type": {
                            "type": "string",
                            "enum": [
                                "task_triage", "task_scheduling", "task_breakdown",
                                "habit_recovery", "habit_formation", "habit_adjustment",
                                "experiment_design", "experiment_review",
                                "goal_realignment", "goal_metric_update",
                                "project_rescue", "project_planning"
                            ]
                        },
                        "target_entity_id": {"type": "string", "format": "uuid"},
                        "reasoning": {"type": "string"},
                        "priority": {"type": "integer", "minimum": 1, "maximum": 5}
                    }
                }
            }
        }
    })
}

/// Candidate list schema; targets are restricted to the domain's entity kind.
pub fn generation_schema(domain: GenerationDomain) -> Value {
    json!({
        "type": "object",
        "required": ["candidates"],
        "properties": {
            "candidates": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["type", "target", "actionKind", "title", "rationale", "score"],
                    "properties": {
                        "type": {"type": "string"},
                        "target": {
                            "type": "object",
                            "required": ["kind"],
                            "properties": {
                                "kind": {"type": "string", "enum": [domain.target_kind().as_str()]},
                                "entityId": {"type": "string", "format": "uuid"},
                                "title": {"type": "string"}
                            }
                        },
                        "actionKind": {
                            "type": "string",
                            "enum": ["create", "update", "execute_today", "defer", "remove", "reflect_prompt", "learn_prompt"]
                        },
                        "title": {"type": "string"},
                        "rationale": {"type": "string"},
                        "score": {"type": "number", "minimum": 0, "maximum": 1},
                        "actionPayload": {"type": "object"},
                        "actionSummary": {"type": "string"}
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// User prompts
// ---------------------------------------------------------------------------

fn write_context(out: &mut String, context: &[RelevantContextItem]) {
    if context.is_empty() {
        return;
    }
    out.push_str("\n## Related history\n");
    for item in context {
        let _ = writeln!(
            out,
            "- [{} {}] {}",
            item.entity_type.as_str(),
            item.entity_id,
            item.content
        );
    }
}

fn write_state(out: &mut String, snapshot: &UserStateSnapshot) {
    let today = snapshot.today();
    out.push_str("## Current state\n");

    for goal in snapshot.active_goals() {
        let _ = writeln!(
            out,
            "- goal {} \"{}\": {:.0}% done{}",
            goal.id,
            goal.title,
            goal.progress * 100.0,
            goal.target_date.map(|d| format!(", target {d}")).unwrap_or_default()
        );
    }
    for task in snapshot.open_tasks() {
        let _ = writeln!(
            out,
            "- task {} \"{}\": priority {}{}{}",
            task.id,
            task.title,
            task.priority,
            task.days_overdue(today)
                .map(|d| format!(", {d} days overdue"))
                .unwrap_or_default(),
            if task.reschedule_count > 0 {
                format!(", rescheduled {}x", task.reschedule_count)
            } else {
                String::new()
            }
        );
    }
    for habit in snapshot.active_habits() {
        let _ = writeln!(
            out,
            "- habit {} \"{}\": streak {}, adherence {:.0}%",
            habit.id,
            habit.title,
            habit.current_streak,
            habit.adherence_rate * 100.0
        );
    }
    for project in &snapshot.projects {
        let _ = writeln!(
            out,
            "- project {} \"{}\": {:?}, {:.0}% done",
            project.id,
            project.title,
            project.status,
            project.progress * 100.0
        );
    }
    for experiment in &snapshot.experiments {
        let _ = writeln!(
            out,
            "- experiment {} \"{}\": {:?}{}",
            experiment.id,
            experiment.title,
            experiment.status,
            experiment
                .hypothesis
                .as_deref()
                .map(|h| format!(", hypothesis: {h}"))
                .unwrap_or_default()
        );
    }
    if let Some(avg) = snapshot.average_energy(chrono::Duration::days(7)) {
        let _ = writeln!(out, "- average energy this week: {avg:.1}/10");
    }
    let _ = writeln!(
        out,
        "- daily task capacity: {}",
        snapshot.profile.daily_task_capacity
    );
}

pub fn assessment_prompt(
    snapshot: &UserStateSnapshot,
    signals: &[SignalEntry],
    tier0: &RuleEvaluationResult,
    delta: &StateDeltaSummary,
    quick: &QuickAssessmentResult,
    context: &[RelevantContextItem],
) -> String {
    let mut out = String::new();
    write_state(&mut out, snapshot);

    out.push_str("\n## What just happened\n");
    for signal in signals {
        let _ = writeln!(out, "- {}", signal.event_type.as_str().replace('_', " "));
    }
    let _ = writeln!(
        out,
        "- since {}: {} new, {} changed, {} completed, {} missed",
        delta.since.format("%Y-%m-%d"),
        delta.total_new(),
        delta.total_modified(),
        delta.total_completed(),
        delta.total_missed()
    );

    if !tier0.triggered_rules.is_empty() {
        out.push_str("\n## Flags raised\n");
        for result in tier0.results.iter().filter(|r| r.triggered) {
            let evidence: Vec<String> = result.evidence.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let _ = writeln!(
                out,
                "- {} ({}): {}",
                result.rule_id,
                result.severity.as_str(),
                evidence.join(", ")
            );
        }
    }
    if let Some(reason) = &quick.escalation_reason {
        let _ = writeln!(out, "\nEscalated because: {reason}");
    }

    write_context(&mut out, context);
    out
}

pub fn strategy_prompt(
    snapshot: &UserStateSnapshot,
    assessment: &SituationalAssessment,
    max_interventions: usize,
    max_recommendations: u32,
    context: &[RelevantContextItem],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Assessment\n{}", assessment.summary);
    let _ = writeln!(
        out,
        "Momentum: {:?}. Capacity: {:?}.",
        assessment.momentum, assessment.capacity_status
    );
    for risk in &assessment.risks {
        let _ = writeln!(out, "- risk ({}): {}", risk.severity, risk.description);
    }
    for pattern in &assessment.patterns {
        let _ = writeln!(out, "- pattern: {pattern}");
    }
    for progress in &assessment.goal_progress {
        let title = snapshot
            .title_of(crate::domain::models::EntityKind::Goal, progress.goal_id)
            .unwrap_or("unknown goal");
        let _ = writeln!(out, "- goal \"{}\": {:?} {}", title, progress.status, progress.note);
    }

    out.push('\n');
    write_state(&mut out, snapshot);
    let _ = writeln!(
        out,
        "\nPlan at most {max_interventions} interventions and at most {max_recommendations} recommendations."
    );
    write_context(&mut out, context);
    out
}

pub fn generation_prompt(
    snapshot: &UserStateSnapshot,
    domain: GenerationDomain,
    strategy: &RecommendationStrategy,
    items: &[InterventionPlanItem],
    context: &[RelevantContextItem],
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "## Domain: {}\nStrategy focus: {}\n",
        domain.as_str(),
        strategy.focus
    );
    out.push_str("## Interventions\n");
    for item in items {
        let _ = writeln!(
            out,
            "- {:?} (priority {}){}: {}",
            item.intervention_type,
            item.priority,
            item.target_entity_id
                .map(|id| format!(" on {id}"))
                .unwrap_or_default(),
            item.reasoning
        );
    }
    out.push('\n');
    write_state(&mut out, snapshot);
    let _ = writeln!(
        out,
        "\nEvery target.kind must be \"{}\".",
        domain.target_kind().as_str()
    );
    write_context(&mut out, context);
    out
}
