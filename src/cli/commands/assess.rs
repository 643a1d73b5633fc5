//! Implementation of the `lodestar assess` command.

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{Config, QuickAssessmentResult, RecommendationCandidate};
use crate::services::PipelineOutcome;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessOutput {
    pub run_id: Uuid,
    pub user_id: Uuid,
    pub tier_reached: String,
    pub selection_method: String,
    pub delta_score: f64,
    pub quick_assessment: Option<QuickAssessmentResult>,
    pub candidates: Vec<RecommendationCandidate>,
    pub dropped_candidates: usize,
}

impl From<PipelineOutcome> for AssessOutput {
    fn from(outcome: PipelineOutcome) -> Self {
        Self {
            run_id: outcome.run_id,
            user_id: outcome.user_id,
            tier_reached: outcome.tier_reached.as_str().to_string(),
            selection_method: outcome.selection_method.as_str().to_string(),
            delta_score: outcome.delta.overall_delta_score,
            quick_assessment: outcome.quick_assessment,
            candidates: outcome.candidates,
            dropped_candidates: outcome.dropped_candidates,
        }
    }
}

impl CommandOutput for AssessOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Run {} for user {}", self.run_id, self.user_id),
            format!("  tier:   {} ({})", self.tier_reached, self.selection_method),
            format!("  delta:  {:.2}", self.delta_score),
        ];
        if let Some(quick) = &self.quick_assessment {
            lines.push(format!(
                "  quick:  combined {:.2} (relevance {:.2}, delta {:.2}, urgency {:.2})",
                quick.combined_score, quick.relevance_score, quick.delta_score, quick.urgency_score
            ));
        }
        if self.dropped_candidates > 0 {
            lines.push(format!("  dropped {} invalid candidate(s)", self.dropped_candidates));
        }

        if self.candidates.is_empty() {
            lines.push("\nNo recommendations.".to_string());
        } else {
            let mut table = list_table(&["score", "action", "target", "title"]);
            for c in &self.candidates {
                table.add_row(vec![
                    format!("{:.2}", c.score),
                    c.action_kind.as_str().to_string(),
                    c.target.kind.as_str().to_string(),
                    truncate(&c.title, 60),
                ]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }
        lines.join("\n")
    }
}

/// Handle assess command
pub async fn execute(config: Config, user_id: Uuid, mock: bool, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let pipeline = ctx.pipeline(mock)?;
    let outcome = pipeline
        .process(user_id, &[])
        .await
        .with_context(|| format!("Assessment failed for user {user_id}"))?;
    output(&AssessOutput::from(outcome), json_mode);
    Ok(())
}
