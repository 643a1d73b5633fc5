//! Turning raw model output into typed stage records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::models::{PipelineStage, RecommendationCandidate, StageFailure, StageFailureKind};

/// Generation stage output for one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCandidates {
    #[serde(default)]
    pub candidates: Vec<RecommendationCandidate>,
}

/// Drop a surrounding Markdown code fence, if the model added one.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // An info string ("json") only exists when a newline ends it; a fence
    // opened directly on the payload has none.
    match rest.split_once('\n') {
        Some((info, body)) if !info.trim_start().starts_with(['{', '[']) => body.trim(),
        _ => rest.trim(),
    }
}

/// Parse one stage's output.
///
/// Text that is not JSON is `MalformedJson`; JSON of the wrong shape is a
/// `SchemaViolation`.
pub fn parse_stage_output<T: DeserializeOwned>(stage: PipelineStage, content: &str) -> Result<T, StageFailure> {
    let body = strip_code_fence(content);
    if body.is_empty() {
        return Err(StageFailure::new(stage, StageFailureKind::EmptyResponse));
    }

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| StageFailure::new(stage, StageFailureKind::MalformedJson(e.to_string())))?;

    if !value.is_object() {
        return Err(StageFailure::new(
            stage,
            StageFailureKind::SchemaViolation("expected a JSON object".to_string()),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| StageFailure::new(stage, StageFailureKind::SchemaViolation(e.to_string())))
}
