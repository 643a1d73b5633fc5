//! SQLite implementation of the AssessmentHistoryRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_timestamp, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::SelectionMethod;
use crate::domain::ports::{AssessmentHistoryRepository, AssessmentRecord, Tier};

/// Assessment run history kept in `assessment_runs`.
#[derive(Clone)]
pub struct SqliteAssessmentHistory {
    pool: SqlitePool,
}

impl SqliteAssessmentHistory {
    /// Wrap a migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssessmentHistoryRepository for SqliteAssessmentHistory {
    async fn record(&self, record: &AssessmentRecord) -> DomainResult<()> {
        let candidates = serde_json::to_string(&record.candidates)?;
        let trace = record.trace.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO assessment_runs
               (run_id, user_id, tier_reached, selection_method, candidates, trace, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.run_id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.tier_reached.as_str())
        .bind(record.selection_method.as_str())
        .bind(&candidates)
        .bind(trace)
        .bind(format_timestamp(record.completed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_completed_at(&self, user_id: Uuid) -> DomainResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT MAX(completed_at) FROM assessment_runs WHERE user_id = ?")
                .bind(user_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.and_then(|(ts,)| ts).map(|ts| parse_datetime(&ts)).transpose()
    }

    async fn recent(&self, user_id: Uuid, limit: usize) -> DomainResult<Vec<AssessmentRecord>> {
        let rows: Vec<AssessmentRow> = sqlx::query_as(
            "SELECT * FROM assessment_runs WHERE user_id = ? ORDER BY completed_at DESC LIMIT ?",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AssessmentRecord::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AssessmentRow {
    run_id: String,
    user_id: String,
    tier_reached: String,
    selection_method: String,
    candidates: String,
    trace: Option<String>,
    completed_at: String,
}

impl TryFrom<AssessmentRow> for AssessmentRecord {
    type Error = DomainError;

    fn try_from(row: AssessmentRow) -> Result<Self, Self::Error> {
        let tier_reached = Tier::from_str(&row.tier_reached)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid tier: {}", row.tier_reached)))?;
        let selection_method = SelectionMethod::from_str(&row.selection_method).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid selection method: {}", row.selection_method))
        })?;

        Ok(AssessmentRecord {
            run_id: parse_uuid(&row.run_id)?,
            user_id: parse_uuid(&row.user_id)?,
            tier_reached,
            selection_method,
            candidates: serde_json::from_str(&row.candidates)?,
            trace: row.trace.map(|t| serde_json::from_str(&t)).transpose()?,
            completed_at: parse_datetime(&row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Duration;

    fn record(user_id: Uuid, completed_at: DateTime<Utc>) -> AssessmentRecord {
        AssessmentRecord {
            run_id: Uuid::new_v4(),
            user_id,
            tier_reached: Tier::Quick,
            selection_method: SelectionMethod::Tier1NoEscalation,
            candidates: Vec::new(),
            trace: Some(serde_json::json!({"calls": []})),
            completed_at,
        }
    }

    #[tokio::test]
    async fn test_last_completed_at_tracks_latest_run() {
        let history = SqliteAssessmentHistory::new(create_migrated_test_pool().await.unwrap());
        let user = Uuid::new_v4();
        assert!(history.last_completed_at(user).await.unwrap().is_none());

        let now = Utc::now();
        history.record(&record(user, now - Duration::days(2))).await.unwrap();
        history.record(&record(user, now)).await.unwrap();
        history.record(&record(Uuid::new_v4(), now + Duration::days(1))).await.unwrap();

        let last = history.last_completed_at(user).await.unwrap().unwrap();
        assert_eq!(format_timestamp(last), format_timestamp(now));

        let recent = history.recent(user, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].selection_method, SelectionMethod::Tier1NoEscalation);
        assert!(recent[0].trace.is_some());
    }
}
