//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use lodestar::adapters::generative::MockGenerativeService;
use lodestar::adapters::snapshot::JsonDirSnapshotProvider;
use lodestar::adapters::sqlite::{initialize_database, SqliteAssessmentHistory, SqliteVectorStore};
use lodestar::domain::errors::DomainResult;
use lodestar::domain::models::{Config, DatabaseConfig, HabitSnapshot, TaskSnapshot, TaskState};
use lodestar::domain::ports::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider, NullEmbeddingProvider};
use lodestar::services::{EscalationPipeline, PipelineServices};

/// Install a test-writer subscriber once per binary.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Migrated file database inside `dir`.
pub async fn file_pool(dir: &Path) -> SqlitePool {
    let config = DatabaseConfig {
        path: dir.join("lodestar.db").display().to_string(),
        max_connections: 4,
        ..DatabaseConfig::default()
    };
    initialize_database(&config).await.expect("database should initialize")
}

pub fn days_ago(now: DateTime<Utc>, days: i64) -> NaiveDate {
    (now - Duration::days(days)).date_naive()
}

pub fn task(title: &str, due: Option<NaiveDate>, reschedule_count: u32, now: DateTime<Utc>) -> TaskSnapshot {
    TaskSnapshot {
        id: Uuid::new_v4(),
        title: title.to_string(),
        status: TaskState::Todo,
        goal_id: None,
        project_id: None,
        due_date: due,
        reschedule_count,
        priority: 2,
        completed_at: None,
        created_at: now - Duration::days(30),
        updated_at: now - Duration::days(30),
    }
}

pub fn habit(
    title: &str,
    streak: u32,
    last_done: Option<NaiveDate>,
    adherence: f64,
    now: DateTime<Utc>,
) -> HabitSnapshot {
    HabitSnapshot {
        id: Uuid::new_v4(),
        title: title.to_string(),
        goal_id: None,
        current_streak: streak,
        longest_streak: streak,
        adherence_rate: adherence,
        last_completed_on: last_done,
        active: true,
        created_at: now - Duration::days(60),
        updated_at: now - Duration::days(60),
    }
}

/// Pipeline over a JSON snapshot directory and the given database.
pub fn pipeline(
    pool: &SqlitePool,
    snapshots: &JsonDirSnapshotProvider,
    mock: MockGenerativeService,
) -> EscalationPipeline {
    EscalationPipeline::new(
        PipelineServices {
            snapshots: Arc::new(snapshots.clone()),
            embeddings: Arc::new(NullEmbeddingProvider::new()),
            vectors: Arc::new(SqliteVectorStore::new(pool.clone())),
            generative: Arc::new(mock),
            history: Arc::new(SqliteAssessmentHistory::new(pool.clone())),
        },
        &Config::default(),
    )
}

/// Every text maps to the same unit vector, so every indexed entity matches.
pub struct ConstantEmbedder;

#[async_trait]
impl EmbeddingProvider for ConstantEmbedder {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn model(&self) -> &str {
        "constant-1"
    }

    fn dimension(&self) -> usize {
        3
    }

    async fn embed(&self, _text: &str) -> DomainResult<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }

    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> DomainResult<Vec<EmbeddingOutput>> {
        Ok(inputs
            .iter()
            .map(|i| EmbeddingOutput {
                id: i.id.clone(),
                vector: vec![1.0, 0.0, 0.0],
            })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        16
    }
}
