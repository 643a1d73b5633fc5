//! SQLite-backed vector store.
//!
//! Embeddings are stored as little-endian f32 blobs and ranked in Rust by
//! cosine similarity. Candidate rows are narrowed by user and entity type
//! in SQL first.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{format_timestamp, parse_uuid, placeholders};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::EntityKind;
use crate::domain::ports::{VectorDocument, VectorQuery, VectorSearchResult, VectorStore};

/// [`VectorStore`] over the `entity_embeddings` table.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Wrap a migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of indexed documents for a user.
    pub async fn count(&self, user_id: Uuid) -> DomainResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entity_embeddings WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Serialize an embedding vector to bytes for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding vector from stored bytes.
pub fn bytes_to_embedding(bytes: &[u8]) -> DomainResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(DomainError::SerializationError("Invalid embedding bytes length".to_string()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity in [-1, 1]; `None` for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let mag_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }
    Some((dot / (mag_a * mag_b)).clamp(-1.0, 1.0))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn search(&self, query: &VectorQuery) -> DomainResult<Vec<VectorSearchResult>> {
        if query.top_k == 0 || query.vector.is_empty() {
            return Ok(Vec::new());
        }

        let type_filter = match &query.entity_types {
            Some(types) if types.is_empty() => return Ok(Vec::new()),
            Some(types) => format!(" AND entity_type IN ({})", placeholders(types.len())),
            None => String::new(),
        };
        let sql = format!(
            "SELECT entity_type, entity_id, content, embedding FROM entity_embeddings WHERE user_id = ?{type_filter}"
        );

        let mut q = sqlx::query(&sql).bind(query.user_id.to_string());
        if let Some(types) = &query.entity_types {
            for kind in types {
                q = q.bind(kind.as_str());
            }
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let embedding = bytes_to_embedding(&row.get::<Vec<u8>, _>("embedding"))?;
            let Some(similarity) = cosine_similarity(&query.vector, &embedding) else {
                continue;
            };
            let kind: String = row.get("entity_type");
            let entity_type = EntityKind::from_str(&kind)
                .ok_or_else(|| DomainError::SerializationError(format!("Invalid entity kind: {kind}")))?;

            results.push(VectorSearchResult {
                entity_type,
                entity_id: parse_uuid(&row.get::<String, _>("entity_id"))?,
                content: row.get("content"),
                similarity,
            });
        }

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(query.top_k);
        Ok(results)
    }

    async fn upsert(&self, document: &VectorDocument) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO entity_embeddings
               (entity_type, entity_id, user_id, content, embedding, dimension, model, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                   user_id = excluded.user_id,
                   content = excluded.content,
                   embedding = excluded.embedding,
                   dimension = excluded.dimension,
                   model = excluded.model,
                   updated_at = excluded.updated_at"#,
        )
        .bind(document.entity_type.as_str())
        .bind(document.entity_id.to_string())
        .bind(document.user_id.to_string())
        .bind(&document.content)
        .bind(embedding_to_bytes(&document.vector))
        .bind(document.vector.len() as i64)
        .bind(&document.model)
        .bind(format_timestamp(document.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, entity_type: EntityKind, entity_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM entity_embeddings WHERE entity_type = ? AND entity_id = ?")
            .bind(entity_type.as_str())
            .bind(entity_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
