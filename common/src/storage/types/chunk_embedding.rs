use surrealdb::RecordId;

use crate::storage::types::artifact::{Artifact, ArtifactType, Sensitivity};
use crate::storage::types::chunk::Chunk;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ChunkEmbedding, "chunk_embedding", {
    /// Record link to the owning chunk row
    chunk_id: RecordId,
    /// Denormalized parent artifact id for bulk deletes and rank fusion
    artifact_id: String,
    revision_id: String,
    chunk_index: usize,
    // Filterable metadata copied from the parent artifact.
    sensitivity: Sensitivity,
    artifact_type: ArtifactType,
    source_system: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    timestamp: DateTime<Utc>,
    /// Embedding vector
    embedding: Vec<f32>
});

impl ChunkEmbedding {
    /// Recreate the HNSW index with a new embedding dimension.
    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION;
             REMOVE INDEX IF EXISTS idx_embedding_chunks ON TABLE {table};
             DEFINE INDEX idx_embedding_chunks ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension};
             COMMIT TRANSACTION;",
            table = Self::table_name(),
        );

        let res = db.client.query(query).await.map_err(AppError::Database)?;
        res.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// `chunk_id` is the key part of the chunk id, not "chunk:<key>".
    pub fn new(
        chunk_id: &str,
        artifact: &Artifact,
        revision_id: &str,
        chunk_index: usize,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: chunk_id.to_owned(),
            created_at: now,
            updated_at: now,
            chunk_id: RecordId::from_table_key(Chunk::table_name(), chunk_id),
            artifact_id: artifact.id.clone(),
            revision_id: revision_id.to_owned(),
            chunk_index,
            sensitivity: artifact.sensitivity,
            artifact_type: artifact.artifact_type,
            source_system: artifact.source_system.clone(),
            timestamp: artifact.timestamp,
            embedding,
        }
    }

    pub async fn get_by_chunk_id(
        chunk_id: &RecordId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let query = format!(
            "SELECT * FROM {} WHERE chunk_id = $chunk_id LIMIT 1",
            Self::table_name()
        );

        let mut result = db
            .client
            .query(query)
            .bind(("chunk_id", chunk_id.clone()))
            .await
            .map_err(AppError::Database)?;

        let embeddings: Vec<Self> = result.take(0).map_err(AppError::Database)?;

        Ok(embeddings.into_iter().next())
    }

    pub async fn delete_by_artifact_id(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let query = format!(
            "DELETE FROM {} WHERE artifact_id = $artifact_id",
            Self::table_name()
        );

        db.client
            .query(query)
            .bind(("artifact_id", artifact_id.to_owned()))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }
}
