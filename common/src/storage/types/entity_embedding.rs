use surrealdb::RecordId;

use crate::storage::types::entity::Entity;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EntityEmbedding, "entity_embedding", {
    /// Record link to the owning entity row
    entity_id: RecordId,
    /// Embedding vector; written once at create time and never refreshed,
    /// so resolution stays stable across merges.
    embedding: Vec<f32>
});

impl EntityEmbedding {
    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION;
             REMOVE INDEX IF EXISTS idx_embedding_entities ON TABLE {table};
             DEFINE INDEX idx_embedding_entities ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension};
             COMMIT TRANSACTION;",
            table = Self::table_name(),
        );

        let res = db.client.query(query).await.map_err(AppError::Database)?;
        res.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// `entity_id` is the key part of the entity id, not "entity:<key>".
    pub fn new(entity_id: &str, embedding: Vec<f32>) -> Self {
        let now = Utc::now();

        Self {
            id: entity_id.to_owned(),
            created_at: now,
            updated_at: now,
            entity_id: RecordId::from_table_key(Entity::table_name(), entity_id),
            embedding,
        }
    }

    pub async fn get_by_entity_id(
        entity_id: &RecordId,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let query = format!(
            "SELECT * FROM {} WHERE entity_id = $entity_id LIMIT 1",
            Self::table_name()
        );

        let mut result = db
            .client
            .query(query)
            .bind(("entity_id", entity_id.clone()))
            .await
            .map_err(AppError::Database)?;

        let embeddings: Vec<Self> = result.take(0).map_err(AppError::Database)?;

        Ok(embeddings.into_iter().next())
    }
}
