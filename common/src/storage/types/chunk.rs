use crate::storage::types::artifact::Artifact;
use crate::storage::types::chunk_embedding::ChunkEmbedding;
use crate::storage::types::collection_filter::{CollectionFilter, FILTER_OVERFETCH};
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Chunk, "chunk", {
    artifact_id: String,
    chunk_index: usize,
    content: String,
    start_char: usize,
    end_char: usize,
    token_count: usize,
    content_hash: String
});

/// Vector search hit including the hydrated chunk row.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: Chunk,
    /// Cosine distance, lower is closer.
    pub distance: f32,
}

impl Chunk {
    pub fn new(
        artifact_id: String,
        chunk_index: usize,
        content: String,
        start_char: usize,
        end_char: usize,
        token_count: usize,
        content_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            // Deterministic chunk ids keep re-ingestion upserts idempotent.
            id: format!("{artifact_id}_{chunk_index}"),
            created_at: now,
            updated_at: now,
            artifact_id,
            chunk_index,
            content,
            start_char,
            end_char,
            token_count,
            content_hash,
        }
    }

    /// Atomically upsert a chunk row and its embedding row; the embedding
    /// row carries the parent artifact's filterable metadata.
    pub async fn upsert_with_embedding(
        chunk: Chunk,
        artifact: &Artifact,
        revision_id: &str,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let emb = ChunkEmbedding::new(&chunk.id, artifact, revision_id, chunk.chunk_index, embedding);

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "UPSERT type::thing('{chunk_table}', $chunk_id) CONTENT $chunk;",
                chunk_table = Self::table_name(),
            ))
            .query(format!(
                "UPSERT type::thing('{emb_table}', $emb_id) CONTENT $emb;",
                emb_table = ChunkEmbedding::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("chunk_id", chunk.id.clone()))
            .bind(("chunk", chunk))
            .bind(("emb_id", emb.id.clone()))
            .bind(("emb", emb))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Vector search over the chunks collection, ascending cosine distance.
    /// The metadata filter is part of the query; filtered searches widen the
    /// nearest-neighbor window before the filter prunes it.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        filter: &CollectionFilter,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            chunk_id: Chunk,
            similarity: f32,
        }

        let window = if filter.is_empty() {
            take
        } else {
            take * FILTER_OVERFETCH
        };
        let sql = format!(
            r#"
            SELECT
                chunk_id,
                vector::similarity::cosine(embedding, $embedding) AS similarity
            FROM {emb_table}
            WHERE embedding <|{window},100|> $embedding{filter_clauses}
            ORDER BY similarity DESC
            LIMIT {take}
            FETCH chunk_id;
            "#,
            emb_table = ChunkEmbedding::table_name(),
            window = window,
            take = take,
            filter_clauses = filter.sql_clauses(),
        );

        let request = filter.bind_params(db.query(&sql).bind(("embedding", query_embedding)));
        let mut response = request
            .await
            .map_err(|e| AppError::Retrieval(format!("chunk vector query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|r| ChunkSearchResult {
                chunk: r.chunk_id,
                distance: 1.0 - r.similarity,
            })
            .collect())
    }

    pub async fn list_for_artifact(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table) WHERE artifact_id = $artifact_id ORDER BY chunk_index ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    /// Delete chunk rows and their embeddings for one artifact, returning the
    /// number of chunk rows removed.
    pub async fn delete_by_artifact_id(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        let removed = Self::list_for_artifact(artifact_id, db).await?.len();

        db.client
            .query(format!(
                "DELETE {} WHERE artifact_id = $artifact_id",
                Self::table_name()
            ))
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?
            .check()?;
        ChunkEmbedding::delete_by_artifact_id(artifact_id, db).await?;

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::artifact::{ArtifactType, Sensitivity, VisibilityScope};
    use surrealdb::RecordId;
    use uuid::Uuid;

    async fn setup_test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    fn test_artifact(artifact_id: &str, sensitivity: Sensitivity) -> Artifact {
        let now = Utc::now();
        Artifact {
            id: artifact_id.to_string(),
            created_at: now,
            updated_at: now,
            artifact_type: ArtifactType::Note,
            source_system: "test".to_string(),
            source_id: None,
            source_url: None,
            timestamp: now,
            title: None,
            author: None,
            participants: vec![],
            content_hash: "hash".to_string(),
            token_count: 2,
            is_chunked: false,
            num_chunks: 1,
            sensitivity,
            visibility_scope: VisibilityScope::Me,
            retention_policy: "standard".to_string(),
            embedding_provider: "hashed".to_string(),
            embedding_model: "hashed".to_string(),
            embedding_dimensions: 3,
            ingested_at: now,
        }
    }

    fn test_chunk(artifact_id: &str, index: usize, content: &str) -> Chunk {
        Chunk::new(
            artifact_id.to_string(),
            index,
            content.to_string(),
            0,
            content.len(),
            content.split_whitespace().count(),
            "hash".to_string(),
        )
    }

    async fn store_chunk(
        db: &SurrealDbClient,
        artifact_id: &str,
        index: usize,
        sensitivity: Sensitivity,
        embedding: Vec<f32>,
    ) -> Chunk {
        let chunk = test_chunk(artifact_id, index, "chunk body");
        let artifact = test_artifact(artifact_id, sensitivity);
        Chunk::upsert_with_embedding(chunk.clone(), &artifact, "rev-1", embedding, db)
            .await
            .expect("upsert chunk with embedding");
        chunk
    }

    #[tokio::test]
    async fn test_upsert_with_embedding_creates_both_records() {
        let db = setup_test_db().await;

        let chunk = store_chunk(&db, "art_abc", 0, Sensitivity::Normal, vec![0.1, 0.2, 0.3]).await;

        let stored: Option<Chunk> = db.get_item(&chunk.id).await.expect("get chunk");
        assert!(stored.is_some());

        let rid = RecordId::from_table_key(Chunk::table_name(), &chunk.id);
        let emb = ChunkEmbedding::get_by_chunk_id(&rid, &db)
            .await
            .expect("get embedding");
        let emb = emb.expect("embedding present");
        assert_eq!(emb.artifact_id, "art_abc");
        assert_eq!(emb.revision_id, "rev-1");
        assert_eq!(emb.chunk_index, 0);
        assert_eq!(emb.sensitivity, Sensitivity::Normal);
        assert_eq!(emb.source_system, "test");
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_chunk_id() {
        let db = setup_test_db().await;

        for _ in 0..2 {
            store_chunk(&db, "art_abc", 0, Sensitivity::Normal, vec![0.1, 0.2, 0.3]).await;
        }

        let chunks = Chunk::list_for_artifact("art_abc", &db)
            .await
            .expect("list chunks");
        assert_eq!(chunks.len(), 1, "re-upserting must not duplicate rows");
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_distance() {
        let db = setup_test_db().await;

        let near = store_chunk(&db, "art_near", 0, Sensitivity::Normal, vec![0.0, 1.0, 0.0]).await;
        store_chunk(&db, "art_far", 0, Sensitivity::Normal, vec![1.0, 0.0, 0.0]).await;

        let results = Chunk::vector_search(
            2,
            vec![0.0, 1.0, 0.0],
            &CollectionFilter::default(),
            &db,
        )
        .await
        .expect("vector search");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, near.id);
        assert!(results[0].distance <= results[1].distance);
    }

    #[tokio::test]
    async fn test_vector_search_applies_the_filter_inside_the_query() {
        let db = setup_test_db().await;

        // The nearest chunk does not match; the matching one is further out.
        store_chunk(&db, "art_near_normal", 0, Sensitivity::Normal, vec![0.0, 1.0, 0.0]).await;
        let sensitive = store_chunk(
            &db,
            "art_far_sensitive",
            0,
            Sensitivity::Sensitive,
            vec![1.0, 1.0, 0.0],
        )
        .await;

        let filter = CollectionFilter {
            sensitivity: Some(Sensitivity::Sensitive),
            ..CollectionFilter::default()
        };
        let results = Chunk::vector_search(1, vec![0.0, 1.0, 0.0], &filter, &db)
            .await
            .expect("filtered search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, sensitive.id);
    }

    #[tokio::test]
    async fn test_delete_by_artifact_id_counts_and_scopes() {
        let db = setup_test_db().await;

        for index in 0..3 {
            store_chunk(&db, "art_doomed", index, Sensitivity::Normal, vec![0.1, 0.2, 0.3]).await;
        }
        let keeper = store_chunk(&db, "art_keeper", 0, Sensitivity::Normal, vec![0.3, 0.2, 0.1]).await;

        let removed = Chunk::delete_by_artifact_id("art_doomed", &db)
            .await
            .expect("delete by artifact");
        assert_eq!(removed, 3);

        assert!(Chunk::list_for_artifact("art_doomed", &db)
            .await
            .expect("list doomed")
            .is_empty());
        assert_eq!(
            Chunk::list_for_artifact("art_keeper", &db)
                .await
                .expect("list keeper")
                .len(),
            1
        );

        let keeper_rid = RecordId::from_table_key(Chunk::table_name(), &keeper.id);
        assert!(ChunkEmbedding::get_by_chunk_id(&keeper_rid, &db)
            .await
            .expect("keeper embedding lookup")
            .is_some());
    }

    #[tokio::test]
    async fn test_chunk_indexes_are_dense_and_ordered() {
        let db = setup_test_db().await;

        // Insert out of order; listing must come back dense by chunk_index.
        for index in [2usize, 0, 1] {
            store_chunk(&db, "art_ordered", index, Sensitivity::Normal, vec![0.1, 0.2, 0.3]).await;
        }

        let chunks = Chunk::list_for_artifact("art_ordered", &db)
            .await
            .expect("list chunks");
        let indexes: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }
}
