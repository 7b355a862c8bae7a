use crate::storage::types::artifact::{Artifact, ArtifactType, Sensitivity};
use crate::storage::types::collection_filter::{CollectionFilter, FILTER_OVERFETCH};
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

// One row per artifact in the `content` collection: the authoritative
// document text plus the metadata the retrieval filters run against.
stored_object!(ArtifactEmbedding, "artifact_embedding", {
    artifact_id: String,
    revision_id: String,
    content: String,
    sensitivity: Sensitivity,
    artifact_type: ArtifactType,
    source_system: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    timestamp: DateTime<Utc>,
    embedding: Vec<f32>
});

/// Content-collection hit with its cosine distance.
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ContentSearchResult {
    pub row: ArtifactEmbedding,
    pub distance: f32,
}

impl ArtifactEmbedding {
    pub fn new(
        artifact: &Artifact,
        revision_id: String,
        content: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            // Keyed by artifact id: one content row per artifact, upserts merge.
            id: artifact.id.clone(),
            created_at: now,
            updated_at: now,
            artifact_id: artifact.id.clone(),
            revision_id,
            content,
            sensitivity: artifact.sensitivity,
            artifact_type: artifact.artifact_type,
            source_system: artifact.source_system.clone(),
            timestamp: artifact.timestamp,
            embedding,
        }
    }

    pub async fn redefine_hnsw_index(
        db: &SurrealDbClient,
        dimension: usize,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION;
             REMOVE INDEX IF EXISTS idx_embedding_content ON TABLE {table};
             DEFINE INDEX idx_embedding_content ON TABLE {table} FIELDS embedding HNSW DIMENSION {dimension};
             COMMIT TRANSACTION;",
            table = Self::table_name(),
        );

        let res = db.client.query(query).await.map_err(AppError::Database)?;
        res.check().map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn upsert(row: Self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(format!(
                "UPSERT type::thing('{table}', $id) CONTENT $row",
                table = Self::table_name()
            ))
            .bind(("id", row.id.clone()))
            .bind(("row", row))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn get_by_artifact_id(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(artifact_id).await?)
    }

    /// Vector search over the content collection, ascending cosine distance.
    /// The metadata filter is part of the query; filtered searches widen the
    /// nearest-neighbor window before the filter prunes it, so selective
    /// filters still fill the requested `take`.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        filter: &CollectionFilter,
        db: &SurrealDbClient,
    ) -> Result<Vec<ContentSearchResult>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "deserialize_flexible_id")]
            id: String,
            #[serde(deserialize_with = "deserialize_datetime", default)]
            created_at: DateTime<Utc>,
            #[serde(deserialize_with = "deserialize_datetime", default)]
            updated_at: DateTime<Utc>,
            artifact_id: String,
            revision_id: String,
            content: String,
            sensitivity: Sensitivity,
            artifact_type: ArtifactType,
            source_system: String,
            #[serde(deserialize_with = "deserialize_datetime", default)]
            timestamp: DateTime<Utc>,
            embedding: Vec<f32>,
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
                *,
                vector::similarity::cosine(embedding, $embedding) AS similarity
            FROM {table}
            WHERE embedding <|{window},100|> $embedding{filter_clauses}
            ORDER BY similarity DESC
            LIMIT {take};
            "#,
            table = Self::table_name(),
            window = window,
            take = take,
            filter_clauses = filter.sql_clauses(),
        );

        let request = filter.bind_params(db.query(&sql).bind(("embedding", query_embedding)));
        let mut response = request
            .await
            .map_err(|e| AppError::Retrieval(format!("content vector query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|r| ContentSearchResult {
                distance: 1.0 - r.similarity,
                row: ArtifactEmbedding {
                    id: r.id,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                    artifact_id: r.artifact_id,
                    revision_id: r.revision_id,
                    content: r.content,
                    sensitivity: r.sensitivity,
                    artifact_type: r.artifact_type,
                    source_system: r.source_system,
                    timestamp: r.timestamp,
                    embedding: r.embedding,
                },
            })
            .collect())
    }

    pub async fn delete_by_artifact_id(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _row: Option<Self> = db.delete_item(artifact_id).await?;
        Ok(())
    }
}
