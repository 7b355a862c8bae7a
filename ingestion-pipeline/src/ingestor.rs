use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact::{Artifact, ArtifactType, Sensitivity, VisibilityScope},
            artifact_embedding::ArtifactEmbedding,
            chunk::Chunk,
            job::{Job, JobKind, JobState},
            job_event::JobEvent,
            revision::Revision,
            StoredObject,
        },
    },
    utils::{
        chunking::{chunk_text, count_tokens},
        config::AppConfig,
        embedding::EmbeddingProvider,
    },
};

/// Caller-supplied artifact payload for `remember`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestInput {
    pub content: String,
    #[serde(default)]
    pub artifact_type: ArtifactType,
    #[serde(default = "default_source_system")]
    pub source_system: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub visibility_scope: VisibilityScope,
    #[serde(default = "default_retention_policy")]
    pub retention_policy: String,
}

fn default_source_system() -> String {
    "api".to_string()
}

fn default_retention_policy() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReceipt {
    pub artifact_id: String,
    pub deduped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Write path: content addressing, dedup, chunking, embedding, vector
/// upserts, and the relational transaction that enqueues extraction via the
/// outbox pattern.
pub struct ArtifactIngestor {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl ArtifactIngestor {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            config,
        }
    }

    #[instrument(skip_all)]
    pub async fn ingest(&self, input: IngestInput) -> Result<IngestReceipt, AppError> {
        let canonical = Artifact::canonicalize_content(&input.content);
        if canonical.trim().is_empty() {
            return Err(AppError::Validation("content must not be empty".into()));
        }

        let artifact_id = Artifact::content_address(&canonical);
        let content_hash = Artifact::content_hash(&canonical);

        if let Some(existing) = self.db.get_item::<Artifact>(&artifact_id).await? {
            if existing.content_hash == content_hash {
                info!(%artifact_id, "identical content already ingested, deduped");
                return Ok(IngestReceipt {
                    artifact_id,
                    deduped: true,
                    job_id: None,
                });
            }
            return Err(AppError::InternalError(format!(
                "content address collision on {artifact_id}"
            )));
        }

        let now = Utc::now();
        let timestamp = input.timestamp.unwrap_or(now);
        let revision = Revision::new(artifact_id.clone());

        let chunks = chunk_text(
            &canonical,
            self.config.max_chunk_tokens,
            self.config.chunk_overlap_tokens,
        )?;
        let num_chunks = chunks.len();

        // Embed the whole content once for the content collection, and every
        // chunk for the chunks collection.
        let content_embedding = self.embedder.embed(&canonical).await?;
        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let chunk_embeddings = self.embedder.embed_batch(&chunk_texts).await?;

        let artifact = Artifact {
            id: artifact_id.clone(),
            created_at: now,
            updated_at: now,
            artifact_type: input.artifact_type,
            source_system: input.source_system,
            source_id: input.source_id,
            source_url: input.source_url,
            timestamp,
            title: input.title,
            author: input.author,
            participants: input.participants,
            content_hash,
            token_count: count_tokens(&canonical),
            is_chunked: num_chunks > 1,
            num_chunks,
            sensitivity: input.sensitivity,
            visibility_scope: input.visibility_scope,
            retention_policy: input.retention_policy,
            embedding_provider: self.embedder.backend_label().to_string(),
            embedding_model: self.embedder.model_label().to_string(),
            embedding_dimensions: self.embedder.dimension(),
            ingested_at: now,
        };

        // Vector side first; the relational transaction below is the
        // authoritative commit, so a failure here leaves no half-written
        // artifact behind. Both collections carry the artifact's filterable
        // metadata.
        for (span, embedding) in chunks.into_iter().zip(chunk_embeddings) {
            let chunk_hash = Artifact::content_hash(&span.content);
            let chunk = Chunk::new(
                artifact_id.clone(),
                span.index,
                span.content,
                span.start_char,
                span.end_char,
                span.token_count,
                chunk_hash,
            );
            Chunk::upsert_with_embedding(chunk, &artifact, &revision.id, embedding, &self.db)
                .await?;
        }
        ArtifactEmbedding::upsert(
            ArtifactEmbedding::new(
                &artifact,
                revision.id.clone(),
                canonical.clone(),
                content_embedding,
            ),
            &self.db,
        )
        .await?;

        let job = Job::new(
            JobKind::ExtractEvents,
            serde_json::json!({
                "artifact_id": artifact_id,
                "revision_id": revision.id,
            }),
            self.config.job_max_attempts,
        );
        let job_id = job.id.clone();

        // Outbox: the artifact, its revision and the extraction job commit in
        // one transaction, so a claimed job always has its revision.
        self.db
            .client
            .query(
                "BEGIN TRANSACTION;
                 UPSERT type::thing($artifact_table, $artifact_id) CONTENT $artifact;
                 CREATE type::thing($revision_table, $revision_id) CONTENT $revision;
                 CREATE type::thing($job_table, $job_id) CONTENT $job;
                 COMMIT TRANSACTION;",
            )
            .bind(("artifact_table", Artifact::table_name()))
            .bind(("artifact_id", artifact.id.clone()))
            .bind(("artifact", artifact))
            .bind(("revision_table", Revision::table_name()))
            .bind(("revision_id", revision.id.clone()))
            .bind(("revision", revision))
            .bind(("job_table", Job::table_name()))
            .bind(("job_id", job_id.clone()))
            .bind(("job", job))
            .await?
            .check()?;
        JobEvent::record(&job_id, None, JobState::Pending, Some("enqueued"), &self.db).await?;

        info!(%artifact_id, %job_id, num_chunks, "artifact ingested");

        Ok(IngestReceipt {
            artifact_id,
            deduped: false,
            job_id: Some(job_id),
        })
    }
}
