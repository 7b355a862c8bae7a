#![allow(clippy::missing_docs_in_private_items)]

pub mod fusion;
pub mod graph;
pub mod privacy;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact::Artifact, artifact_embedding::ArtifactEmbedding, chunk::Chunk,
            entity::Entity, event::Event, revision::Revision,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
pub use common::storage::types::collection_filter::CollectionFilter;
use fusion::{dedupe_keep_best_rank, rrf_fuse, RankedList};
pub use graph::{GraphFilters, NodeType, RelatedNode};

/// Expansion depth used by `recall`; hop 1 reaches entities, hop 2 sibling
/// events.
const EXPANSION_MAX_HOPS: usize = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct RecallRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub include_events: bool,
    #[serde(default)]
    pub include_entities: bool,
    #[serde(default)]
    pub graph_expand: bool,
    #[serde(default)]
    pub graph_seed_limit: Option<usize>,
    #[serde(default)]
    pub graph_budget: Option<usize>,
    #[serde(default)]
    pub graph_filters: Option<GraphFilters>,
    #[serde(default)]
    pub filters: Option<CollectionFilter>,
}

fn default_k() -> usize {
    10
}

impl Default for RecallRequest {
    fn default() -> Self {
        Self {
            query: None,
            id: None,
            k: default_k(),
            context: None,
            include_events: false,
            include_entities: false,
            graph_expand: false,
            graph_seed_limit: None,
            graph_budget: None,
            graph_filters: None,
            filters: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecallResult {
    pub id: String,
    pub content: String,
    pub score: f32,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_context: Option<Vec<RelatedNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Event>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecallResponse {
    pub results: Vec<RecallResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Read path: one query embedding, parallel collection queries, RRF fusion
/// with chunk-to-parent rank inheritance, optional bounded graph expansion.
pub struct RetrievalService {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl RetrievalService {
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
    pub async fn recall(&self, request: RecallRequest) -> Result<RecallResponse, AppError> {
        if let Some(id) = request.id.clone() {
            return self.recall_by_id(&id, &request).await;
        }

        let Some(query) = request.query.clone() else {
            return Err(AppError::Validation(
                "recall requires either a query or an id".into(),
            ));
        };

        let embed_input = match &request.context {
            Some(context) => format!("{query}\ncontext: {context}"),
            None => query,
        };
        // The query is embedded exactly once and shared by both collections.
        let query_embedding = self.embedder.embed(&embed_input).await?;

        let k = request.k.max(1);
        let k_prime = k.max(20);
        // Equality filters are part of each collection query, so the k'
        // candidate windows only ever hold matching rows.
        let filter = request.filters.clone().unwrap_or_default();

        let content_hits =
            ArtifactEmbedding::vector_search(k_prime, query_embedding.clone(), &filter, &self.db)
                .await?;
        let chunk_hits = Chunk::vector_search(k_prime, query_embedding, &filter, &self.db).await?;

        let content_ids: Vec<String> = content_hits
            .iter()
            .map(|hit| hit.row.artifact_id.clone())
            .collect();
        // Chunks fuse as their parent artifact; the best chunk rank wins.
        let chunk_parent_ids = dedupe_keep_best_rank(
            chunk_hits
                .iter()
                .map(|hit| hit.chunk.artifact_id.clone())
                .collect(),
        );

        let fused = rrf_fuse(
            &[
                RankedList {
                    collection: "content",
                    ids: content_ids,
                },
                RankedList {
                    collection: "chunks",
                    ids: chunk_parent_ids,
                },
            ],
            self.config.rrf_constant,
        );

        let mut content_by_artifact: HashMap<String, String> = content_hits
            .into_iter()
            .map(|hit| (hit.row.artifact_id.clone(), hit.row.content))
            .collect();

        let mut results = Vec::new();
        let mut ranked = Vec::new();
        for (artifact_id, score) in fused {
            if results.len() >= k {
                break;
            }
            let Some(artifact) = self.db.get_item::<Artifact>(&artifact_id).await? else {
                // The vector store can momentarily lead the relational store;
                // treat the row as recently ingested rather than an error.
                continue;
            };

            let content = match content_by_artifact.remove(&artifact_id) {
                Some(content) => content,
                None => ArtifactEmbedding::get_by_artifact_id(&artifact_id, &self.db)
                    .await?
                    .map(|row| row.content)
                    .unwrap_or_default(),
            };

            ranked.push((artifact.timestamp, artifact.clone()));
            results.push(RecallResult {
                id: artifact_id,
                content,
                score,
                metadata: artifact_metadata(&artifact)?,
                related_context: None,
                events: None,
                entities: None,
            });
        }

        sort_results(&mut results, &ranked);

        let mut warnings = Vec::new();
        if request.graph_expand {
            warnings = self.attach_related_context(&mut results, &request).await;
        }
        if request.include_events || request.include_entities {
            self.attach_events_and_entities(&mut results, &request)
                .await?;
        }

        Ok(RecallResponse {
            results: privacy::filter_results(results),
            warnings,
        })
    }

    async fn recall_by_id(
        &self,
        artifact_id: &str,
        request: &RecallRequest,
    ) -> Result<RecallResponse, AppError> {
        let artifact = self.db.require_item::<Artifact>(artifact_id).await?;
        let content = ArtifactEmbedding::get_by_artifact_id(artifact_id, &self.db)
            .await?
            .map(|row| row.content)
            .unwrap_or_default();

        let mut results = vec![RecallResult {
            id: artifact_id.to_owned(),
            content,
            score: 1.0,
            metadata: artifact_metadata(&artifact)?,
            related_context: None,
            events: None,
            entities: None,
        }];

        let mut warnings = Vec::new();
        if request.graph_expand {
            warnings = self.attach_related_context(&mut results, request).await;
        }
        if request.include_events || request.include_entities {
            self.attach_events_and_entities(&mut results, request)
                .await?;
        }

        Ok(RecallResponse {
            results: privacy::filter_results(results),
            warnings,
        })
    }

    /// Expand the graph around the top results that have events. Expansion
    /// failures degrade to a warning; the results themselves still return.
    async fn attach_related_context(
        &self,
        results: &mut [RecallResult],
        request: &RecallRequest,
    ) -> Vec<String> {
        let seed_limit = request
            .graph_seed_limit
            .unwrap_or(self.config.graph_seed_limit);
        let budget = request.graph_budget.unwrap_or(self.config.graph_budget);
        let filters = request.graph_filters.clone().unwrap_or_default();

        let mut warnings = Vec::new();
        let mut seeded = 0usize;

        for result in results.iter_mut() {
            if seeded >= seed_limit {
                break;
            }
            let events = match self.events_for_artifact(&result.id).await {
                Ok(events) => events,
                Err(err) => {
                    warn!(artifact_id = %result.id, error = %err, "event lookup for expansion failed");
                    warnings.push(format!("graph expansion skipped for {}: {err}", result.id));
                    continue;
                }
            };
            if events.is_empty() {
                continue;
            }
            seeded += 1;

            let seed_ids: Vec<String> = events.into_iter().map(|e| e.id).collect();
            match graph::expand(
                &self.db,
                &seed_ids,
                EXPANSION_MAX_HOPS,
                &filters,
                budget,
                self.config.possibly_same_threshold,
            )
            .await
            {
                Ok(nodes) => result.related_context = Some(nodes),
                Err(err) => {
                    warn!(artifact_id = %result.id, error = %err, "graph expansion failed");
                    warnings.push(format!("graph expansion failed for {}: {err}", result.id));
                }
            }
        }

        warnings
    }

    async fn attach_events_and_entities(
        &self,
        results: &mut [RecallResult],
        request: &RecallRequest,
    ) -> Result<(), AppError> {
        for result in results.iter_mut() {
            let events = self.events_for_artifact(&result.id).await?;
            if events.is_empty() {
                continue;
            }

            if request.include_entities {
                let mut entity_ids: Vec<String> = events
                    .iter()
                    .flat_map(|e| e.actors.iter().chain(e.subjects.iter()).cloned())
                    .collect();
                entity_ids.sort();
                entity_ids.dedup();

                let mut entities = Vec::with_capacity(entity_ids.len());
                for entity_id in entity_ids {
                    if let Some(entity) = self.db.get_item::<Entity>(&entity_id).await? {
                        entities.push(entity);
                    }
                }
                result.entities = Some(entities);
            }
            if request.include_events {
                result.events = Some(events);
            }
        }

        Ok(())
    }

    async fn events_for_artifact(&self, artifact_id: &str) -> Result<Vec<Event>, AppError> {
        let revisions = Revision::list_for_artifact(artifact_id, &self.db).await?;
        let revision_ids: Vec<String> = revisions.into_iter().map(|r| r.id).collect();
        Event::list_for_revisions(revision_ids, &self.db).await
    }
}

fn artifact_metadata(artifact: &Artifact) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(artifact)
        .map_err(|e| AppError::Retrieval(format!("metadata serialization failed: {e}")))
}

/// Final ordering: RRF score descending, recency breaking ties, id as the
/// last resort.
fn sort_results(results: &mut [RecallResult], ranked: &[(DateTime<Utc>, Artifact)]) {
    let timestamps: HashMap<&str, DateTime<Utc>> = ranked
        .iter()
        .map(|(ts, artifact)| (artifact.id.as_str(), *ts))
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                let ta = timestamps.get(a.id.as_str());
                let tb = timestamps.get(b.id.as_str());
                tb.cmp(&ta)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::artifact::Sensitivity;
    use common::storage::types::event::{EventCategory, EventEvidence};
    use common::storage::types::graph_edge::{GraphEdge, GraphEdgeKind};
    use ingestion_pipeline::{forget::forget_artifact, ArtifactIngestor, IngestInput};
    use uuid::Uuid;

    const DIMENSIONS: usize = 64;

    async fn setup() -> (RetrievalService, ArtifactIngestor, Arc<SurrealDbClient>) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized(DIMENSIONS)
            .await
            .expect("Failed to initialize schema");
        let config = AppConfig {
            embedding_dimensions: DIMENSIONS,
            ..AppConfig::default()
        };
        let embedder = Arc::new(EmbeddingProvider::new_hashed(DIMENSIONS));
        (
            RetrievalService::new(db.clone(), embedder.clone(), config.clone()),
            ArtifactIngestor::new(db.clone(), embedder, config),
            db,
        )
    }

    fn note(content: &str) -> IngestInput {
        serde_json::from_value(serde_json::json!({ "content": content }))
            .expect("ingest input from json")
    }

    fn query(text: &str) -> RecallRequest {
        RecallRequest {
            query: Some(text.to_string()),
            ..RecallRequest::default()
        }
    }

    #[tokio::test]
    async fn recall_finds_the_matching_artifact() {
        let (retrieval, ingestor, _db) = setup().await;

        let target = ingestor
            .ingest(note("The quarterly roadmap covers tokio rust and async pipelines."))
            .await
            .expect("ingest target");
        ingestor
            .ingest(note("Grocery list: apples bananas oranges."))
            .await
            .expect("ingest distractor");

        let response = retrieval
            .recall(query("tokio rust roadmap"))
            .await
            .expect("recall");

        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].id, target.artifact_id);
        assert!(response.results[0].content.contains("tokio"));
        assert!(response.warnings.is_empty());

        // Chunks fused into their parent: no duplicate ids in the output.
        let mut ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), response.results.len());
    }

    #[tokio::test]
    async fn recall_by_id_returns_the_artifact_content() {
        let (retrieval, ingestor, _db) = setup().await;

        let receipt = ingestor
            .ingest(note("A note retrieved by its id."))
            .await
            .expect("ingest");

        let response = retrieval
            .recall(RecallRequest {
                id: Some(receipt.artifact_id.clone()),
                ..RecallRequest::default()
            })
            .await
            .expect("recall by id");

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, receipt.artifact_id);
        assert!((response.results[0].score - 1.0).abs() < f32::EPSILON);
        assert_eq!(
            response.results[0].content,
            "A note retrieved by its id."
        );
    }

    #[tokio::test]
    async fn recall_requires_query_or_id() {
        let (retrieval, _ingestor, _db) = setup().await;

        let result = retrieval.recall(RecallRequest::default()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn equality_filters_prune_results() {
        let (retrieval, ingestor, _db) = setup().await;

        ingestor
            .ingest(note("Budget planning for the tokio migration."))
            .await
            .expect("ingest");

        let mut request = query("tokio migration budget");
        request.filters = Some(CollectionFilter {
            sensitivity: Some(Sensitivity::HighlySensitive),
            ..CollectionFilter::default()
        });

        let response = retrieval.recall(request).await.expect("recall");
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn filters_reach_matches_ranked_below_the_unfiltered_window() {
        let (retrieval, ingestor, _db) = setup().await;

        // 25 non-matching artifacts sit closer to the query than the two
        // matching ones, so an unfiltered top-20 window would never surface
        // a match even though matches exist.
        for i in 0..25 {
            ingestor
                .ingest(note(&format!("tokio roadmap n{i}")))
                .await
                .expect("ingest distractor");
        }

        let mut sensitive_ids = Vec::new();
        for name in ["alpha", "beta"] {
            let input: IngestInput = serde_json::from_value(serde_json::json!({
                "content": format!("tokio secret plan {name} launch details"),
                "sensitivity": "sensitive",
            }))
            .expect("ingest input");
            let receipt = ingestor.ingest(input).await.expect("ingest sensitive");
            sensitive_ids.push(receipt.artifact_id);
        }

        let mut request = query("tokio roadmap");
        request.filters = Some(CollectionFilter {
            sensitivity: Some(Sensitivity::Sensitive),
            ..CollectionFilter::default()
        });

        let response = retrieval.recall(request).await.expect("recall");
        let result_ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        for sensitive_id in &sensitive_ids {
            assert!(
                result_ids.contains(&sensitive_id.as_str()),
                "filtered recall must surface {sensitive_id} even though 25 non-matching artifacts rank above it"
            );
        }
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn forgotten_artifacts_disappear_from_recall() {
        let (retrieval, ingestor, db) = setup().await;

        let receipt = ingestor
            .ingest(note("Ephemeral secret roadmap detail about zebras."))
            .await
            .expect("ingest");

        let before = retrieval
            .recall(query("zebras roadmap"))
            .await
            .expect("recall before forget");
        assert!(before.results.iter().any(|r| r.id == receipt.artifact_id));

        let outcome = forget_artifact(&receipt.artifact_id, &db)
            .await
            .expect("forget");
        assert!(outcome.deleted);

        let after = retrieval
            .recall(query("zebras roadmap"))
            .await
            .expect("recall after forget");
        assert!(after.results.iter().all(|r| r.id != receipt.artifact_id));
    }

    #[tokio::test]
    async fn graph_expansion_attaches_related_context() {
        let (retrieval, ingestor, db) = setup().await;

        let receipt = ingestor
            .ingest(note("Alice decided to ship v2 of the widget."))
            .await
            .expect("ingest");
        let revision = Revision::list_for_artifact(&receipt.artifact_id, &db)
            .await
            .expect("revisions")
            .pop()
            .expect("revision present");

        // Simulate a completed extraction: one event acted in by one entity.
        let entity = Entity::new(
            common::storage::types::entity::EntityType::Person,
            "Alice".to_string(),
            vec![],
        );
        let entity_id = entity.id.clone();
        db.store_item(entity).await.expect("store entity");

        let event = Event::new(
            revision.id.clone(),
            EventCategory::Decision,
            "Alice decided to ship v2.".to_string(),
            vec![EventEvidence {
                quote: "Alice decided to ship v2".to_string(),
                offset_start: 0,
                offset_end: 24,
            }],
            vec![entity_id.clone()],
            vec![],
            None,
            "event-model".to_string(),
            0.9,
        );
        let event_id = event.id.clone();
        db.store_item(event).await.expect("store event");
        GraphEdge::new(GraphEdgeKind::ActedIn, entity_id.clone(), event_id)
            .merge(&db)
            .await
            .expect("merge edge");

        let mut request = query("ship v2 widget");
        request.graph_expand = true;
        request.include_events = true;
        request.include_entities = true;

        let response = retrieval.recall(request).await.expect("recall");
        let result = response
            .results
            .iter()
            .find(|r| r.id == receipt.artifact_id)
            .expect("target result");

        let related = result.related_context.as_ref().expect("related context");
        assert!(related.iter().any(|n| n.id == entity_id));

        let events = result.events.as_ref().expect("events attached");
        assert_eq!(events.len(), 1);
        let entities = result.entities.as_ref().expect("entities attached");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, entity_id);
    }
}
