use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_embedding::ArtifactEmbedding,
            entity_mention::EntityMention,
            event::Event,
            job::{Job, JobKind, JobState},
            job_event::JobEvent,
            revision::Revision,
            StoredObject,
        },
    },
    utils::config::AppConfig,
};

use crate::extractor::extract_events;
use crate::graph_upsert::{GraphEventLinks, GraphUpsertPayload, PossiblySameLink};
use crate::resolver::EntityResolver;
use crate::services::ExtractionServices;
use crate::types::MentionRole;

/// Payload of an `extract_events` job, written by the ingestor's outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractPayload {
    pub artifact_id: String,
    pub revision_id: String,
}

/// Orchestrates one extraction job: C8 extraction, C9 resolution per
/// mention, then the single transaction that makes events visible, records
/// mentions, marks the job succeeded and enqueues the graph upsert.
pub struct ExtractionPipeline {
    db: Arc<SurrealDbClient>,
    services: Arc<dyn ExtractionServices>,
    resolver: EntityResolver,
    config: AppConfig,
}

impl ExtractionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        services: Arc<dyn ExtractionServices>,
        config: AppConfig,
    ) -> Self {
        let resolver = EntityResolver::new(db.clone(), config.clone());
        Self {
            db,
            services,
            resolver,
            config,
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn process_extract_job(&self, job: &Job) -> Result<(), AppError> {
        let payload: ExtractPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| AppError::Extraction(format!("malformed job payload: {e}")))?;

        // The outbox wrote the revision in the same transaction as the job.
        let revision = self.db.require_item::<Revision>(&payload.revision_id).await?;
        let content = ArtifactEmbedding::get_by_artifact_id(&revision.artifact_id, &self.db)
            .await?
            .map(|row| row.content)
            .ok_or_else(|| {
                AppError::Extraction(format!(
                    "content for {} not visible yet",
                    revision.artifact_id
                ))
            })?;

        // Provider errors bubble up and fail the whole job; per-event
        // validation failures were already dropped inside the gate.
        let validated = extract_events(self.services.as_ref(), &content).await?;

        let mut events: Vec<Event> = Vec::new();
        let mut mentions: Vec<EntityMention> = Vec::new();
        let mut entity_ids: Vec<String> = Vec::new();
        let mut event_links: Vec<GraphEventLinks> = Vec::new();
        let mut possibly_same: Vec<PossiblySameLink> = Vec::new();

        for candidate in validated {
            let mut actors = Vec::new();
            let mut subjects = Vec::new();
            let mut event_mentions = Vec::new();
            let mut event_edges = Vec::new();
            let mut resolution_failed = false;

            for mention in &candidate.mentions {
                match self
                    .resolver
                    .resolve(self.services.as_ref(), &revision.id, mention)
                    .await
                {
                    Ok(outcome) => {
                        match mention.role {
                            MentionRole::Actor => actors.push(outcome.entity_id.clone()),
                            MentionRole::Subject => subjects.push(outcome.entity_id.clone()),
                        }
                        entity_ids.push(outcome.entity_id);
                        if let Some(edge) = outcome.possibly_same {
                            event_edges.push(PossiblySameLink {
                                src: edge.in_,
                                dst: edge.out,
                                score: edge.score.unwrap_or_default(),
                                source_mention_id: edge
                                    .source_mention_id
                                    .clone()
                                    .unwrap_or_default(),
                            });
                        }
                        event_mentions.push(outcome.mention);
                    }
                    Err(err) => {
                        // A single unresolved mention drops its event, not
                        // the job.
                        warn!(
                            summary = %candidate.summary,
                            surface_form = %mention.surface_form,
                            error = %err,
                            "mention unresolved, dropping event"
                        );
                        resolution_failed = true;
                        break;
                    }
                }
            }
            if resolution_failed {
                continue;
            }

            actors.sort();
            actors.dedup();
            subjects.sort();
            subjects.dedup();

            let event = Event::new(
                revision.id.clone(),
                candidate.category,
                candidate.summary,
                candidate.evidence,
                actors.clone(),
                subjects.clone(),
                candidate.occurred_at,
                self.services.event_model().to_owned(),
                candidate.confidence,
            );
            event_links.push(GraphEventLinks {
                event_id: event.id.clone(),
                actors,
                subjects,
            });
            mentions.extend(event_mentions);
            possibly_same.extend(event_edges);
            events.push(event);
        }

        entity_ids.sort();
        entity_ids.dedup();

        let event_count = events.len();
        let graph_job = if event_count > 0 {
            let payload = GraphUpsertPayload {
                revision_id: revision.id.clone(),
                entities: entity_ids,
                events: event_links,
                possibly_same,
            };
            Some(Job::new(
                JobKind::GraphUpsert,
                serde_json::to_value(payload)
                    .map_err(|e| AppError::Extraction(format!("graph payload: {e}")))?,
                self.config.job_max_attempts,
            ))
        } else {
            None
        };
        let graph_job_id = graph_job.as_ref().map(|j| j.id.clone());

        self.commit(job, events, mentions, graph_job).await?;

        JobEvent::record(
            &job.id,
            Some(JobState::InFlight),
            JobState::Succeeded,
            Some(&format!("{event_count} events committed")),
            &self.db,
        )
        .await?;
        if let Some(graph_job_id) = &graph_job_id {
            JobEvent::record(graph_job_id, None, JobState::Pending, Some("enqueued"), &self.db)
                .await?;
        }

        info!(
            revision_id = %revision.id,
            events = event_count,
            graph_job = graph_job_id.as_deref().unwrap_or("none"),
            "extraction job committed"
        );

        Ok(())
    }

    /// One transaction: event rows, mention rows, the job's success, and the
    /// graph-upsert enqueue become visible together.
    async fn commit(
        &self,
        job: &Job,
        events: Vec<Event>,
        mentions: Vec<EntityMention>,
        graph_job: Option<Job>,
    ) -> Result<(), AppError> {
        let mut query = self
            .db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "FOR $event IN $events {{ CREATE type::thing('{table}', $event.id) CONTENT $event; }};",
                table = Event::table_name()
            ))
            .query(format!(
                "FOR $mention IN $mentions {{ CREATE type::thing('{table}', $mention.id) CONTENT $mention; }};",
                table = EntityMention::table_name()
            ))
            .query(format!(
                "UPDATE type::thing('{table}', $job_id) SET state = 'succeeded', lease_until = NONE, updated_at = time::now();",
                table = Job::table_name()
            ))
            .bind(("events", events))
            .bind(("mentions", mentions))
            .bind(("job_id", job.id.clone()));

        if let Some(graph_job) = graph_job {
            query = query
                .query(format!(
                    "CREATE type::thing('{table}', $graph_job_id) CONTENT $graph_job;",
                    table = Job::table_name()
                ))
                .bind(("graph_job_id", graph_job.id.clone()))
                .bind(("graph_job", graph_job));
        }

        query
            .query("COMMIT TRANSACTION;")
            .await?
            .check()?;

        Ok(())
    }
}
