use std::sync::Arc;

use tracing::{debug, instrument};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            entity::{Entity, EntityCandidate, EntityType},
            entity_mention::{EntityMention, ResolverDecision},
            graph_edge::GraphEdge,
        },
    },
    utils::config::AppConfig,
};

use crate::services::ExtractionServices;
use crate::types::{ConfirmVerdict, MentionDraft};

/// Candidate pool size for the embedding recall phase.
const CANDIDATE_LIMIT: usize = 10;

/// Result of resolving one mention: the entity it now refers to, the audit
/// row to persist, and an optional uncertain-identity edge.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub entity_id: String,
    pub mention: EntityMention,
    pub possibly_same: Option<GraphEdge>,
}

/// Two-phase entity resolution: embedding candidate search over the
/// entities collection, then LLM adjudication per candidate. Entities are
/// created or merged immediately; mention rows and edges are returned for
/// the caller's atomic commit.
pub struct EntityResolver {
    db: Arc<SurrealDbClient>,
    config: AppConfig,
}

impl EntityResolver {
    pub fn new(db: Arc<SurrealDbClient>, config: AppConfig) -> Self {
        Self { db, config }
    }

    #[instrument(skip_all, fields(surface_form = %mention.surface_form))]
    pub async fn resolve(
        &self,
        services: &dyn ExtractionServices,
        revision_id: &str,
        mention: &MentionDraft,
    ) -> Result<ResolutionOutcome, AppError> {
        let embed_input = if mention.context_clues.is_empty() {
            mention.surface_form.clone()
        } else {
            format!(
                "{}\nclues: {}",
                mention.surface_form,
                mention.context_clues.join("; ")
            )
        };
        let embedding = services.embed(&embed_input).await?;

        let mut candidates = Entity::vector_search(CANDIDATE_LIMIT, embedding.clone(), &self.db)
            .await?
            .into_iter()
            .filter(|c| c.distance <= self.config.recall_threshold)
            .collect::<Vec<_>>();
        // Ascending distance, earliest creation breaking exact-distance ties.
        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.created_at.cmp(&b.entity.created_at))
        });

        if candidates.is_empty() {
            debug!("no candidate passed the recall threshold, creating entity");
            return self
                .create_entity(revision_id, mention, embedding, None, services)
                .await;
        }

        let mut adjudicated: Vec<(EntityCandidate, ConfirmVerdict, f32)> = Vec::new();
        for candidate in candidates {
            let outcome = services.confirm_entity(mention, &candidate.entity).await?;
            adjudicated.push((candidate, outcome.verdict, outcome.score));
        }

        // Merge wins when any candidate confirms identity above the same
        // threshold. Adjudication order encodes the tie-break (ascending
        // distance, then earliest creation), so the first maximum must win.
        let merge_target = first_by_score(adjudicated.iter().filter(|(_, verdict, score)| {
            *verdict == ConfirmVerdict::Same && *score >= self.config.same_threshold
        }));

        if let Some((candidate, _, score)) = merge_target {
            Entity::merge_mention(
                &candidate.entity.id,
                &mention.surface_form,
                &mention.context_clues,
                &self.db,
            )
            .await?;

            return Ok(ResolutionOutcome {
                entity_id: candidate.entity.id.clone(),
                mention: self.mention_row(
                    &candidate.entity.id,
                    revision_id,
                    mention,
                    ResolverDecision::Merged,
                    *score,
                    services,
                ),
                possibly_same: None,
            });
        }

        let best = first_by_score(adjudicated.iter()).ok_or_else(|| {
            AppError::EntityResolution("no adjudicated candidates".into())
        })?;

        let in_uncertain_band = best.1 == ConfirmVerdict::Uncertain
            || (best.1 == ConfirmVerdict::Same
                && best.2 >= self.config.uncertain_threshold
                && best.2 < self.config.same_threshold);

        if in_uncertain_band {
            let twin = best.0.entity.id.clone();
            let score = best.2;
            return self
                .create_entity(
                    revision_id,
                    mention,
                    embedding,
                    Some((twin, score)),
                    services,
                )
                .await;
        }

        // Every candidate rejected the identity.
        self.create_entity(revision_id, mention, embedding, None, services)
            .await
    }

    async fn create_entity(
        &self,
        revision_id: &str,
        mention: &MentionDraft,
        embedding: Vec<f32>,
        possibly_same_target: Option<(String, f32)>,
        services: &dyn ExtractionServices,
    ) -> Result<ResolutionOutcome, AppError> {
        let entity = Entity::new(
            EntityType::from(mention.entity_type.clone()),
            mention.surface_form.clone(),
            mention.context_clues.clone(),
        );
        let entity_id = entity.id.clone();
        Entity::store_with_embedding(entity, embedding, &self.db).await?;

        let (decision, score) = match &possibly_same_target {
            Some((_, score)) => (ResolverDecision::Uncertain, *score),
            None => (ResolverDecision::Created, 1.0),
        };
        let mention_row =
            self.mention_row(&entity_id, revision_id, mention, decision, score, services);

        let possibly_same = possibly_same_target.map(|(twin_id, score)| {
            GraphEdge::possibly_same(entity_id.clone(), twin_id, score, mention_row.id.clone())
        });

        Ok(ResolutionOutcome {
            entity_id,
            mention: mention_row,
            possibly_same,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn mention_row(
        &self,
        entity_id: &str,
        revision_id: &str,
        mention: &MentionDraft,
        decision: ResolverDecision,
        score: f32,
        services: &dyn ExtractionServices,
    ) -> EntityMention {
        EntityMention::new(
            entity_id.to_owned(),
            revision_id.to_owned(),
            mention.surface_form.clone(),
            mention.offset,
            decision,
            score,
            services.entity_model().to_owned(),
        )
    }
}

/// Highest-scoring entry, keeping the FIRST maximum on equal scores so the
/// candidate sort order (lowest distance, then earliest `created_at`) decides
/// ties.
fn first_by_score<'a>(
    entries: impl Iterator<Item = &'a (EntityCandidate, ConfirmVerdict, f32)>,
) -> Option<&'a (EntityCandidate, ConfirmVerdict, f32)> {
    entries.fold(None, |best, entry| match best {
        Some(current) if current.2 >= entry.2 => Some(current),
        _ => Some(entry),
    })
}
