use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            entity::Entity,
            event::Event,
            graph_edge::{GraphEdge, GraphEdgeKind},
            StoredObject,
        },
    },
};

/// Payload of a `graph_upsert` job, enqueued by the extraction commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphUpsertPayload {
    pub revision_id: String,
    pub entities: Vec<String>,
    pub events: Vec<GraphEventLinks>,
    #[serde(default)]
    pub possibly_same: Vec<PossiblySameLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEventLinks {
    pub event_id: String,
    pub actors: Vec<String>,
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PossiblySameLink {
    pub src: String,
    pub dst: String,
    pub score: f32,
    pub source_mention_id: String,
}

/// Idempotent graph materialization, ordered so edges always resolve:
/// entity nodes are verified first, then event nodes, then the
/// `ACTED_IN`/`ABOUT`/`POSSIBLY_SAME` edges merge. Edges whose endpoints
/// are missing are skipped with a warning; re-running the job converges.
#[instrument(skip_all, fields(revision_id = %payload.revision_id))]
pub async fn process_graph_job(
    db: &SurrealDbClient,
    payload: GraphUpsertPayload,
) -> Result<(), AppError> {
    // The possibly_same targets are stored candidates, not part of the
    // payload's resolved entity list; verify them alongside it.
    let mut entity_id_pool = payload.entities.clone();
    for link in &payload.possibly_same {
        entity_id_pool.push(link.src.clone());
        entity_id_pool.push(link.dst.clone());
    }
    let entity_ids = existing_ids::<Entity>(db, &entity_id_pool).await?;
    let event_ids = existing_ids::<Event>(
        db,
        &payload
            .events
            .iter()
            .map(|e| e.event_id.clone())
            .collect::<Vec<_>>(),
    )
    .await?;

    let mut merged = 0usize;
    for link in &payload.events {
        if !event_ids.contains(&link.event_id) {
            warn!(event_id = %link.event_id, "event node missing, skipping its edges");
            continue;
        }
        for actor in &link.actors {
            if !entity_ids.contains(actor) {
                warn!(entity_id = %actor, "actor node missing, skipping edge");
                continue;
            }
            GraphEdge::new(GraphEdgeKind::ActedIn, actor.clone(), link.event_id.clone())
                .merge(db)
                .await?;
            merged += 1;
        }
        for subject in &link.subjects {
            if !entity_ids.contains(subject) {
                warn!(entity_id = %subject, "subject node missing, skipping edge");
                continue;
            }
            GraphEdge::new(GraphEdgeKind::About, link.event_id.clone(), subject.clone())
                .merge(db)
                .await?;
            merged += 1;
        }
    }

    for link in &payload.possibly_same {
        if !entity_ids.contains(&link.src) {
            warn!(entity_id = %link.src, "possibly_same source missing, skipping edge");
            continue;
        }
        if !entity_ids.contains(&link.dst) {
            warn!(entity_id = %link.dst, "possibly_same target missing, skipping edge");
            continue;
        }
        GraphEdge::possibly_same(
            link.src.clone(),
            link.dst.clone(),
            link.score,
            link.source_mention_id.clone(),
        )
        .merge(db)
        .await?;
        merged += 1;
    }

    info!(edges = merged, "graph upsert complete");
    Ok(())
}

async fn existing_ids<T>(db: &SurrealDbClient, ids: &[String]) -> Result<HashSet<String>, AppError>
where
    T: StoredObject + Send + Sync + 'static,
{
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    #[derive(Deserialize)]
    struct Row {
        id: Thing,
    }

    let things: Vec<Thing> = ids
        .iter()
        .map(|id| Thing::from((T::table_name(), id.as_str())))
        .collect();
    let mut response = db
        .query("SELECT id FROM type::table($table) WHERE id IN $ids")
        .bind(("table", T::table_name()))
        .bind(("ids", things))
        .await?;
    let rows: Vec<Row> = response.take(0)?;

    Ok(rows.into_iter().map(|r| r.id.id.to_raw()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::entity::EntityType;
    use uuid::Uuid;

    async fn setup_test_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("graph_upsert_test", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    async fn store_entity(db: &SurrealDbClient, name: &str) -> String {
        let entity = Entity::new(EntityType::Person, name.to_string(), vec![]);
        let id = entity.id.clone();
        db.store_item(entity).await.expect("store entity");
        id
    }

    #[tokio::test]
    async fn possibly_same_edges_with_missing_endpoints_are_skipped() {
        let db = setup_test_db().await;
        let known = store_entity(&db, "Alice Doe").await;
        let twin = store_entity(&db, "A. Doe").await;

        let payload = GraphUpsertPayload {
            revision_id: "rev-1".to_string(),
            entities: vec![twin.clone()],
            events: vec![],
            possibly_same: vec![
                PossiblySameLink {
                    src: twin.clone(),
                    dst: known.clone(),
                    score: 0.8,
                    source_mention_id: "mention-1".to_string(),
                },
                PossiblySameLink {
                    src: twin.clone(),
                    dst: "ent_missing".to_string(),
                    score: 0.8,
                    source_mention_id: "mention-2".to_string(),
                },
            ],
        };

        process_graph_job(&db, payload).await.expect("graph upsert");

        // Only the edge whose endpoints both exist was merged; the payload's
        // entity list alone does not cover the stored candidate target.
        let twins =
            GraphEdge::possibly_same_neighbors(std::slice::from_ref(&twin), 0.5, &db)
                .await
                .expect("possibly_same neighbors");
        assert_eq!(twins.len(), 1);
        assert_eq!(twins[0].node_id, known);
    }
}
