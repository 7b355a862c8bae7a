use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            entity::{Entity, EntityType},
            event::{Event, EventCategory},
            graph_edge::{EdgeNeighbor, GraphEdge},
            StoredObject,
        },
    },
};

/// Optional constraints applied while expanding: event categories and entity
/// types outside the lists are skipped (their neighbors are not followed).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphFilters {
    #[serde(default)]
    pub categories: Option<Vec<EventCategory>>,
    #[serde(default)]
    pub entity_types: Option<Vec<EntityType>>,
}

impl GraphFilters {
    fn is_empty(&self) -> bool {
        self.categories.is_none() && self.entity_types.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedNode {
    pub id: String,
    pub node_type: NodeType,
    /// Distance from the nearest seed; `possibly_same` hops count as half.
    pub hops: f32,
    /// Node ids from the seed to this node, seed first.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Entity,
    Event,
}

/// Bounded breadth-first expansion from seed events. Hop 1 reaches linked
/// entities, hop 2 the other events of those entities; `possibly_same` edges
/// above the score floor add entities at half-hop distance. Truncation is in
/// BFS order once `budget` nodes have been collected.
pub async fn expand(
    db: &SurrealDbClient,
    seed_event_ids: &[String],
    max_hops: usize,
    filters: &GraphFilters,
    budget: usize,
    possibly_same_threshold: f32,
) -> Result<Vec<RelatedNode>, AppError> {
    let mut results: Vec<RelatedNode> = Vec::new();
    if budget == 0 || seed_event_ids.is_empty() {
        return Ok(results);
    }

    let mut visited: HashSet<String> = seed_event_ids.iter().cloned().collect();
    let mut paths: HashMap<String, Vec<String>> = seed_event_ids
        .iter()
        .map(|id| (id.clone(), vec![id.clone()]))
        .collect();

    let mut event_frontier: Vec<String> = seed_event_ids.to_vec();
    let mut hop = 0usize;

    while hop < max_hops && !event_frontier.is_empty() && results.len() < budget {
        // Events -> entities, one full hop.
        let neighbors = GraphEdge::entities_linked_to_events(&event_frontier, db).await?;
        let entity_hop = hop as f32 + 1.0;
        let mut entity_frontier = admit_nodes(
            neighbors,
            NodeType::Entity,
            entity_hop,
            filters,
            budget,
            db,
            &mut visited,
            &mut paths,
            &mut results,
        )
        .await?;

        // Entities -> possibly-same entities, half a hop further.
        if results.len() < budget && !entity_frontier.is_empty() {
            let twins = GraphEdge::possibly_same_neighbors(
                &entity_frontier,
                possibly_same_threshold,
                db,
            )
            .await?;
            let twin_frontier = admit_nodes(
                twins,
                NodeType::Entity,
                entity_hop + 0.5,
                filters,
                budget,
                db,
                &mut visited,
                &mut paths,
                &mut results,
            )
            .await?;
            entity_frontier.extend(twin_frontier);
        }

        hop += 1;
        if hop >= max_hops || results.len() >= budget || entity_frontier.is_empty() {
            break;
        }

        // Entities -> events, the next full hop.
        let neighbors = GraphEdge::events_linked_to_entities(&entity_frontier, db).await?;
        event_frontier = admit_nodes(
            neighbors,
            NodeType::Event,
            hop as f32 + 1.0,
            filters,
            budget,
            db,
            &mut visited,
            &mut paths,
            &mut results,
        )
        .await?;
        hop += 1;
    }

    Ok(results)
}

/// Admit unvisited neighbors into the result set in arrival order until the
/// budget is hit; returns the ids that may be expanded further.
#[allow(clippy::too_many_arguments)]
async fn admit_nodes(
    neighbors: Vec<EdgeNeighbor>,
    node_type: NodeType,
    hops: f32,
    filters: &GraphFilters,
    budget: usize,
    db: &SurrealDbClient,
    visited: &mut HashSet<String>,
    paths: &mut HashMap<String, Vec<String>>,
    results: &mut Vec<RelatedNode>,
) -> Result<Vec<String>, AppError> {
    let admitted_filter = allowed_ids(&neighbors, node_type, filters, db).await?;

    let mut frontier = Vec::new();
    for neighbor in neighbors {
        if results.len() >= budget {
            break;
        }
        if visited.contains(&neighbor.node_id) {
            continue;
        }
        if let Some(allowed) = &admitted_filter {
            if !allowed.contains(&neighbor.node_id) {
                continue;
            }
        }

        let mut path = paths.get(&neighbor.via_node_id).cloned().unwrap_or_default();
        path.push(neighbor.node_id.clone());

        visited.insert(neighbor.node_id.clone());
        paths.insert(neighbor.node_id.clone(), path.clone());
        results.push(RelatedNode {
            id: neighbor.node_id.clone(),
            node_type,
            hops,
            path,
        });
        frontier.push(neighbor.node_id);
    }

    Ok(frontier)
}

/// With filters set, resolve which neighbor ids pass; `None` means no
/// filtering applies.
async fn allowed_ids(
    neighbors: &[EdgeNeighbor],
    node_type: NodeType,
    filters: &GraphFilters,
    db: &SurrealDbClient,
) -> Result<Option<HashSet<String>>, AppError> {
    if filters.is_empty() || neighbors.is_empty() {
        return Ok(None);
    }

    match node_type {
        NodeType::Entity => {
            let Some(entity_types) = &filters.entity_types else {
                return Ok(None);
            };
            let ids: Vec<Thing> = neighbors
                .iter()
                .map(|n| Thing::from((Entity::table_name(), n.node_id.as_str())))
                .collect();
            let mut response = db
                .query("SELECT * FROM type::table($table) WHERE id IN $ids")
                .bind(("table", Entity::table_name()))
                .bind(("ids", ids))
                .await?;
            let entities: Vec<Entity> = response.take(0)?;
            Ok(Some(
                entities
                    .into_iter()
                    .filter(|e| entity_types.contains(&e.entity_type))
                    .map(|e| e.id)
                    .collect(),
            ))
        }
        NodeType::Event => {
            let Some(categories) = &filters.categories else {
                return Ok(None);
            };
            let ids: Vec<Thing> = neighbors
                .iter()
                .map(|n| Thing::from((Event::table_name(), n.node_id.as_str())))
                .collect();
            let mut response = db
                .query("SELECT * FROM type::table($table) WHERE id IN $ids")
                .bind(("table", Event::table_name()))
                .bind(("ids", ids))
                .await?;
            let events: Vec<Event> = response.take(0)?;
            Ok(Some(
                events
                    .into_iter()
                    .filter(|e| categories.contains(&e.category))
                    .map(|e| e.id)
                    .collect(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::event::EventEvidence;
    use common::storage::types::graph_edge::GraphEdgeKind;
    use uuid::Uuid;

    async fn setup_test_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    async fn seed_event(db: &SurrealDbClient, summary: &str, category: EventCategory) -> String {
        let event = Event::new(
            "rev-1".to_string(),
            category,
            summary.to_string(),
            vec![EventEvidence {
                quote: summary.to_string(),
                offset_start: 0,
                offset_end: summary.len(),
            }],
            vec![],
            vec![],
            None,
            "event-model".to_string(),
            0.9,
        );
        let id = event.id.clone();
        db.store_item(event).await.expect("store event");
        id
    }

    async fn seed_entity(db: &SurrealDbClient, name: &str, entity_type: EntityType) -> String {
        let entity = Entity::new(entity_type, name.to_string(), vec![]);
        let id = entity.id.clone();
        db.store_item(entity).await.expect("store entity");
        id
    }

    #[tokio::test]
    async fn expansion_respects_the_budget_within_two_hops() {
        let db = setup_test_db().await;

        // 10 seed events fan out to 200 entities.
        let mut seeds = Vec::new();
        for i in 0..10 {
            let event_id = seed_event(&db, &format!("seed event {i}"), EventCategory::Decision).await;
            for j in 0..20 {
                let entity_id = format!("ent_{i}_{j}");
                GraphEdge::new(GraphEdgeKind::ActedIn, entity_id, event_id.clone())
                    .merge(&db)
                    .await
                    .expect("merge edge");
            }
            seeds.push(event_id);
        }

        let nodes = expand(&db, &seeds, 2, &GraphFilters::default(), 50, 0.75)
            .await
            .expect("expand");

        assert_eq!(nodes.len(), 50);
        assert!(nodes.iter().all(|n| n.hops <= 2.0));
        assert!(nodes.iter().all(|n| n.node_type == NodeType::Entity));
        // Every path starts at a seed and walks to the node itself.
        for node in &nodes {
            assert!(seeds.contains(&node.path[0]));
            assert_eq!(node.path.last(), Some(&node.id));
            assert_eq!(node.path.len(), 2);
        }
    }

    #[tokio::test]
    async fn expansion_reaches_sibling_events_at_hop_two() {
        let db = setup_test_db().await;

        let seed = seed_event(&db, "seed", EventCategory::Decision).await;
        let sibling = seed_event(&db, "sibling", EventCategory::Plan).await;
        let entity = seed_entity(&db, "Alice", EntityType::Person).await;

        GraphEdge::new(GraphEdgeKind::ActedIn, entity.clone(), seed.clone())
            .merge(&db)
            .await
            .expect("merge seed edge");
        GraphEdge::new(GraphEdgeKind::ActedIn, entity.clone(), sibling.clone())
            .merge(&db)
            .await
            .expect("merge sibling edge");

        let nodes = expand(
            &db,
            std::slice::from_ref(&seed),
            2,
            &GraphFilters::default(),
            50,
            0.75,
        )
        .await
        .expect("expand");

        let entity_node = nodes
            .iter()
            .find(|n| n.id == entity)
            .expect("entity at hop 1");
        assert!((entity_node.hops - 1.0).abs() < f32::EPSILON);

        let sibling_node = nodes
            .iter()
            .find(|n| n.id == sibling)
            .expect("sibling event at hop 2");
        assert!((sibling_node.hops - 2.0).abs() < f32::EPSILON);
        assert_eq!(sibling_node.path, vec![seed, entity, sibling.clone()]);
    }

    #[tokio::test]
    async fn possibly_same_hops_are_half_and_score_gated() {
        let db = setup_test_db().await;

        let seed = seed_event(&db, "seed", EventCategory::Decision).await;
        let entity = seed_entity(&db, "Alice Doe", EntityType::Person).await;
        let strong_twin = seed_entity(&db, "A. Doe", EntityType::Person).await;
        let weak_twin = seed_entity(&db, "Al Doe", EntityType::Person).await;

        GraphEdge::new(GraphEdgeKind::ActedIn, entity.clone(), seed.clone())
            .merge(&db)
            .await
            .expect("merge edge");
        GraphEdge::possibly_same(entity.clone(), strong_twin.clone(), 0.8, "m-1".into())
            .merge(&db)
            .await
            .expect("merge strong twin");
        GraphEdge::possibly_same(entity.clone(), weak_twin.clone(), 0.4, "m-2".into())
            .merge(&db)
            .await
            .expect("merge weak twin");

        let nodes = expand(
            &db,
            std::slice::from_ref(&seed),
            2,
            &GraphFilters::default(),
            50,
            0.75,
        )
        .await
        .expect("expand");

        let twin_node = nodes
            .iter()
            .find(|n| n.id == strong_twin)
            .expect("strong twin present");
        assert!((twin_node.hops - 1.5).abs() < f32::EPSILON);
        assert!(nodes.iter().all(|n| n.id != weak_twin));
    }

    #[tokio::test]
    async fn entity_type_filter_prunes_the_frontier() {
        let db = setup_test_db().await;

        let seed = seed_event(&db, "seed", EventCategory::Decision).await;
        let person = seed_entity(&db, "Alice", EntityType::Person).await;
        let product = seed_entity(&db, "Widget", EntityType::Product).await;

        GraphEdge::new(GraphEdgeKind::ActedIn, person.clone(), seed.clone())
            .merge(&db)
            .await
            .expect("merge person edge");
        GraphEdge::new(GraphEdgeKind::About, seed.clone(), product.clone())
            .merge(&db)
            .await
            .expect("merge product edge");

        let filters = GraphFilters {
            categories: None,
            entity_types: Some(vec![EntityType::Person]),
        };
        let nodes = expand(&db, std::slice::from_ref(&seed), 2, &filters, 50, 0.75)
            .await
            .expect("expand");

        assert!(nodes.iter().any(|n| n.id == person));
        assert!(nodes.iter().all(|n| n.id != product));
    }
}
