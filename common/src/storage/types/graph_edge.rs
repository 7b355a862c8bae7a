use crate::storage::types::artifact::deserialize_flexible_id;
use crate::storage::types::{entity::Entity, event::Event};
use crate::{error::AppError, storage::db::SurrealDbClient};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use surrealdb::sql::Thing;

/// Closed set of edge types in the `nur` graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GraphEdgeKind {
    /// Entity -> Event
    ActedIn,
    /// Event -> Entity
    About,
    /// Entity -> Entity, uncertain identity
    PossiblySame,
}

impl GraphEdgeKind {
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::ActedIn => "acted_in",
            Self::About => "about",
            Self::PossiblySame => "possibly_same",
        }
    }

    const fn src_table(self) -> &'static str {
        match self {
            Self::ActedIn | Self::PossiblySame => Entity::table_name_const(),
            Self::About => Event::table_name_const(),
        }
    }

    const fn dst_table(self) -> &'static str {
        match self {
            Self::ActedIn => Event::table_name_const(),
            Self::About | Self::PossiblySame => Entity::table_name_const(),
        }
    }
}

// The stored_object! macro exposes table names through a trait method; edges
// need them in const position, so the node types expose a const variant here.
impl Entity {
    pub(crate) const fn table_name_const() -> &'static str {
        "entity"
    }
}

impl Event {
    pub(crate) const fn table_name_const() -> &'static str {
        "event"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GraphEdge {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub kind: GraphEdgeKind,
    #[serde(rename = "in", deserialize_with = "deserialize_flexible_id")]
    pub in_: String,
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub out: String,
    #[serde(default)]
    pub score: Option<f32>,
    #[serde(default)]
    pub source_mention_id: Option<String>,
}

/// Neighbor hit returned by the hop queries used during graph expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeNeighbor {
    pub node_id: String,
    pub via_node_id: String,
    pub score: Option<f32>,
}

impl GraphEdge {
    pub fn new(kind: GraphEdgeKind, src: String, dst: String) -> Self {
        Self {
            id: Self::edge_id(kind, &src, &dst),
            kind,
            in_: src,
            out: dst,
            score: None,
            source_mention_id: None,
        }
    }

    pub fn possibly_same(src: String, dst: String, score: f32, source_mention_id: String) -> Self {
        Self {
            id: Self::edge_id(GraphEdgeKind::PossiblySame, &src, &dst),
            kind: GraphEdgeKind::PossiblySame,
            in_: src,
            out: dst,
            score: Some(score),
            source_mention_id: Some(source_mention_id),
        }
    }

    /// Edge identity is the endpoint pair plus type; re-merging the same edge
    /// lands on the same record id.
    pub fn edge_id(kind: GraphEdgeKind, src: &str, dst: &str) -> String {
        let digest = Sha256::digest(format!("{}|{src}|{dst}", kind.table_name()).as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("edge_{hex}")
    }

    /// Merge-style write: drop any previous edge with the same identity, then
    /// relate the endpoints again.
    pub async fn merge(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let kind = self.kind;
        let query = format!(
            r#"BEGIN TRANSACTION;
            LET $src = type::thing('{src_table}', $src_id);
            LET $dst = type::thing('{dst_table}', $dst_id);
            LET $edge = type::thing('{edge_table}', $edge_id);
            DELETE type::thing('{edge_table}', $edge_id);
            RELATE $src->$edge->$dst SET
                kind = $kind,
                score = $score,
                source_mention_id = $source_mention_id;
            COMMIT TRANSACTION;"#,
            src_table = kind.src_table(),
            dst_table = kind.dst_table(),
            edge_table = kind.table_name(),
        );

        db.client
            .query(query)
            .bind(("edge_id", self.id.clone()))
            .bind(("src_id", self.in_.clone()))
            .bind(("dst_id", self.out.clone()))
            .bind(("kind", self.kind))
            .bind(("score", self.score))
            .bind(("source_mention_id", self.source_mention_id.clone()))
            .await?
            .check()?;

        Ok(())
    }

    /// Entities one hop from the given events, via `acted_in` or `about` in
    /// either direction. `via_node_id` is the event the hop came from.
    pub async fn entities_linked_to_events(
        event_ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<Vec<EdgeNeighbor>, AppError> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }
        let event_things = things(Event::table_name_const(), event_ids);

        let mut response = db
            .query("SELECT * FROM acted_in WHERE out IN $events")
            .query("SELECT * FROM about WHERE in IN $events")
            .bind(("events", event_things))
            .await?;
        let acted: Vec<GraphEdge> = response.take(0)?;
        let about: Vec<GraphEdge> = response.take(1)?;

        let mut neighbors: Vec<EdgeNeighbor> = acted
            .into_iter()
            .map(|e| EdgeNeighbor {
                node_id: e.in_,
                via_node_id: e.out,
                score: None,
            })
            .collect();
        neighbors.extend(about.into_iter().map(|e| EdgeNeighbor {
            node_id: e.out,
            via_node_id: e.in_,
            score: None,
        }));

        Ok(neighbors)
    }

    /// Events one hop from the given entities, via `acted_in` or `about` in
    /// either direction. `via_node_id` is the entity the hop came from.
    pub async fn events_linked_to_entities(
        entity_ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<Vec<EdgeNeighbor>, AppError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let entity_things = things(Entity::table_name_const(), entity_ids);

        let mut response = db
            .query("SELECT * FROM acted_in WHERE in IN $entities")
            .query("SELECT * FROM about WHERE out IN $entities")
            .bind(("entities", entity_things))
            .await?;
        let acted: Vec<GraphEdge> = response.take(0)?;
        let about: Vec<GraphEdge> = response.take(1)?;

        let mut neighbors: Vec<EdgeNeighbor> = acted
            .into_iter()
            .map(|e| EdgeNeighbor {
                node_id: e.out,
                via_node_id: e.in_,
                score: None,
            })
            .collect();
        neighbors.extend(about.into_iter().map(|e| EdgeNeighbor {
            node_id: e.in_,
            via_node_id: e.out,
            score: None,
        }));

        Ok(neighbors)
    }

    /// `possibly_same` neighbors of the given entities at or above the score
    /// floor. One directed edge is stored; reads treat it as symmetric.
    pub async fn possibly_same_neighbors(
        entity_ids: &[String],
        min_score: f32,
        db: &SurrealDbClient,
    ) -> Result<Vec<EdgeNeighbor>, AppError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let entity_things = things(Entity::table_name_const(), entity_ids);

        let mut response = db
            .query(
                "SELECT * FROM possibly_same WHERE (in IN $entities OR out IN $entities) AND score >= $min_score",
            )
            .bind(("entities", entity_things))
            .bind(("min_score", min_score))
            .await?;
        let edges: Vec<GraphEdge> = response.take(0)?;

        let seeds: std::collections::HashSet<&String> = entity_ids.iter().collect();
        let neighbors = edges
            .into_iter()
            .map(|e| {
                if seeds.contains(&e.in_) {
                    EdgeNeighbor {
                        node_id: e.out,
                        via_node_id: e.in_,
                        score: e.score,
                    }
                } else {
                    EdgeNeighbor {
                        node_id: e.in_,
                        via_node_id: e.out,
                        score: e.score,
                    }
                }
            })
            .collect();

        Ok(neighbors)
    }

    /// Drop `acted_in`/`about` edges touching the given events. Used by the
    /// forget cascade; `possibly_same` edges outlive artifacts because the
    /// entities do.
    pub async fn delete_for_events(
        event_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if event_ids.is_empty() {
            return Ok(());
        }
        let event_things = things(Event::table_name_const(), &event_ids);

        db.client
            .query("DELETE FROM acted_in WHERE out IN $events")
            .query("DELETE FROM about WHERE in IN $events")
            .bind(("events", event_things))
            .await?
            .check()?;

        Ok(())
    }
}

fn things(table: &str, ids: &[String]) -> Vec<Thing> {
    ids.iter()
        .map(|id| Thing::from((table, id.as_str())))
        .collect()
}
