use crate::{
    error::AppError, storage::db::SurrealDbClient,
    storage::types::entity_embedding::EntityEmbedding, stored_object,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Project,
    Product,
    Location,
    Concept,
    Other,
}

impl EntityType {
    pub fn variants() -> &'static [&'static str] {
        &[
            "person",
            "organization",
            "project",
            "product",
            "location",
            "concept",
            "other",
        ]
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "person" => Self::Person,
            "organization" => Self::Organization,
            "project" => Self::Project,
            "product" => Self::Product,
            "location" => Self::Location,
            "concept" => Self::Concept,
            _ => Self::Other,
        }
    }
}

stored_object!(Entity, "entity", {
    entity_type: EntityType,
    canonical_name: String,
    aliases: Vec<String>,
    context_clues: Vec<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    last_seen_at: DateTime<Utc>
});

/// Candidate produced by the entities-collection vector search.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EntityCandidate {
    pub entity: Entity,
    /// Cosine distance, lower is closer.
    pub distance: f32,
}

impl Entity {
    pub fn new(
        entity_type: EntityType,
        canonical_name: String,
        context_clues: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        // Invariant: the canonical name is always one of the aliases.
        let aliases = vec![canonical_name.clone()];
        Self {
            id: format!("ent_{}", Uuid::new_v4()),
            created_at: now,
            updated_at: now,
            entity_type,
            canonical_name,
            aliases,
            context_clues,
            last_seen_at: now,
        }
    }

    /// Atomically store an entity and its embedding.
    pub async fn store_with_embedding(
        entity: Entity,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let emb = EntityEmbedding::new(&entity.id, embedding);

        let query = format!(
            "
            BEGIN TRANSACTION;
              CREATE type::thing('{entity_table}', $entity_id) CONTENT $entity;
              CREATE type::thing('{emb_table}', $emb_id) CONTENT $emb;
            COMMIT TRANSACTION;
            ",
            entity_table = Self::table_name(),
            emb_table = EntityEmbedding::table_name(),
        );

        db.client
            .query(query)
            .bind(("entity_id", entity.id.clone()))
            .bind(("entity", entity))
            .bind(("emb_id", emb.id.clone()))
            .bind(("emb", emb))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Vector search over the entities collection, ascending cosine distance.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<Vec<EntityCandidate>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            entity_id: Entity,
            similarity: f32,
        }

        let sql = format!(
            r#"
            SELECT
                entity_id,
                vector::similarity::cosine(embedding, $embedding) AS similarity
            FROM {emb_table}
            WHERE embedding <|{take},100|> $embedding
            ORDER BY similarity DESC
            LIMIT {take}
            FETCH entity_id;
            "#,
            emb_table = EntityEmbedding::table_name(),
            take = take
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .await
            .map_err(|e| AppError::EntityResolution(format!("candidate query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|r| EntityCandidate {
                entity: r.entity_id,
                distance: 1.0 - r.similarity,
            })
            .collect())
    }

    /// Merge a resolved mention into an existing entity: add the surface form
    /// as an alias, union the context clues, bump `last_seen_at`. The stored
    /// embedding is left untouched.
    pub async fn merge_mention(
        id: &str,
        surface_form: &str,
        context_clues: &[String],
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut entity = db.require_item::<Self>(id).await?;

        if !entity.aliases.iter().any(|a| a == surface_form) {
            entity.aliases.push(surface_form.to_owned());
        }
        for clue in context_clues {
            if !entity.context_clues.iter().any(|c| c == clue) {
                entity.context_clues.push(clue.clone());
            }
        }

        let now = Utc::now();
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET
                    aliases = $aliases,
                    context_clues = $context_clues,
                    last_seen_at = $now,
                    updated_at = $now",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("aliases", entity.aliases))
            .bind(("context_clues", entity.context_clues))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .await?
            .check()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    #[tokio::test]
    async fn test_new_entity_holds_canonical_name_in_aliases() {
        let entity = Entity::new(
            EntityType::Person,
            "Alice Doe".to_string(),
            vec!["PM at Acme".to_string()],
        );

        assert!(entity.id.starts_with("ent_"));
        assert!(entity.aliases.contains(&entity.canonical_name));
        assert_eq!(entity.context_clues, vec!["PM at Acme".to_string()]);
    }

    #[tokio::test]
    async fn test_vector_search_orders_candidates_by_distance() {
        let db = setup_test_db().await;

        let near = Entity::new(EntityType::Person, "Near".to_string(), vec![]);
        let far = Entity::new(EntityType::Person, "Far".to_string(), vec![]);

        Entity::store_with_embedding(near.clone(), vec![0.0, 1.0, 0.0], &db)
            .await
            .expect("store near");
        Entity::store_with_embedding(far.clone(), vec![1.0, 0.0, 0.0], &db)
            .await
            .expect("store far");

        let candidates = Entity::vector_search(2, vec![0.0, 1.0, 0.0], &db)
            .await
            .expect("vector search");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].entity.id, near.id);
        assert!(candidates[0].distance <= candidates[1].distance);
    }

    #[tokio::test]
    async fn test_merge_mention_unions_aliases_and_clues() {
        let db = setup_test_db().await;

        let entity = Entity::new(
            EntityType::Person,
            "Alice Doe".to_string(),
            vec!["PM, Acme".to_string()],
        );
        Entity::store_with_embedding(entity.clone(), vec![0.1, 0.2, 0.3], &db)
            .await
            .expect("store entity");

        Entity::merge_mention(
            &entity.id,
            "Alice Doe, product manager at Acme",
            &["product manager".to_string(), "PM, Acme".to_string()],
            &db,
        )
        .await
        .expect("merge mention");

        let merged: Entity = db
            .get_item(&entity.id)
            .await
            .expect("get entity")
            .expect("entity present");

        assert!(merged
            .aliases
            .contains(&"Alice Doe, product manager at Acme".to_string()));
        assert!(merged.aliases.contains(&"Alice Doe".to_string()));
        // Clue union must not duplicate an existing clue.
        assert_eq!(
            merged
                .context_clues
                .iter()
                .filter(|c| *c == "PM, Acme")
                .count(),
            1
        );
        assert!(merged.last_seen_at >= entity.last_seen_at);

        // The stored embedding is append-only: untouched by merges.
        let rid =
            surrealdb::RecordId::from_table_key(Entity::table_name(), &entity.id);
        let emb = EntityEmbedding::get_by_entity_id(&rid, &db)
            .await
            .expect("embedding lookup")
            .expect("embedding present");
        assert_eq!(emb.embedding, vec![0.1, 0.2, 0.3]);
    }
}
