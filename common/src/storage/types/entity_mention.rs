use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolverDecision {
    Created,
    Merged,
    Uncertain,
}

// Immutable evidence trail for every resolver decision.
stored_object!(EntityMention, "entity_mention", {
    entity_id: String,
    revision_id: String,
    surface_form: String,
    offset_start: usize,
    decision: ResolverDecision,
    score: f32,
    model: String
});

impl EntityMention {
    pub fn new(
        entity_id: String,
        revision_id: String,
        surface_form: String,
        offset_start: usize,
        decision: ResolverDecision,
        score: f32,
        model: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            entity_id,
            revision_id,
            surface_form,
            offset_start,
            decision,
            score,
            model,
        }
    }

    pub async fn list_for_revision(
        revision_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mentions: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table) WHERE revision_id = $revision_id ORDER BY offset_start ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("revision_id", revision_id.to_owned()))
            .await?
            .take(0)?;

        Ok(mentions)
    }

    pub async fn delete_by_revision_ids(
        revision_ids: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        if revision_ids.is_empty() {
            return Ok(0);
        }

        let removed: Vec<Self> = db
            .query(
                "DELETE FROM type::table($table) WHERE revision_id IN $revision_ids RETURN BEFORE",
            )
            .bind(("table", Self::table_name()))
            .bind(("revision_ids", revision_ids))
            .await?
            .take(0)?;

        Ok(removed.len())
    }
}
