use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Revision, "revision", {
    artifact_id: String
});

impl Revision {
    pub fn new(artifact_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            artifact_id,
        }
    }

    pub async fn list_for_artifact(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let revisions: Vec<Self> = db
            .query(
                "SELECT * FROM type::table($table) WHERE artifact_id = $artifact_id ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?
            .take(0)?;

        Ok(revisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revisions_are_listed_in_creation_order() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let artifact_id = "art_0123456789ab".to_string();
        let mut first = Revision::new(artifact_id.clone());
        let mut second = Revision::new(artifact_id.clone());
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        second.created_at = chrono::Utc::now();

        db.store_item(second.clone()).await.expect("store second");
        db.store_item(first.clone()).await.expect("store first");
        db.store_item(Revision::new("art_other0000000".to_string()))
            .await
            .expect("store unrelated");

        let listed = Revision::list_for_artifact(&artifact_id, &db)
            .await
            .expect("list revisions");

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }
}
