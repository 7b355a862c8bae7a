use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

/// Client for the SurrealDB instance backing all three storage concerns:
/// relational tables, vector collections (embedding tables with HNSW
/// indexes) and the property graph (edge tables).
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define every index the server relies on. Safe to run on every start.
    pub async fn ensure_initialized(&self, embedding_dimensions: usize) -> Result<(), AppError> {
        self.build_vector_indexes(embedding_dimensions).await?;
        self.build_lookup_indexes().await?;
        Ok(())
    }

    pub async fn build_vector_indexes(&self, dimensions: usize) -> Result<(), Error> {
        self.client
            .query(format!(
                "DEFINE INDEX OVERWRITE idx_embedding_content ON artifact_embedding FIELDS embedding HNSW DIMENSION {dimensions}"
            ))
            .await?;
        self.client
            .query(format!(
                "DEFINE INDEX OVERWRITE idx_embedding_chunks ON chunk_embedding FIELDS embedding HNSW DIMENSION {dimensions}"
            ))
            .await?;
        self.client
            .query(format!(
                "DEFINE INDEX OVERWRITE idx_embedding_entities ON entity_embedding FIELDS embedding HNSW DIMENSION {dimensions}"
            ))
            .await?;

        Ok(())
    }

    pub async fn build_lookup_indexes(&self) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_state ON job FIELDS state")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_kind ON job FIELDS kind")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_event_job ON job_event FIELDS job_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_revision_artifact ON revision FIELDS artifact_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_artifact ON chunk FIELDS artifact_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_event_revision ON event FIELDS revision_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_mention_revision ON entity_mention FIELDS revision_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_mention_entity ON entity_mention FIELDS entity_id")
            .await?;

        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Store an object in its table, keyed by the object's own id.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Fetch by id, surfacing a miss as [`AppError::NotFound`].
    pub async fn require_item<T>(&self, id: &str) -> Result<T, AppError>
    where
        T: for<'de> StoredObject,
    {
        self.get_item::<T>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{}:{id}", T::table_name())))
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    pub async fn count_table(&self, table: &str) -> Result<usize, AppError> {
        #[derive(serde::Deserialize)]
        struct Row {
            count: usize,
        }

        let mut response = self
            .client
            .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
            .bind(("table", table.to_owned()))
            .await?;
        let row: Option<Row> = response.take(0)?;
        Ok(row.map_or(0, |r| r.count))
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
