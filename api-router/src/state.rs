use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use ingestion_pipeline::ArtifactIngestor;
use retrieval_pipeline::RetrievalService;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub embedder: Arc<EmbeddingProvider>,
    pub ingestor: Arc<ArtifactIngestor>,
    pub retrieval: Arc<RetrievalService>,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        embedder: Arc<EmbeddingProvider>,
    ) -> Self {
        let ingestor = Arc::new(ArtifactIngestor::new(
            db.clone(),
            embedder.clone(),
            config.clone(),
        ));
        let retrieval = Arc::new(RetrievalService::new(
            db.clone(),
            embedder.clone(),
            config.clone(),
        ));

        Self {
            db,
            config,
            embedder,
            ingestor,
            retrieval,
        }
    }
}
