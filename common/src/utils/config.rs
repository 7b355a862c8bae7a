use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_database")]
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    // Chunking
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,

    // Embedding
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    // LLM models
    #[serde(default = "default_event_model")]
    pub event_model: String,
    #[serde(default = "default_entity_model")]
    pub entity_model: String,

    // Entity resolution thresholds
    #[serde(default = "default_recall_threshold")]
    pub recall_threshold: f32,
    #[serde(default = "default_same_threshold")]
    pub same_threshold: f32,
    #[serde(default = "default_uncertain_threshold")]
    pub uncertain_threshold: f32,
    #[serde(default = "default_possibly_same_threshold")]
    pub possibly_same_threshold: f32,

    // Retrieval
    #[serde(default = "default_rrf_constant")]
    pub rrf_constant: f32,
    #[serde(default = "default_graph_seed_limit")]
    pub graph_seed_limit: usize,
    #[serde(default = "default_graph_budget")]
    pub graph_budget: usize,

    // Job queue / worker
    #[serde(default = "default_job_lease_seconds")]
    pub job_lease_seconds: u64,
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,
    #[serde(default = "default_retry_backoff_base")]
    pub retry_backoff_base: u64,
    #[serde(default = "default_retry_backoff_cap")]
    pub retry_backoff_cap: u64,
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
    #[serde(default)]
    pub worker_id: Option<String>,
}

fn default_namespace() -> String {
    "nur".to_string()
}

fn default_database() -> String {
    // Also the name of the property graph the expansion queries run on.
    "nur".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_chunk_tokens() -> usize {
    1000
}

fn default_chunk_overlap_tokens() -> usize {
    100
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_event_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_entity_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_recall_threshold() -> f32 {
    0.25
}

fn default_same_threshold() -> f32 {
    0.85
}

fn default_uncertain_threshold() -> f32 {
    0.5
}

fn default_possibly_same_threshold() -> f32 {
    0.75
}

fn default_rrf_constant() -> f32 {
    60.0
}

fn default_graph_seed_limit() -> usize {
    10
}

fn default_graph_budget() -> usize {
    50
}

fn default_job_lease_seconds() -> u64 {
    60
}

fn default_job_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_base() -> u64 {
    5
}

fn default_retry_backoff_cap() -> u64 {
    300
}

fn default_worker_poll_interval_ms() -> u64 {
    500
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: "test-key".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: default_namespace(),
            surrealdb_database: default_database(),
            http_port: 0,
            openai_base_url: "https://example.com".into(),
            max_chunk_tokens: default_max_chunk_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            event_model: default_event_model(),
            entity_model: default_entity_model(),
            recall_threshold: default_recall_threshold(),
            same_threshold: default_same_threshold(),
            uncertain_threshold: default_uncertain_threshold(),
            possibly_same_threshold: default_possibly_same_threshold(),
            rrf_constant: default_rrf_constant(),
            graph_seed_limit: default_graph_seed_limit(),
            graph_budget: default_graph_budget(),
            job_lease_seconds: default_job_lease_seconds(),
            job_max_attempts: default_job_max_attempts(),
            retry_backoff_base: default_retry_backoff_base(),
            retry_backoff_cap: default_retry_backoff_cap(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            worker_id: None,
        }
    }
}
