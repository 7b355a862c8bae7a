use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use sha2::{Digest, Sha256};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Provider batch ceiling: requests are chunked so a single call never
/// carries more inputs than this.
const MAX_BATCH_SIZE: usize = 64;
/// Transient-failure retries before giving up with an embedding error.
const MAX_ATTEMPTS: usize = 5;

/// Text-to-vector backend. `OpenAi` is the production path; `Hashed` is a
/// deterministic local backend used by tests and offline runs.
#[derive(Clone)]
pub enum EmbeddingProvider {
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: usize,
    },
    Hashed {
        dimensions: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(config: &AppConfig, client: Arc<Client<OpenAIConfig>>) -> Self {
        Self::OpenAi {
            client,
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        }
    }

    /// Deterministic token-hash embeddings; identical input always yields the
    /// identical vector.
    pub fn new_hashed(dimensions: usize) -> Self {
        Self::Hashed { dimensions }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::OpenAi { dimensions, .. } | Self::Hashed { dimensions } => *dimensions,
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Hashed { .. } => "hashed",
        }
    }

    pub fn model_label(&self) -> &str {
        match self {
            Self::OpenAi { model, .. } => model,
            Self::Hashed { .. } => "hashed",
        }
    }

    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(&[input.to_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("no embedding returned for input".into()))
    }

    /// Embed many texts. Output length always equals input length and every
    /// vector has the provider dimension.
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = match self {
            Self::Hashed { dimensions } => inputs
                .iter()
                .map(|input| hashed_embedding(input, *dimensions))
                .collect(),
            Self::OpenAi {
                client,
                model,
                dimensions,
            } => {
                let mut all = Vec::with_capacity(inputs.len());
                for batch in inputs.chunks(MAX_BATCH_SIZE) {
                    let mut vectors =
                        openai_embed_batch(client, model, *dimensions, batch).await?;
                    all.append(&mut vectors);
                }
                all
            }
        };

        if vectors.len() != inputs.len() {
            return Err(AppError::Embedding(format!(
                "embedding count mismatch: {} inputs, {} vectors",
                inputs.len(),
                vectors.len()
            )));
        }
        let dimensions = self.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(AppError::Embedding(format!(
                "embedding dimension mismatch: expected {dimensions}, got {}",
                bad.len()
            )));
        }

        Ok(vectors)
    }
}

async fn openai_embed_batch(
    client: &Client<OpenAIConfig>,
    model: &str,
    dimensions: usize,
    batch: &[String],
) -> Result<Vec<Vec<f32>>, AppError> {
    let retry_strategy = ExponentialBackoff::from_millis(100)
        .map(jitter)
        .take(MAX_ATTEMPTS - 1);

    let response = Retry::spawn(retry_strategy, || async {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(dimensions as u32)
            .input(batch.to_vec())
            .build()?;

        client.embeddings().create(request).await
    })
    .await
    .map_err(|e| AppError::Embedding(format!("provider exhausted retries: {e}")))?;

    debug!(
        batch = batch.len(),
        vectors = response.data.len(),
        "embedding batch completed"
    );

    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

/// Bag-of-token-hashes vector, L2-normalized. Stable across runs.
fn hashed_embedding(input: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimensions.max(1)];

    for token in input.split_whitespace() {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let bucket = usize::from(digest[0]) << 8 | usize::from(digest[1]);
        let index = bucket % vector.len();
        let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
        if let Some(slot) = vector.get_mut(index) {
            *slot += sign;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }

    vector
}
