use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Retrieval error: {0}")]
    Retrieval(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Entity resolution error: {0}")]
    EntityResolution(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a caller may retry the failed operation verbatim.
    ///
    /// Validation, configuration and not-found failures are deterministic;
    /// everything touching the network or a store is worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_)
                | Self::Configuration(_)
                | Self::NotFound(_)
                | Self::LLMParsing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(!AppError::Validation("bad input".into()).is_retryable());
        assert!(!AppError::NotFound("art_missing".into()).is_retryable());
        assert!(!AppError::Configuration("no api key".into()).is_retryable());
        assert!(AppError::Embedding("503 from provider".into()).is_retryable());
        assert!(AppError::Timeout("llm call".into()).is_retryable());
        assert!(AppError::Retrieval("vector store down".into()).is_retryable());
    }
}
