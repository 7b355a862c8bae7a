use common::error::AppError;
use serde::Serialize;

/// Stable wire error: `{code, message, retryable}`. Internal error detail is
/// never surfaced for storage and provider failures.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        let retryable = err.is_retryable();
        let (code, message) = match &err {
            AppError::Validation(msg) => ("validation_error", msg.clone()),
            AppError::NotFound(msg) => ("not_found", msg.clone()),
            AppError::Configuration(msg) => ("configuration_error", msg.clone()),
            AppError::Embedding(_) => ("embedding_error", "embedding provider failed".to_string()),
            AppError::Retrieval(_) => ("retrieval_error", "retrieval failed".to_string()),
            AppError::Extraction(_) => ("extraction_error", "extraction failed".to_string()),
            AppError::EntityResolution(_) => (
                "entity_resolution_error",
                "entity resolution failed".to_string(),
            ),
            AppError::Timeout(msg) => ("timeout", msg.clone()),
            AppError::Database(_) => {
                tracing::error!("storage error: {err:?}");
                ("storage_error", "storage unavailable".to_string())
            }
            _ => {
                tracing::error!("internal error: {err:?}");
                ("internal_error", "internal server error".to_string())
            }
        };

        Self {
            code: code.to_string(),
            message,
            retryable,
        }
    }
}
