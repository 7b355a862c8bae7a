#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod extractor;
pub mod graph_upsert;
pub mod pipeline;
pub mod prompts;
pub mod resolver;
pub mod services;
pub mod types;
pub mod worker;


use std::sync::Arc;

use common::{error::AppError, storage::db::SurrealDbClient, utils::config::AppConfig};
pub use pipeline::ExtractionPipeline;
pub use services::{DefaultExtractionServices, ExtractionServices};
use tokio::sync::watch;
pub use worker::ExtractionWorker;

/// Convenience entry point used by the worker binary: build the worker and
/// run it until the shutdown flag flips.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<ExtractionPipeline>,
    config: AppConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let worker = ExtractionWorker::new(db, pipeline, config);
    worker.run(shutdown).await
}
