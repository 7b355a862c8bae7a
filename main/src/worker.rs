use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use extraction_pipeline::{run_worker_loop, DefaultExtractionServices, ExtractionPipeline};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes: 0 normal shutdown, 1 unrecoverable init failure, 130 on
/// interrupt.
const EXIT_OK: i32 = 0;
const EXIT_INIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config = match get_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return EXIT_INIT_FAILURE;
        }
    };

    let db = match SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, "failed to connect to surrealdb");
            return EXIT_INIT_FAILURE;
        }
    };
    if let Err(err) = db.ensure_initialized(config.embedding_dimensions).await {
        error!(error = %err, "failed to initialize schema");
        return EXIT_INIT_FAILURE;
    }

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedder = Arc::new(EmbeddingProvider::from_config(&config, openai_client.clone()));
    let services = Arc::new(DefaultExtractionServices::new(
        openai_client,
        embedder,
        config.clone(),
    ));
    let pipeline = Arc::new(ExtractionPipeline::new(
        db.clone(),
        services,
        config.clone(),
    ));

    info!(
        worker_id = config.worker_id.as_deref().unwrap_or("auto-generated"),
        poll_interval_ms = config.worker_poll_interval_ms,
        max_attempts = config.job_max_attempts,
        lease_seconds = config.job_lease_seconds,
        event_model = %config.event_model,
        entity_model = %config.entity_model,
        "starting extraction worker"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt_flag = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight job");
            interrupt_flag.store(true, Ordering::SeqCst);
            shutdown_tx.send(true).ok();
        }
    });

    match run_worker_loop(db, pipeline, config, shutdown_rx).await {
        Ok(()) => {
            if interrupted.load(Ordering::SeqCst) {
                EXIT_INTERRUPTED
            } else {
                EXIT_OK
            }
        }
        Err(err) => {
            error!(error = %err, "worker loop failed");
            EXIT_INIT_FAILURE
        }
    }
}
