use std::sync::Arc;
use std::time::Duration;

use api_router::{api_routes, ApiState};
use common::{
    storage::db::SurrealDbClient,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use tower_http::timeout::TimeoutLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Outer deadline for one tool call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized(config.embedding_dimensions).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedder = Arc::new(EmbeddingProvider::from_config(&config, openai_client));
    info!(
        embedding_backend = embedder.backend_label(),
        embedding_dimensions = embedder.dimension(),
        "embedding provider initialized"
    );

    let state = ApiState::new(db, config.clone(), embedder);
    let app = api_routes(state).layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("starting memory server on {serve_address}");
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
