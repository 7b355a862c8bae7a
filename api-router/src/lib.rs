#![allow(clippy::missing_docs_in_private_items)]

pub mod error;
pub mod rpc;
pub mod state;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};

pub use state::ApiState;

/// Tool surface plus health probes: one JSON-RPC endpoint, liveness and
/// readiness.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/rpc", post(rpc::handler))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

async fn liveness() -> StatusCode {
    StatusCode::OK
}

async fn readiness(State(state): State<ApiState>) -> StatusCode {
    match state.db.count_table("artifact").await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            tracing::warn!(error = %err, "readiness probe failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
