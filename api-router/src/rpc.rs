use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use common::{
    error::AppError,
    storage::types::{
        artifact::Artifact, chunk::Chunk, event::Event, job::Job, revision::Revision,
    },
};
use ingestion_pipeline::{forget::forget_artifact, IngestInput};
use retrieval_pipeline::RecallRequest;

use crate::error::RpcError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Single JSON-RPC endpoint; every tool answers 200 with either `result` or
/// the stable error envelope.
pub async fn handler(State(state): State<ApiState>, Json(request): Json<RpcRequest>) -> Json<Value> {
    info!(method = %request.method, "tool call");
    match dispatch(&state, &request.method, request.params).await {
        Ok(result) => Json(json!({ "result": result })),
        Err(err) => Json(json!({ "error": RpcError::from(err) })),
    }
}

/// Closed dispatch table over the tool surface.
pub async fn dispatch(state: &ApiState, method: &str, params: Value) -> Result<Value, AppError> {
    match method {
        "remember" => remember(state, params).await,
        "recall" => recall(state, params).await,
        "forget" => forget(state, params).await,
        "status" => status(state, params).await,
        "event_search" => event_search(state, params).await,
        "event_get" => event_get(state, params).await,
        "event_list_for_revision" => event_list_for_revision(state, params).await,
        "job_status" => job_status(state, params).await,
        unknown => Err(AppError::Validation(format!("unknown method: {unknown}"))),
    }
}

#[derive(Deserialize)]
struct RememberParams {
    content: String,
    #[serde(default)]
    metadata: Value,
}

async fn remember(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let params: RememberParams = parse_params(params)?;

    // The metadata object carries the optional artifact attributes; content
    // rides alongside it.
    let mut input = match params.metadata {
        Value::Null => json!({}),
        object @ Value::Object(_) => object,
        _ => return Err(AppError::Validation("metadata must be an object".into())),
    };
    if let Value::Object(map) = &mut input {
        map.insert("content".to_string(), Value::String(params.content));
    }
    let input: IngestInput = serde_json::from_value(input)
        .map_err(|e| AppError::Validation(format!("invalid remember parameters: {e}")))?;

    let receipt = state.ingestor.ingest(input).await?;
    to_result(&receipt)
}

async fn recall(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let request: RecallRequest = parse_params(params)?;
    let response = state.retrieval.recall(request).await?;
    to_result(&response)
}

#[derive(Deserialize)]
struct ForgetParams {
    id: String,
    #[serde(default)]
    confirm: bool,
}

async fn forget(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let params: ForgetParams = parse_params(params)?;
    if !params.confirm {
        return Err(AppError::Validation(
            "forget requires confirm to be true".into(),
        ));
    }

    let outcome = forget_artifact(&params.id, &state.db).await?;
    to_result(&outcome)
}

#[derive(Deserialize)]
struct StatusParams {
    #[serde(default)]
    artifact_id: Option<String>,
}

async fn status(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let params: StatusParams = parse_params(params)?;

    let database = match state.db.count_table("artifact").await {
        Ok(_) => "ok",
        Err(_) => "error",
    };
    let counts = json!({
        "artifacts": state.db.count_table("artifact").await.unwrap_or(0),
        "chunks": state.db.count_table("chunk").await.unwrap_or(0),
        "entities": state.db.count_table("entity").await.unwrap_or(0),
        "events": state.db.count_table("event").await.unwrap_or(0),
    });
    let jobs = Job::counts_by_state(&state.db).await?;

    let mut response = json!({
        "services": {
            "database": database,
            "embedding": state.embedder.backend_label(),
            "embedding_dimensions": state.embedder.dimension(),
        },
        "counts": counts,
        "jobs": jobs,
    });

    if let Some(artifact_id) = params.artifact_id {
        let artifact = state.db.require_item::<Artifact>(&artifact_id).await?;
        let revisions = Revision::list_for_artifact(&artifact_id, &state.db).await?;
        let revision_ids: Vec<String> = revisions.iter().map(|r| r.id.clone()).collect();
        let events = Event::list_for_revisions(revision_ids, &state.db).await?;
        let chunks = Chunk::list_for_artifact(&artifact_id, &state.db).await?;

        if let Value::Object(map) = &mut response {
            map.insert(
                "artifact".to_string(),
                json!({
                    "artifact_id": artifact.id,
                    "num_chunks": chunks.len(),
                    "revisions": revisions.len(),
                    "events": events.len(),
                }),
            );
        }
    }

    Ok(response)
}

#[derive(Deserialize)]
struct EventSearchParams {
    query: String,
    #[serde(default = "default_event_limit")]
    k: usize,
}

fn default_event_limit() -> usize {
    20
}

async fn event_search(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let params: EventSearchParams = parse_params(params)?;
    let events = Event::search(&params.query, params.k, &state.db).await?;
    to_result(&events)
}

#[derive(Deserialize)]
struct EventGetParams {
    id: String,
}

async fn event_get(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let params: EventGetParams = parse_params(params)?;
    let event = state.db.require_item::<Event>(&params.id).await?;
    to_result(&event)
}

#[derive(Deserialize)]
struct EventListParams {
    revision_id: String,
}

async fn event_list_for_revision(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let params: EventListParams = parse_params(params)?;
    let events = Event::list_for_revision(&params.revision_id, &state.db).await?;
    to_result(&events)
}

#[derive(Deserialize)]
struct JobStatusParams {
    job_id: String,
}

async fn job_status(state: &ApiState, params: Value) -> Result<Value, AppError> {
    let params: JobStatusParams = parse_params(params)?;
    let job = state.db.require_item::<Job>(&params.job_id).await?;

    let mut response = json!({
        "state": job.state,
        "attempts": job.attempts,
    });
    if let (Value::Object(map), Some(last_error)) = (&mut response, job.last_error) {
        map.insert("last_error".to_string(), Value::String(last_error));
    }

    Ok(response)
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::Validation(format!("invalid parameters: {e}")))
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::InternalError(format!("result serialization failed: {e}")))
}
