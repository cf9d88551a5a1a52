use super::{delivery_name, AppState};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use scrivener::{IndexerError, Operation, OperationBatch};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationsRequest {
    pub operations: Vec<Operation>,
}

/// Client write: every operation in the body is dispatched as one batch.
/// A full queue answers 503 instead of holding the request open.
pub async fn post_operations(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), IndexerError> {
    let req: OperationsRequest = serde_json::from_slice(&body)?;
    let count = req.operations.len();
    let batch = OperationBatch::with_operations(index_name.clone(), req.operations)?;

    let delivery = state.manager.try_dispatch(batch).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "index": index_name,
            "operations": count,
            "delivery": delivery_name(&delivery),
        })),
    ))
}

/// Metadata of the index's current shared reader.
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(index_name): Path<String>,
) -> Result<Json<serde_json::Value>, IndexerError> {
    let lease = state.manager.reader(&index_name)?.lease()?;
    Ok(Json(serde_json::json!({
        "index": index_name,
        "generation": lease.generation(),
        "num_docs": lease.num_docs(),
        "reader_id": lease.handle().id(),
    })))
}
