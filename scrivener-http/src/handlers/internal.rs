use super::{delivery_name, AppState};
use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use scrivener::{IndexerError, OperationBatch};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Remote receiver: a peer forwarded a batch because it believes this node
/// is the designated writer.
///
/// The batch goes back through `Manager::dispatch`, so if this node lost the
/// role in the meantime it is forwarded again rather than written here.
pub async fn receive_operations(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), IndexerError> {
    let batch: OperationBatch = serde_json::from_slice(&body)?;
    let index_id = batch.index_id().to_string();
    let operations = batch.len();

    let delivery = state.manager.dispatch(batch).await?;
    tracing::debug!(
        "[RECEIVER {}] accepted {} operation(s) ({})",
        index_id,
        operations,
        delivery_name(&delivery)
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "index": index_id,
            "operations": operations,
            "delivery": delivery_name(&delivery),
        })),
    ))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let manager = &state.manager;

    let mut indexes = BTreeMap::new();
    for id in manager.index_ids() {
        if let Ok(stats) = manager.stats(&id) {
            indexes.insert(id, stats);
        }
    }

    let (node_id, peers) = match &state.membership {
        Some(membership) => (
            membership.node_id().to_string(),
            membership
                .peers()
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "node_id": p.node_id(),
                        "addr": p.address(),
                        "circuit": p.circuit_breaker().state(),
                        "last_success": p.last_success_timestamp(),
                    })
                })
                .collect::<Vec<_>>(),
        ),
        None => (manager.local_address().to_string(), Vec::new()),
    };

    Json(serde_json::json!({
        "node_id": node_id,
        "local_address": manager.local_address(),
        "coordinator_address": manager.designated_writer_address(),
        "is_coordinator": manager.is_local_coordinator(),
        "shutting_down": manager.is_shutting_down(),
        "open_readers": manager.open_readers(),
        "indexes": indexes,
        "peers": peers,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
