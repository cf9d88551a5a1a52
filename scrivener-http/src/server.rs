use crate::handlers::{post_operations, receive_operations, snapshot, status, AppState};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    let internal = Router::new()
        .route("/internal/operations", post(receive_operations))
        .route("/internal/status", get(status));

    let client = Router::new()
        .route("/1/indexes/:indexName/operations", post(post_operations))
        .route("/1/indexes/:indexName/snapshot", get(snapshot));

    Router::new()
        .merge(internal)
        .merge(client)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Binds `bind_addr` and serves until the manager starts shutting down.
pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    serve_listener(state, listener).await
}

pub async fn serve_listener(state: Arc<AppState>, listener: TcpListener) -> std::io::Result<()> {
    let mut shutdown = state.manager.shutdown_signal();
    tracing::info!(
        "Listening on {} (node address {})",
        listener.local_addr()?,
        state.manager.local_address()
    );

    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            tracing::info!("HTTP server draining");
        })
        .await
}
