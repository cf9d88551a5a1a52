use crate::membership::Membership;
use crate::peer::{http_client, post_batch};
use async_trait::async_trait;
use scrivener::{NodeAddress, OperationBatch, Result, Transport};
use std::sync::Arc;

/// Sends batches to `POST {destination}/internal/operations`.
///
/// Known peers go through their own client so the outcome feeds their
/// circuit breaker; any other address gets a plain request.
pub struct HttpTransport {
    membership: Arc<Membership>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(membership: Arc<Membership>) -> Self {
        HttpTransport {
            membership,
            client: http_client(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, destination: &NodeAddress, batch: &OperationBatch) -> Result<()> {
        tracing::debug!("[TRANSPORT] {} -> {}", batch, destination);
        match self.membership.peer_by_address(destination) {
            Some(peer) => peer.send_batch(batch).await,
            None => post_batch(&self.client, destination, batch).await,
        }
    }
}
