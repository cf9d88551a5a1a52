use crate::circuit_breaker::CircuitBreaker;
use scrivener::{IndexerError, NodeAddress, OperationBatch, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trip after 3 consecutive failures, probe again after 30 seconds.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// HTTP client for one peer node.
pub struct PeerClient {
    node_id: String,
    address: NodeAddress,
    http_client: reqwest::Client,
    /// Unix seconds of the last successful exchange, 0 if never.
    last_success: AtomicU64,
    circuit_breaker: CircuitBreaker,
}

impl PeerClient {
    pub fn new(node_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::with_breaker(
            node_id,
            base_url,
            CircuitBreaker::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT),
        )
    }

    pub fn with_breaker(
        node_id: impl Into<String>,
        base_url: impl Into<String>,
        circuit_breaker: CircuitBreaker,
    ) -> Self {
        let base_url: String = base_url.into();
        PeerClient {
            node_id: node_id.into(),
            address: NodeAddress::new(base_url.trim_end_matches('/')),
            http_client: http_client(),
            last_success: AtomicU64::new(0),
            circuit_breaker,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn last_success_timestamp(&self) -> u64 {
        self.last_success.load(Ordering::Relaxed)
    }

    /// A peer counts as live while its breaker lets requests through.
    pub fn is_available(&self) -> bool {
        self.circuit_breaker.allow_request()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn mark_success(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.last_success.store(now, Ordering::Relaxed);
        self.circuit_breaker.record_success();
    }

    /// Hands a batch to the peer's remote receiver.
    pub async fn send_batch(&self, batch: &OperationBatch) -> Result<()> {
        let result = post_batch(&self.http_client, &self.address, batch).await;
        match &result {
            Ok(()) => self.mark_success(),
            Err(_) => self.circuit_breaker.record_failure(),
        }
        result
    }

    /// `GET /internal/status`; updates the breaker either way.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/internal/status", self.address);
        match self.http_client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.mark_success();
                true
            }
            Ok(resp) => {
                tracing::debug!("[HEALTH] {} returned {}", self.node_id, resp.status());
                self.circuit_breaker.record_failure();
                false
            }
            Err(e) => {
                tracing::debug!("[HEALTH] {} unreachable: {}", self.node_id, e);
                self.circuit_breaker.record_failure();
                false
            }
        }
    }
}

pub(crate) async fn post_batch(
    client: &reqwest::Client,
    destination: &NodeAddress,
    batch: &OperationBatch,
) -> Result<()> {
    let url = format!("{}/internal/operations", destination);
    let failure = |message: String| IndexerError::TransportFailure {
        destination: destination.to_string(),
        message,
    };

    let response = client
        .post(&url)
        .json(batch)
        .send()
        .await
        .map_err(|e| failure(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(failure(format!("{}: {}", status, body)));
    }
    Ok(())
}
