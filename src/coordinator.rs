//! The two cluster-facing seams: who the designated writer is, and how a
//! batch physically reaches it.

use crate::error::Result;
use crate::types::{NodeAddress, OperationBatch};
use async_trait::async_trait;

/// Reports the current designated writer. Consulted on every dispatch and
/// never cached, since membership can change between two calls.
pub trait CoordinatorResolver: Send + Sync + 'static {
    fn is_local_coordinator(&self) -> bool;
    fn designated_writer_address(&self) -> NodeAddress;
    fn local_address(&self) -> NodeAddress;
}

/// Delivers a batch to another node's receiver.
///
/// Delivery is at-least-once: a retried send may reach the receiver twice.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, destination: &NodeAddress, batch: &OperationBatch) -> Result<()>;
}

/// Single-node resolver: this node is always the designated writer.
#[derive(Debug, Clone)]
pub struct LocalOnly {
    address: NodeAddress,
}

impl LocalOnly {
    pub fn new(address: impl Into<String>) -> Self {
        LocalOnly {
            address: NodeAddress::new(address),
        }
    }
}

impl Default for LocalOnly {
    fn default() -> Self {
        LocalOnly::new("local")
    }
}

impl CoordinatorResolver for LocalOnly {
    fn is_local_coordinator(&self) -> bool {
        true
    }

    fn designated_writer_address(&self) -> NodeAddress {
        self.address.clone()
    }

    fn local_address(&self) -> NodeAddress {
        self.address.clone()
    }
}

/// A transport that drops every batch. Used where no cluster exists, so
/// a misrouted batch is logged instead of failing the caller.
#[derive(Debug, Clone, Default)]
pub struct DiscardTransport;

#[async_trait]
impl Transport for DiscardTransport {
    async fn send(&self, destination: &NodeAddress, batch: &OperationBatch) -> Result<()> {
        tracing::warn!("Discarding {} addressed to {}", batch, destination);
        Ok(())
    }
}
