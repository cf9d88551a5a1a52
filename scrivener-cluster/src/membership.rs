use crate::config::NodeConfig;
use crate::peer::PeerClient;
use scrivener::{CoordinatorResolver, NodeAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// This node plus the peers it knows about.
pub struct Membership {
    node_id: String,
    address: NodeAddress,
    peers: Vec<Arc<PeerClient>>,
}

impl Membership {
    pub fn new(node_id: impl Into<String>, address: NodeAddress, peers: Vec<Arc<PeerClient>>) -> Self {
        Membership {
            node_id: node_id.into(),
            address,
            peers,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        let peers = config
            .peers
            .iter()
            .filter(|p| p.node_id != config.node_id)
            .map(|p| Arc::new(PeerClient::new(p.node_id.clone(), p.addr.clone())))
            .collect();
        Membership::new(
            config.node_id.clone(),
            NodeAddress::new(config.advertise_address().trim_end_matches('/')),
            peers,
        )
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn peers(&self) -> &[Arc<PeerClient>] {
        &self.peers
    }

    pub fn peer_by_address(&self, address: &NodeAddress) -> Option<&Arc<PeerClient>> {
        self.peers.iter().find(|p| p.address() == address)
    }

    pub fn live_peer_count(&self) -> usize {
        self.peers.iter().filter(|p| p.is_available()).count()
    }

    /// The live node with the smallest node id. This node is always live.
    pub fn designated_writer(&self) -> (&str, &NodeAddress) {
        self.peers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| (p.node_id(), p.address()))
            .chain(std::iter::once((self.node_id.as_str(), &self.address)))
            .min_by(|a, b| a.0.cmp(b.0))
            .unwrap_or((self.node_id.as_str(), &self.address))
    }

    /// Pings every peer on `interval` until `shutdown` flips to true.
    pub fn start_health_probe(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let membership = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            // The first tick fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let before = membership.designated_writer().0.to_string();
                for peer in &membership.peers {
                    if peer.health_check().await {
                        tracing::debug!("[HEALTH] peer {} is healthy", peer.node_id());
                    } else {
                        tracing::warn!(
                            "[HEALTH] peer {} probe failed ({} consecutive)",
                            peer.node_id(),
                            peer.circuit_breaker().consecutive_failures()
                        );
                    }
                }
                let after = membership.designated_writer();
                if after.0 != before {
                    tracing::info!(
                        "[HEALTH] designated writer moved from {} to {} ({})",
                        before,
                        after.0,
                        after.1
                    );
                }
            }
            tracing::debug!("[HEALTH] probe stopped");
        })
    }
}

/// Resolves the designated writer from live membership on every call.
#[derive(Clone)]
pub struct MembershipResolver {
    membership: Arc<Membership>,
}

impl MembershipResolver {
    pub fn new(membership: Arc<Membership>) -> Self {
        MembershipResolver { membership }
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }
}

impl CoordinatorResolver for MembershipResolver {
    fn is_local_coordinator(&self) -> bool {
        self.membership.designated_writer().0 == self.membership.node_id
    }

    fn designated_writer_address(&self) -> NodeAddress {
        self.membership.designated_writer().1.clone()
    }

    fn local_address(&self) -> NodeAddress {
        self.membership.address.clone()
    }
}
