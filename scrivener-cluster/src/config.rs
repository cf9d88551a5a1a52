use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_addr: String,
    /// Base URL peers use to reach this node. Defaults to `http://{bind_addr}`.
    #[serde(default)]
    pub advertise_addr: Option<String>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
    /// Base URL, e.g. `http://10.0.1.2:7700`.
    pub addr: String,
}

impl NodeConfig {
    /// A node with no peers, always its own designated writer.
    pub fn standalone(node_id: impl Into<String>, bind_addr: impl Into<String>) -> Self {
        NodeConfig {
            node_id: node_id.into(),
            bind_addr: bind_addr.into(),
            advertise_addr: None,
            peers: Vec::new(),
        }
    }

    pub fn advertise_address(&self) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind_addr))
    }

    /// Reads `{data_dir}/node.json`; without a usable file the node is
    /// configured from `SCRIVENER_NODE_ID`, `SCRIVENER_BIND_ADDR`,
    /// `SCRIVENER_ADVERTISE_ADDR` and `SCRIVENER_PEERS` (`id=url,id=url`).
    pub fn load_or_default(data_dir: &Path) -> Self {
        let node_json = data_dir.join("node.json");

        if node_json.exists() {
            match std::fs::read_to_string(&node_json)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<NodeConfig>(&content).map_err(|e| e.to_string())
                }) {
                Ok(config) => {
                    tracing::info!(
                        "Loaded node config: node_id={}, peers={}",
                        config.node_id,
                        config.peers.len()
                    );
                    return config;
                }
                Err(e) => {
                    tracing::error!("Unusable node.json ({}), falling back to env", e);
                }
            }
        }

        let node_id = std::env::var("SCRIVENER_NODE_ID").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        });
        let bind_addr =
            std::env::var("SCRIVENER_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:7700".to_string());
        let advertise_addr = std::env::var("SCRIVENER_ADVERTISE_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let peers = parse_peers(&std::env::var("SCRIVENER_PEERS").unwrap_or_default());

        if peers.is_empty() {
            tracing::info!("Running standalone: node_id={}", node_id);
        } else {
            tracing::info!(
                "Loaded {} peer(s) from SCRIVENER_PEERS: node_id={}",
                peers.len(),
                node_id
            );
        }

        NodeConfig {
            node_id,
            bind_addr,
            advertise_addr,
            peers,
        }
    }
}

fn parse_peers(raw: &str) -> Vec<PeerConfig> {
    raw.split(',')
        .filter_map(|entry| {
            let (id, addr) = entry.split_once('=')?;
            let (id, addr) = (id.trim(), addr.trim().trim_end_matches('/'));
            if id.is_empty() || addr.is_empty() {
                return None;
            }
            Some(PeerConfig {
                node_id: id.to_string(),
                addr: addr.to_string(),
            })
        })
        .collect()
}
