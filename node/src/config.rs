// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::errors::NodeError;
use replica_kernel::types::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchupConfig {
    /// Entries per range fetch.
    pub batch_size: u64,
    /// Peers that must report a size before it becomes the target.
    /// `None` means a simple majority of the peers that answered.
    pub quorum: Option<usize>,
    pub max_rounds: u32,
    pub peer_timeout_ms: u64,
    pub peer_backoff_ms: u64,
    pub peer_backoff_max_ms: u64,
    pub max_parallel_fetches: usize,
    pub round_interval_ms: u64,
    pub catchup_timeout_ms: u64,
    /// How long `start` waits for peers to come back before computing a target.
    pub connect_timeout_ms: u64,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            quorum: None,
            max_rounds: 20,
            peer_timeout_ms: 2_000,
            peer_backoff_ms: 250,
            peer_backoff_max_ms: 4_000,
            max_parallel_fetches: 4,
            round_interval_ms: 200,
            catchup_timeout_ms: 60_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl CatchupConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn peer_backoff(&self) -> Duration {
        Duration::from_millis(self.peer_backoff_ms)
    }

    pub fn peer_backoff_max(&self) -> Duration {
        Duration::from_millis(self.peer_backoff_max_ms)
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn catchup_timeout(&self) -> Duration {
        Duration::from_millis(self.catchup_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Quorum for `responding` answers.
    pub fn quorum_for(&self, responding: usize) -> usize {
        self.quorum.unwrap_or(responding / 2 + 1).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Overall deadline for a comparison.
    pub timeout_ms: u64,
    /// Per-node view request timeout.
    pub rpc_timeout_ms: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            rpc_timeout_ms: 1_000,
            poll_initial_ms: 50,
            poll_max_ms: 1_000,
        }
    }
}

impl VerifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn poll_initial(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub bind_addr: SocketAddr,
    /// Node state lives under `data_dir/<node_id>/`.
    pub data_dir: PathBuf,
    pub peers: Vec<PeerConfig>,
    /// Run a catchup round against `peers` when the node boots.
    pub catchup_on_start: bool,
    pub catchup: CatchupConfig,
    pub verify: VerifyConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::from("node"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from("./replica-data"),
            peers: Vec::new(),
            catchup_on_start: true,
            catchup: CatchupConfig::default(),
            verify: VerifyConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Config from `REPLICA_CONFIG` (a JSON file) if set, then environment
    /// overrides on top.
    pub fn from_env() -> Result<Self, NodeError> {
        let mut cfg = match std::env::var("REPLICA_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self, NodeError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("cannot read {}: {}", path, e)))?;
        serde_json::from_str(&raw).map_err(|e| NodeError::Config(format!("invalid config {}: {}", path, e)))
    }

    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), NodeError> {
        if let Some(id) = get("REPLICA_NODE_ID") {
            self.node_id = NodeId::new(id);
        }
        if let Some(addr) = get("REPLICA_BIND_ADDR") {
            self.bind_addr = addr
                .parse()
                .map_err(|e| NodeError::Config(format!("REPLICA_BIND_ADDR {:?}: {}", addr, e)))?;
        }
        if let Some(dir) = get("REPLICA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(peers) = get("REPLICA_PEERS") {
            self.peers = parse_peers(&peers)?;
        }
        Ok(())
    }

    pub fn node_dir(&self) -> PathBuf {
        self.data_dir.join(self.node_id.as_str())
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|p| p.id.clone()).collect()
    }
}

/// Parse `id=url,id=url`.
pub fn parse_peers(raw: &str) -> Result<Vec<PeerConfig>, NodeError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| match item.split_once('=') {
            Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => Ok(PeerConfig {
                id: NodeId::new(id.trim()),
                url: url.trim().to_string(),
            }),
            _ => Err(NodeError::Config(format!("bad peer entry {:?}, expected id=url", item))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_peers() {
        let peers = parse_peers("b=http://127.0.0.1:3001, c=http://127.0.0.1:3002").unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].id, NodeId::from("c"));
        assert_eq!(peers[1].url, "http://127.0.0.1:3002");
        assert!(parse_peers("").unwrap().is_empty());
        assert!(parse_peers("nourl").is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("REPLICA_NODE_ID", "alpha"),
            ("REPLICA_BIND_ADDR", "0.0.0.0:4000"),
            ("REPLICA_PEERS", "beta=http://beta:4000"),
        ]
        .into_iter()
        .collect();

        let mut cfg = NodeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.node_id, NodeId::from("alpha"));
        assert_eq!(cfg.bind_addr.port(), 4000);
        assert_eq!(cfg.peer_ids(), vec![NodeId::from("beta")]);
        assert!(cfg.node_dir().ends_with("alpha"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: NodeConfig = serde_json::from_str(r#"{"node_id":"n1","catchup":{"batch_size":8}}"#).unwrap();
        assert_eq!(cfg.catchup.batch_size, 8);
        assert_eq!(cfg.catchup.max_rounds, CatchupConfig::default().max_rounds);
        assert_eq!(cfg.verify, VerifyConfig::default());
    }

    #[test]
    fn test_default_quorum_is_majority() {
        let cfg = CatchupConfig::default();
        assert_eq!(cfg.quorum_for(1), 1);
        assert_eq!(cfg.quorum_for(2), 2);
        assert_eq!(cfg.quorum_for(3), 2);
        let fixed = CatchupConfig { quorum: Some(1), ..Default::default() };
        assert_eq!(fixed.quorum_for(5), 1);
    }
}
