use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::raft::{NodeId, RaftConfig, RaftError};

/// Cluster description shared by every node, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<PeerConfig>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub address: String,
}

/// Timer settings in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            data_dir: default_data_dir(),
            timing: TimingConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// A cluster of `ids` on loopback addresses, as used by the demo.
    pub fn local(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let nodes = ids
            .into_iter()
            .map(|id| PeerConfig {
                id,
                address: format!("local://{id}"),
            })
            .collect();
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RaftError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| RaftError::SerializationError(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RaftError> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| RaftError::SerializationError(e.to_string()))?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }

    /// Builds the per-node configuration. Each node keeps its state under
    /// `<data_dir>/node-<id>`.
    pub fn raft_config_for(&self, node_id: NodeId) -> Result<RaftConfig, RaftError> {
        if !self.nodes.iter().any(|n| n.id == node_id) {
            return Err(RaftError::InvalidConfig(format!(
                "node {node_id} is not listed in the cluster"
            )));
        }

        let data_dir = Path::new(&self.data_dir).join(format!("node-{node_id}"));
        let mut config = RaftConfig::new(node_id, &data_dir.to_string_lossy());
        for peer in self.nodes.iter().filter(|n| n.id != node_id) {
            config.add_peer(peer.id, &peer.address);
        }
        config.election_timeout_min = self.timing.election_timeout_min;
        config.election_timeout_max = self.timing.election_timeout_max;
        config.heartbeat_interval = self.timing.heartbeat_interval;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: ClusterConfig =
            serde_json::from_str(r#"{"nodes":[{"id":1,"address":"a"}]}"#).expect("parse");
        assert_eq!(cfg.data_dir, "./data");
        assert_eq!(cfg.timing, TimingConfig::default());
        assert_eq!(cfg.node_ids(), vec![1]);
    }

    #[test]
    fn raft_config_lists_every_other_node() {
        let cfg = ClusterConfig::local([1, 2, 3]);
        let raft = cfg.raft_config_for(2).expect("config");

        assert_eq!(raft.node_id, 2);
        assert_eq!(raft.peers.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert!(raft.data_dir.ends_with("node-2"));
        assert_eq!(raft.heartbeat_interval, 50);
    }

    #[test]
    fn unknown_node_is_rejected() {
        let cfg = ClusterConfig::local([1, 2, 3]);
        assert!(matches!(cfg.raft_config_for(9), Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn invalid_timing_is_rejected() {
        let mut cfg = ClusterConfig::local([1, 2]);
        cfg.timing.heartbeat_interval = cfg.timing.election_timeout_min;
        assert!(matches!(cfg.raft_config_for(1), Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn save_then_load() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("cluster.json");

        let mut cfg = ClusterConfig::local([4, 5, 6]);
        cfg.timing.election_timeout_max = 400;
        cfg.save(&path).expect("save");

        let loaded = ClusterConfig::load(&path).expect("load");
        assert_eq!(loaded.node_ids(), vec![4, 5, 6]);
        assert_eq!(loaded.timing.election_timeout_max, 400);
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("cluster.json");
        fs::write(&path, "{ not json").expect("write");

        assert!(matches!(
            ClusterConfig::load(&path),
            Err(RaftError::SerializationError(_))
        ));
    }
}
