use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{NodeId, RaftError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    pub node_id: NodeId,
    pub data_dir: String,
    pub peers: BTreeMap<NodeId, String>, // node_id -> address
    pub election_timeout_min: u64,       // in milliseconds
    pub election_timeout_max: u64,       // in milliseconds
    pub heartbeat_interval: u64,         // in milliseconds
}

impl RaftConfig {
    pub fn new(node_id: NodeId, data_dir: &str) -> Self {
        Self {
            node_id,
            data_dir: data_dir.to_string(),
            peers: BTreeMap::new(),
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
        }
    }

    pub fn add_peer(&mut self, peer_id: NodeId, address: &str) {
        self.peers.insert(peer_id, address.to_string());
    }

    pub fn election_timeout_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.election_timeout_min),
            Duration::from_millis(self.election_timeout_max),
        )
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    /// The heartbeat interval must stay below the shortest election timeout.
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.election_timeout_min == 0 || self.heartbeat_interval == 0 {
            return Err(RaftError::InvalidConfig(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election_timeout_min ({}) exceeds election_timeout_max ({})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat_interval ({}) must be below election_timeout_min ({})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        Ok(())
    }
}
