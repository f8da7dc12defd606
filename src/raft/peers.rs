use std::collections::BTreeSet;

use super::config::RaftConfig;
use super::NodeId;

/// Static cluster membership as seen from one node.
///
/// Membership never changes while the registry is in use; a new registry is
/// needed for a new configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRegistry {
    self_id: NodeId,
    members: BTreeSet<NodeId>,
}

impl PeerRegistry {
    /// Builds a registry. `self_id` is always a member, whether or not it is
    /// listed in `members`.
    pub fn new<I>(self_id: NodeId, members: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut members: BTreeSet<NodeId> = members.into_iter().collect();
        members.insert(self_id);
        Self { self_id, members }
    }

    pub fn from_config(config: &RaftConfig) -> Self {
        Self::new(config.node_id, config.peers.keys().copied())
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// All members including self, in ascending id order.
    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied()
    }

    /// Members other than self.
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        let self_id = self.self_id;
        self.members.iter().copied().filter(move |id| *id != self_id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }
}
