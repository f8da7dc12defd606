use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::log::LogPosition;
use super::{NodeId, Term};
use crate::network::AppendEntries;

/// Field-less view of [`Role`], for status reporting and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerState;

/// Vote tally for the running election. Only exists while the node is a
/// candidate, so it is dropped on any role change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateState {
    votes_received: BTreeSet<NodeId>,
}

impl CandidateState {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            votes_received: BTreeSet::from([self_id]),
        }
    }

    /// Adds a granted vote and returns the tally. Repeated grants from the same
    /// voter count once.
    pub fn record_grant(&mut self, voter: NodeId) -> usize {
        self.votes_received.insert(voter);
        self.votes_received.len()
    }

    pub fn votes_received(&self) -> &BTreeSet<NodeId> {
        &self.votes_received
    }

    pub fn has_quorum(&self, quorum: usize) -> bool {
        self.votes_received.len() >= quorum
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderState;

impl LeaderState {
    pub fn heartbeat(&self, leader_id: NodeId, term: Term, last: LogPosition) -> AppendEntries {
        AppendEntries {
            leader_id,
            term,
            prev_log_term: last.term,
            prev_log_index: last.index,
            commit_position: last.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    pub fn kind(&self) -> NodeRole {
        match self {
            Role::Follower(_) => NodeRole::Follower,
            Role::Candidate(_) => NodeRole::Candidate,
            Role::Leader(_) => NodeRole::Leader,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Follower(FollowerState)
    }
}

/// State owned by the consensus state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusState {
    pub current_term: Term,
    pub role: Role,
    pub leader_id: Option<NodeId>,
    // Mirror of the durable record for `current_term`, for status only.
    pub voted_for: Option<NodeId>,
}

impl ConsensusState {
    pub fn votes_received(&self) -> Option<&BTreeSet<NodeId>> {
        match &self.role {
            Role::Candidate(candidate) => Some(candidate.votes_received()),
            _ => None,
        }
    }
}

/// Point-in-time snapshot of a node, safe to hand out of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub term: Term,
    pub role: NodeRole,
    pub leader_id: Option<NodeId>,
    pub voted_for: Option<NodeId>,
    pub votes_received: Vec<NodeId>,
}
