use serde::{Deserialize, Serialize};

use crate::raft::{LogIndex, NodeId, Term};

/// Sent by a candidate to every peer when it starts an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVote {
    pub candidate_id: NodeId,
    pub term: Term,
    pub last_log_term: Term,
    pub last_log_index: LogIndex,
}

/// Answer to a [`RequestVote`]. `term` is the responder's current term so a
/// stale candidate can catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub id: NodeId,
    pub term: Term,
    pub granted: bool,
}

/// Leader heartbeat. Carries no entries; replication happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub leader_id: NodeId,
    pub term: Term,
    pub prev_log_term: Term,
    pub prev_log_index: LogIndex,
    pub commit_position: LogIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub id: NodeId,
    pub term: Term,
    pub success: bool,
}

/// Every message the consensus core sends or receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVote),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntries),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl RaftMessage {
    /// Node that produced the message.
    pub fn sender(&self) -> NodeId {
        match self {
            RaftMessage::RequestVote(m) => m.candidate_id,
            RaftMessage::VoteResponse(m) => m.id,
            RaftMessage::AppendEntries(m) => m.leader_id,
            RaftMessage::AppendEntriesResponse(m) => m.id,
        }
    }

    pub fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote(m) => m.term,
            RaftMessage::VoteResponse(m) => m.term,
            RaftMessage::AppendEntries(m) => m.term,
            RaftMessage::AppendEntriesResponse(m) => m.term,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RaftMessage::RequestVote(_) => "RequestVote",
            RaftMessage::VoteResponse(_) => "VoteResponse",
            RaftMessage::AppendEntries(_) => "AppendEntries",
            RaftMessage::AppendEntriesResponse(_) => "AppendEntriesResponse",
        }
    }
}

impl From<RequestVote> for RaftMessage {
    fn from(m: RequestVote) -> Self {
        RaftMessage::RequestVote(m)
    }
}

impl From<VoteResponse> for RaftMessage {
    fn from(m: VoteResponse) -> Self {
        RaftMessage::VoteResponse(m)
    }
}

impl From<AppendEntries> for RaftMessage {
    fn from(m: AppendEntries) -> Self {
        RaftMessage::AppendEntries(m)
    }
}

impl From<AppendEntriesResponse> for RaftMessage {
    fn from(m: AppendEntriesResponse) -> Self {
        RaftMessage::AppendEntriesResponse(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_report_sender_and_term() {
        let msg: RaftMessage = RequestVote {
            candidate_id: 3,
            term: 7,
            last_log_term: 6,
            last_log_index: 42,
        }
        .into();
        assert_eq!(msg.sender(), 3);
        assert_eq!(msg.term(), 7);
        assert_eq!(msg.kind(), "RequestVote");

        let msg: RaftMessage = AppendEntriesResponse {
            id: 2,
            term: 9,
            success: true,
        }
        .into();
        assert_eq!(msg.sender(), 2);
        assert_eq!(msg.term(), 9);
    }
}
