use ::log::{debug, error, info, warn};

use super::log::{LogInspector, LogPosition};
use super::peers::PeerRegistry;
use super::state::{CandidateState, ConsensusState, FollowerState, LeaderState, NodeRole, NodeStatus, Role};
use super::vote_store::VoteStore;
use super::{NodeId, RaftError, RaftOutput, Term};
use crate::network::{AppendEntries, AppendEntriesResponse, RaftMessage, RequestVote, VoteResponse};

/// The consensus state machine of one node.
///
/// Pure with respect to I/O other than the vote store: every handler consumes
/// one event and returns the actions the runtime has to carry out, in order.
/// Any vote or term change is durable before a handler returns an action that
/// depends on it.
pub struct RaftNode<V, L> {
    id: NodeId,
    peers: PeerRegistry,
    state: ConsensusState,
    vote_store: V,
    log: L,
}

impl<V: VoteStore, L: LogInspector> RaftNode<V, L> {
    /// Restores term and vote from `vote_store` and starts as a follower.
    pub fn new(peers: PeerRegistry, vote_store: V, log: L) -> Result<Self, RaftError> {
        let current_term = vote_store.load_term()?;
        let voted_for = vote_store.load_vote(current_term)?;

        Ok(Self {
            id: peers.self_id(),
            peers,
            state: ConsensusState {
                current_term,
                role: Role::default(),
                leader_id: None,
                voted_for,
            },
            vote_store,
            log,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn role(&self) -> NodeRole {
        self.state.role.kind()
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state.role, Role::Leader(_))
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.state.leader_id
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn vote_store(&self) -> &V {
        &self.vote_store
    }

    pub fn vote_store_mut(&mut self) -> &mut V {
        &mut self.vote_store
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            term: self.state.current_term,
            role: self.role(),
            leader_id: self.state.leader_id,
            voted_for: self.state.voted_for,
            votes_received: self
                .state
                .votes_received()
                .map(|votes| votes.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn last_log(&self) -> LogPosition {
        LogPosition::new(self.log.last_log_term(), self.log.last_log_index())
    }

    /// Election timer expired without leader contact: start a new term.
    pub fn handle_election_timeout(&mut self) -> Result<Vec<RaftOutput>, RaftError> {
        if self.is_leader() {
            debug!("Node {} ignoring election timeout while leader", self.id);
            return Ok(Vec::new());
        }

        let term = self
            .state
            .current_term
            .checked_add(1)
            .ok_or(RaftError::TermOverflow(self.state.current_term))?;

        // The self-vote must be durable before any RequestVote leaves.
        self.vote_store.persist_vote(term, self.id)?;

        info!(
            "Node {} starting election for term {} ({:?} in term {})",
            self.id,
            term,
            self.role(),
            self.state.current_term
        );
        self.state.current_term = term;
        self.state.voted_for = Some(self.id);
        self.state.leader_id = None;
        let candidate = CandidateState::new(self.id);
        let won = candidate.has_quorum(self.peers.quorum_size());
        self.state.role = Role::Candidate(candidate);

        let mut outputs = Vec::new();
        if won {
            self.become_leader(&mut outputs);
            return Ok(outputs);
        }

        let last = self.last_log();
        let request = RequestVote {
            candidate_id: self.id,
            term,
            last_log_term: last.term,
            last_log_index: last.index,
        };
        self.broadcast(request.into(), &mut outputs);
        outputs.push(RaftOutput::ResetElectionTimer);

        Ok(outputs)
    }

    pub fn handle_heartbeat_due(&mut self) -> Result<Vec<RaftOutput>, RaftError> {
        let (id, term, last) = (self.id, self.state.current_term, self.last_log());
        let heartbeat = match &self.state.role {
            Role::Leader(leader) => Some(leader.heartbeat(id, term, last)),
            _ => None,
        };
        let Some(heartbeat) = heartbeat else {
            debug!("Node {} ignoring heartbeat tick as {:?}", self.id, self.role());
            return Ok(Vec::new());
        };

        let mut outputs = Vec::new();
        self.broadcast(heartbeat.into(), &mut outputs);
        outputs.push(RaftOutput::ScheduleHeartbeat);
        Ok(outputs)
    }

    pub fn handle_message(&mut self, message: RaftMessage) -> Result<Vec<RaftOutput>, RaftError> {
        let from = message.sender();
        if from == self.id || !self.peers.contains(from) {
            warn!(
                "Node {} ignoring {} from non-member {from}",
                self.id,
                message.kind()
            );
            return Ok(Vec::new());
        }
        debug!(
            "Node {} received {} from {from} for term {} (current {})",
            self.id,
            message.kind(),
            message.term(),
            self.state.current_term
        );

        match message {
            RaftMessage::RequestVote(request) => self.handle_request_vote(request),
            RaftMessage::VoteResponse(response) => self.handle_vote_response(response),
            RaftMessage::AppendEntries(request) => self.handle_append_entries(request),
            RaftMessage::AppendEntriesResponse(response) => {
                self.handle_append_entries_response(response)
            }
        }
    }

    fn handle_request_vote(&mut self, request: RequestVote) -> Result<Vec<RaftOutput>, RaftError> {
        let mut outputs = Vec::new();

        if request.term < self.state.current_term {
            debug!(
                "Node {} denying stale vote request from {} (term {} < {})",
                self.id, request.candidate_id, request.term, self.state.current_term
            );
            outputs.push(self.vote_reply(request.candidate_id, false));
            return Ok(outputs);
        }

        if request.term > self.state.current_term {
            self.step_down(request.term, &mut outputs)?;
        }

        let term = self.state.current_term;
        let candidate_log = LogPosition::new(request.last_log_term, request.last_log_index);
        let log_ok = candidate_log >= self.last_log();
        let (vote_free, already_ours) = match self.vote_store.load_vote(term)? {
            None => (true, false),
            Some(existing) if existing == request.candidate_id => (true, true),
            Some(_) => (false, false),
        };

        let granted = log_ok && vote_free;
        if granted {
            // A re-delivered request finds its vote already durable.
            if !already_ours {
                self.vote_store.persist_vote(term, request.candidate_id)?;
            }
            self.state.voted_for = Some(request.candidate_id);
            push_unique(&mut outputs, RaftOutput::ResetElectionTimer);
        }

        debug!(
            "Node {} {} vote for {} in term {} (log_ok={log_ok}, vote_free={vote_free})",
            self.id,
            if granted { "granted" } else { "denied" },
            request.candidate_id,
            term
        );
        outputs.push(self.vote_reply(request.candidate_id, granted));
        Ok(outputs)
    }

    fn handle_vote_response(&mut self, response: VoteResponse) -> Result<Vec<RaftOutput>, RaftError> {
        let mut outputs = Vec::new();

        if response.term > self.state.current_term {
            self.step_down(response.term, &mut outputs)?;
            return Ok(outputs);
        }
        if response.term < self.state.current_term {
            debug!(
                "Node {} discarding stale vote response from {} (term {})",
                self.id, response.id, response.term
            );
            return Ok(outputs);
        }

        let quorum = self.peers.quorum_size();
        let won = match &mut self.state.role {
            Role::Candidate(candidate) if response.granted => {
                let tally = candidate.record_grant(response.id);
                debug!(
                    "Node {} has {tally}/{quorum} votes in term {}",
                    self.id, self.state.current_term
                );
                candidate.has_quorum(quorum)
            }
            _ => false,
        };

        if won {
            self.become_leader(&mut outputs);
        }
        Ok(outputs)
    }

    fn handle_append_entries(&mut self, request: AppendEntries) -> Result<Vec<RaftOutput>, RaftError> {
        let mut outputs = Vec::new();

        if request.term < self.state.current_term {
            outputs.push(self.append_reply(request.leader_id, false));
            return Ok(outputs);
        }

        if request.term > self.state.current_term {
            self.step_down(request.term, &mut outputs)?;
        }

        match self.state.role {
            Role::Leader(_) => {
                error!(
                    "Node {} is leader of term {} but received AppendEntries from {}",
                    self.id, self.state.current_term, request.leader_id
                );
                outputs.push(self.append_reply(request.leader_id, false));
                return Ok(outputs);
            }
            Role::Candidate(_) => {
                info!(
                    "Node {} found leader {} for term {}, stepping back to follower",
                    self.id, request.leader_id, self.state.current_term
                );
                self.state.role = Role::Follower(FollowerState);
            }
            Role::Follower(_) => {}
        }

        if self.state.leader_id != Some(request.leader_id) {
            info!(
                "Node {} following leader {} in term {}",
                self.id, request.leader_id, self.state.current_term
            );
            self.state.leader_id = Some(request.leader_id);
        }

        push_unique(&mut outputs, RaftOutput::ResetElectionTimer);
        outputs.push(self.append_reply(request.leader_id, true));
        Ok(outputs)
    }

    fn handle_append_entries_response(
        &mut self,
        response: AppendEntriesResponse,
    ) -> Result<Vec<RaftOutput>, RaftError> {
        let mut outputs = Vec::new();
        if response.term > self.state.current_term {
            self.step_down(response.term, &mut outputs)?;
        }
        Ok(outputs)
    }

    /// Adopts a newer term and becomes follower with no vote cast in it.
    fn step_down(&mut self, term: Term, outputs: &mut Vec<RaftOutput>) -> Result<(), RaftError> {
        self.vote_store.persist_term(term)?;

        info!(
            "Node {} adopting term {} (was {:?} in term {})",
            self.id,
            term,
            self.role(),
            self.state.current_term
        );
        let was_leader = self.is_leader();
        self.state.current_term = term;
        self.state.role = Role::Follower(FollowerState);
        self.state.leader_id = None;
        self.state.voted_for = None;

        if was_leader {
            outputs.push(RaftOutput::SteppedDown { term });
        }
        push_unique(outputs, RaftOutput::ResetElectionTimer);
        Ok(())
    }

    fn become_leader(&mut self, outputs: &mut Vec<RaftOutput>) {
        let term = self.state.current_term;
        info!("Node {} becoming leader for term {}", self.id, term);

        let leader = LeaderState;
        let heartbeat = leader.heartbeat(self.id, term, self.last_log());
        self.state.role = Role::Leader(leader);
        self.state.leader_id = Some(self.id);

        outputs.retain(|o| *o != RaftOutput::ResetElectionTimer);
        outputs.push(RaftOutput::BecameLeader { term });
        outputs.push(RaftOutput::ScheduleHeartbeat);
        self.broadcast(heartbeat.into(), outputs);
    }

    fn broadcast(&self, message: RaftMessage, outputs: &mut Vec<RaftOutput>) {
        outputs.extend(self.peers.peers().map(|to| RaftOutput::Send { to, message }));
    }

    fn vote_reply(&self, to: NodeId, granted: bool) -> RaftOutput {
        RaftOutput::Send {
            to,
            message: VoteResponse {
                id: self.id,
                term: self.state.current_term,
                granted,
            }
            .into(),
        }
    }

    fn append_reply(&self, to: NodeId, success: bool) -> RaftOutput {
        RaftOutput::Send {
            to,
            message: AppendEntriesResponse {
                id: self.id,
                term: self.state.current_term,
                success,
            }
            .into(),
        }
    }
}

fn push_unique(outputs: &mut Vec<RaftOutput>, output: RaftOutput) {
    if !outputs.contains(&output) {
        outputs.push(output);
    }
}
