mod config;
mod error;
mod log;
mod node;
mod peers;
mod state;
mod timer;
mod vote_store;

pub use self::config::RaftConfig;
pub use self::error::RaftError;
pub use self::log::{Log, LogEntry, LogInspector, LogPosition};
pub use self::node::RaftNode;
pub use self::peers::PeerRegistry;
pub use self::state::{
    CandidateState, ConsensusState, FollowerState, LeaderState, NodeRole, NodeStatus, Role,
};
pub use self::timer::{random_election_timeout, ElectionTimer, TimerFiring, TimerKind};
pub use self::vote_store::{FileVoteStore, MemoryVoteStore, VoteRecords, VoteStore, VoteStoreError};

use tokio::sync::{mpsc, oneshot};
// Use external log crate, not our own log module
use ::log::{debug, error, info};

use crate::network::{route_inbound, NetworkError, RaftMessage, RpcDispatcher, Transport};

/// Election epoch.
pub type Term = i32;
pub type NodeId = i32;
pub type LogIndex = i64;

const EVENT_QUEUE_DEPTH: usize = 1024;

/// Everything the consensus runtime reacts to, in arrival order.
#[derive(Debug)]
pub enum RaftEvent {
    Message(RaftMessage),
    Timer(TimerFiring),
    Status(oneshot::Sender<NodeStatus>),
    Shutdown,
}

/// Actions requested by [`RaftNode`] handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftOutput {
    Send { to: NodeId, message: RaftMessage },
    /// Replace any scheduled timer with a fresh randomized election timeout.
    ResetElectionTimer,
    /// Replace any scheduled timer with the next heartbeat tick.
    ScheduleHeartbeat,
    BecameLeader { term: Term },
    SteppedDown { term: Term },
}

/// Consensus runtime: one task owning the state machine and its timer.
///
/// All state changes happen on this task, one event at a time.
pub struct Raft<V, L, T> {
    node: RaftNode<V, L>,
    timer: ElectionTimer,
    dispatcher: RpcDispatcher<T>,
    events: mpsc::Receiver<RaftEvent>,
}

impl<V, L, T> Raft<V, L, T>
where
    V: VoteStore,
    L: LogInspector,
    T: Transport,
{
    /// Validates `config`, restores durable state and spawns the runtime task.
    /// Must be called from within a tokio runtime.
    pub fn start(config: &RaftConfig, vote_store: V, log: L, transport: T) -> Result<RaftHandle, RaftError> {
        config.validate()?;

        let peers = PeerRegistry::from_config(config);
        let node = RaftNode::new(peers.clone(), vote_store, log)?;
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let raft = Self {
            node,
            timer: ElectionTimer::new(config, &tx),
            dispatcher: RpcDispatcher::new(transport, peers),
            events: rx,
        };

        info!(
            "Starting consensus node {} in term {} with {} members",
            raft.node.id(),
            raft.node.current_term(),
            raft.node.peers().len()
        );
        tokio::spawn(raft.run());

        Ok(RaftHandle {
            id: config.node_id,
            events: tx,
        })
    }

    async fn run(mut self) {
        self.timer.restart_election();

        while let Some(event) = self.events.recv().await {
            match event {
                RaftEvent::Message(message) => {
                    let result = self.node.handle_message(message);
                    self.apply(result);
                }
                RaftEvent::Timer(firing) => {
                    if !self.timer.is_current(&firing) {
                        debug!("Node {} dropping stale {:?}", self.node.id(), firing);
                        continue;
                    }
                    let result = match firing.kind {
                        TimerKind::ElectionTimeout => self.node.handle_election_timeout(),
                        TimerKind::HeartbeatDue => self.node.handle_heartbeat_due(),
                    };
                    self.apply(result);
                }
                RaftEvent::Status(reply) => {
                    let _ = reply.send(self.node.status());
                }
                RaftEvent::Shutdown => break,
            }
        }

        self.timer.cancel();
        info!("Consensus node {} stopped", self.node.id());
    }

    fn apply(&mut self, result: Result<Vec<RaftOutput>, RaftError>) {
        let outputs = match result {
            Ok(outputs) => outputs,
            Err(e) => {
                error!("Node {} failed to handle event: {e}", self.node.id());
                // Keep the node able to make progress once the store recovers.
                if !self.node.is_leader() {
                    self.timer.restart_election();
                }
                return;
            }
        };

        for output in outputs {
            match output {
                RaftOutput::Send { to, message } => {
                    if let Err(e) = self.dispatcher.send(to, &message) {
                        debug!("Failed to send {} to {to}: {e}", message.kind());
                    }
                }
                RaftOutput::ResetElectionTimer => {
                    let delay = self.timer.restart_election();
                    debug!("Node {} election timeout in {:?}", self.node.id(), delay);
                }
                RaftOutput::ScheduleHeartbeat => self.timer.schedule_heartbeat(),
                RaftOutput::BecameLeader { term } => {
                    info!("Node {} is leader for term {term}", self.node.id());
                }
                RaftOutput::SteppedDown { term } => {
                    info!("Node {} stepped down in term {term}", self.node.id());
                }
            }
        }
    }
}

/// Cheap, cloneable access to a running consensus node.
///
/// The runtime stops on [`RaftHandle::shutdown`] or once every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct RaftHandle {
    id: NodeId,
    events: mpsc::Sender<RaftEvent>,
}

impl RaftHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub async fn deliver(&self, message: RaftMessage) -> Result<(), RaftError> {
        self.events
            .send(RaftEvent::Message(message))
            .await
            .map_err(|_| RaftError::NotRunning)
    }

    /// Decodes `frame` and queues it. Malformed frames are dropped with a
    /// warning and reported as [`NetworkError::Codec`].
    pub async fn deliver_frame(&self, frame: &[u8]) -> Result<(), NetworkError> {
        let message = route_inbound(frame)?;
        self.events
            .send(RaftEvent::Message(message))
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<NodeStatus, RaftError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(RaftEvent::Status(tx))
            .await
            .map_err(|_| RaftError::NotRunning)?;
        rx.await.map_err(|_| RaftError::NotRunning)
    }

    pub async fn shutdown(&self) {
        let _ = self.events.send(RaftEvent::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{spawn_inbound, LocalNetwork, VoteResponse};
    use std::time::Duration;
    use tokio::time::sleep;

    fn fast_config(id: NodeId, cluster: &[NodeId]) -> RaftConfig {
        let mut cfg = RaftConfig::new(id, "unused");
        for peer in cluster.iter().filter(|p| **p != id) {
            cfg.add_peer(*peer, "local");
        }
        cfg.election_timeout_min = 30;
        cfg.election_timeout_max = 60;
        cfg.heartbeat_interval = 10;
        cfg
    }

    #[tokio::test]
    async fn single_node_elects_itself() {
        let network = LocalNetwork::new();
        let (transport, _inbox) = network.register(1);
        let handle = Raft::start(
            &fast_config(1, &[1]),
            MemoryVoteStore::new(),
            LogPosition::default(),
            transport,
        )
        .expect("start");

        sleep(Duration::from_millis(200)).await;
        let status = handle.status().await.expect("status");
        assert_eq!(status.role, NodeRole::Leader);
        assert_eq!(status.leader_id, Some(1));
        assert!(status.term >= 1);

        handle.shutdown().await;
        sleep(Duration::from_millis(20)).await;
        assert!(matches!(handle.status().await, Err(RaftError::NotRunning)));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let network = LocalNetwork::new();
        let (transport, _inbox) = network.register(1);
        let mut cfg = fast_config(1, &[1]);
        cfg.heartbeat_interval = 500;

        let result = Raft::start(&cfg, MemoryVoteStore::new(), LogPosition::default(), transport);
        assert!(matches!(result, Err(RaftError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn malformed_frames_are_reported_and_dropped() {
        let network = LocalNetwork::new();
        let (transport, _inbox) = network.register(1);
        let handle = Raft::start(
            &fast_config(1, &[1, 2, 3]),
            MemoryVoteStore::new(),
            LogPosition::default(),
            transport,
        )
        .expect("start");

        let err = handle.deliver_frame(&[0xFF; 4]).await.unwrap_err();
        assert!(matches!(err, NetworkError::Codec(_)));

        // The node keeps serving afterwards.
        assert_eq!(handle.id(), 1);
        assert!(handle.status().await.is_ok());
    }

    #[tokio::test]
    async fn three_nodes_over_local_network_elect_one_leader() {
        let cluster = [1, 2, 3];
        let network = LocalNetwork::new();
        let mut handles = Vec::new();

        for id in cluster {
            let (transport, inbox) = network.register(id);
            let handle = Raft::start(
                &fast_config(id, &cluster),
                MemoryVoteStore::new(),
                LogPosition::default(),
                transport,
            )
            .expect("start");
            spawn_inbound(handle.clone(), inbox);
            handles.push(handle);
        }

        sleep(Duration::from_millis(500)).await;

        let mut leaders = Vec::new();
        for handle in &handles {
            let status = handle.status().await.expect("status");
            if status.role == NodeRole::Leader {
                leaders.push((status.id, status.term));
            }
        }
        assert_eq!(leaders.len(), 1, "expected exactly one leader: {leaders:?}");

        // Followers agree on who leads.
        let (leader, term) = leaders[0];
        for handle in &handles {
            let status = handle.status().await.expect("status");
            assert_eq!(status.term, term);
            assert_eq!(status.leader_id, Some(leader));
        }
    }

    #[tokio::test]
    async fn deliver_feeds_messages_to_the_node() {
        let network = LocalNetwork::new();
        let (transport, _inbox) = network.register(1);
        let handle = Raft::start(
            &fast_config(1, &[1, 2, 3]),
            MemoryVoteStore::new(),
            LogPosition::default(),
            transport,
        )
        .expect("start");

        let response = VoteResponse {
            id: 2,
            term: 9,
            granted: false,
        };
        handle.deliver(response.into()).await.expect("deliver");

        let status = handle.status().await.expect("status");
        assert_eq!(status.term, 9);
        assert_eq!(status.role, NodeRole::Follower);
    }
}
