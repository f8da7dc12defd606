//! Leader election for a broker cluster: a Raft election state machine, its
//! durable vote record, and the binary codec for the messages it exchanges.

pub mod config;
pub mod network;
pub mod raft;

pub use config::ClusterConfig;
pub use network::{CodecError, NetworkError, RaftMessage};
pub use raft::{Raft, RaftConfig, RaftError, RaftHandle, RaftNode};
