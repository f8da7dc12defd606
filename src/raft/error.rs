use thiserror::Error;

use super::vote_store::VoteStoreError;
use super::Term;

#[derive(Error, Debug)]
pub enum RaftError {
    /// The vote or term could not be made durable. Nothing that depends on
    /// it has been sent.
    #[error("Durability failure: {0}")]
    Durability(#[from] VoteStoreError),

    #[error("Term overflow after term {0}")]
    TermOverflow(Term),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Consensus runtime is not running")]
    NotRunning,
}
