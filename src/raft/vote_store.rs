//! Durable record of the current term and the vote cast in it.
//!
//! A node must never vote for two different candidates in the same term, even
//! across a crash. The state machine therefore writes the vote through a
//! [`VoteStore`] and only answers the candidate once the write returned.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{NodeId, Term};

#[derive(Error, Debug)]
pub enum VoteStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Term {term} already has a vote for {existing}, refusing {requested}")]
    AlreadyVoted {
        term: Term,
        existing: NodeId,
        requested: NodeId,
    },

    #[error("Term {term} is behind the stored term {current}")]
    StaleTerm { term: Term, current: Term },

    #[error("Vote store unavailable")]
    Unavailable,
}

/// Durable vote/term persistence used by the consensus state machine.
pub trait VoteStore: Send + 'static {
    /// Records `candidate` as the vote for `term`. Returns only once the record
    /// is durable. Re-recording the same vote is a no-op.
    fn persist_vote(&mut self, term: Term, candidate: NodeId) -> Result<(), VoteStoreError>;

    fn load_vote(&self, term: Term) -> Result<Option<NodeId>, VoteStoreError>;

    /// Records that `term` has been adopted without casting a vote in it.
    fn persist_term(&mut self, term: Term) -> Result<(), VoteStoreError>;

    /// Highest term ever persisted, 0 for a fresh store.
    fn load_term(&self) -> Result<Term, VoteStoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct VoteRecords {
    current_term: Term,
    votes: BTreeMap<Term, NodeId>,
}

impl VoteRecords {
    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn vote(&self, term: Term) -> Option<NodeId> {
        self.votes.get(&term).copied()
    }

    /// Returns false when the record was already present.
    fn record_vote(&mut self, term: Term, candidate: NodeId) -> Result<bool, VoteStoreError> {
        if term < self.current_term {
            return Err(VoteStoreError::StaleTerm {
                term,
                current: self.current_term,
            });
        }
        match self.votes.get(&term) {
            Some(&existing) if existing == candidate => return Ok(false),
            Some(&existing) => {
                return Err(VoteStoreError::AlreadyVoted {
                    term,
                    existing,
                    requested: candidate,
                })
            }
            None => {}
        }

        self.current_term = term;
        self.votes.insert(term, candidate);
        self.prune();
        Ok(true)
    }

    fn record_term(&mut self, term: Term) -> Result<bool, VoteStoreError> {
        if term < self.current_term {
            return Err(VoteStoreError::StaleTerm {
                term,
                current: self.current_term,
            });
        }
        if term == self.current_term {
            return Ok(false);
        }
        self.current_term = term;
        self.prune();
        Ok(true)
    }

    // Votes for terms behind the current one can never be consulted again.
    fn prune(&mut self) {
        let current = self.current_term;
        self.votes.retain(|term, _| *term >= current);
    }
}

/// File-backed store. Each change rewrites `raft/vote.bin` through a temp
/// file, `fsync` and rename.
pub struct FileVoteStore {
    path: PathBuf,
    records: VoteRecords,
}

impl FileVoteStore {
    pub fn open(data_dir: &str) -> Result<Self, VoteStoreError> {
        let dir = PathBuf::from(data_dir).join("raft");
        fs::create_dir_all(&dir)?;

        let path = dir.join("vote.bin");
        let records = if path.exists() {
            Self::read(&path)?
        } else {
            VoteRecords::default()
        };

        debug!(
            "Opened vote store at {:?} (term {})",
            path, records.current_term
        );
        Ok(Self { path, records })
    }

    pub fn records(&self) -> &VoteRecords {
        &self.records
    }

    fn read(path: &Path) -> Result<VoteRecords, VoteStoreError> {
        let buffer = fs::read(path)?;
        if buffer.is_empty() {
            return Ok(VoteRecords::default());
        }
        let (records, _): (VoteRecords, usize) =
            bincode::decode_from_slice(&buffer, bincode::config::standard())
                .map_err(|e| VoteStoreError::Serialization(e.to_string()))?;
        Ok(records)
    }

    fn write(&self, records: &VoteRecords) -> Result<(), VoteStoreError> {
        let encoded = bincode::encode_to_vec(records, bincode::config::standard())
            .map_err(|e| VoteStoreError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("bin.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    // Applies `change` to a copy, and only adopts it once it is on disk.
    fn update<F>(&mut self, change: F) -> Result<(), VoteStoreError>
    where
        F: FnOnce(&mut VoteRecords) -> Result<bool, VoteStoreError>,
    {
        let mut next = self.records.clone();
        if change(&mut next)? {
            self.write(&next)?;
            self.records = next;
        }
        Ok(())
    }
}

impl VoteStore for FileVoteStore {
    fn persist_vote(&mut self, term: Term, candidate: NodeId) -> Result<(), VoteStoreError> {
        self.update(|records| records.record_vote(term, candidate))
    }

    fn load_vote(&self, term: Term) -> Result<Option<NodeId>, VoteStoreError> {
        Ok(self.records.vote(term))
    }

    fn persist_term(&mut self, term: Term) -> Result<(), VoteStoreError> {
        self.update(|records| records.record_term(term))
    }

    fn load_term(&self) -> Result<Term, VoteStoreError> {
        Ok(self.records.current_term)
    }
}

/// In-memory store for simulations and tests. Keeps a history of every
/// `persist_vote` call and can be told to fail writes.
#[derive(Debug, Default)]
pub struct MemoryVoteStore {
    records: VoteRecords,
    vote_writes: Vec<(Term, NodeId)>,
    fail_writes: bool,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful `persist_vote` call, including ones that found the
    /// record already present.
    pub fn vote_writes(&self) -> &[(Term, NodeId)] {
        &self.vote_writes
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl VoteStore for MemoryVoteStore {
    fn persist_vote(&mut self, term: Term, candidate: NodeId) -> Result<(), VoteStoreError> {
        if self.fail_writes {
            return Err(VoteStoreError::Unavailable);
        }
        self.records.record_vote(term, candidate)?;
        self.vote_writes.push((term, candidate));
        Ok(())
    }

    fn load_vote(&self, term: Term) -> Result<Option<NodeId>, VoteStoreError> {
        Ok(self.records.vote(term))
    }

    fn persist_term(&mut self, term: Term) -> Result<(), VoteStoreError> {
        if self.fail_writes {
            return Err(VoteStoreError::Unavailable);
        }
        self.records.record_term(term).map(|_| ())
    }

    fn load_term(&self) -> Result<Term, VoteStoreError> {
        Ok(self.records.current_term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_store_starts_at_term_zero_without_vote() {
        let tmp = tempdir().expect("tempdir");
        let store = FileVoteStore::open(tmp.path().to_str().unwrap()).expect("open");

        assert_eq!(store.load_term().unwrap(), 0);
        assert_eq!(store.load_vote(0).unwrap(), None);
    }

    #[test]
    fn vote_survives_restart() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().to_str().unwrap();

        {
            let mut store = FileVoteStore::open(dir).expect("open");
            store.persist_vote(3, 7).expect("persist vote");
        }

        let mut store = FileVoteStore::open(dir).expect("reopen");
        assert_eq!(store.load_term().unwrap(), 3);
        assert_eq!(store.load_vote(3).unwrap(), Some(7));

        // A different candidate for the same term is refused after restart.
        let err = store.persist_vote(3, 8).unwrap_err();
        match err {
            VoteStoreError::AlreadyVoted {
                term,
                existing,
                requested,
            } => {
                assert_eq!((term, existing, requested), (3, 7, 8));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Same candidate again is fine.
        store.persist_vote(3, 7).expect("idempotent");
    }

    #[test]
    fn adopted_term_survives_restart_and_clears_old_votes() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().to_str().unwrap();

        {
            let mut store = FileVoteStore::open(dir).expect("open");
            store.persist_vote(1, 2).expect("vote");
            store.persist_term(5).expect("term");
        }

        let store = FileVoteStore::open(dir).expect("reopen");
        assert_eq!(store.load_term().unwrap(), 5);
        assert_eq!(store.load_vote(5).unwrap(), None);
        assert_eq!(store.load_vote(1).unwrap(), None);
        assert_eq!(store.records().current_term(), 5);
    }

    #[test]
    fn stale_terms_are_rejected() {
        let mut store = MemoryVoteStore::new();
        store.persist_term(4).unwrap();

        assert!(matches!(
            store.persist_vote(3, 1),
            Err(VoteStoreError::StaleTerm {
                term: 3,
                current: 4
            })
        ));
        assert!(matches!(
            store.persist_term(2),
            Err(VoteStoreError::StaleTerm { .. })
        ));
    }

    #[test]
    fn memory_store_tracks_every_call_and_injected_failures() {
        let mut store = MemoryVoteStore::new();
        store.persist_vote(1, 1).unwrap();
        store.persist_vote(1, 1).unwrap();
        store.persist_vote(2, 3).unwrap();
        assert_eq!(store.vote_writes(), &[(1, 1), (1, 1), (2, 3)]);
        assert!(store.persist_vote(2, 4).is_err());
        assert_eq!(store.vote_writes().len(), 3);

        store.set_fail_writes(true);
        assert!(matches!(
            store.persist_vote(3, 1),
            Err(VoteStoreError::Unavailable)
        ));
        assert_eq!(store.load_vote(3).unwrap(), None);
    }
}
