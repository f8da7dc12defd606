use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use super::{LogIndex, RaftError, Term};

/// Read-only view of the local log used when comparing candidates.
pub trait LogInspector: Send + 'static {
    fn last_log_term(&self) -> Term;
    fn last_log_index(&self) -> LogIndex;
}

/// A fixed log position. Useful for nodes whose log lives elsewhere and for
/// simulations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    pub term: Term,
    pub index: LogIndex,
}

impl LogPosition {
    pub fn new(term: Term, index: LogIndex) -> Self {
        Self { term, index }
    }
}

impl LogInspector for LogPosition {
    fn last_log_term(&self) -> Term {
        self.term
    }

    fn last_log_index(&self) -> LogIndex {
        self.index
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct LogEntry {
    pub term: Term,
    pub command: Vec<u8>,
}

/// Minimal persisted entry log, read by elections for its last position.
/// Index 0 holds a dummy entry with term 0, so an empty log reports `(0, 0)`.
/// `append` is the only write path; the CLI uses it to seed a node's log.
pub struct Log {
    entries: Vec<LogEntry>,
    log_file: PathBuf,
}

impl Log {
    pub fn open(data_dir: &str) -> Result<Self, RaftError> {
        let log_dir = PathBuf::from(data_dir).join("raft");
        std::fs::create_dir_all(&log_dir)?;

        let mut log = Self {
            entries: Vec::new(),
            log_file: log_dir.join("log.bin"),
        };

        if log.log_file.exists() {
            log.load_from_disk()?;
        }

        if log.entries.is_empty() {
            log.entries.push(LogEntry {
                term: 0,
                command: Vec::new(),
            });
        }

        Ok(log)
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.len() as LogIndex - 1
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index < 0 {
            return None;
        }
        self.entries.get(index as usize).map(|e| e.term)
    }

    pub fn append(&mut self, entry: LogEntry) -> Result<LogIndex, RaftError> {
        self.entries.push(entry);
        self.save_to_disk()?;

        Ok(self.last_index())
    }

    fn load_from_disk(&mut self) -> Result<(), RaftError> {
        let mut file = File::open(&self.log_file)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        if buffer.is_empty() {
            return Ok(());
        }

        let (entries, _): (Vec<LogEntry>, usize) =
            bincode::decode_from_slice(&buffer, bincode::config::standard())
                .map_err(|e| RaftError::SerializationError(e.to_string()))?;

        self.entries = entries;

        Ok(())
    }

    fn save_to_disk(&self) -> Result<(), RaftError> {
        let encoded = bincode::encode_to_vec(&self.entries, bincode::config::standard())
            .map_err(|e| RaftError::SerializationError(e.to_string()))?;

        let mut file = File::create(&self.log_file)?;
        file.write_all(&encoded)?;
        file.sync_all()?;

        Ok(())
    }
}

impl LogInspector for Log {
    fn last_log_term(&self) -> Term {
        self.term_at(self.last_index()).unwrap_or(0)
    }

    fn last_log_index(&self) -> LogIndex {
        self.last_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_log_reports_position_zero() {
        let tmp = tempdir().expect("tempdir");
        let log = Log::open(tmp.path().to_str().unwrap()).expect("open");

        assert_eq!(log.last_index(), 0);
        assert_eq!(log.term_at(0), Some(0));
        assert_eq!(log.last_log_term(), 0);
        assert_eq!(log.last_log_index(), 0);
    }

    #[test]
    fn appended_entries_survive_reopen() {
        let tmp = tempdir().expect("tempdir");
        let data_dir = tmp.path().to_string_lossy().to_string();

        {
            let mut log = Log::open(&data_dir).expect("open");
            let idx1 = log
                .append(LogEntry {
                    term: 1,
                    command: b"cmd1".to_vec(),
                })
                .expect("append 1");
            let idx2 = log
                .append(LogEntry {
                    term: 2,
                    command: b"cmd2".to_vec(),
                })
                .expect("append 2");

            assert_eq!(idx1, 1);
            assert_eq!(idx2, 2);
        }

        let log = Log::open(&data_dir).expect("reopen");
        assert_eq!(log.last_log_index(), 2);
        assert_eq!(log.last_log_term(), 2);
        assert_eq!(log.term_at(1), Some(1));
        assert!(log.term_at(3).is_none());
        assert!(log.term_at(-1).is_none());
    }

    #[test]
    fn seeded_log_reports_last_position() {
        let tmp = tempdir().expect("tempdir");
        let mut log = Log::open(tmp.path().to_str().unwrap()).expect("open");
        for term in [1, 1, 3] {
            log.append(LogEntry {
                term,
                command: vec![],
            })
            .expect("append");
        }

        let own = LogPosition::new(log.last_log_term(), log.last_log_index());
        assert_eq!(own, LogPosition::new(3, 3));
        assert!(LogPosition::new(3, 2) < own);
        assert!(LogPosition::new(4, 0) > own);
    }

    #[test]
    fn log_position_orders_by_term_then_index() {
        assert!(LogPosition::new(2, 1) > LogPosition::new(1, 100));
        assert!(LogPosition::new(2, 5) > LogPosition::new(2, 4));
        assert_eq!(LogPosition::default(), LogPosition::new(0, 0));
    }
}
