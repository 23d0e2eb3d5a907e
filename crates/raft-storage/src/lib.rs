//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: implements raft-core's RaftLog for the replica's log; term and vote are
//!            persisted by raft-server through the Storage trait before messages go out
//! what: Storage trait, StorageError, FileStorage implementation, InMemoryStorage for testing

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use raft_core::{InMemoryRaftLog, LogError, LogIndex, MemberId, RaftLog, RaftLogEntry, ReadableRaftLog, Term};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of a durable store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failure: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt {file}: {source}")]
    Corrupt {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for LogError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(io) => LogError::Io(io),
            corrupt @ StorageError::Corrupt { .. } => {
                LogError::Io(io::Error::new(io::ErrorKind::InvalidData, corrupt.to_string()))
            }
        }
    }
}

/// trait for durable storage of the raft term and vote
///
/// both must be durable before any message reflecting them leaves the replica.
/// the log itself goes through raft-core's `RaftLog`; implementations usually
/// provide both.
pub trait Storage {
    /// persist the current term and voted_for
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> Result<(), StorageError>;

    /// load the persisted term and voted_for, (0, None) for a fresh replica
    fn load_term_and_vote(&self) -> Result<(Term, Option<MemberId>), StorageError>;

    /// clear all persisted state (for testing)
    fn clear(&mut self) -> Result<(), StorageError>;
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// stores raft state in a directory with:
/// - meta.json: term and voted_for
/// - log.json: the log image (compaction point plus retained entries)
///
/// every change is written to a temp file, synced, then renamed over the old
/// file, so a crash leaves either the old or the new image behind.
#[derive(Debug)]
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
    /// working copy of log.json
    log: InMemoryRaftLog,
}

/// metadata structure for term and vote
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaData {
    term: Term,
    voted_for: Option<MemberId>,
}

impl FileStorage {
    /// open the storage at the given directory, loading any log already there
    /// creates the directory if it doesn't exist
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let log: InMemoryRaftLog = read_json(&dir.join(LOG_FILE))?.unwrap_or_default();
        tracing::debug!(dir = %dir.display(), append_index = log.append_index(), "opened file storage");
        Ok(Self { dir, log })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// apply `change` to a copy of the log image, persist the copy, then adopt it
    fn update_log(&mut self, change: impl FnOnce(&mut InMemoryRaftLog) -> Result<(), LogError>) -> Result<(), LogError> {
        let mut next = self.log.clone();
        change(&mut next)?;
        write_json_atomic(&self.dir, LOG_FILE, &next).map_err(|e| {
            tracing::error!(dir = %self.dir.display(), %e, "failed to persist raft log");
            LogError::from(e)
        })?;
        self.log = next;
        Ok(())
    }
}

const META_FILE: &str = "meta.json";
const LOG_FILE: &str = "log.json";

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let mut contents = String::new();
    File::open(path)?.read_to_string(&mut contents)?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            file: path.to_path_buf(),
            source,
        })
}

// atomic write: write to temp file then rename
fn write_json_atomic<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| StorageError::Corrupt {
        file: dir.join(name),
        source,
    })?;
    let temp_path = dir.join(format!("{}.tmp", name));
    let mut file = File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, dir.join(name))?;
    Ok(())
}

impl Storage for FileStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> Result<(), StorageError> {
        write_json_atomic(&self.dir, META_FILE, &MetaData { term, voted_for })
    }

    fn load_term_and_vote(&self) -> Result<(Term, Option<MemberId>), StorageError> {
        let meta: MetaData = read_json(&self.meta_path())?.unwrap_or_default();
        Ok((meta.term, meta.voted_for))
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        for path in [self.meta_path(), self.log_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.log = InMemoryRaftLog::new();
        Ok(())
    }
}

impl ReadableRaftLog for FileStorage {
    fn append_index(&self) -> LogIndex {
        self.log.append_index()
    }

    fn prev_index(&self) -> LogIndex {
        self.log.prev_index()
    }

    fn prev_term(&self) -> Term {
        self.log.prev_term()
    }

    fn read_entry_term(&self, index: LogIndex) -> Option<Term> {
        self.log.read_entry_term(index)
    }

    fn entry_at(&self, index: LogIndex) -> Result<RaftLogEntry, LogError> {
        self.log.entry_at(index)
    }
}

impl RaftLog for FileStorage {
    fn append(&mut self, at_index: LogIndex, entries: &[RaftLogEntry]) -> Result<LogIndex, LogError> {
        if entries.is_empty() {
            return Ok(self.append_index());
        }
        self.update_log(|log| log.append(at_index, entries).map(|_| ()))?;
        Ok(self.append_index())
    }

    fn truncate(&mut self, from_index: LogIndex, commit_index: LogIndex) -> Result<(), LogError> {
        if from_index > self.append_index() {
            raft_core::log::check_truncate(from_index, commit_index)?;
            return Ok(());
        }
        self.update_log(|log| log.truncate(from_index, commit_index))
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<(), LogError> {
        if self.read_entry_term(index) == Some(term) && index <= self.append_index() {
            return Ok(());
        }
        self.update_log(|log| log.skip(index, term))
    }

    fn prune(&mut self, index: LogIndex) -> Result<(), LogError> {
        if index <= self.prev_index() {
            return Ok(());
        }
        self.update_log(|log| log.prune(index))
    }
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// stores all state in memory, no persistence across restarts
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    term: Term,
    voted_for: Option<MemberId>,
    log: InMemoryRaftLog,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// start from an existing log, e.g. to simulate a restart
    pub fn with_log(log: InMemoryRaftLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }
}

impl Storage for InMemoryStorage {
    fn save_term_and_vote(&mut self, term: Term, voted_for: Option<MemberId>) -> Result<(), StorageError> {
        self.term = term;
        self.voted_for = voted_for;
        Ok(())
    }

    fn load_term_and_vote(&self) -> Result<(Term, Option<MemberId>), StorageError> {
        Ok((self.term, self.voted_for))
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.term = 0;
        self.voted_for = None;
        self.log = InMemoryRaftLog::new();
        Ok(())
    }
}

impl ReadableRaftLog for InMemoryStorage {
    fn append_index(&self) -> LogIndex {
        self.log.append_index()
    }

    fn prev_index(&self) -> LogIndex {
        self.log.prev_index()
    }

    fn prev_term(&self) -> Term {
        self.log.prev_term()
    }

    fn read_entry_term(&self, index: LogIndex) -> Option<Term> {
        self.log.read_entry_term(index)
    }

    fn entry_at(&self, index: LogIndex) -> Result<RaftLogEntry, LogError> {
        self.log.entry_at(index)
    }
}

impl RaftLog for InMemoryStorage {
    fn append(&mut self, at_index: LogIndex, entries: &[RaftLogEntry]) -> Result<LogIndex, LogError> {
        self.log.append(at_index, entries)
    }

    fn truncate(&mut self, from_index: LogIndex, commit_index: LogIndex) -> Result<(), LogError> {
        self.log.truncate(from_index, commit_index)
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<(), LogError> {
        self.log.skip(index, term)
    }

    fn prune(&mut self, index: LogIndex) -> Result<(), LogError> {
        self.log.prune(index)
    }
}
