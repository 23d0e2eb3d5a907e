//! # log
//!
//! why: manage the append-only log of entries that raft replicates
//! relations: mutated only through log commands applied by node.rs, read through state.rs views,
//!            durable implementation lives in raft-storage
//! what: ReadableRaftLog / RaftLog traits, InMemoryRaftLog, shared precondition checks

use serde::{Deserialize, Serialize};

use crate::entry::{LogIndex, LogPosition, RaftLogEntry, Term};
use crate::error::LogError;

/// Read side of a raft log.
///
/// A log covers the indices `prev_index()+1 ..= append_index()`. Everything at
/// or below `prev_index()` has been compacted away or skipped over by a
/// snapshot; only the term of `prev_index()` itself is remembered.
pub trait ReadableRaftLog {
    /// Index of the last entry, or `prev_index()` when the log holds no entries.
    fn append_index(&self) -> LogIndex;

    /// Index just before the first retained entry.
    fn prev_index(&self) -> LogIndex;

    /// Term of the entry at `prev_index()`; 0 for a log that was never skipped.
    fn prev_term(&self) -> Term;

    /// Term of the entry at `index`, `None` if the log cannot tell.
    fn read_entry_term(&self, index: LogIndex) -> Option<Term>;

    /// The entry at `index`.
    fn entry_at(&self, index: LogIndex) -> Result<RaftLogEntry, LogError>;

    /// Position of the last entry, used for vote requests.
    fn last_position(&self) -> LogPosition {
        let index = self.append_index();
        LogPosition::new(index, self.read_entry_term(index).unwrap_or(0))
    }

    /// Up to `max` entries starting at `from`.
    fn entries_from(&self, from: LogIndex, max: usize) -> Result<Vec<RaftLogEntry>, LogError> {
        let last = self.append_index();
        if from > last {
            return Ok(Vec::new());
        }
        let end = last.min(from.saturating_add(max as u64).saturating_sub(1));
        (from..=end).map(|index| self.entry_at(index)).collect()
    }
}

/// Write side of a raft log. Only the outcome applier calls these.
pub trait RaftLog: ReadableRaftLog {
    /// Append `entries` with the first one at `at_index`; returns the new append index.
    ///
    /// `at_index` must be exactly `append_index() + 1`.
    fn append(&mut self, at_index: LogIndex, entries: &[RaftLogEntry]) -> Result<LogIndex, LogError>;

    /// Drop every entry at or after `from_index`.
    ///
    /// Rejected with `CommittedEntryTruncation` when `from_index <= commit_index`.
    fn truncate(&mut self, from_index: LogIndex, commit_index: LogIndex) -> Result<(), LogError>;

    /// Restart the log after `(index, term)`, unless it already contains that entry.
    fn skip(&mut self, index: LogIndex, term: Term) -> Result<(), LogError>;

    /// Compact away every entry at or below `index`, remembering its term as `prev_term()`.
    ///
    /// A no-op when `index <= prev_index()`. Callers only prune applied entries.
    fn prune(&mut self, index: LogIndex) -> Result<(), LogError>;
}

/// Precondition for `RaftLog::append`.
pub fn check_append<L: ReadableRaftLog + ?Sized>(log: &L, at_index: LogIndex) -> Result<(), LogError> {
    let expected = log.append_index() + 1;
    if at_index != expected {
        return Err(LogError::NonContiguousAppend {
            expected,
            actual: at_index,
        });
    }
    Ok(())
}

/// Precondition for `RaftLog::truncate`.
pub fn check_truncate(from_index: LogIndex, commit_index: LogIndex) -> Result<(), LogError> {
    if from_index <= commit_index {
        return Err(LogError::CommittedEntryTruncation {
            from_index,
            commit_index,
        });
    }
    Ok(())
}

/// Log held entirely in memory.
///
/// Used directly by tests and simulations, and as the working image behind
/// the file-backed log in raft-storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryRaftLog {
    prev_index: LogIndex,
    prev_term: Term,
    entries: Vec<RaftLogEntry>,
}

impl InMemoryRaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log holding `entries` at indices 1..
    pub fn with_entries(entries: impl IntoIterator<Item = RaftLogEntry>) -> Self {
        Self {
            prev_index: 0,
            prev_term: 0,
            entries: entries.into_iter().collect(),
        }
    }

    /// Copy every readable entry of `log` into a new in-memory log.
    pub fn copy_of<L: ReadableRaftLog + ?Sized>(log: &L) -> Result<Self, LogError> {
        let prev_index = log.prev_index();
        let entries = ((prev_index + 1)..=log.append_index())
            .map(|index| log.entry_at(index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            prev_index,
            prev_term: log.prev_term(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, index: LogIndex) -> Option<usize> {
        if index <= self.prev_index || index > self.append_index() {
            return None;
        }
        Some((index - self.prev_index - 1) as usize)
    }
}

impl ReadableRaftLog for InMemoryRaftLog {
    fn append_index(&self) -> LogIndex {
        self.prev_index + self.entries.len() as u64
    }

    fn prev_index(&self) -> LogIndex {
        self.prev_index
    }

    fn prev_term(&self) -> Term {
        self.prev_term
    }

    fn read_entry_term(&self, index: LogIndex) -> Option<Term> {
        if index == self.prev_index {
            return Some(self.prev_term);
        }
        self.slot(index).map(|slot| self.entries[slot].term)
    }

    fn entry_at(&self, index: LogIndex) -> Result<RaftLogEntry, LogError> {
        self.slot(index)
            .map(|slot| self.entries[slot].clone())
            .ok_or(LogError::NotFound {
                index,
                first: self.prev_index + 1,
                last: self.append_index(),
            })
    }
}

impl RaftLog for InMemoryRaftLog {
    fn append(&mut self, at_index: LogIndex, entries: &[RaftLogEntry]) -> Result<LogIndex, LogError> {
        if entries.is_empty() {
            return Ok(self.append_index());
        }
        check_append(&*self, at_index)?;
        self.entries.extend_from_slice(entries);
        Ok(self.append_index())
    }

    fn truncate(&mut self, from_index: LogIndex, commit_index: LogIndex) -> Result<(), LogError> {
        check_truncate(from_index, commit_index)?;
        if from_index > self.append_index() {
            return Ok(());
        }
        if from_index <= self.prev_index {
            return Err(LogError::NotFound {
                index: from_index,
                first: self.prev_index + 1,
                last: self.append_index(),
            });
        }
        let keep = (from_index - self.prev_index - 1) as usize;
        self.entries.truncate(keep);
        Ok(())
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<(), LogError> {
        if index <= self.append_index() && self.read_entry_term(index) == Some(term) {
            return Ok(());
        }
        self.entries.clear();
        self.prev_index = index;
        self.prev_term = term;
        Ok(())
    }

    fn prune(&mut self, index: LogIndex) -> Result<(), LogError> {
        if index <= self.prev_index {
            return Ok(());
        }
        let Some(slot) = self.slot(index) else {
            return Err(LogError::NotFound {
                index,
                first: self.prev_index + 1,
                last: self.append_index(),
            });
        };
        self.prev_term = self.entries[slot].term;
        self.entries.drain(..=slot);
        self.prev_index = index;
        Ok(())
    }
}
