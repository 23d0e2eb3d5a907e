//! # entry
//!
//! why: the immutable value types every other module speaks in
//! relations: stored by log.rs and cache.rs, carried by message.rs, compared by the role handlers
//! what: MemberId, Term, LogIndex, ReplicatedContent, RaftLogEntry, LogPosition

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Election epoch. Never decreases on a replica.
pub type Term = u64;

/// 1-based position in the replicated log, 0 meaning "before the first entry".
pub type LogIndex = u64;

/// Stable identity of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Payload of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicatedContent {
    /// Opaque command for the downstream state machine
    Command(Vec<u8>),
    /// New member set; replaces both voting and replication members once appended
    MemberSet(BTreeSet<MemberId>),
    /// No-op written by a fresh leader so that entries of earlier terms become committable
    NewLeaderBarrier,
}

impl ReplicatedContent {
    /// Approximate in-memory footprint, used for cache accounting.
    pub fn size(&self) -> usize {
        match self {
            Self::Command(bytes) => bytes.len(),
            Self::MemberSet(members) => members.len() * std::mem::size_of::<MemberId>(),
            Self::NewLeaderBarrier => 0,
        }
    }
}

impl From<Vec<u8>> for ReplicatedContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Command(bytes)
    }
}

impl From<&str> for ReplicatedContent {
    fn from(s: &str) -> Self {
        Self::Command(s.as_bytes().to_vec())
    }
}

/// A single entry in the replicated log.
///
/// The index is implicit: it is the position the entry occupies in a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftLogEntry {
    /// The term of the leader that appended this entry
    pub term: Term,
    /// The replicated payload
    pub content: ReplicatedContent,
}

impl RaftLogEntry {
    pub fn new(term: Term, content: impl Into<ReplicatedContent>) -> Self {
        Self {
            term,
            content: content.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.content.size()
    }
}

/// An `(index, term)` pair identifying the tail of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogPosition {
    pub index: LogIndex,
    pub term: Term,
}

impl LogPosition {
    pub fn new(index: LogIndex, term: Term) -> Self {
        Self { index, term }
    }

    /// Election restriction: a log whose last entry has a higher term wins,
    /// equal terms are decided by length.
    pub fn is_at_least_as_up_to_date_as(&self, other: &LogPosition) -> bool {
        self.term > other.term || (self.term == other.term && self.index >= other.index)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}
