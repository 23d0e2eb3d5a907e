//! # error
//!
//! why: one place for the failure taxonomy of the consensus core
//! relations: returned by log.rs implementations and by RaftNode::apply_outcome
//! what: LogError, ConsistencyError, RaftError, ConfigError

use std::io;

use thiserror::Error;

use crate::entry::{LogIndex, MemberId, Term};

/// Failures of a raft log implementation.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("no entry at index {index} (log covers {first}..={last})")]
    NotFound {
        index: LogIndex,
        first: LogIndex,
        last: LogIndex,
    },

    #[error("append at index {actual}, expected {expected}")]
    NonContiguousAppend { expected: LogIndex, actual: LogIndex },

    #[error("truncating from {from_index} would discard committed entries (commit index {commit_index})")]
    CommittedEntryTruncation {
        from_index: LogIndex,
        commit_index: LogIndex,
    },

    #[error("log io failure: {0}")]
    Io(#[from] io::Error),
}

impl LogError {
    /// Committed-entry truncation is a protocol violation rather than a storage problem.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::CommittedEntryTruncation { .. })
    }
}

/// Programming errors detected while applying an outcome.
///
/// Any of these means the decision logic produced something that breaks a
/// raft safety property; the replica must stop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("term would decrease from {current} to {proposed}")]
    TermDecreased { current: Term, proposed: Term },

    #[error("commit index would decrease from {current} to {proposed}")]
    CommitIndexDecreased {
        current: LogIndex,
        proposed: LogIndex,
    },

    #[error("commit index {commit_index} is beyond the append index {append_index}")]
    CommitBeyondLog {
        commit_index: LogIndex,
        append_index: LogIndex,
    },

    #[error("truncating from {from_index} would discard committed entries (commit index {commit_index})")]
    CommittedEntryTruncation {
        from_index: LogIndex,
        commit_index: LogIndex,
    },

    #[error("pruning through {index} would drop uncommitted entries (commit index {commit_index})")]
    PruneBeyondCommit { index: LogIndex, commit_index: LogIndex },

    #[error("leader outcome for term {term} names {leader:?} as leader")]
    DoubleLeadership { term: Term, leader: Option<MemberId> },
}

/// Errors surfaced by the consensus core.
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("durable log failure: {0}")]
    Storage(#[source] LogError),

    #[error("internal consistency violation: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("replica stopped participating after an earlier fatal error")]
    NotParticipating,
}

impl RaftError {
    /// Consistency violations must abort the replica.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }
}

impl From<LogError> for RaftError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::CommittedEntryTruncation {
                from_index,
                commit_index,
            } => Self::Consistency(ConsistencyError::CommittedEntryTruncation {
                from_index,
                commit_index,
            }),
            other => Self::Storage(other),
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("election timeout min ({min}) must be less than max ({max})")]
    ElectionTimeoutRange { min: u64, max: u64 },

    #[error("heartbeat interval ({heartbeat}) must be less than half the election timeout min ({election_min})")]
    HeartbeatTooSlow { heartbeat: u64, election_min: u64 },

    #[error("max_append_batch must be at least 1")]
    ZeroAppendBatch,

    #[error("member {0} is not part of the initial member set")]
    MyselfNotAMember(MemberId),

    #[error("malformed config: {0}")]
    Parse(String),
}
