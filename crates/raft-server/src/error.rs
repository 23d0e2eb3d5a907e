//! # error
//!
//! why: failures seen by callers of the processing loop and by the loop itself
//! relations: ProposeError is returned by RaftHandle, TransportError by Transport impls,
//!            ServerError ends RaftServer::run
//! what: ProposeError, TransportError, ServerError

use raft_core::{LogIndex, MemberId, RaftError};
use raft_storage::StorageError;
use thiserror::Error;

/// Why a proposal did not commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposeError {
    #[error("not the leader (leader hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<MemberId> },

    #[error("leadership lost before index {index} committed")]
    LeadershipLost { index: LogIndex },

    #[error("raft server stopped")]
    Stopped,
}

/// Failure to hand a message to the network. Never retried by the loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no route to {0}")]
    UnknownMember(MemberId),

    #[error("{from} and {to} are partitioned")]
    Partitioned { from: MemberId, to: MemberId },

    #[error("inbound queue of {0} is full")]
    Overloaded(MemberId),

    #[error("{0} has stopped")]
    Disconnected(MemberId),
}

/// Why the processing loop stopped.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Raft(#[from] RaftError),

    #[error("term/vote persistence failed: {0}")]
    Storage(#[from] StorageError),

    #[error("raft server stopped")]
    Stopped,
}
