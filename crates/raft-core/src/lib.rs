//! # raft-core
//!
//! why: implement the raft consensus decision logic as a pure, deterministic state transition
//! relations: used by raft-storage for the durable log, raft-server for the processing loop
//! what: entry and message types, log abstraction, in-flight cache, role handlers, outcome application

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod log;
pub mod membership;
pub mod message;
pub mod node;
pub mod outcome;
pub mod roles;
pub mod state;

pub use cache::{CachedLog, InFlightCache};
pub use config::RaftConfig;
pub use entry::{LogIndex, LogPosition, MemberId, RaftLogEntry, ReplicatedContent, Term};
pub use error::{ConfigError, ConsistencyError, LogError, RaftError};
pub use log::{InMemoryRaftLog, RaftLog, ReadableRaftLog};
pub use membership::MembershipLog;
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, Directed, LogCompactionInfo, PreVoteRequest, PreVoteResponse,
    RaftEvent, RaftMessage, VoteRequest, VoteResponse,
};
pub use node::{Applied, RaftNode, Role};
pub use outcome::{Outcome, RaftLogCommand};
pub use state::{FollowerProgress, RaftState, RaftStateView, ReadableRaftState, ReplicaSnapshot};
