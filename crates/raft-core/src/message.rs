//! # message
//!
//! why: define the raft rpc messages and the local events the core reacts to
//! relations: consumed by the role handlers, produced inside outcome.rs, shipped by raft-server
//! what: VoteRequest/Response, PreVoteRequest/Response, AppendEntriesRequest/Response, LogCompactionInfo,
//!       Directed, RaftEvent

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entry::{LogIndex, LogPosition, MemberId, RaftLogEntry, ReplicatedContent, Term};

/// Request a vote during leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub from: MemberId,
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

impl VoteRequest {
    pub fn last_log_position(&self) -> LogPosition {
        LogPosition::new(self.last_log_index, self.last_log_term)
    }
}

/// Response to a vote request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub from: MemberId,
    pub term: Term,
    pub vote_granted: bool,
}

/// Asks whether the sender could win an election in `term` without
/// moving anybody's term yet.
///
/// `term` is the term the sender would campaign in, one above its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVoteRequest {
    pub from: MemberId,
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

impl PreVoteRequest {
    pub fn last_log_position(&self) -> LogPosition {
        LogPosition::new(self.last_log_index, self.last_log_term)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreVoteResponse {
    pub from: MemberId,
    pub term: Term,
    pub vote_granted: bool,
}

/// Replicate log entries; an empty `entries` doubles as a heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<RaftLogEntry>,
    pub leader_commit: LogIndex,
}

impl AppendEntriesRequest {
    /// Index of the last entry carried by this request.
    pub fn last_index(&self) -> LogIndex {
        self.prev_log_index + self.entries.len() as u64
    }
}

/// Response to an append entries request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub from: MemberId,
    pub term: Term,
    pub success: bool,
    /// On success, the highest index known to match the leader
    pub match_index: LogIndex,
    /// The follower's append index after handling the request
    pub append_index: LogIndex,
    /// On failure, where the leader should resume shipping from
    pub conflict_index: LogIndex,
}

/// Sent by a leader when the entries a follower needs have been compacted away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCompactionInfo {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_index: LogIndex,
}

/// All possible Raft messages between members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    PreVoteRequest(PreVoteRequest),
    PreVoteResponse(PreVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    LogCompactionInfo(LogCompactionInfo),
}

impl RaftMessage {
    pub fn from(&self) -> MemberId {
        match self {
            Self::VoteRequest(m) => m.from,
            Self::VoteResponse(m) => m.from,
            Self::PreVoteRequest(m) => m.from,
            Self::PreVoteResponse(m) => m.from,
            Self::AppendEntries(m) => m.from,
            Self::AppendEntriesResponse(m) => m.from,
            Self::LogCompactionInfo(m) => m.from,
        }
    }

    /// The term the sender was in when it sent this message.
    pub fn term(&self) -> Term {
        match self {
            Self::VoteRequest(m) => m.term,
            Self::VoteResponse(m) => m.term,
            Self::PreVoteRequest(m) => m.term,
            Self::PreVoteResponse(m) => m.term,
            Self::AppendEntries(m) => m.leader_term,
            Self::AppendEntriesResponse(m) => m.term,
            Self::LogCompactionInfo(m) => m.leader_term,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::VoteRequest(_) => "vote-request",
            Self::VoteResponse(_) => "vote-response",
            Self::PreVoteRequest(_) => "pre-vote-request",
            Self::PreVoteResponse(_) => "pre-vote-response",
            Self::AppendEntries(_) => "append-entries",
            Self::AppendEntriesResponse(_) => "append-entries-response",
            Self::LogCompactionInfo(_) => "log-compaction-info",
        }
    }
}

impl fmt::Display for RaftMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(from={}, term={})", self.kind(), self.from(), self.term())
    }
}

/// A message addressed to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directed {
    pub to: MemberId,
    pub message: RaftMessage,
}

impl Directed {
    pub fn new(to: MemberId, message: RaftMessage) -> Self {
        Self { to, message }
    }
}

/// Everything the decision core reacts to, funnelled through one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftEvent {
    /// Inbound rpc from another member
    Message(RaftMessage),
    /// The randomized election timer fired
    ElectionTimeout,
    /// The leader heartbeat timer fired
    HeartbeatTimeout,
    /// Locally submitted proposal, a single entry or a batch
    NewEntries(Vec<ReplicatedContent>),
    /// The snapshot installer finished bringing the state machine to `(index, term)`
    SnapshotInstalled { index: LogIndex, term: Term },
    /// The state machine has durably captured everything through `index`; the log may drop it
    Prune { index: LogIndex },
}

impl From<RaftMessage> for RaftEvent {
    fn from(message: RaftMessage) -> Self {
        Self::Message(message)
    }
}

impl fmt::Display for RaftEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => write!(f, "{}", m),
            Self::ElectionTimeout => write!(f, "election-timeout"),
            Self::HeartbeatTimeout => write!(f, "heartbeat-timeout"),
            Self::NewEntries(contents) => write!(f, "new-entries(n={})", contents.len()),
            Self::SnapshotInstalled { index, term } => {
                write!(f, "snapshot-installed(index={}, term={})", index, term)
            }
            Self::Prune { index } => write!(f, "prune(index={})", index),
        }
    }
}
