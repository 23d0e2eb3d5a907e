//! # state
//!
//! why: hold the per-replica consensus state and expose it read-only to the decision logic
//! relations: owned by node.rs (RaftNode), copied into outcome.rs, read by roles/ through ReadableRaftState
//! what: RaftState, FollowerProgress, ReadableRaftState, RaftStateView, ReplicaSnapshot

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entry::{LogIndex, MemberId, Term};
use crate::log::{InMemoryRaftLog, ReadableRaftLog};
use crate::node::Role;

/// Leader's view of one follower's replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FollowerProgress {
    /// Highest index known to be replicated on the follower
    pub match_index: LogIndex,
    /// Next index the leader will ship to the follower
    pub next_index: LogIndex,
    /// Leader heartbeat tick during which the follower last responded
    pub last_response_tick: u64,
}

impl FollowerProgress {
    pub fn new(next_index: LogIndex) -> Self {
        Self {
            match_index: 0,
            next_index,
            last_response_tick: 0,
        }
    }
}

/// The mutable consensus state of one replica.
///
/// The live instance is owned by `RaftNode` and only changes through
/// `RaftNode::apply_outcome`; everything else sees `&RaftState` or a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftState {
    pub myself: MemberId,
    pub voting_members: BTreeSet<MemberId>,
    pub replication_members: BTreeSet<MemberId>,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub leader_commit: LogIndex,
    pub voted_for: Option<MemberId>,
    pub votes_for_me: BTreeSet<MemberId>,
    pub last_log_index_before_we_became_leader: LogIndex,
    pub follower_states: BTreeMap<MemberId, FollowerProgress>,
    pub commit_index: LogIndex,
    /// Leader's logical clock, advanced once per heartbeat timeout
    pub heartbeat_tick: u64,
    /// Members heard from since the leader's last election timeout
    pub heartbeat_responders: BTreeSet<MemberId>,
    /// A pre-vote round is running; the term has not moved yet
    pub pre_election: bool,
    pub pre_votes_for_me: BTreeSet<MemberId>,
}

impl RaftState {
    /// Initial state: follower, term 0, no leader, no vote.
    pub fn new(myself: MemberId, members: BTreeSet<MemberId>) -> Self {
        Self {
            myself,
            voting_members: members.clone(),
            replication_members: members,
            role: Role::Follower,
            term: 0,
            leader: None,
            leader_commit: 0,
            voted_for: None,
            votes_for_me: BTreeSet::new(),
            last_log_index_before_we_became_leader: 0,
            follower_states: BTreeMap::new(),
            commit_index: 0,
            heartbeat_tick: 0,
            heartbeat_responders: BTreeSet::new(),
            pre_election: false,
            pre_votes_for_me: BTreeSet::new(),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

/// More than half of `total`.
pub fn is_majority(count: usize, total: usize) -> bool {
    count > total / 2
}

/// Read-only view the role handlers compute outcomes from.
pub trait ReadableRaftState {
    fn state(&self) -> &RaftState;

    fn entry_log(&self) -> &dyn ReadableRaftLog;

    fn myself(&self) -> MemberId {
        self.state().myself
    }

    fn voting_members(&self) -> &BTreeSet<MemberId> {
        &self.state().voting_members
    }

    fn replication_members(&self) -> &BTreeSet<MemberId> {
        &self.state().replication_members
    }

    fn role(&self) -> Role {
        self.state().role
    }

    fn term(&self) -> Term {
        self.state().term
    }

    fn leader(&self) -> Option<MemberId> {
        self.state().leader
    }

    fn leader_commit(&self) -> LogIndex {
        self.state().leader_commit
    }

    fn voted_for(&self) -> Option<MemberId> {
        self.state().voted_for
    }

    fn votes_for_me(&self) -> &BTreeSet<MemberId> {
        &self.state().votes_for_me
    }

    fn last_log_index_before_we_became_leader(&self) -> LogIndex {
        self.state().last_log_index_before_we_became_leader
    }

    fn follower_states(&self) -> &BTreeMap<MemberId, FollowerProgress> {
        &self.state().follower_states
    }

    fn commit_index(&self) -> LogIndex {
        self.state().commit_index
    }
}

/// Borrowed view over a live state and a (usually cache-fronted) log.
pub struct RaftStateView<'a> {
    state: &'a RaftState,
    log: &'a dyn ReadableRaftLog,
}

impl<'a> RaftStateView<'a> {
    pub fn new(state: &'a RaftState, log: &'a dyn ReadableRaftLog) -> Self {
        Self { state, log }
    }
}

impl ReadableRaftState for RaftStateView<'_> {
    fn state(&self) -> &RaftState {
        self.state
    }

    fn entry_log(&self) -> &dyn ReadableRaftLog {
        self.log
    }
}

/// Deep copy of a replica's state and log.
///
/// Simulations and comparisons work on these, never on a live replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    pub state: RaftState,
    pub log: InMemoryRaftLog,
}

impl ReplicaSnapshot {
    pub fn new(state: RaftState, log: InMemoryRaftLog) -> Self {
        Self { state, log }
    }
}

impl ReadableRaftState for ReplicaSnapshot {
    fn state(&self) -> &RaftState {
        &self.state
    }

    fn entry_log(&self) -> &dyn ReadableRaftLog {
        &self.log
    }
}
