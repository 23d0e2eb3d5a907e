//! # outcome
//!
//! why: describe the effect of one event without performing it
//! relations: built by roles/, consumed once by RaftNode::apply_outcome in node.rs
//! what: RaftLogCommand, Outcome and the small mutators role handlers share

use std::collections::{BTreeMap, BTreeSet};

use crate::entry::{LogIndex, MemberId, RaftLogEntry, Term};
use crate::message::{Directed, RaftMessage};
use crate::node::Role;
use crate::state::{FollowerProgress, RaftState};

/// Logical command against the raft log, applied strictly in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftLogCommand {
    /// Append `entries`, the first one at `at_index`
    Append {
        at_index: LogIndex,
        entries: Vec<RaftLogEntry>,
    },
    /// Discard every entry at or after `from_index`
    Truncate { from_index: LogIndex },
    /// Everything through `index` is committed
    CommitUpTo { index: LogIndex },
    /// Restart the log after a snapshot covering `(index, term)`
    Skip { index: LogIndex, term: Term },
    /// Compact away applied entries through `index`
    Prune { index: LogIndex },
}

/// Result of handling one event.
///
/// Starts as a copy of the current state; the role handlers edit the copy.
/// Fields left alone are unchanged when applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub leader_commit: LogIndex,
    pub voted_for: Option<MemberId>,
    pub votes_for_me: BTreeSet<MemberId>,
    pub last_log_index_before_we_became_leader: LogIndex,
    pub follower_states: BTreeMap<MemberId, FollowerProgress>,
    pub commit_index: LogIndex,
    pub heartbeat_tick: u64,
    pub heartbeat_responders: BTreeSet<MemberId>,
    pub pre_election: bool,
    pub pre_votes_for_me: BTreeSet<MemberId>,

    pub log_commands: Vec<RaftLogCommand>,
    pub outgoing: Vec<Directed>,

    /// Valid leader traffic or a granted vote: restart the election timer
    pub renew_election_timeout: bool,
    /// The leader has compacted entries this replica still needs
    pub needs_fresh_snapshot: bool,
    /// This outcome turns the replica into the leader
    pub elected: bool,
}

impl Outcome {
    pub fn new(state: &RaftState) -> Self {
        Self {
            role: state.role,
            term: state.term,
            leader: state.leader,
            leader_commit: state.leader_commit,
            voted_for: state.voted_for,
            votes_for_me: state.votes_for_me.clone(),
            last_log_index_before_we_became_leader: state.last_log_index_before_we_became_leader,
            follower_states: state.follower_states.clone(),
            commit_index: state.commit_index,
            heartbeat_tick: state.heartbeat_tick,
            heartbeat_responders: state.heartbeat_responders.clone(),
            pre_election: state.pre_election,
            pre_votes_for_me: state.pre_votes_for_me.clone(),
            log_commands: Vec::new(),
            outgoing: Vec::new(),
            renew_election_timeout: false,
            needs_fresh_snapshot: false,
            elected: false,
        }
    }

    /// Become a follower in `term`, forgetting leader-only and candidate-only state.
    ///
    /// The vote is cleared only when the term actually moves forward.
    pub fn step_down(&mut self, term: Term) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.leader = None;
        }
        self.role = Role::Follower;
        self.votes_for_me.clear();
        self.follower_states.clear();
        self.heartbeat_responders.clear();
        self.end_pre_election();
    }

    pub fn end_pre_election(&mut self) {
        self.pre_election = false;
        self.pre_votes_for_me.clear();
    }

    pub fn send(&mut self, to: MemberId, message: RaftMessage) {
        self.outgoing.push(Directed::new(to, message));
    }

    pub fn push(&mut self, command: RaftLogCommand) {
        self.log_commands.push(command);
    }

    /// Advance the commit point, recording it as a log command too.
    pub fn commit_up_to(&mut self, index: LogIndex) {
        self.commit_index = index;
        self.push(RaftLogCommand::CommitUpTo { index });
    }

    pub fn has_log_commands(&self) -> bool {
        !self.log_commands.is_empty()
    }

    /// Messages addressed to `member`, in send order.
    pub fn messages_for(&self, member: MemberId) -> impl Iterator<Item = &RaftMessage> {
        self.outgoing
            .iter()
            .filter(move |d| d.to == member)
            .map(|d| &d.message)
    }
}
