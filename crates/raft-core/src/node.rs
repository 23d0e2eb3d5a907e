//! # node
//!
//! why: own one replica's state, log and cache, and be the only place they change
//! relations: asks roles/ for an Outcome, applies it to state.rs, log.rs, cache.rs and membership.rs;
//!            driven by raft-server's processing loop or directly by tests
//! what: Role enum, RaftNode (handle / apply_outcome), Applied report

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cache::{CachedLog, InFlightCache};
use crate::config::RaftConfig;
use crate::entry::{LogIndex, MemberId, RaftLogEntry, Term};
use crate::error::{ConfigError, ConsistencyError, LogError, RaftError};
use crate::log::{InMemoryRaftLog, RaftLog, ReadableRaftLog};
use crate::membership::MembershipLog;
use crate::message::{Directed, RaftEvent};
use crate::outcome::{Outcome, RaftLogCommand};
use crate::roles;
use crate::state::{FollowerProgress, RaftState, RaftStateView, ReplicaSnapshot};

/// The three possible roles a replica can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    /// Passive role - accepts entries from the leader, votes when asked
    #[default]
    Follower,
    /// Transitional role - requesting votes to become leader
    Candidate,
    /// Active role - accepts proposals, replicates and commits them
    Leader,
}

/// What applying one outcome did, for the processing loop to act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Messages to dispatch, in order, after term and vote are persisted
    pub outgoing: Vec<Directed>,
    /// Newly committed entries, in index order, each reported exactly once
    pub committed: Vec<(LogIndex, RaftLogEntry)>,
    pub renew_election_timeout: bool,
    pub needs_fresh_snapshot: bool,
    pub elected: bool,
    /// First and last index appended by this outcome
    pub appended: Option<(LogIndex, LogIndex)>,
    /// Lowest index truncated by this outcome
    pub truncated_from: Option<LogIndex>,
    /// The log now starts after this index
    pub pruned_through: Option<LogIndex>,
    /// Term or vote moved; both must reach durable storage before `outgoing` is sent
    pub term_or_vote_changed: bool,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: LogIndex,
}

/// A single raft replica.
///
/// All events go through [`RaftNode::handle`]; the state, the log and the
/// in-flight cache only ever change inside [`RaftNode::apply_outcome`].
#[derive(Debug)]
pub struct RaftNode<L: RaftLog> {
    config: RaftConfig,
    state: RaftState,
    log: L,
    cache: InFlightCache,
    membership: MembershipLog,
    /// Highest committed index already reported through `Applied::committed`
    last_delivered: LogIndex,
    participating: bool,
}

impl<L: RaftLog> RaftNode<L> {
    /// Create a follower in term 0 over `log`.
    ///
    /// Member sets already present in `log` are replayed on top of `members`.
    pub fn new(config: RaftConfig, myself: MemberId, members: BTreeSet<MemberId>, log: L) -> Result<Self, ConfigError> {
        config.validate()?;
        if !members.contains(&myself) {
            return Err(ConfigError::MyselfNotAMember(myself));
        }

        let mut membership = MembershipLog::new(members.clone());
        let first = log.prev_index() + 1;
        for index in first..=log.append_index() {
            match log.entry_at(index) {
                Ok(entry) => {
                    membership.on_append(index, std::slice::from_ref(&entry));
                }
                Err(err) => {
                    tracing::warn!(member = %myself, index, %err, "unreadable entry while replaying membership");
                    break;
                }
            }
        }

        let mut state = RaftState::new(myself, members);
        state.voting_members = membership.current().clone();
        state.replication_members = membership.current().clone();

        let cache = InFlightCache::new(config.in_flight_max_entries, config.in_flight_max_bytes);
        let last_delivered = log.prev_index();

        tracing::info!(
            member = %myself,
            members = ?state.voting_members,
            append_index = log.append_index(),
            "raft node created"
        );

        Ok(Self {
            config,
            state,
            log,
            cache,
            membership,
            last_delivered,
            participating: true,
        })
    }

    /// Reinstate the persisted term and vote after a restart.
    pub fn restore(&mut self, term: Term, voted_for: Option<MemberId>) {
        tracing::info!(member = %self.state.myself, term, voted_for = ?voted_for, "restoring term and vote");
        self.state.term = term;
        self.state.voted_for = voted_for;
    }

    /// Feed one event through the role handlers and apply the result.
    ///
    /// A storage failure or a consistency violation stops the replica: it
    /// becomes a leaderless follower and rejects every further event.
    pub fn handle(&mut self, event: RaftEvent) -> Result<Applied, RaftError> {
        if !self.participating {
            return Err(RaftError::NotParticipating);
        }

        tracing::debug!(member = %self.state.myself, role = ?self.state.role, term = self.state.term, %event, "handling event");
        let outcome = {
            let cached = CachedLog::new(&self.log, &self.cache);
            let view = RaftStateView::new(&self.state, &cached);
            roles::handle(&view, &event, &self.config)
        };

        match self.apply_outcome(outcome) {
            Ok(applied) => Ok(applied),
            Err(err) => {
                tracing::error!(member = %self.state.myself, %err, "fatal error while applying outcome, leaving the cluster");
                self.stop_participating();
                Err(err)
            }
        }
    }

    /// Apply `outcome` to the state, the log and the cache.
    ///
    /// The outcome is validated first; log commands then run strictly in
    /// order, and the state fields are replaced only once every command
    /// succeeded.
    pub fn apply_outcome(&mut self, outcome: Outcome) -> Result<Applied, RaftError> {
        self.check_consistency(&outcome)?;

        let mut applied = Applied::default();
        let mut commit = self.state.commit_index;
        let mut membership_changed = false;

        for command in &outcome.log_commands {
            match command {
                RaftLogCommand::Append { at_index, entries } => {
                    if entries.is_empty() {
                        continue;
                    }
                    let last = self.log.append(*at_index, entries)?;
                    for (offset, entry) in entries.iter().enumerate() {
                        self.cache.put(at_index + offset as u64, entry.clone());
                    }
                    self.cache.mark_durable(last);
                    membership_changed |= self.membership.on_append(*at_index, entries);
                    applied.appended = Some(match applied.appended {
                        Some((first, _)) => (first.min(*at_index), last),
                        None => (*at_index, last),
                    });
                }
                RaftLogCommand::Truncate { from_index } => {
                    self.log.truncate(*from_index, commit)?;
                    self.cache.truncate(*from_index);
                    membership_changed |= self.membership.on_truncate(*from_index);
                    applied.truncated_from = Some(applied.truncated_from.map_or(*from_index, |t| t.min(*from_index)));
                    if let Some((first, last)) = applied.appended {
                        applied.appended = (first < *from_index).then(|| (first, last.min(from_index - 1)));
                    }
                }
                RaftLogCommand::CommitUpTo { index } => {
                    if *index < commit {
                        return Err(ConsistencyError::CommitIndexDecreased {
                            current: commit,
                            proposed: *index,
                        }
                        .into());
                    }
                    let append_index = self.log.append_index();
                    if *index > append_index {
                        return Err(ConsistencyError::CommitBeyondLog {
                            commit_index: *index,
                            append_index,
                        }
                        .into());
                    }
                    commit = *index;
                }
                RaftLogCommand::Skip { index, term } => {
                    let contained = self.log.read_entry_term(*index) == Some(*term);
                    self.log.skip(*index, *term)?;
                    self.cache.clear();
                    if !contained {
                        membership_changed |= self.membership.on_truncate(index + 1);
                    }
                    self.membership.on_skip(*index);
                    self.last_delivered = self.last_delivered.max(*index);
                }
                RaftLogCommand::Prune { index } => {
                    if *index > commit {
                        return Err(ConsistencyError::PruneBeyondCommit {
                            index: *index,
                            commit_index: commit,
                        }
                        .into());
                    }
                    // never drop entries the state machine has not been handed yet
                    let through = (*index).min(self.last_delivered);
                    if through > self.log.prev_index() {
                        self.log.prune(through)?;
                        self.cache.evict_through(through);
                        self.membership.on_skip(through);
                        applied.pruned_through = Some(through);
                        tracing::info!(member = %self.state.myself, through, "pruned log prefix");
                    }
                }
            }
        }

        let append_index = self.log.append_index();
        if outcome.commit_index > append_index {
            return Err(ConsistencyError::CommitBeyondLog {
                commit_index: outcome.commit_index,
                append_index,
            }
            .into());
        }

        applied.term_or_vote_changed = outcome.term != self.state.term || outcome.voted_for != self.state.voted_for;
        if outcome.role != self.state.role {
            tracing::info!(
                member = %self.state.myself,
                from = ?self.state.role,
                to = ?outcome.role,
                term = outcome.term,
                "role change"
            );
        }

        self.state.role = outcome.role;
        self.state.term = outcome.term;
        self.state.leader = outcome.leader;
        self.state.leader_commit = outcome.leader_commit;
        self.state.voted_for = outcome.voted_for;
        self.state.votes_for_me = outcome.votes_for_me;
        self.state.pre_election = outcome.pre_election;
        self.state.pre_votes_for_me = outcome.pre_votes_for_me;
        self.state.last_log_index_before_we_became_leader = outcome.last_log_index_before_we_became_leader;
        self.state.follower_states = outcome.follower_states;
        self.state.commit_index = outcome.commit_index;
        self.state.heartbeat_tick = outcome.heartbeat_tick;
        self.state.heartbeat_responders = outcome.heartbeat_responders;

        if membership_changed {
            self.adopt_membership();
        }

        applied.committed = self.collect_committed()?;
        if let Some((last, _)) = applied.committed.last() {
            self.cache.evict_through((*last).min(self.cache.durable_through()));
        }
        self.step_down_if_removed();

        applied.outgoing = outcome.outgoing;
        applied.renew_election_timeout = outcome.renew_election_timeout;
        applied.needs_fresh_snapshot = outcome.needs_fresh_snapshot;
        applied.elected = outcome.elected;
        applied.role = self.state.role;
        applied.term = self.state.term;
        applied.leader = self.state.leader;
        applied.commit_index = self.state.commit_index;
        Ok(applied)
    }

    fn check_consistency(&self, outcome: &Outcome) -> Result<(), ConsistencyError> {
        if outcome.term < self.state.term {
            return Err(ConsistencyError::TermDecreased {
                current: self.state.term,
                proposed: outcome.term,
            });
        }
        if outcome.commit_index < self.state.commit_index {
            return Err(ConsistencyError::CommitIndexDecreased {
                current: self.state.commit_index,
                proposed: outcome.commit_index,
            });
        }
        if outcome.role == Role::Leader && outcome.leader != Some(self.state.myself) {
            return Err(ConsistencyError::DoubleLeadership {
                term: outcome.term,
                leader: outcome.leader,
            });
        }
        Ok(())
    }

    /// Both member sets follow the latest appended member set; a leader
    /// starts or stops tracking followers to match.
    fn adopt_membership(&mut self) {
        let members = self.membership.current().clone();
        tracing::info!(member = %self.state.myself, members = ?members, "membership changed");

        if self.state.role == Role::Leader {
            let next = self.log.append_index() + 1;
            let me = self.state.myself;
            self.state.follower_states.retain(|m, _| members.contains(m));
            for member in members.iter().filter(|m| **m != me) {
                self.state
                    .follower_states
                    .entry(*member)
                    .or_insert_with(|| FollowerProgress::new(next));
            }
        }
        self.state.votes_for_me.retain(|m| members.contains(m));
        self.state.heartbeat_responders.retain(|m| members.contains(m));
        self.state.voting_members = members.clone();
        self.state.replication_members = members;
    }

    /// A leader that committed a member set without itself hands over.
    fn step_down_if_removed(&mut self) {
        let me = self.state.myself;
        if self.state.role == Role::Leader
            && !self.state.voting_members.contains(&me)
            && self.membership.current_index() <= self.state.commit_index
        {
            tracing::info!(member = %me, term = self.state.term, "removed from the cluster, stepping down");
            self.state.role = Role::Follower;
            self.state.leader = None;
            self.state.follower_states.clear();
            self.state.heartbeat_responders.clear();
        }
    }

    fn collect_committed(&mut self) -> Result<Vec<(LogIndex, RaftLogEntry)>, LogError> {
        let commit = self.state.commit_index;
        if commit <= self.last_delivered {
            return Ok(Vec::new());
        }
        let cached = CachedLog::new(&self.log, &self.cache);
        let from = (self.last_delivered + 1).max(cached.prev_index() + 1);
        let committed = (from..=commit)
            .map(|index| cached.entry_at(index).map(|entry| (index, entry)))
            .collect::<Result<Vec<_>, _>>()?;
        self.last_delivered = commit;
        Ok(committed)
    }

    fn stop_participating(&mut self) {
        self.participating = false;
        self.state.role = Role::Follower;
        self.state.leader = None;
        self.state.votes_for_me.clear();
        self.state.pre_election = false;
        self.state.pre_votes_for_me.clear();
        self.state.follower_states.clear();
        self.state.heartbeat_responders.clear();
    }

    pub fn is_participating(&self) -> bool {
        self.participating
    }

    pub fn state(&self) -> &RaftState {
        &self.state
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn myself(&self) -> MemberId {
        self.state.myself
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// The durable log, for storage concerns that live next to it (term and
    /// vote). Entries must only change through [`RaftNode::apply_outcome`].
    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }

    pub fn cache(&self) -> &InFlightCache {
        &self.cache
    }

    /// Deep copy of the state and every readable entry.
    pub fn snapshot(&self) -> Result<ReplicaSnapshot, LogError> {
        let cached = CachedLog::new(&self.log, &self.cache);
        Ok(ReplicaSnapshot::new(self.state.clone(), InMemoryRaftLog::copy_of(&cached)?))
    }
}
