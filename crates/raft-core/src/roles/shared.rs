//! # shared
//!
//! why: the parts of the protocol every role runs the same way
//! relations: called from follower.rs, candidate.rs and leader.rs; reads ReadableRaftState, writes Outcome
//! what: vote and pre-vote handling, append as follower, compaction info, snapshot skip, prune, elections

use crate::entry::{LogIndex, MemberId, Term};
use crate::log::ReadableRaftLog;
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, LogCompactionInfo, PreVoteRequest, PreVoteResponse, RaftMessage,
    VoteRequest, VoteResponse,
};
use crate::node::Role;
use crate::outcome::{Outcome, RaftLogCommand};
use crate::state::{is_majority, FollowerProgress, ReadableRaftState};

pub(super) fn handle_vote_request<S: ReadableRaftState + ?Sized>(view: &S, req: &VoteRequest, outcome: &mut Outcome) {
    let me = view.myself();

    if req.term < outcome.term {
        tracing::debug!(member = %me, candidate = %req.candidate, req_term = req.term, term = outcome.term, "rejecting stale vote request");
        outcome.send(req.from, vote_response(me, outcome.term, false));
        return;
    }

    let my_last = view.entry_log().last_position();
    let willing = outcome.voted_for.map_or(true, |voted| voted == req.candidate);
    let up_to_date = req.last_log_position().is_at_least_as_up_to_date_as(&my_last);
    let granted = willing && up_to_date;

    if granted {
        outcome.voted_for = Some(req.candidate);
        outcome.renew_election_timeout = true;
    }
    tracing::debug!(
        member = %me,
        candidate = %req.candidate,
        term = outcome.term,
        granted,
        willing,
        up_to_date,
        "handled vote request"
    );
    outcome.send(req.from, vote_response(me, outcome.term, granted));
}

/// Would we vote for `req.candidate` if it started an election now?
///
/// Answering changes nothing: no vote is recorded and the election timer
/// keeps running, so a member cut off from the cluster cannot disturb a
/// healthy leader by campaigning in ever higher terms.
pub(super) fn handle_pre_vote_request<S: ReadableRaftState + ?Sized>(
    view: &S,
    req: &PreVoteRequest,
    outcome: &mut Outcome,
) {
    let me = view.myself();
    let my_last = view.entry_log().last_position();

    let newer_term = req.term > outcome.term;
    let voter = view.voting_members().contains(&req.candidate);
    let up_to_date = req.last_log_position().is_at_least_as_up_to_date_as(&my_last);
    // a member still hearing from a leader keeps it
    let leaderless = outcome.role != Role::Leader && (outcome.leader.is_none() || outcome.pre_election);
    let granted = newer_term && voter && up_to_date && leaderless;

    tracing::debug!(
        member = %me,
        candidate = %req.candidate,
        req_term = req.term,
        term = outcome.term,
        granted,
        up_to_date,
        leaderless,
        "handled pre-vote request"
    );
    outcome.send(
        req.from,
        RaftMessage::PreVoteResponse(PreVoteResponse {
            from: me,
            term: outcome.term,
            vote_granted: granted,
        }),
    );
}

fn vote_response(me: MemberId, term: Term, vote_granted: bool) -> RaftMessage {
    RaftMessage::VoteResponse(VoteResponse {
        from: me,
        term,
        vote_granted,
    })
}

pub(super) fn handle_append_entries<S: ReadableRaftState + ?Sized>(
    view: &S,
    req: &AppendEntriesRequest,
    outcome: &mut Outcome,
) {
    let me = view.myself();
    let log = view.entry_log();

    if req.leader_term < outcome.term {
        tracing::debug!(member = %me, leader = %req.from, req_term = req.leader_term, term = outcome.term, "rejecting append entries from stale leader");
        let append_index = log.append_index();
        outcome.send(
            req.from,
            RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                from: me,
                term: outcome.term,
                success: false,
                match_index: 0,
                append_index,
                conflict_index: append_index + 1,
            }),
        );
        return;
    }

    if outcome.role == Role::Leader {
        tracing::error!(member = %me, other = %req.from, term = outcome.term, "another leader claims my term");
    }
    if outcome.role != Role::Follower {
        outcome.step_down(req.leader_term);
    }
    outcome.leader = Some(req.from);
    outcome.leader_commit = req.leader_commit;
    outcome.renew_election_timeout = true;
    outcome.end_pre_election();

    append_as_follower(view, req, outcome);
}

fn append_as_follower<S: ReadableRaftState + ?Sized>(view: &S, req: &AppendEntriesRequest, outcome: &mut Outcome) {
    let me = view.myself();
    let log = view.entry_log();
    let prev = req.prev_log_index;

    // entries at or below our prev index are covered by a snapshot and therefore committed
    let prev_matches = prev < log.prev_index() || log.read_entry_term(prev) == Some(req.prev_log_term);
    if !prev_matches {
        let conflict_index = conflict_hint(log, prev);
        tracing::debug!(
            member = %me,
            prev_index = prev,
            prev_term = req.prev_log_term,
            append_index = log.append_index(),
            conflict_index,
            "log mismatch at prev index"
        );
        outcome.send(
            req.from,
            RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                from: me,
                term: outcome.term,
                success: false,
                match_index: 0,
                append_index: log.append_index(),
                conflict_index,
            }),
        );
        return;
    }

    let mut first_new = None;
    for (offset, entry) in req.entries.iter().enumerate() {
        let index = prev + 1 + offset as u64;
        if index <= log.prev_index() {
            continue;
        }
        match log.read_entry_term(index) {
            Some(term) if term == entry.term => continue,
            Some(term) => {
                tracing::info!(member = %me, index, ours = term, theirs = entry.term, "truncating conflicting suffix");
                outcome.push(RaftLogCommand::Truncate { from_index: index });
                first_new = Some(offset);
                break;
            }
            None => {
                first_new = Some(offset);
                break;
            }
        }
    }

    let mut append_index = log.append_index();
    if let Some(offset) = first_new {
        let at_index = prev + 1 + offset as u64;
        let entries = req.entries[offset..].to_vec();
        append_index = at_index + entries.len() as u64 - 1;
        outcome.push(RaftLogCommand::Append { at_index, entries });
    }

    let last_new = req.last_index();
    let commit = req.leader_commit.min(last_new);
    if commit > outcome.commit_index {
        outcome.commit_up_to(commit);
    }

    outcome.send(
        req.from,
        RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            from: me,
            term: outcome.term,
            success: true,
            match_index: last_new,
            append_index,
            conflict_index: 0,
        }),
    );
}

/// Where the leader should resume shipping after a mismatch at `prev_index`.
///
/// A short log asks for its own end; otherwise the answer is the first index
/// of the run of entries sharing the conflicting term.
pub(super) fn conflict_hint(log: &dyn ReadableRaftLog, prev_index: LogIndex) -> LogIndex {
    let append_index = log.append_index();
    if prev_index > append_index {
        return append_index + 1;
    }
    let Some(conflict_term) = log.read_entry_term(prev_index) else {
        return prev_index;
    };
    let floor = log.prev_index() + 1;
    let mut index = prev_index;
    while index > floor && log.read_entry_term(index - 1) == Some(conflict_term) {
        index -= 1;
    }
    index
}

pub(super) fn handle_log_compaction_info<S: ReadableRaftState + ?Sized>(
    view: &S,
    info: &LogCompactionInfo,
    outcome: &mut Outcome,
) {
    let me = view.myself();
    if info.leader_term < outcome.term {
        tracing::debug!(member = %me, leader = %info.from, "ignoring stale log compaction info");
        return;
    }
    if outcome.role != Role::Follower {
        outcome.step_down(info.leader_term);
    }
    outcome.leader = Some(info.from);
    outcome.renew_election_timeout = true;
    outcome.end_pre_election();

    if outcome.commit_index < info.prev_index {
        tracing::info!(
            member = %me,
            leader = %info.from,
            leader_prev_index = info.prev_index,
            commit_index = outcome.commit_index,
            "leader compacted entries we still need, asking for a snapshot"
        );
        outcome.needs_fresh_snapshot = true;
    }
}

pub(super) fn handle_snapshot_installed<S: ReadableRaftState + ?Sized>(
    view: &S,
    index: LogIndex,
    term: Term,
    outcome: &mut Outcome,
) {
    if index <= outcome.commit_index {
        tracing::debug!(member = %view.myself(), index, commit_index = outcome.commit_index, "snapshot is not ahead of commit point");
        return;
    }
    tracing::info!(member = %view.myself(), index, term, "skipping log forward to installed snapshot");
    outcome.push(RaftLogCommand::Skip { index, term });
    outcome.commit_up_to(index);
}

/// The state machine captured everything through `index`; drop it from the log.
pub(super) fn handle_prune<S: ReadableRaftState + ?Sized>(view: &S, index: LogIndex, outcome: &mut Outcome) {
    let through = index.min(outcome.commit_index);
    if through <= view.entry_log().prev_index() {
        tracing::debug!(member = %view.myself(), index, prev_index = view.entry_log().prev_index(), "nothing to prune");
        return;
    }
    if through < index {
        tracing::debug!(member = %view.myself(), index, commit_index = outcome.commit_index, "pruning only up to the commit index");
    }
    outcome.push(RaftLogCommand::Prune { index: through });
}

/// Ask the other voters whether they would elect us before moving the term.
pub(super) fn start_pre_election<S: ReadableRaftState + ?Sized>(view: &S, outcome: &mut Outcome) {
    let me = view.myself();
    if !view.voting_members().contains(&me) {
        tracing::debug!(member = %me, "not a voting member, ignoring election timeout");
        return;
    }

    outcome.pre_election = true;
    outcome.pre_votes_for_me.clear();
    outcome.pre_votes_for_me.insert(me);
    outcome.leader = None;
    outcome.renew_election_timeout = true;

    let last = view.entry_log().last_position();
    tracing::info!(member = %me, term = outcome.term, last_log = %last, "starting pre-election");

    for member in view.voting_members().iter().filter(|m| **m != me) {
        outcome.send(
            *member,
            RaftMessage::PreVoteRequest(PreVoteRequest {
                from: me,
                term: outcome.term + 1,
                candidate: me,
                last_log_index: last.index,
                last_log_term: last.term,
            }),
        );
    }

    if is_majority(outcome.pre_votes_for_me.len(), view.voting_members().len()) {
        start_election(view, outcome);
    }
}

pub(super) fn start_election<S: ReadableRaftState + ?Sized>(view: &S, outcome: &mut Outcome) {
    let me = view.myself();
    if !view.voting_members().contains(&me) {
        tracing::debug!(member = %me, "not a voting member, ignoring election timeout");
        return;
    }

    outcome.end_pre_election();
    outcome.term += 1;
    outcome.role = Role::Candidate;
    outcome.leader = None;
    outcome.voted_for = Some(me);
    outcome.votes_for_me.clear();
    outcome.votes_for_me.insert(me);
    outcome.follower_states.clear();
    outcome.heartbeat_responders.clear();
    outcome.renew_election_timeout = true;

    let last = view.entry_log().last_position();
    tracing::info!(member = %me, term = outcome.term, last_log = %last, "starting election");

    for member in view.voting_members().iter().filter(|m| **m != me) {
        outcome.send(
            *member,
            RaftMessage::VoteRequest(VoteRequest {
                from: me,
                term: outcome.term,
                candidate: me,
                last_log_index: last.index,
                last_log_term: last.term,
            }),
        );
    }

    if is_majority(outcome.votes_for_me.len(), view.voting_members().len()) {
        become_leader(view, outcome);
    }
}

pub(super) fn become_leader<S: ReadableRaftState + ?Sized>(view: &S, outcome: &mut Outcome) {
    let me = view.myself();
    let last = view.entry_log().last_position();

    tracing::info!(member = %me, term = outcome.term, votes = outcome.votes_for_me.len(), "becoming leader");

    outcome.role = Role::Leader;
    outcome.leader = Some(me);
    outcome.elected = true;
    outcome.last_log_index_before_we_became_leader = last.index;
    outcome.votes_for_me.clear();
    outcome.end_pre_election();
    outcome.heartbeat_tick = 1;
    outcome.heartbeat_responders.clear();
    outcome.leader_commit = outcome.commit_index;
    outcome.follower_states = view
        .replication_members()
        .iter()
        .filter(|m| **m != me)
        .map(|m| (*m, FollowerProgress::new(last.index + 1)))
        .collect();

    let followers: Vec<_> = outcome.follower_states.keys().copied().collect();
    for member in followers {
        outcome.send(
            member,
            RaftMessage::AppendEntries(AppendEntriesRequest {
                from: me,
                leader_term: outcome.term,
                prev_log_index: last.index,
                prev_log_term: last.term,
                entries: Vec::new(),
                leader_commit: outcome.commit_index,
            }),
        );
    }
}
