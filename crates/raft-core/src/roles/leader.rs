//! # leader
//!
//! why: the active role; accepts proposals, replicates them and decides when they commit
//! relations: dispatched from roles/mod.rs, tracks FollowerProgress (state.rs), emits Outcome commands
//! what: handle() for leaders, append response handling, heartbeats, quorum check, shipping, commit rule

use crate::config::RaftConfig;
use crate::entry::{LogIndex, MemberId, RaftLogEntry, ReplicatedContent};
use crate::message::{AppendEntriesRequest, AppendEntriesResponse, LogCompactionInfo, RaftEvent, RaftMessage};
use crate::outcome::{Outcome, RaftLogCommand};
use crate::state::{is_majority, FollowerProgress, ReadableRaftState};

use super::shared;

pub(super) fn handle<S: ReadableRaftState + ?Sized>(
    view: &S,
    event: &RaftEvent,
    outcome: &mut Outcome,
    config: &RaftConfig,
) {
    match event {
        RaftEvent::Message(RaftMessage::AppendEntriesResponse(resp)) => {
            on_append_response(view, resp, outcome, config)
        }
        RaftEvent::Message(RaftMessage::VoteRequest(req)) => shared::handle_vote_request(view, req, outcome),
        RaftEvent::Message(RaftMessage::AppendEntries(req)) => shared::handle_append_entries(view, req, outcome),
        RaftEvent::Message(RaftMessage::LogCompactionInfo(info)) => {
            shared::handle_log_compaction_info(view, info, outcome)
        }
        RaftEvent::Message(RaftMessage::PreVoteRequest(req)) => shared::handle_pre_vote_request(view, req, outcome),
        RaftEvent::Message(RaftMessage::VoteResponse(_) | RaftMessage::PreVoteResponse(_)) => {}
        RaftEvent::HeartbeatTimeout => on_heartbeat_timeout(view, outcome, config),
        RaftEvent::ElectionTimeout => on_election_timeout(view, outcome),
        RaftEvent::NewEntries(contents) => on_new_entries(view, contents, outcome, config),
        RaftEvent::SnapshotInstalled { index, .. } => {
            tracing::warn!(member = %view.myself(), index, "leader ignoring installed snapshot");
        }
        RaftEvent::Prune { index } => shared::handle_prune(view, *index, outcome),
    }
}

fn on_append_response<S: ReadableRaftState + ?Sized>(
    view: &S,
    resp: &AppendEntriesResponse,
    outcome: &mut Outcome,
    config: &RaftConfig,
) {
    let me = view.myself();
    if resp.term < outcome.term {
        tracing::debug!(member = %me, from = %resp.from, resp_term = resp.term, term = outcome.term, "ignoring stale append response");
        return;
    }
    if !view.replication_members().contains(&resp.from) {
        tracing::debug!(member = %me, from = %resp.from, "append response from a non-member");
        return;
    }

    let append_index = view.entry_log().append_index();
    if resp.success && resp.match_index > append_index {
        tracing::warn!(
            member = %me,
            from = %resp.from,
            match_index = resp.match_index,
            append_index,
            "follower claims entries we never appended, ignoring response"
        );
        return;
    }
    outcome.heartbeat_responders.insert(resp.from);
    let mut progress = outcome
        .follower_states
        .get(&resp.from)
        .copied()
        .unwrap_or_else(|| FollowerProgress::new(append_index + 1));
    progress.last_response_tick = outcome.heartbeat_tick;

    if resp.success {
        if resp.match_index <= progress.match_index {
            // delayed or duplicate response, nothing new to learn
            outcome.follower_states.insert(resp.from, progress);
            return;
        }
        progress.match_index = resp.match_index;
        progress.next_index = progress.next_index.max(resp.match_index.saturating_add(1));
        outcome.follower_states.insert(resp.from, progress);

        advance_commit(view, outcome, append_index);
        if progress.next_index <= append_index {
            ship(view, outcome, config, resp.from);
        }
    } else {
        let floor = progress.match_index + 1;
        let next = resp
            .conflict_index
            .max(1)
            .min(progress.next_index.saturating_sub(1))
            .max(floor);
        tracing::debug!(
            member = %me,
            follower = %resp.from,
            old_next = progress.next_index,
            next,
            conflict_index = resp.conflict_index,
            "follower rejected append, backing off"
        );
        progress.next_index = next;
        outcome.follower_states.insert(resp.from, progress);
        ship(view, outcome, config, resp.from);
    }
}

fn on_heartbeat_timeout<S: ReadableRaftState + ?Sized>(view: &S, outcome: &mut Outcome, config: &RaftConfig) {
    let me = view.myself();
    let tick = outcome.heartbeat_tick;
    let append_index = view.entry_log().append_index();

    let followers: Vec<MemberId> = view.replication_members().iter().copied().filter(|m| *m != me).collect();
    for member in followers {
        let progress = *outcome
            .follower_states
            .entry(member)
            .or_insert_with(|| FollowerProgress::new(append_index + 1));
        if progress.last_response_tick < tick {
            ship(view, outcome, config, member);
        }
    }
    outcome.heartbeat_tick = tick + 1;
}

fn on_election_timeout<S: ReadableRaftState + ?Sized>(view: &S, outcome: &mut Outcome) {
    let me = view.myself();
    let voting = view.voting_members();
    let heard = voting
        .iter()
        .filter(|m| **m == me || outcome.heartbeat_responders.contains(m))
        .count();

    if is_majority(heard, voting.len()) {
        outcome.heartbeat_responders.clear();
        return;
    }

    tracing::warn!(member = %me, term = outcome.term, heard, members = voting.len(), "lost contact with a majority, stepping down");
    let term = outcome.term;
    outcome.step_down(term);
    outcome.leader = None;
}

fn on_new_entries<S: ReadableRaftState + ?Sized>(
    view: &S,
    contents: &[ReplicatedContent],
    outcome: &mut Outcome,
    config: &RaftConfig,
) {
    if contents.is_empty() {
        return;
    }
    let me = view.myself();
    let last = view.entry_log().last_position();
    let at_index = last.index + 1;
    let entries: Vec<RaftLogEntry> = contents
        .iter()
        .map(|content| RaftLogEntry {
            term: outcome.term,
            content: content.clone(),
        })
        .collect();
    let new_append_index = last.index + entries.len() as u64;

    tracing::debug!(member = %me, at_index, n = entries.len(), term = outcome.term, "appending proposal");
    outcome.push(RaftLogCommand::Append {
        at_index,
        entries: entries.clone(),
    });

    // pipeline to followers that are caught up; lagging ones catch up through responses and heartbeats
    let followers: Vec<MemberId> = view.replication_members().iter().copied().filter(|m| *m != me).collect();
    for member in followers {
        let progress = outcome
            .follower_states
            .entry(member)
            .or_insert_with(|| FollowerProgress::new(at_index));
        if progress.next_index != at_index {
            continue;
        }
        let batch: Vec<RaftLogEntry> = entries.iter().take(config.max_append_batch).cloned().collect();
        progress.next_index = at_index + batch.len() as u64;
        let request = AppendEntriesRequest {
            from: me,
            leader_term: outcome.term,
            prev_log_index: last.index,
            prev_log_term: last.term,
            entries: batch,
            leader_commit: outcome.commit_index,
        };
        outcome.send(member, RaftMessage::AppendEntries(request));
    }

    advance_commit(view, outcome, new_append_index);
}

/// Send `member` whatever it needs next, starting at its `next_index`.
fn ship<S: ReadableRaftState + ?Sized>(view: &S, outcome: &mut Outcome, config: &RaftConfig, member: MemberId) {
    let me = view.myself();
    let log = view.entry_log();
    let Some(progress) = outcome.follower_states.get(&member).copied() else {
        return;
    };
    let next = progress.next_index.max(1);

    if next <= log.prev_index() {
        tracing::info!(member = %me, follower = %member, next, prev_index = log.prev_index(), "follower needs compacted entries");
        outcome.send(
            member,
            RaftMessage::LogCompactionInfo(LogCompactionInfo {
                from: me,
                leader_term: outcome.term,
                prev_index: log.prev_index(),
            }),
        );
        return;
    }

    let prev_log_index = next - 1;
    let Some(prev_log_term) = log.read_entry_term(prev_log_index) else {
        tracing::warn!(member = %me, follower = %member, prev_log_index, "no term for prev index, not shipping");
        return;
    };
    let entries = match log.entries_from(next, config.max_append_batch) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(member = %me, follower = %member, next, %err, "cannot read entries to ship");
            return;
        }
    };
    let sent = entries.len() as u64;
    outcome.send(
        member,
        RaftMessage::AppendEntries(AppendEntriesRequest {
            from: me,
            leader_term: outcome.term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: outcome.commit_index,
        }),
    );
    if let Some(progress) = outcome.follower_states.get_mut(&member) {
        progress.next_index = next + sent;
    }
}

/// Commit the highest index a majority of replication members hold, provided
/// it belongs to the current term.
///
/// `own_match` is the leader's own append index, including entries this
/// outcome is about to append.
fn advance_commit<S: ReadableRaftState + ?Sized>(view: &S, outcome: &mut Outcome, own_match: LogIndex) {
    let me = view.myself();
    let members = view.replication_members();
    if members.is_empty() {
        return;
    }

    let mut matches: Vec<LogIndex> = members
        .iter()
        .map(|m| {
            if *m == me {
                own_match
            } else {
                outcome.follower_states.get(m).map_or(0, |p| p.match_index)
            }
        })
        .collect();
    matches.sort_unstable_by(|a, b| b.cmp(a));
    let candidate = matches[members.len() / 2];

    if candidate <= outcome.commit_index {
        return;
    }

    let log = view.entry_log();
    let candidate_term = if candidate > log.append_index() {
        Some(outcome.term)
    } else {
        log.read_entry_term(candidate)
    };
    if candidate_term != Some(outcome.term) {
        tracing::debug!(
            member = %me,
            candidate,
            candidate_term = ?candidate_term,
            term = outcome.term,
            "majority holds an entry from an earlier term, not committing by count"
        );
        return;
    }

    tracing::debug!(member = %me, from = outcome.commit_index, to = candidate, "advancing commit index");
    outcome.commit_up_to(candidate);
    outcome.leader_commit = candidate;
}
