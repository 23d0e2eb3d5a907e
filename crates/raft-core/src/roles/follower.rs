//! # follower
//!
//! why: the passive role; follows a leader, votes, and starts (pre-)elections when the leader goes quiet
//! relations: dispatched from roles/mod.rs, delegates most traffic to shared.rs
//! what: handle() for followers, pre-vote tallying

use crate::config::RaftConfig;
use crate::message::{PreVoteResponse, RaftEvent, RaftMessage};
use crate::outcome::Outcome;
use crate::state::{is_majority, ReadableRaftState};

use super::shared;

pub(super) fn handle<S: ReadableRaftState + ?Sized>(
    view: &S,
    event: &RaftEvent,
    outcome: &mut Outcome,
    config: &RaftConfig,
) {
    match event {
        RaftEvent::Message(RaftMessage::VoteRequest(req)) => shared::handle_vote_request(view, req, outcome),
        RaftEvent::Message(RaftMessage::PreVoteRequest(req)) => shared::handle_pre_vote_request(view, req, outcome),
        RaftEvent::Message(RaftMessage::PreVoteResponse(resp)) => on_pre_vote_response(view, resp, outcome),
        RaftEvent::Message(RaftMessage::AppendEntries(req)) => shared::handle_append_entries(view, req, outcome),
        RaftEvent::Message(RaftMessage::LogCompactionInfo(info)) => {
            shared::handle_log_compaction_info(view, info, outcome)
        }
        RaftEvent::Message(message @ (RaftMessage::VoteResponse(_) | RaftMessage::AppendEntriesResponse(_))) => {
            tracing::debug!(member = %view.myself(), %message, "follower ignoring response");
        }
        RaftEvent::ElectionTimeout if config.pre_vote => shared::start_pre_election(view, outcome),
        RaftEvent::ElectionTimeout => shared::start_election(view, outcome),
        RaftEvent::HeartbeatTimeout => {}
        RaftEvent::NewEntries(contents) => {
            tracing::debug!(member = %view.myself(), n = contents.len(), leader = ?outcome.leader, "not leader, dropping proposal");
        }
        RaftEvent::SnapshotInstalled { index, term } => shared::handle_snapshot_installed(view, *index, *term, outcome),
        RaftEvent::Prune { index } => shared::handle_prune(view, *index, outcome),
    }
}

fn on_pre_vote_response<S: ReadableRaftState + ?Sized>(view: &S, resp: &PreVoteResponse, outcome: &mut Outcome) {
    if !outcome.pre_election {
        tracing::debug!(member = %view.myself(), from = %resp.from, "no pre-election running, ignoring pre-vote");
        return;
    }
    if !resp.vote_granted {
        tracing::debug!(member = %view.myself(), from = %resp.from, term = resp.term, "pre-vote denied");
        return;
    }
    if !view.voting_members().contains(&resp.from) {
        tracing::warn!(member = %view.myself(), from = %resp.from, "pre-vote from a non-voting member");
        return;
    }

    outcome.pre_votes_for_me.insert(resp.from);
    if is_majority(outcome.pre_votes_for_me.len(), view.voting_members().len()) {
        tracing::info!(member = %view.myself(), votes = outcome.pre_votes_for_me.len(), "won pre-election");
        shared::start_election(view, outcome);
    }
}
