//! # candidate
//!
//! why: the campaigning role; collects votes for its term and takes over on a majority
//! relations: dispatched from roles/mod.rs, delegates leader traffic and timeouts to shared.rs
//! what: handle() for candidates, vote tallying

use crate::message::{RaftEvent, RaftMessage, VoteResponse};
use crate::outcome::Outcome;
use crate::state::{is_majority, ReadableRaftState};

use super::shared;

pub(super) fn handle<S: ReadableRaftState + ?Sized>(view: &S, event: &RaftEvent, outcome: &mut Outcome) {
    match event {
        RaftEvent::Message(RaftMessage::VoteResponse(resp)) => on_vote_response(view, resp, outcome),
        RaftEvent::Message(RaftMessage::VoteRequest(req)) => shared::handle_vote_request(view, req, outcome),
        RaftEvent::Message(RaftMessage::AppendEntries(req)) => shared::handle_append_entries(view, req, outcome),
        RaftEvent::Message(RaftMessage::LogCompactionInfo(info)) => {
            shared::handle_log_compaction_info(view, info, outcome)
        }
        RaftEvent::Message(RaftMessage::PreVoteRequest(req)) => shared::handle_pre_vote_request(view, req, outcome),
        RaftEvent::Message(RaftMessage::AppendEntriesResponse(_) | RaftMessage::PreVoteResponse(_)) => {}
        RaftEvent::ElectionTimeout => shared::start_election(view, outcome),
        RaftEvent::HeartbeatTimeout => {}
        RaftEvent::NewEntries(contents) => {
            tracing::debug!(member = %view.myself(), n = contents.len(), "candidate dropping proposal");
        }
        RaftEvent::SnapshotInstalled { index, term } => shared::handle_snapshot_installed(view, *index, *term, outcome),
        RaftEvent::Prune { index } => shared::handle_prune(view, *index, outcome),
    }
}

fn on_vote_response<S: ReadableRaftState + ?Sized>(view: &S, resp: &VoteResponse, outcome: &mut Outcome) {
    if resp.term < outcome.term {
        tracing::debug!(member = %view.myself(), from = %resp.from, resp_term = resp.term, term = outcome.term, "ignoring stale vote");
        return;
    }
    if !resp.vote_granted {
        tracing::debug!(member = %view.myself(), from = %resp.from, term = outcome.term, "vote denied");
        return;
    }
    if !view.voting_members().contains(&resp.from) {
        tracing::warn!(member = %view.myself(), from = %resp.from, "vote from a non-voting member");
        return;
    }

    outcome.votes_for_me.insert(resp.from);
    if is_majority(outcome.votes_for_me.len(), view.voting_members().len()) {
        shared::become_leader(view, outcome);
    }
}
