//! # roles
//!
//! why: compute what a replica should do about one event, without doing it
//! relations: reads ReadableRaftState (state.rs), produces Outcome (outcome.rs), driven by node.rs
//! what: handle() dispatching on Role to the follower, candidate and leader handlers

mod candidate;
mod follower;
mod leader;
mod shared;

use crate::config::RaftConfig;
use crate::message::{RaftEvent, RaftMessage};
use crate::node::Role;
use crate::outcome::Outcome;
use crate::state::ReadableRaftState;

/// Pure transition function: `(role, state view, event) -> Outcome`.
///
/// A message carrying a higher term always demotes the replica to follower in
/// that term before the role-specific logic sees the message. Pre-vote
/// requests are the exception: their term is only hypothetical.
pub fn handle<S: ReadableRaftState + ?Sized>(view: &S, event: &RaftEvent, config: &RaftConfig) -> Outcome {
    let mut outcome = Outcome::new(view.state());

    if let RaftEvent::Message(message) = event {
        if message.term() > outcome.term && !matches!(message, RaftMessage::PreVoteRequest(_)) {
            tracing::info!(
                member = %view.myself(),
                from = %message.from(),
                term = outcome.term,
                new_term = message.term(),
                role = ?outcome.role,
                "observed higher term, stepping down"
            );
            outcome.step_down(message.term());
        }
    }

    match outcome.role {
        Role::Follower => follower::handle(view, event, &mut outcome, config),
        Role::Candidate => candidate::handle(view, event, &mut outcome),
        Role::Leader => leader::handle(view, event, &mut outcome, config),
    }

    outcome
}
