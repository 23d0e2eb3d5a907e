//! # applier
//!
//! why: hand committed entries to whatever consumes them downstream
//! relations: called by RaftServer with Applied::committed, in index order, once per entry
//! what: StateMachineApplier trait, channel-backed implementation

use raft_core::{LogIndex, RaftLogEntry};
use tokio::sync::mpsc;

/// Consumer of committed entries.
///
/// Called from the processing loop, so implementations must not block.
pub trait StateMachineApplier: Send + 'static {
    fn apply(&mut self, index: LogIndex, entry: &RaftLogEntry);
}

/// Forwards committed entries to a channel, for consumers running on their own task.
impl StateMachineApplier for mpsc::UnboundedSender<(LogIndex, RaftLogEntry)> {
    fn apply(&mut self, index: LogIndex, entry: &RaftLogEntry) {
        if self.send((index, entry.clone())).is_err() {
            tracing::warn!(index, "state machine channel closed, dropping committed entry");
        }
    }
}
