//! # membership
//!
//! why: membership changes take effect as soon as they are appended, and
//!      must be undone when the entry carrying them is truncated away
//! relations: fed by RaftNode::apply_outcome for every Append/Truncate/Skip
//! what: MembershipLog

use std::collections::BTreeSet;

use crate::entry::{LogIndex, MemberId, RaftLogEntry, ReplicatedContent};

/// Member sets carried by log entries, in log order, on top of a base set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipLog {
    base: BTreeSet<MemberId>,
    changes: Vec<(LogIndex, BTreeSet<MemberId>)>,
}

impl MembershipLog {
    pub fn new(base: BTreeSet<MemberId>) -> Self {
        Self {
            base,
            changes: Vec::new(),
        }
    }

    /// The member set in effect: the latest appended one, or the base set.
    pub fn current(&self) -> &BTreeSet<MemberId> {
        self.changes.last().map_or(&self.base, |(_, members)| members)
    }

    /// Index of the entry that introduced the current set, 0 for the base set.
    pub fn current_index(&self) -> LogIndex {
        self.changes.last().map_or(0, |(index, _)| *index)
    }

    /// Record member sets among `entries`, the first at `at_index`. Returns
    /// true when the effective set changed.
    pub fn on_append(&mut self, at_index: LogIndex, entries: &[RaftLogEntry]) -> bool {
        let mut changed = false;
        for (offset, entry) in entries.iter().enumerate() {
            if let ReplicatedContent::MemberSet(members) = &entry.content {
                let index = at_index + offset as u64;
                changed |= members != self.current();
                self.changes.push((index, members.clone()));
            }
        }
        changed
    }

    /// Forget member sets at or after `from_index`. Returns true when the
    /// effective set changed.
    pub fn on_truncate(&mut self, from_index: LogIndex) -> bool {
        let before = self.current().clone();
        self.changes.retain(|(index, _)| *index < from_index);
        before != *self.current()
    }

    /// The log prefix through `index` is now covered by a snapshot; the set
    /// in effect at `index` becomes the base.
    ///
    /// A snapshot does not carry membership, so the set from before the
    /// snapshot stays in force until a later entry changes it.
    pub fn on_skip(&mut self, index: LogIndex) {
        if let Some((_, members)) = self.changes.iter().rev().find(|(i, _)| *i <= index) {
            self.base = members.clone();
        }
        self.changes.retain(|(i, _)| *i > index);
    }
}
