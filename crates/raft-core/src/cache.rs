//! # cache
//!
//! why: serve recently appended entries without a round trip to the durable log
//! relations: filled and purged by RaftNode while applying log commands, consulted by state.rs reads
//! what: InFlightCache with a durability watermark and entry/byte capacity, CachedLog read-through view

use std::collections::BTreeMap;

use crate::entry::{LogIndex, RaftLogEntry, Term};
use crate::error::LogError;
use crate::log::ReadableRaftLog;

/// Bounded map of recently appended entries, keyed by log index.
///
/// Cached indices are always consecutive. Only entries at or below the
/// durability watermark may be evicted; entries whose append has not been
/// confirmed stay cached even when that exceeds the capacity.
#[derive(Debug, Clone)]
pub struct InFlightCache {
    entries: BTreeMap<LogIndex, RaftLogEntry>,
    durable_through: LogIndex,
    total_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
}

impl InFlightCache {
    /// A cache with `max_entries == 0` is disabled and stores nothing.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            durable_through: 0,
            total_bytes: 0,
            max_entries,
            max_bytes,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0
    }

    pub fn put(&mut self, index: LogIndex, entry: RaftLogEntry) {
        if !self.is_enabled() {
            return;
        }
        let consecutive = match self.entries.last_key_value() {
            Some((&last, _)) => index == last + 1,
            None => true,
        };
        if !consecutive {
            tracing::debug!(index, "non-consecutive put, resetting in-flight cache");
            self.clear();
        }
        self.total_bytes += entry.size();
        self.entries.insert(index, entry);
        self.enforce_capacity();
    }

    pub fn get(&self, index: LogIndex) -> Option<&RaftLogEntry> {
        self.entries.get(&index)
    }

    /// Record that everything through `index` has been flushed; nothing is dropped yet.
    pub fn mark_durable(&mut self, index: LogIndex) {
        self.durable_through = self.durable_through.max(index);
        self.enforce_capacity();
    }

    /// Durability through `index` is confirmed and those entries are no longer needed.
    pub fn evict_through(&mut self, index: LogIndex) {
        self.durable_through = self.durable_through.max(index);
        while let Some((&first, _)) = self.entries.first_key_value() {
            if first > index {
                break;
            }
            self.pop_first();
        }
    }

    /// Purge every entry at or after `from_index`.
    pub fn truncate(&mut self, from_index: LogIndex) {
        let removed = self.entries.split_off(&from_index);
        self.total_bytes -= removed.values().map(RaftLogEntry::size).sum::<usize>();
        self.durable_through = self.durable_through.min(from_index.saturating_sub(1));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn durable_through(&self) -> LogIndex {
        self.durable_through
    }

    fn over_capacity(&self) -> bool {
        self.entries.len() > self.max_entries || self.total_bytes > self.max_bytes
    }

    // oldest first, and never past the watermark
    fn enforce_capacity(&mut self) {
        while self.over_capacity() {
            match self.entries.first_key_value() {
                Some((&first, _)) if first <= self.durable_through => self.pop_first(),
                _ => break,
            }
        }
    }

    fn pop_first(&mut self) {
        if let Some((_, entry)) = self.entries.pop_first() {
            self.total_bytes -= entry.size();
        }
    }
}

/// Read-through view: cached entries first, the log otherwise.
///
/// The cache holds no reference back to the log; this view borrows both.
pub struct CachedLog<'a, L: ?Sized> {
    log: &'a L,
    cache: &'a InFlightCache,
}

impl<'a, L: ReadableRaftLog + ?Sized> CachedLog<'a, L> {
    pub fn new(log: &'a L, cache: &'a InFlightCache) -> Self {
        Self { log, cache }
    }
}

impl<L: ReadableRaftLog + ?Sized> ReadableRaftLog for CachedLog<'_, L> {
    fn append_index(&self) -> LogIndex {
        self.log.append_index()
    }

    fn prev_index(&self) -> LogIndex {
        self.log.prev_index()
    }

    fn prev_term(&self) -> Term {
        self.log.prev_term()
    }

    fn read_entry_term(&self, index: LogIndex) -> Option<Term> {
        match self.cache.get(index) {
            Some(entry) => Some(entry.term),
            None => self.log.read_entry_term(index),
        }
    }

    fn entry_at(&self, index: LogIndex) -> Result<RaftLogEntry, LogError> {
        match self.cache.get(index) {
            Some(entry) => Ok(entry.clone()),
            None => self.log.entry_at(index),
        }
    }
}
