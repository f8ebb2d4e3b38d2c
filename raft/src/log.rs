//! In-memory storage for the entries of the replicated log.
//!
//! Durability is not handled here; the [`Callbacks`](crate::Callbacks)
//! `log_offer` / `log_pop` hooks are invoked by the server around every
//! mutation so an implementation can persist the log elsewhere.

use alloc::vec::Vec;

use crate::message::{Entry, LogIndex, TermId};

/// The ordered log of a Raft node, indexed from 1.
pub struct LogStore {
    entries: Vec<Entry>,
    /// The index of the latest entry known to be committed.
    pub(crate) commit_idx: LogIndex,
}

impl LogStore {
    /// Constructs an empty log.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            commit_idx: LogIndex::default(),
        }
    }

    fn slot(&self, idx: LogIndex) -> Option<usize> {
        if idx == LogIndex::default() || idx.0 as usize > self.entries.len() {
            None
        } else {
            Some(idx.0 as usize - 1)
        }
    }

    /// Appends an entry at the end of the log, returning its index.
    pub fn append(&mut self, entry: Entry) -> LogIndex {
        self.entries.push(entry);
        self.last_index()
    }

    /// Removes every entry at `from` and after, returning the removed tail in
    /// log order.
    pub fn truncate_from(&mut self, from: LogIndex) -> Vec<Entry> {
        match self.slot(from) {
            Some(slot) => self.entries.split_off(slot),
            None => Vec::new(),
        }
    }

    /// The entry at `idx`, or `None` past the end of the log.
    pub fn get(&self, idx: LogIndex) -> Option<&Entry> {
        self.slot(idx).and_then(|slot| self.entries.get(slot))
    }

    /// The term of the entry at `idx`; index zero reports the default term so
    /// a log-matching probe against an empty prefix succeeds.
    pub fn term_of(&self, idx: LogIndex) -> Option<TermId> {
        if idx == LogIndex::default() {
            Some(TermId::default())
        } else {
            self.get(idx).map(|entry| entry.term)
        }
    }

    /// The index of the last entry, or zero when empty.
    pub fn last_index(&self) -> LogIndex {
        LogIndex(self.entries.len() as u64)
    }

    /// The term of the last entry, or the default term when empty.
    pub fn last_term(&self) -> TermId {
        self.entries
            .last()
            .map(|entry| entry.term)
            .unwrap_or_default()
    }

    /// The contiguous entries starting at `from`, to the end of the log.
    pub fn entries_from(&self, from: LogIndex) -> &[Entry] {
        match self.slot(from) {
            Some(slot) => &self.entries[slot..],
            None => &[],
        }
    }
}
