//! Raft message types exchanged between nodes.
//!
//! This module provides the data types carried by the Raft RPCs. Requests are
//! delivered to a [`Raft`](crate::server::Raft) through its `recv_*` methods
//! and responses travel back over the same connection, so every type here has
//! a request/response pairing rather than a single envelope.

use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

use alloc::vec::Vec;
use bytes::Bytes;

/// The cluster-unique, strictly positive identifier of a Raft node.
pub type NodeId = u64;

/// The unique, monotonically-increasing ID for a term of Raft group leadership.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TermId(pub u64);

/// A 1-based index into a Raft log.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct LogIndex(pub u64);

/// The kind of payload carried by an [`Entry`].
///
/// The integer values are fixed because they appear on the wire in the
/// `<term:id:type>` head of each replicated entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// A serialized command array to execute against the state machine.
    Normal,
    /// A deduplicated, NUL-terminated key list; on apply each listed key is
    /// unlocked and removed.
    DeleteUnlockKeys,
    /// An empty entry appended by a new leader to commit prior-term entries.
    Noop,
}

/// An entry in the replicated log.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// Random identifier assigned by the submitting node.
    pub id: i32,
    /// Payload interpretation tag.
    pub kind: EntryKind,
    /// Leadership term under which the entry was appended.
    pub term: TermId,
    /// Opaque payload interpreted by the state machine.
    pub data: Bytes,
}

/// A request to obtain leadership amongst Raft nodes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VoteRequest {
    /// The candidate's term.
    pub term: TermId,
    /// The node requesting the vote.
    pub candidate_id: NodeId,
    /// The Raft log index of the last log entry stored by the candidate.
    pub last_log_idx: LogIndex,
    /// The Raft leadership term of the last log entry stored by the candidate.
    pub last_log_term: TermId,
}

/// The response to a [`VoteRequest`], granting or denying leadership.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VoteResponse {
    /// The responder's term.
    pub term: TermId,
    /// Whether the vote was granted.
    pub vote_granted: bool,
}

/// A request to append entries to a Raft node's log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppendRequest {
    /// The leader's term.
    pub term: TermId,
    /// The log index immediately before the first entry in `entries`.
    pub prev_log_idx: LogIndex,
    /// The term of the entry at `prev_log_idx`.
    pub prev_log_term: TermId,
    /// The leader's commit index, bounded by the last entry sent.
    pub leader_commit: LogIndex,
    /// Consecutive log entries to append; empty for a heartbeat.
    pub entries: Vec<Entry>,
}

/// The response to an [`AppendRequest`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AppendResponse {
    /// The responder's term.
    pub term: TermId,
    /// Whether the entries were appended.
    pub success: bool,
    /// The index of the last entry processed by the responder on success, or
    /// the index of the last entry in its log on failure.
    pub current_idx: LogIndex,
    /// The index of the first entry of the batch, or zero on failure.
    pub first_idx: LogIndex,
}

/// A token returned by [`recv_entry`](crate::server::Raft::recv_entry),
/// identifying where a submitted entry landed in the log.
///
/// Pass it back to [`committed`](crate::server::Raft::committed) to find out
/// whether the entry reached the applied state or was truncated away by a
/// leadership change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntryReceipt {
    /// The submitted entry's random identifier.
    pub id: i32,
    /// The term under which the entry was appended.
    pub term: TermId,
    /// The log index the entry was appended at.
    pub idx: LogIndex,
}

/// The observable state of a submitted entry, as reported by
/// [`committed`](crate::server::Raft::committed).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommitState {
    /// The entry is still waiting for a commit quorum.
    Pending,
    /// The entry committed and has been applied to the state machine.
    Committed,
    /// The entry was truncated by a newer leader and will never commit.
    Invalidated,
}

//
// EntryKind impls
//

impl EntryKind {
    /// The integer used for this kind in the `<term:id:type>` entry head.
    pub fn as_wire(self) -> u32 {
        match self {
            EntryKind::Normal => 0,
            EntryKind::DeleteUnlockKeys => 1,
            EntryKind::Noop => 2,
        }
    }

    /// Decodes a wire integer back into a kind.
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(EntryKind::Normal),
            1 => Some(EntryKind::DeleteUnlockKeys),
            2 => Some(EntryKind::Noop),
            _ => None,
        }
    }
}

//
// TermId impls
//

impl fmt::Display for TermId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        fmt.debug_tuple("TermId").field(id).finish()
    }
}

impl PartialOrd for TermId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl AddAssign<u64> for TermId {
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self
            .0
            .checked_add(rhs)
            .unwrap_or_else(|| panic!("term overflow"));
    }
}

//
// LogIndex impls
//

impl fmt::Display for LogIndex {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        fmt.debug_tuple("LogIdx").field(id).finish()
    }
}

impl PartialOrd for LogIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for LogIndex {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self(
            self.0
                .checked_add(inc)
                .unwrap_or_else(|| panic!("log index overflow")),
        )
    }
}

impl Sub<u64> for LogIndex {
    type Output = Self;
    fn sub(self, dec: u64) -> Self {
        Self(self.0.saturating_sub(dec))
    }
}

//
// Display impls for RPC payloads
//

impl fmt::Display for VoteRequest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            term,
            candidate_id,
            last_log_idx,
            last_log_term,
        } = self;
        fmt.debug_struct("VoteRequest")
            .field("term", &format_args!("{}", term))
            .field("candidate_id", candidate_id)
            .field("last_log_idx", &format_args!("{}", last_log_idx))
            .field("last_log_term", &format_args!("{}", last_log_term))
            .finish()
    }
}

impl fmt::Display for VoteResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { term, vote_granted } = self;
        fmt.debug_struct("VoteResponse")
            .field("term", &format_args!("{}", term))
            .field("vote_granted", vote_granted)
            .finish()
    }
}

impl fmt::Display for AppendRequest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            term,
            prev_log_idx,
            prev_log_term,
            leader_commit,
            entries,
        } = self;
        fmt.debug_struct("AppendRequest")
            .field("term", &format_args!("{}", term))
            .field("prev_log_idx", &format_args!("{}", prev_log_idx))
            .field("prev_log_term", &format_args!("{}", prev_log_term))
            .field("leader_commit", &format_args!("{}", leader_commit))
            .field("entries", &entries.len())
            .finish()
    }
}

impl fmt::Display for AppendResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            term,
            success,
            current_idx,
            first_idx,
        } = self;
        fmt.debug_struct("AppendResponse")
            .field("term", &format_args!("{}", term))
            .field("success", success)
            .field("current_idx", &format_args!("{}", current_idx))
            .field("first_idx", &format_args!("{}", first_idx))
            .finish()
    }
}
