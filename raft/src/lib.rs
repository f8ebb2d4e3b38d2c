//! Raft consensus algorithm implementation.
//!
//! Raft replicates a strongly-consistent distributed log of entries with
//! arbitrary data amongst a group of peers, and is fault-tolerant as long as
//! a majority of peers can still communicate. This crate provides the
//! consensus state machine only; transport, durability, and the state machine
//! the log drives are supplied by the embedder through the [`Callbacks`]
//! capability set:
//!
//! * `send_requestvote` / `send_appendentries` deliver outbound RPCs. A
//!   disconnected peer may simply drop the message; the node retries on the
//!   next [`periodic`](server::Raft::periodic) round.
//! * `persist_term` / `persist_vote` record term and vote transitions. They
//!   are invoked before any outbound message can carry the new values.
//! * `log_offer` / `log_pop` bracket log mutations for durable storage, with
//!   `log_offer` running before the entry is acknowledged as appended.
//! * `applylog` applies a committed entry to the state machine, exactly once
//!   per entry in log order.
//! * `log` emits diagnostics, defaulting to the `log` crate.
//!
//! The node itself is driven by calling
//! [`periodic`](server::Raft::periodic) at a fixed cadence and the
//! `recv_*` family when RPCs or RPC responses arrive; `recv_requestvote` and
//! `recv_appendentries` return the response to ship back to the sender.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use raft::message::{
//!     AppendRequest, CommitState, Entry, EntryKind, LogIndex, NodeId, TermId, VoteRequest,
//! };
//! use raft::server::{Config, Raft};
//! use raft::{Callbacks, Result};
//! use rand_chacha::ChaChaRng;
//! use rand_core::SeedableRng;
//!
//! #[derive(Default)]
//! struct Recorder {
//!     applied: Vec<(u64, Vec<u8>)>,
//! }
//!
//! impl Callbacks for Recorder {
//!     fn send_requestvote(&mut self, _node: NodeId, _req: &VoteRequest) {}
//!     fn send_appendentries(&mut self, _node: NodeId, _req: &AppendRequest) {}
//!     fn persist_vote(&mut self, _vote: Option<NodeId>) -> Result<()> {
//!         Ok(())
//!     }
//!     fn persist_term(&mut self, _term: TermId, _vote: Option<NodeId>) -> Result<()> {
//!         Ok(())
//!     }
//!     fn log_offer(&mut self, _entry: &Entry, _idx: LogIndex) -> Result<()> {
//!         Ok(())
//!     }
//!     fn log_pop(&mut self, _entry: &Entry, _idx: LogIndex) -> Result<()> {
//!         Ok(())
//!     }
//!     fn applylog(&mut self, entry: &Entry, idx: LogIndex) -> Result<()> {
//!         self.applied.push((idx.0, entry.data.to_vec()));
//!         Ok(())
//!     }
//! }
//!
//! let mut cb = Recorder::default();
//! let mut node = Raft::new(1, Config::default(), ChaChaRng::seed_from_u64(1));
//!
//! // a single-node group elects itself once the election timeout fires
//! node.periodic(&mut cb, 2 * node.config().election_timeout).unwrap();
//! assert!(node.is_leader());
//!
//! let receipt = node
//!     .recv_entry(
//!         &mut cb,
//!         Entry {
//!             id: 7,
//!             kind: EntryKind::Normal,
//!             term: TermId::default(),
//!             data: Bytes::from_static(b"hello"),
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(node.committed(&receipt), CommitState::Committed);
//! assert_eq!(
//!     cb.applied.last().map(|(_, data)| data.as_slice()),
//!     Some(&b"hello"[..])
//! );
//! ```

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod log;
pub mod message;
pub mod server;

use core::fmt;

use crate::message::{AppendRequest, Entry, LogIndex, NodeId, TermId, VoteRequest};

/// An error returned by a Raft operation or refused by a callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The operation requires this node to be the current leader.
    NotLeader,
    /// A node with the same id is already a member of the group.
    NodeExists,
    /// A callback reported that it could not complete.
    Callback,
}

/// The result type of fallible Raft operations.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotLeader => write!(fmt, "node is not the leader"),
            Error::NodeExists => write!(fmt, "node id exists"),
            Error::Callback => write!(fmt, "callback failed"),
        }
    }
}

/// The capability set a [`Raft`](server::Raft) node requires from its
/// embedder.
pub trait Callbacks {
    /// Sends a vote request to `node`. Delivery is best-effort.
    fn send_requestvote(&mut self, node: NodeId, req: &VoteRequest);

    /// Sends an append request to `node`. Delivery is best-effort; a
    /// disconnected peer drops the message and the node retries on the next
    /// periodic round.
    fn send_appendentries(&mut self, node: NodeId, req: &AppendRequest);

    /// Durably records the latest vote. Invoked before the vote response
    /// acknowledging it is returned.
    fn persist_vote(&mut self, vote: Option<NodeId>) -> Result<()>;

    /// Durably records a term transition together with the vote cast in it.
    /// Invoked before any outbound message carries the new term.
    fn persist_term(&mut self, term: TermId, vote: Option<NodeId>) -> Result<()>;

    /// Durably stores `entry` at `idx`. Invoked before the entry is
    /// acknowledged as appended.
    fn log_offer(&mut self, entry: &Entry, idx: LogIndex) -> Result<()>;

    /// Removes the stored entry at `idx`; invoked for every truncated entry,
    /// highest index first.
    fn log_pop(&mut self, entry: &Entry, idx: LogIndex) -> Result<()>;

    /// Applies a committed entry to the state machine. Called exactly once
    /// per entry, in log order, and must be idempotent with respect to
    /// replayed applies after a restart.
    fn applylog(&mut self, entry: &Entry, idx: LogIndex) -> Result<()>;

    /// Emits a diagnostic line.
    fn log(&mut self, line: fmt::Arguments<'_>) {
        ::log::debug!("{}", line);
    }
}
