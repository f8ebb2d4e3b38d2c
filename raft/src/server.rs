//! The state of a Raft node and the operations that drive it.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use bytes::Bytes;
use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::log::LogStore;
use crate::message::*;
use crate::{Callbacks, Error, Result};

use self::Role::*;

/// Configurable parameters of a Raft node.
///
/// Every node in a group must be constructed with the same configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The minimum number of milliseconds without traffic from a leader before
    /// starting an election. The effective timeout is randomized per election
    /// round within `[election_timeout, 2 * election_timeout)`.
    pub election_timeout: u64,

    /// Milliseconds between heartbeat rounds while leading.
    pub heartbeat_interval: u64,

    /// The maximum number of entry payload bytes replicated to a peer in a
    /// single append request. At least one entry is always sent.
    pub replication_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            election_timeout: 1000,
            heartbeat_interval: 500,
            replication_chunk_size: 64 * 1024,
        }
    }
}

/// The state of log replication from a leader to one of its peers.
#[derive(Clone, Copy, Debug)]
pub struct ReplicationState {
    /// The index of the next log entry to be sent to this peer.
    pub next_idx: LogIndex,

    /// The index up to which the peer's log is known to match the leader's.
    pub match_idx: LogIndex,
}

struct Peer {
    voting: bool,
    replication: ReplicationState,
}

enum Role {
    Follower {
        leader: Option<NodeId>,
        timeout_elapsed: u64,
        randomized_timeout: u64,
    },
    Candidate {
        votes_granted: BTreeSet<NodeId>,
        timeout_elapsed: u64,
        randomized_timeout: u64,
    },
    Leader {
        heartbeat_elapsed: u64,
    },
}

/// A Raft node, replicating a strongly-consistent log of entries amongst its
/// peers.
///
/// The node is driven from the outside: [`periodic`](Self::periodic) at a
/// fixed cadence, `recv_*` when an RPC or RPC response arrives, and
/// [`recv_entry`](Self::recv_entry) when the local process wants to append.
/// Each of these may invoke the supplied [`Callbacks`] to send messages,
/// persist state, or apply committed entries, and the `recv_*` requests
/// return the RPC response to deliver back to the sender.
pub struct Raft<R: RngCore> {
    id: NodeId,
    config: Config,
    random: R,
    current_term: TermId,
    voted_for: Option<NodeId>,
    role: Role,
    peers: BTreeMap<NodeId, Peer>,
    log: LogStore,
    last_applied: LogIndex,
}

impl<R: RngCore> Raft<R> {
    /// Constructs a node with an empty log and no peers, in the follower role.
    pub fn new(id: NodeId, config: Config, mut random: R) -> Self {
        let randomized_timeout = random_election_timeout(&mut random, config.election_timeout);
        Self {
            id,
            config,
            random,
            current_term: TermId::default(),
            voted_for: None,
            role: Follower {
                leader: None,
                timeout_elapsed: 0,
                randomized_timeout,
            },
            peers: BTreeMap::new(),
            log: LogStore::new(),
            last_applied: LogIndex::default(),
        }
    }

    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// This node's configurable parameters.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The greatest leadership term seen by this node.
    pub fn current_term(&self) -> TermId {
        self.current_term
    }

    /// The candidate this node voted for in the current term, if any.
    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    /// The index of the latest entry known to be committed.
    pub fn commit_idx(&self) -> LogIndex {
        self.log.commit_idx
    }

    /// The index of the latest entry applied to the state machine.
    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// The index of the last entry in the log.
    pub fn last_log_index(&self) -> LogIndex {
        self.log.last_index()
    }

    /// Whether this node leads the latest known term.
    pub fn is_leader(&self) -> bool {
        matches!(self.role, Leader { .. })
    }

    /// The leader of the latest known term, if any.
    pub fn leader(&self) -> Option<NodeId> {
        match &self.role {
            Follower { leader, .. } => *leader,
            Candidate { .. } => None,
            Leader { .. } => Some(self.id),
        }
    }

    /// The replication state tracked for a peer, while this node leads.
    pub fn replication_state(&self, peer: NodeId) -> Option<ReplicationState> {
        if let Leader { .. } = &self.role {
            self.peers.get(&peer).map(|peer| peer.replication)
        } else {
            None
        }
    }

    /// Adds a node to the membership view.
    ///
    /// # Errors
    ///
    /// If a node with the same id (including this node's own id) is already a
    /// member, [`Error::NodeExists`] is returned.
    pub fn add_node(&mut self, id: NodeId, voting: bool) -> Result<()> {
        if id == self.id || self.peers.contains_key(&id) {
            return Err(Error::NodeExists);
        }
        let next_idx = self.log.last_index() + 1;
        self.peers.insert(
            id,
            Peer {
                voting,
                replication: ReplicationState {
                    next_idx,
                    match_idx: LogIndex::default(),
                },
            },
        );
        Ok(())
    }

    /// Ticks this node's internal clock forward by `elapsed_millis`.
    ///
    /// Runs elections on timeout, heartbeats while leading, and applies any
    /// newly committed entries.
    pub fn periodic(&mut self, cb: &mut dyn Callbacks, elapsed_millis: u64) -> Result<()> {
        let mut timed_out = false;
        let mut heartbeat_due = false;
        match &mut self.role {
            Follower {
                timeout_elapsed,
                randomized_timeout,
                ..
            }
            | Candidate {
                timeout_elapsed,
                randomized_timeout,
                ..
            } => {
                *timeout_elapsed = timeout_elapsed.saturating_add(elapsed_millis);
                timed_out = *timeout_elapsed >= *randomized_timeout;
            }
            Leader { heartbeat_elapsed } => {
                *heartbeat_elapsed = heartbeat_elapsed.saturating_add(elapsed_millis);
                if *heartbeat_elapsed >= self.config.heartbeat_interval {
                    *heartbeat_elapsed = 0;
                    heartbeat_due = true;
                }
            }
        }
        if timed_out {
            info!("election timeout at {}", self.current_term);
            self.become_candidate(cb)?;
        }
        if heartbeat_due {
            debug!("sending heartbeat");
            self.send_appendentries_all(cb);
        }
        self.apply_all(cb)
    }

    /// Submits a new entry to the log on the leader.
    ///
    /// The entry's term is stamped by this node; the caller supplies the
    /// random id, kind, and payload. The returned receipt can be polled with
    /// [`committed`](Self::committed) as the log makes progress.
    ///
    /// # Errors
    ///
    /// [`Error::NotLeader`] when this node does not currently lead.
    pub fn recv_entry(&mut self, cb: &mut dyn Callbacks, mut entry: Entry) -> Result<EntryReceipt> {
        if !self.is_leader() {
            return Err(Error::NotLeader);
        }
        entry.term = self.current_term;
        let idx = self.log.last_index() + 1;
        cb.log_offer(&entry, idx)?;
        let receipt = EntryReceipt {
            id: entry.id,
            term: entry.term,
            idx,
        };
        self.log.append(entry);
        self.advance_commit_idx();
        self.apply_all(cb)?;
        self.send_appendentries_all(cb);
        Ok(receipt)
    }

    /// Reports the state of a previously submitted entry.
    ///
    /// `Committed` means the entry has been applied to the state machine on
    /// this node, not merely that a quorum stored it.
    pub fn committed(&self, receipt: &EntryReceipt) -> CommitState {
        match self.log.term_of(receipt.idx) {
            None => CommitState::Invalidated,
            Some(term) if term != receipt.term => CommitState::Invalidated,
            Some(_) if receipt.idx <= self.last_applied => CommitState::Committed,
            Some(_) => CommitState::Pending,
        }
    }

    /// Processes a vote request from `src`, returning the response to send
    /// back.
    pub fn recv_requestvote(
        &mut self,
        cb: &mut dyn Callbacks,
        src: NodeId,
        req: &VoteRequest,
    ) -> Result<VoteResponse> {
        if req.term > self.current_term {
            self.update_term(cb, req.term)?;
        }
        let last_log_idx = self.log.last_index();
        let last_log_term = self.log.last_term();
        let log_ok = req.last_log_term > last_log_term
            || (req.last_log_term == last_log_term && req.last_log_idx >= last_log_idx);
        let grant = req.term == self.current_term
            && log_ok
            && self
                .voted_for
                .map(|vote| vote == req.candidate_id)
                .unwrap_or(true);

        if grant {
            self.voted_for = Some(req.candidate_id);
            cb.persist_vote(self.voted_for)?;
            if let Follower {
                timeout_elapsed, ..
            } = &mut self.role
            {
                *timeout_elapsed = 0;
            }
            info!(
                "granted vote at {} to node {} with {} at {}",
                self.current_term, req.candidate_id, req.last_log_idx, req.last_log_term
            );
        } else if req.term != self.current_term {
            info!(
                "rejected vote with {} < current {}: {}",
                req.term, self.current_term, req
            );
        } else if let Some(vote) = self.voted_for {
            info!(
                "rejected vote at {} for node {} as already voted for {}",
                self.current_term, req.candidate_id, vote
            );
        } else {
            info!(
                "rejected vote at {} with {} at {} for node {} ({})",
                self.current_term, last_log_idx, last_log_term, req.candidate_id, src
            );
        }

        Ok(VoteResponse {
            term: self.current_term,
            vote_granted: grant,
        })
    }

    /// Processes a vote response from `src`.
    pub fn recv_requestvote_response(
        &mut self,
        cb: &mut dyn Callbacks,
        src: NodeId,
        resp: &VoteResponse,
    ) -> Result<()> {
        if resp.term > self.current_term {
            return self.update_term(cb, resp.term);
        }
        if resp.term < self.current_term {
            info!(
                "ignored vote response with {} < current {}: {}",
                resp.term, self.current_term, resp
            );
            return Ok(());
        }
        if let Candidate { votes_granted, .. } = &mut self.role {
            if resp.vote_granted {
                info!("received vote granted from {} at {}", src, self.current_term);
                votes_granted.insert(src);
            } else {
                info!(
                    "received vote rejected from {} at {}",
                    src, self.current_term
                );
            }
        }
        self.try_become_leader(cb)?;
        Ok(())
    }

    /// Processes an append request from `src`, returning the response to send
    /// back.
    pub fn recv_appendentries(
        &mut self,
        cb: &mut dyn Callbacks,
        src: NodeId,
        req: &AppendRequest,
    ) -> Result<AppendResponse> {
        if req.term > self.current_term {
            self.update_term(cb, req.term)?;
        }
        if req.term < self.current_term {
            info!(
                "ignored append with {} < current {}: {}",
                req.term, self.current_term, req
            );
            return Ok(self.append_failure());
        }
        if self.is_leader() {
            // two leaders at one term would mean a broken quorum
            error!(
                "received append at {} from {} while leading",
                self.current_term, src
            );
            return Ok(self.append_failure());
        }

        let fresh_timeout = self.random_election_timeout();
        if matches!(self.role, Candidate { .. }) {
            self.role = Follower {
                leader: Some(src),
                timeout_elapsed: 0,
                randomized_timeout: fresh_timeout,
            };
            info!("became follower at {} of {}", self.current_term, src);
        } else if let Follower {
            leader,
            timeout_elapsed,
            ..
        } = &mut self.role
        {
            if leader.is_none() {
                info!("became follower at {} of {}", self.current_term, src);
            }
            *leader = Some(src);
            *timeout_elapsed = 0;
        }

        let our_prev_term = self.log.term_of(req.prev_log_idx);
        let log_ok =
            req.prev_log_idx == LogIndex::default() || our_prev_term == Some(req.prev_log_term);
        if !log_ok {
            if let Some(term) = our_prev_term {
                warn!(
                    "rejected append from {} with {} at {}, we have {}",
                    src, req.prev_log_idx, req.prev_log_term, term
                );
            } else {
                info!(
                    "rejected append from {} with {}, we are behind at {}",
                    src,
                    req.prev_log_idx,
                    self.log.last_index()
                );
            }
            return Ok(self.append_failure());
        }

        // find the point of log conflict and append from there
        let mut last_processed = req.prev_log_idx;
        for (offset, entry) in req.entries.iter().enumerate() {
            let idx = req.prev_log_idx + (offset as u64 + 1);
            if idx == self.log.last_index() + 1 {
                cb.log_offer(entry, idx)?;
                self.log.append(entry.clone());
            } else {
                match self.log.term_of(idx) {
                    Some(term) if term == entry.term => {}
                    Some(_) => {
                        debug_assert!(idx > self.log.commit_idx);
                        let removed = self.log.truncate_from(idx);
                        info!("cancelled {} entries from {}", removed.len(), idx);
                        for (roffset, removed_entry) in removed.iter().enumerate().rev() {
                            cb.log_pop(removed_entry, idx + roffset as u64)?;
                        }
                        cb.log_offer(entry, idx)?;
                        self.log.append(entry.clone());
                    }
                    None => {
                        error!("failed to fetch log {} to find conflicts for append", idx);
                        break;
                    }
                }
            }
            last_processed = idx;
        }

        let leader_commit = req.leader_commit.min(last_processed);
        if leader_commit > self.log.commit_idx {
            debug!(
                "committed entries from {} to {}",
                self.log.commit_idx, leader_commit
            );
            self.log.commit_idx = leader_commit;
            self.apply_all(cb)?;
        }

        Ok(AppendResponse {
            term: self.current_term,
            success: true,
            current_idx: last_processed,
            first_idx: req.prev_log_idx + 1,
        })
    }

    /// Processes an append response from `src`.
    pub fn recv_appendentries_response(
        &mut self,
        cb: &mut dyn Callbacks,
        src: NodeId,
        resp: &AppendResponse,
    ) -> Result<()> {
        if resp.term > self.current_term {
            return self.update_term(cb, resp.term);
        }
        if !self.is_leader() || resp.term < self.current_term {
            info!(
                "ignored append response at {} from {}: {}",
                self.current_term, src, resp
            );
            return Ok(());
        }
        if !self.peers.contains_key(&src) {
            warn!("received append response from unknown node {}", src);
            return Ok(());
        }

        if resp.success {
            if let Some(peer) = self.peers.get_mut(&src) {
                if resp.current_idx + 1 > peer.replication.next_idx {
                    peer.replication.next_idx = resp.current_idx + 1;
                }
                if resp.current_idx > peer.replication.match_idx {
                    peer.replication.match_idx = resp.current_idx;
                }
            }
            self.advance_commit_idx();
            self.apply_all(cb)?;
            let behind = self
                .peers
                .get(&src)
                .map(|peer| peer.replication.next_idx <= self.log.last_index())
                .unwrap_or(false);
            if behind {
                self.send_appendentries_to(cb, src);
            }
        } else {
            info!(
                "received append rejection from {} having {}",
                src, resp.current_idx
            );
            if let Some(peer) = self.peers.get_mut(&src) {
                let repl = &mut peer.replication;
                let fallback = (repl.next_idx - 1).min(resp.current_idx + 1);
                repl.next_idx = fallback.max(repl.match_idx + 1).max(LogIndex(1));
            }
            self.send_appendentries_to(cb, src);
        }
        Ok(())
    }

    //
    // internal transitions
    //

    fn become_candidate(&mut self, cb: &mut dyn Callbacks) -> Result<()> {
        self.current_term += 1;
        self.voted_for = Some(self.id);
        cb.persist_term(self.current_term, self.voted_for)?;
        let randomized_timeout = self.random_election_timeout();
        let mut votes_granted = BTreeSet::new();
        votes_granted.insert(self.id);
        self.role = Candidate {
            votes_granted,
            timeout_elapsed: 0,
            randomized_timeout,
        };
        info!("became candidate at {}", self.current_term);

        if self.try_become_leader(cb)? {
            return Ok(());
        }

        let request = VoteRequest {
            term: self.current_term,
            candidate_id: self.id,
            last_log_idx: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        let voters: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.voting)
            .map(|(id, _)| *id)
            .collect();
        for peer in voters {
            cb.send_requestvote(peer, &request);
        }
        Ok(())
    }

    fn try_become_leader(&mut self, cb: &mut dyn Callbacks) -> Result<bool> {
        let reached_quorum = match &self.role {
            Candidate { votes_granted, .. } => {
                let granted = votes_granted
                    .iter()
                    .filter(|id| {
                        **id == self.id
                            || self.peers.get(*id).map(|peer| peer.voting).unwrap_or(false)
                    })
                    .count();
                granted >= self.quorum_size()
            }
            Follower { .. } | Leader { .. } => false,
        };
        if !reached_quorum {
            return Ok(false);
        }

        info!("became leader at {}", self.current_term);
        let next_idx = self.log.last_index() + 1;
        for peer in self.peers.values_mut() {
            peer.replication = ReplicationState {
                next_idx,
                match_idx: LogIndex::default(),
            };
        }
        self.role = Leader {
            heartbeat_elapsed: 0,
        };

        // a no-op in the new term commits entries from past terms (§5.4.2)
        let noop = Entry {
            id: self.random.next_u32() as i32,
            kind: EntryKind::Noop,
            term: self.current_term,
            data: Bytes::new(),
        };
        let idx = self.log.last_index() + 1;
        cb.log_offer(&noop, idx)?;
        self.log.append(noop);
        self.advance_commit_idx();
        self.apply_all(cb)?;
        self.send_appendentries_all(cb);
        Ok(true)
    }

    fn update_term(&mut self, cb: &mut dyn Callbacks, term: TermId) -> Result<()> {
        info!("became follower at {} (from {})", term, self.current_term);
        cb.persist_term(term, None)?;
        self.current_term = term;
        self.voted_for = None;
        let randomized_timeout = self.random_election_timeout();
        self.role = Follower {
            leader: None,
            timeout_elapsed: 0,
            randomized_timeout,
        };
        Ok(())
    }

    fn advance_commit_idx(&mut self) {
        if !self.is_leader() {
            return;
        }
        let mut match_idxs: Vec<LogIndex> = self
            .peers
            .values()
            .filter(|peer| peer.voting)
            .map(|peer| peer.replication.match_idx)
            .collect();
        match_idxs.push(self.log.last_index());
        match_idxs.sort_unstable();
        let agree_idx = match_idxs.into_iter().rev().skip(self.quorum_size() - 1).max();
        let commit_idx = match agree_idx {
            Some(idx) if self.log.term_of(idx) == Some(self.current_term) => {
                self.log.commit_idx.max(idx)
            }
            _ => self.log.commit_idx,
        };
        if commit_idx != self.log.commit_idx {
            debug!(
                "committed entries from {} to {}",
                self.log.commit_idx, commit_idx
            );
        }
        self.log.commit_idx = commit_idx;
    }

    fn apply_all(&mut self, cb: &mut dyn Callbacks) -> Result<()> {
        while self.last_applied < self.log.commit_idx {
            let idx = self.last_applied + 1;
            let entry = match self.log.get(idx) {
                Some(entry) => entry.clone(),
                None => break,
            };
            cb.applylog(&entry, idx)?;
            self.last_applied = idx;
        }
        Ok(())
    }

    fn send_appendentries_all(&mut self, cb: &mut dyn Callbacks) {
        let ids: Vec<NodeId> = self.peers.keys().copied().collect();
        for id in ids {
            self.send_appendentries_to(cb, id);
        }
    }

    fn send_appendentries_to(&mut self, cb: &mut dyn Callbacks, to: NodeId) {
        if !self.is_leader() {
            return;
        }
        let next_idx = match self.peers.get(&to) {
            Some(peer) => peer.replication.next_idx,
            None => return,
        };
        let prev_log_idx = next_idx - 1;
        let prev_log_term = match self.log.term_of(prev_log_idx) {
            Some(term) => term,
            None => {
                error!("missing log {} to send to {}", prev_log_idx, to);
                return;
            }
        };

        let mut entries: Vec<Entry> = Vec::new();
        let mut entries_size = 0usize;
        for entry in self.log.entries_from(next_idx) {
            let first_entry = entries.is_empty();
            entries_size = entries_size.saturating_add(entry.data.len());
            if !first_entry && entries_size > self.config.replication_chunk_size {
                break;
            }
            entries.push(entry.clone());
        }

        let last_entry = prev_log_idx + entries.len() as u64;
        let request = AppendRequest {
            term: self.current_term,
            prev_log_idx,
            prev_log_term,
            leader_commit: self.log.commit_idx.min(last_entry),
            entries,
        };
        cb.send_appendentries(to, &request);
    }

    fn append_failure(&self) -> AppendResponse {
        AppendResponse {
            term: self.current_term,
            success: false,
            current_idx: self.log.last_index(),
            first_idx: LogIndex::default(),
        }
    }

    fn quorum_size(&self) -> usize {
        let voters = 1 + self.peers.values().filter(|peer| peer.voting).count();
        voters / 2 + 1
    }

    fn random_election_timeout(&mut self) -> u64 {
        random_election_timeout(&mut self.random, self.config.election_timeout)
    }
}

fn random_election_timeout(random: &mut impl RngCore, election_timeout: u64) -> u64 {
    let jitter = (random.next_u32() as u64)
        .checked_rem(election_timeout)
        .unwrap_or(0);
    election_timeout.saturating_add(jitter)
}
