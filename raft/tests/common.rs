#![allow(dead_code)]

use std::collections::BTreeSet;

use bytes::Bytes;
use rand_chacha::ChaChaRng;
use rand_core::SeedableRng;

use raft::message::{
    AppendRequest, AppendResponse, Entry, EntryKind, EntryReceipt, LogIndex, NodeId, TermId,
    VoteRequest, VoteResponse,
};
use raft::server::{Config, Raft};
use raft::{Callbacks, Result};

pub const CONFIG: Config = Config {
    election_timeout: 500,
    heartbeat_interval: 100,
    replication_chunk_size: 1024,
};
pub const TICK: u64 = 100;
const RANDOM_SEED: u64 = 7;
const MAX_TICKS: u32 = 10_000;

pub type TestRaft = Raft<ChaChaRng>;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub enum Wire {
    Vote(VoteRequest),
    Append(AppendRequest),
}

enum WireResponse {
    Vote(VoteResponse),
    Append(AppendResponse),
}

/// Records everything a node asked its embedder to do.
#[derive(Default)]
pub struct TestCallbacks {
    pub outbox: Vec<(NodeId, Wire)>,
    pub term: TermId,
    pub vote: Option<NodeId>,
    pub offered: Vec<LogIndex>,
    pub popped: Vec<LogIndex>,
    pub applied: Vec<(LogIndex, Entry)>,
}

impl Callbacks for TestCallbacks {
    fn send_requestvote(&mut self, node: NodeId, req: &VoteRequest) {
        self.outbox.push((node, Wire::Vote(req.clone())));
    }

    fn send_appendentries(&mut self, node: NodeId, req: &AppendRequest) {
        self.outbox.push((node, Wire::Append(req.clone())));
    }

    fn persist_vote(&mut self, vote: Option<NodeId>) -> Result<()> {
        self.vote = vote;
        Ok(())
    }

    fn persist_term(&mut self, term: TermId, vote: Option<NodeId>) -> Result<()> {
        self.term = term;
        self.vote = vote;
        Ok(())
    }

    fn log_offer(&mut self, _entry: &Entry, idx: LogIndex) -> Result<()> {
        self.offered.push(idx);
        Ok(())
    }

    fn log_pop(&mut self, _entry: &Entry, idx: LogIndex) -> Result<()> {
        self.popped.push(idx);
        Ok(())
    }

    fn applylog(&mut self, entry: &Entry, idx: LogIndex) -> Result<()> {
        self.applied.push((idx, entry.clone()));
        Ok(())
    }
}

pub struct TestNode {
    pub id: NodeId,
    pub raft: TestRaft,
    pub cb: TestCallbacks,
}

impl TestNode {
    /// Applied entries that carry data, in apply order.
    pub fn applied_data(&self) -> Vec<(u64, Vec<u8>)> {
        self.cb
            .applied
            .iter()
            .filter(|(_, entry)| entry.kind != EntryKind::Noop)
            .map(|(idx, entry)| (idx.0, entry.data.to_vec()))
            .collect()
    }
}

/// A simulated Raft group delivering messages instantaneously, with an
/// optional drop matrix between peers.
pub struct TestGroup {
    pub nodes: Vec<TestNode>,
    drops: BTreeSet<(NodeId, NodeId)>,
    down: BTreeSet<NodeId>,
    next_entry_id: i32,
}

impl TestGroup {
    pub fn new(size: u64) -> Self {
        init_log();
        let ids: Vec<NodeId> = (1..=size).collect();
        let nodes = ids
            .iter()
            .map(|id| {
                let mut raft = Raft::new(*id, CONFIG.clone(), ChaChaRng::seed_from_u64(RANDOM_SEED + id));
                for peer in &ids {
                    if peer != id {
                        raft.add_node(*peer, true).unwrap();
                    }
                }
                TestNode {
                    id: *id,
                    raft,
                    cb: TestCallbacks::default(),
                }
            })
            .collect();
        Self {
            nodes,
            drops: BTreeSet::new(),
            down: BTreeSet::new(),
            next_entry_id: 1,
        }
    }

    pub fn isolate(&mut self, id: NodeId) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|node| node.id).collect();
        for other in ids {
            if other != id {
                self.drops.insert((id, other));
                self.drops.insert((other, id));
            }
        }
    }

    pub fn heal(&mut self) {
        self.drops.clear();
    }

    fn should_drop(&self, from: NodeId, to: NodeId) -> bool {
        self.drops.contains(&(from, to)) || self.down.contains(&from) || self.down.contains(&to)
    }

    fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id == id)
    }

    pub fn node(&self, id: NodeId) -> &TestNode {
        &self.nodes[self.index_of(id).expect("unknown node")]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TestNode {
        let idx = self.index_of(id).expect("unknown node");
        &mut self.nodes[idx]
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|node| node.raft.is_leader())
            .map(|node| node.id)
    }

    pub fn has_leader(&self) -> bool {
        self.leader_id().is_some()
    }

    /// Advances every live node by one tick, then delivers all traffic.
    pub fn tick(&mut self) {
        for i in 0..self.nodes.len() {
            if self.down.contains(&self.nodes[i].id) {
                continue;
            }
            let node = &mut self.nodes[i];
            node.raft.periodic(&mut node.cb, TICK).unwrap();
        }
        self.pump();
    }

    /// Delivers queued messages (and the responses they generate) until the
    /// network is quiet.
    pub fn pump(&mut self) {
        loop {
            let mut delivered = false;
            for i in 0..self.nodes.len() {
                let outbox: Vec<(NodeId, Wire)> = std::mem::take(&mut self.nodes[i].cb.outbox);
                if outbox.is_empty() {
                    continue;
                }
                delivered = true;
                for (to, wire) in outbox {
                    self.deliver(i, to, wire);
                }
            }
            if !delivered {
                break;
            }
        }
    }

    fn deliver(&mut self, from_idx: usize, to: NodeId, wire: Wire) {
        let from = self.nodes[from_idx].id;
        if self.should_drop(from, to) {
            return;
        }
        let to_idx = match self.index_of(to) {
            Some(idx) => idx,
            None => return,
        };
        let response = {
            let node = &mut self.nodes[to_idx];
            match wire {
                Wire::Vote(req) => node
                    .raft
                    .recv_requestvote(&mut node.cb, from, &req)
                    .ok()
                    .map(WireResponse::Vote),
                Wire::Append(req) => node
                    .raft
                    .recv_appendentries(&mut node.cb, from, &req)
                    .ok()
                    .map(WireResponse::Append),
            }
        };
        if self.should_drop(to, from) {
            return;
        }
        if let Some(response) = response {
            let node = &mut self.nodes[from_idx];
            match response {
                WireResponse::Vote(resp) => {
                    let _ = node.raft.recv_requestvote_response(&mut node.cb, to, &resp);
                }
                WireResponse::Append(resp) => {
                    let _ = node
                        .raft
                        .recv_appendentries_response(&mut node.cb, to, &resp);
                }
            }
        }
    }

    /// Ticks until the condition holds, panicking after the simulation cap.
    pub fn run_until(&mut self, mut condition: impl FnMut(&Self) -> bool) -> &mut Self {
        let mut ticks_remaining = MAX_TICKS;
        while !condition(self) {
            ticks_remaining = ticks_remaining
                .checked_sub(1)
                .expect("condition failed after maximum simulation length");
            self.tick();
        }
        self
    }

    /// Forces an election on one node by expiring its timeout in a single
    /// periodic round.
    pub fn force_election(&mut self, id: NodeId) {
        let node = self.node_mut(id);
        node.raft
            .periodic(&mut node.cb, 2 * CONFIG.election_timeout)
            .unwrap();
        self.pump();
    }

    /// Submits a client entry on `id`, delivering the resulting traffic.
    pub fn client_write(&mut self, id: NodeId, data: &[u8]) -> Result<EntryReceipt> {
        let entry_id = self.next_entry_id;
        self.next_entry_id += 1;
        let node = self.node_mut(id);
        let entry = Entry {
            id: entry_id,
            kind: EntryKind::Normal,
            term: TermId::default(),
            data: Bytes::copy_from_slice(data),
        };
        let receipt = node.raft.recv_entry(&mut node.cb, entry);
        self.pump();
        receipt
    }
}
