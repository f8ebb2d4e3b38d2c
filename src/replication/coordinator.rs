//! The coordinator: one thread owning the Raft state.
//!
//! Every other thread talks to it through the request queue. The loop drains
//! requests, drives the Raft periodic timer, and after each step drains the
//! pending-commit queue so blocked clients get their replies as soon as
//! their entries are applied.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{after, select, tick, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use rand::rngs::OsRng;

use raft::message::{
    AppendRequest, CommitState, Entry, EntryKind, EntryReceipt, LogIndex, NodeId, TermId,
    VoteRequest,
};
use raft::server::{Config, Raft};
use raft::Callbacks;

use crate::command::Command;
use crate::protocol::response::RedisResponse;
use crate::protocol::Resp;
use crate::replication::codec;
use crate::replication::migrate::Migration;
use crate::replication::node::{ConnState, LinkRpc, NodeLink};
use crate::replication::request::{ReplyToken, Request};
use crate::replication::shardgroup::{ShardGroup, ShardGroupTable};
use crate::replication::NodeAddr;
use crate::server::util::{apply_data_command, lock_then_release};
use crate::storage::{RedisString, Storage};

/// How long a blocked client waits for the coordinator before giving up
/// with a retryable error.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bootstrap and timing parameters of the replication engine.
#[derive(Clone, Debug)]
pub struct ReplicationOptions {
    /// This node's cluster-unique id, strictly positive.
    pub node_id: NodeId,
    /// Consensus timing, shared by every node in the group.
    pub raft: Config,
    /// Peers added at startup through synthetic AddNode requests.
    pub peers: Vec<(NodeId, NodeAddr)>,
    /// Remote clusters addressable by the migration engine.
    pub shard_groups: Vec<ShardGroup>,
    /// Cadence of the Raft periodic timer.
    pub tick_interval: Duration,
    /// Delay before the first periodic tick, allowing peer connections to
    /// stabilize after startup.
    pub initial_tick_delay: Duration,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        ReplicationOptions {
            node_id: 1,
            raft: Config::default(),
            peers: vec![],
            shard_groups: vec![],
            tick_interval: Duration::from_millis(500),
            initial_tick_delay: Duration::from_secs(5),
        }
    }
}

/// The cloneable enqueue-side handle to a running coordinator.
#[derive(Clone)]
pub struct RaftHandle {
    tx: Sender<Request>,
}

impl RaftHandle {
    pub fn enqueue(&self, request: Request) {
        let _ = self.tx.send(request);
    }

    /// Enqueues the request built around a fresh reply token and blocks the
    /// calling thread until the coordinator replies or the client timeout
    /// passes.
    pub fn call(&self, build: impl FnOnce(ReplyToken) -> Request) -> RedisResponse {
        let (token, rx) = ReplyToken::new();
        if self.tx.send(build(token)).is_err() {
            return RedisResponse::error_string("TRYAGAIN replication engine is not running");
        }
        match rx.recv_timeout(CLIENT_TIMEOUT) {
            Ok(response) => response,
            Err(_) => RedisResponse::error_string("TRYAGAIN request timed out, retry"),
        }
    }

    pub fn shutdown(&self) {
        self.enqueue(Request::Shutdown);
    }
}

/// Starts the coordinator thread and returns its handle.
///
/// Bootstrap peers are enqueued as synthetic AddNode requests before the
/// event loop starts, so they are the first requests it observes.
pub fn spawn<T: Storage + Send + 'static>(
    options: ReplicationOptions,
    storage: Arc<Mutex<T>>,
) -> RaftHandle {
    let (tx, rx) = unbounded();
    for (id, addr) in &options.peers {
        let _ = tx.send(Request::AddNode {
            id: *id,
            addr: addr.clone(),
            reply: None,
        });
    }
    let handle = RaftHandle { tx: tx.clone() };
    let name = format!("raft-coordinator-{}", options.node_id);
    let _ = thread::Builder::new()
        .name(name)
        .spawn(move || Coordinator::new(options, storage, tx, rx).run());
    handle
}

/// A client request whose entry has been submitted to Raft but not yet
/// applied. Order equals submission order.
pub(crate) struct PendingCommit {
    pub(crate) receipt: EntryReceipt,
    pub(crate) reply: ReplyToken,
}

/// The [`Callbacks`] implementation: node links on the send side, the data
/// store on the apply side, in-memory stubs for the persistence hooks.
pub(crate) struct Adapter<T: Storage> {
    node_id: NodeId,
    pub(crate) links: HashMap<NodeId, NodeLink>,
    pub(crate) storage: Arc<Mutex<T>>,
    pub(crate) events: Sender<Request>,
    /// Replies produced by applylog, keyed by log index, consumed by the
    /// commit-queue drain.
    applied_replies: HashMap<u64, RedisResponse>,
    persisted_term: TermId,
    persisted_vote: Option<NodeId>,
}

impl<T: Storage> Callbacks for Adapter<T> {
    fn send_requestvote(&mut self, node: NodeId, req: &VoteRequest) {
        match self.links.get(&node) {
            Some(link) => link.send(LinkRpc::RequestVote {
                src: self.node_id,
                req: req.clone(),
            }),
            None => debug!("no link for node {}, dropping requestvote", node),
        }
    }

    fn send_appendentries(&mut self, node: NodeId, req: &AppendRequest) {
        match self.links.get(&node) {
            Some(link) if link.state() == ConnState::Connected => {
                link.send(LinkRpc::AppendEntries {
                    src: self.node_id,
                    req: req.clone(),
                });
            }
            Some(_) => debug!("node {}: not connected", node),
            None => debug!("no link for node {}, dropping appendentries", node),
        }
    }

    fn persist_vote(&mut self, vote: Option<NodeId>) -> raft::Result<()> {
        debug!("persist vote={:?}", vote);
        self.persisted_vote = vote;
        Ok(())
    }

    fn persist_term(&mut self, term: TermId, vote: Option<NodeId>) -> raft::Result<()> {
        debug!("persist term={} vote={:?}", term, vote);
        self.persisted_term = term;
        self.persisted_vote = vote;
        Ok(())
    }

    fn log_offer(&mut self, _entry: &Entry, idx: LogIndex) -> raft::Result<()> {
        debug!("log offer idx={}", idx);
        Ok(())
    }

    fn log_pop(&mut self, _entry: &Entry, idx: LogIndex) -> raft::Result<()> {
        debug!("log pop idx={}", idx);
        Ok(())
    }

    fn applylog(&mut self, entry: &Entry, idx: LogIndex) -> raft::Result<()> {
        if let Some(reply) = self.execute_entry(entry) {
            self.applied_replies.insert(idx.0, reply);
        }
        Ok(())
    }
}

impl<T: Storage> Adapter<T> {
    fn execute_entry(&mut self, entry: &Entry) -> Option<RedisResponse> {
        match entry.kind {
            EntryKind::Noop => None,
            EntryKind::Normal => Some(self.execute_command_array(&entry.data)),
            EntryKind::DeleteUnlockKeys => Some(self.execute_delete_unlock(&entry.data)),
        }
    }

    /// Runs every command of a Normal entry against the store, holding the
    /// storage lock for the duration. The last command's reply is kept for
    /// the commit-queue drain.
    fn execute_command_array(&mut self, data: &[u8]) -> RedisResponse {
        let commands = match codec::deserialize(data) {
            Ok(commands) => commands,
            Err(err) => {
                error!("failed to decode log entry: {}", err);
                return RedisResponse::error_string(format!("ERR corrupt log entry: {}", err));
            }
        };
        let mut storage = lock_then_release(&self.storage);
        let mut last = RedisResponse::okay();
        for argv in &commands {
            let resps: Vec<Resp> = argv.iter().map(|arg| Resp::BulkString(arg)).collect();
            last = match Command::parse(resps) {
                Ok(command) => apply_data_command(&mut *storage, &command),
                Err(err) => RedisResponse::error(err),
            };
        }
        last
    }

    fn execute_delete_unlock(&mut self, data: &[u8]) -> RedisResponse {
        match codec::deserialize_locked_keys(data) {
            Ok(keys) => {
                let mut storage = lock_then_release(&self.storage);
                for key in &keys {
                    storage.remove(key);
                }
                debug!("unlocked and removed {} migrated keys", keys.len());
                RedisResponse::okay()
            }
            Err(err) => {
                error!("failed to decode delete-unlock entry: {}", err);
                RedisResponse::error_string(format!("ERR corrupt log entry: {}", err))
            }
        }
    }
}

pub(crate) struct Coordinator<T: Storage> {
    pub(crate) raft: Raft<OsRng>,
    pub(crate) adapter: Adapter<T>,
    pub(crate) cqueue: VecDeque<PendingCommit>,
    pub(crate) migrations: HashMap<u64, Migration>,
    pub(crate) next_migration_token: u64,
    pub(crate) shard_groups: ShardGroupTable,
    options: ReplicationOptions,
    rx: Receiver<Request>,
}

impl<T: Storage + Send + 'static> Coordinator<T> {
    fn new(
        options: ReplicationOptions,
        storage: Arc<Mutex<T>>,
        events: Sender<Request>,
        rx: Receiver<Request>,
    ) -> Self {
        let raft = Raft::new(options.node_id, options.raft.clone(), OsRng);
        let shard_groups = ShardGroupTable::new(options.shard_groups.clone());
        Coordinator {
            raft,
            adapter: Adapter {
                node_id: options.node_id,
                links: HashMap::new(),
                storage,
                events,
                applied_replies: HashMap::new(),
                persisted_term: TermId::default(),
                persisted_vote: None,
            },
            cqueue: VecDeque::new(),
            migrations: HashMap::new(),
            next_migration_token: 1,
            shard_groups,
            options,
            rx,
        }
    }

    fn run(mut self) {
        info!("raft coordinator starting as node {}", self.options.node_id);
        let rx = self.rx.clone();
        // the startup delay fires once, then the periodic ticker takes over
        let startup = after(self.options.initial_tick_delay);
        let mut ticker: Option<Receiver<Instant>> = None;

        loop {
            let timer = match &ticker {
                Some(ticker) => ticker.clone(),
                None => startup.clone(),
            };
            select! {
                recv(rx) -> request => match request {
                    Ok(request) => {
                        if !self.dispatch(request) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(timer) -> _ => {
                    if ticker.is_none() {
                        ticker = Some(tick(self.options.tick_interval));
                    }
                    let elapsed = self.options.tick_interval.as_millis() as u64;
                    if let Err(err) = self.raft.periodic(&mut self.adapter, elapsed) {
                        error!("raft_periodic failed: {}", err);
                    }
                }
            }
            self.drain_commit_queue();
        }
        info!("raft coordinator for node {} stopped", self.options.node_id);
    }

    /// The per-request dispatch table. Returns `false` on shutdown.
    fn dispatch(&mut self, request: Request) -> bool {
        match request {
            Request::Shutdown => return false,
            Request::AddNode { id, addr, reply } => self.handle_add_node(id, addr, reply),
            Request::AppendEntries { src, req, reply } => {
                match self.raft.recv_appendentries(&mut self.adapter, src, &req) {
                    Ok(resp) => reply.reply(RedisResponse::integers(vec![
                        resp.term.0 as i64,
                        resp.success as i64,
                        resp.current_idx.0 as i64,
                        resp.first_idx.0 as i64,
                    ])),
                    Err(err) => {
                        reply.reply(RedisResponse::error_string(format!("ERR operation failed: {}", err)))
                    }
                }
            }
            Request::RequestVote { src, req, reply } => {
                match self.raft.recv_requestvote(&mut self.adapter, src, &req) {
                    Ok(resp) => reply.reply(RedisResponse::integers(vec![
                        resp.term.0 as i64,
                        resp.vote_granted as i64,
                    ])),
                    Err(err) => {
                        reply.reply(RedisResponse::error_string(format!("ERR operation failed: {}", err)))
                    }
                }
            }
            Request::RedisCommand { argv, reply } => self.handle_redis_command(argv, reply),
            Request::MigrateKeys {
                shard_group,
                keys,
                reply,
            } => self.handle_migrate_keys(shard_group, keys, reply),
            Request::ImportKeys {
                migrate_term,
                pairs,
                reply,
            } => self.handle_import_keys(migrate_term, pairs, reply),
            Request::VoteReply { node, resp } => {
                if let Err(err) = self
                    .raft
                    .recv_requestvote_response(&mut self.adapter, node, &resp)
                {
                    warn!("raft_recv_requestvote_response failed: {}", err);
                }
            }
            Request::AppendReply { node, resp } => {
                if let Err(err) = self
                    .raft
                    .recv_appendentries_response(&mut self.adapter, node, &resp)
                {
                    warn!("raft_recv_appendentries_response failed: {}", err);
                }
                // maybe we have pending stuff to apply now; the drain after
                // dispatch picks it up
            }
            Request::MigrateReply { token, outcome } => self.handle_migrate_reply(token, outcome),
        }
        true
    }

    fn handle_add_node(&mut self, id: NodeId, addr: NodeAddr, reply: Option<ReplyToken>) {
        match self.raft.add_node(id, true) {
            Ok(()) => {
                info!("added node {} at {}", id, addr);
                let link = NodeLink::spawn(id, addr, self.adapter.events.clone());
                self.adapter.links.insert(id, link);
                if let Some(reply) = reply {
                    reply.reply(RedisResponse::okay());
                }
            }
            Err(err) => {
                warn!("add node {} failed: {}", id, err);
                if let Some(reply) = reply {
                    reply.reply(RedisResponse::error_string(err.to_string()));
                }
            }
        }
    }

    /// The leader gate shared by every write path: `None` means this node
    /// leads and may submit entries; otherwise the error reply to send.
    pub(crate) fn check_leader(&self) -> Option<RedisResponse> {
        match self.raft.leader() {
            None => Some(RedisResponse::error_string("NOLEADER")),
            Some(leader) if leader != self.raft.id() => {
                Some(match self.adapter.links.get(&leader) {
                    Some(link) => RedisResponse::error_string(format!("LEADERIS {}", link.addr())),
                    // the leader is known but we have no address for it
                    None => RedisResponse::error_string("NOLEADER"),
                })
            }
            Some(_) => None,
        }
    }

    fn handle_redis_command(&mut self, argv: Vec<RedisString>, reply: ReplyToken) {
        if let Some(error) = self.check_leader() {
            reply.reply(error);
            return;
        }
        let data = codec::serialize(&[argv]);
        self.submit_entry(EntryKind::Normal, data, reply);
    }

    fn handle_import_keys(
        &mut self,
        migrate_term: u64,
        pairs: Vec<(RedisString, RedisString)>,
        reply: ReplyToken,
    ) {
        if let Some(error) = self.check_leader() {
            reply.reply(error);
            return;
        }
        if migrate_term == 0 {
            reply.reply(RedisResponse::error_string("ERR invalid migration term"));
            return;
        }
        debug!(
            "importing {} keys at migration term {}",
            pairs.len(),
            migrate_term
        );
        // the import becomes a replicated batch of RESTORE commands, so it
        // lands atomically on every replica of this cluster
        let commands: Vec<Vec<RedisString>> = pairs
            .into_iter()
            .map(|(key, payload)| vec![b"RESTORE".to_vec(), key, payload])
            .collect();
        self.submit_entry(EntryKind::Normal, codec::serialize(&commands), reply);
    }

    /// Appends an entry through Raft and parks the request on the commit
    /// queue; the reply happens at drain time.
    pub(crate) fn submit_entry(&mut self, kind: EntryKind, data: Vec<u8>, reply: ReplyToken) {
        let entry = Entry {
            id: rand::random::<i32>(),
            kind,
            term: TermId::default(),
            data: Bytes::from(data),
        };
        match self.raft.recv_entry(&mut self.adapter, entry) {
            Ok(receipt) => self.cqueue.push_back(PendingCommit { receipt, reply }),
            Err(err) => reply.reply(RedisResponse::error_string(format!("ERR {}", err))),
        }
    }

    /// Replies to every request at the head of the queue whose entry has
    /// been applied, and fails the ones whose entries were truncated by a
    /// leadership change.
    fn drain_commit_queue(&mut self) {
        loop {
            let state = match self.cqueue.front() {
                Some(pending) => self.raft.committed(&pending.receipt),
                None => break,
            };
            if state == CommitState::Pending {
                break;
            }
            let pending = match self.cqueue.pop_front() {
                Some(pending) => pending,
                None => break,
            };
            match state {
                CommitState::Committed => {
                    let reply = self
                        .adapter
                        .applied_replies
                        .remove(&pending.receipt.idx.0)
                        .unwrap_or_else(RedisResponse::okay);
                    pending.reply.reply(reply);
                }
                CommitState::Invalidated => {
                    pending.reply.reply(RedisResponse::error_string(
                        "TRYAGAIN entry dropped by a leadership change, retry",
                    ));
                }
                CommitState::Pending => {}
            }
        }
        if self.cqueue.is_empty() && !self.adapter.applied_replies.is_empty() {
            self.adapter.applied_replies.clear();
        }
    }
}
