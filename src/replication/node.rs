//! The per-peer outbound link.
//!
//! Each cluster node this process knows about gets one background thread
//! owning the TCP connection to it. The coordinator drops RPCs into the
//! link's mailbox; the link writes them as RESP commands, reads the reply,
//! and posts the typed response back into the coordinator's request queue.
//! A link that is not connected silently drops outbound RPCs; the Raft
//! library retries on its next periodic round.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use raft::message::{
    AppendRequest, AppendResponse, LogIndex, NodeId, TermId, VoteResponse, VoteRequest,
};

use crate::protocol::parser::RedisProtocolParser;
use crate::protocol::Resp;
use crate::replication::request::Request;
use crate::replication::NodeAddr;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The connection lifecycle of a link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection state shared between the link thread and the coordinator.
#[derive(Clone)]
pub struct SharedConnState(Arc<AtomicU8>);

impl SharedConnState {
    fn new() -> Self {
        SharedConnState(Arc::new(AtomicU8::new(ConnState::Disconnected as u8)))
    }

    fn set(&self, state: ConnState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> ConnState {
        match self.0.load(Ordering::Acquire) {
            state if state == ConnState::Connected as u8 => ConnState::Connected,
            state if state == ConnState::Connecting as u8 => ConnState::Connecting,
            _ => ConnState::Disconnected,
        }
    }
}

/// An outbound Raft RPC handed to a link.
#[derive(Debug)]
pub enum LinkRpc {
    RequestVote { src: NodeId, req: VoteRequest },
    AppendEntries { src: NodeId, req: AppendRequest },
}

/// The handle the coordinator keeps per peer.
pub struct NodeLink {
    id: NodeId,
    addr: NodeAddr,
    tx: Sender<LinkRpc>,
    state: SharedConnState,
}

impl NodeLink {
    /// Starts the link thread for `id` at `addr`. RPC responses are posted
    /// into `events`.
    pub fn spawn(id: NodeId, addr: NodeAddr, events: Sender<Request>) -> NodeLink {
        let (tx, rx) = unbounded();
        let state = SharedConnState::new();
        let link_state = state.clone();
        let link_addr = addr.clone();
        let _ = thread::Builder::new()
            .name(format!("raft-link-{}", id))
            .spawn(move || run(id, link_addr, rx, events, link_state));
        NodeLink {
            id,
            addr,
            tx,
            state,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    /// Queues an RPC. The link drops it if the peer is unreachable.
    pub fn send(&self, rpc: LinkRpc) {
        let _ = self.tx.send(rpc);
    }
}

fn run(
    id: NodeId,
    addr: NodeAddr,
    rx: Receiver<LinkRpc>,
    events: Sender<Request>,
    state: SharedConnState,
) {
    let mut stream = connect(id, &addr, &state);

    loop {
        match rx.recv_timeout(RECONNECT_INTERVAL) {
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                // idle round doubles as the background reconnect attempt
                if stream.is_none() {
                    stream = connect(id, &addr, &state);
                }
            }
            Ok(rpc) => {
                if stream.is_none() {
                    stream = connect(id, &addr, &state);
                }
                let connection = match stream.as_mut() {
                    Some(connection) => connection,
                    None => {
                        debug!("node {}: not connected, dropping rpc", id);
                        continue;
                    }
                };
                match exchange(connection, &encode_rpc(&rpc)) {
                    Ok(reply) => {
                        if deliver_response(id, &rpc, &reply, &events).is_none() {
                            warn!("node {}: invalid rpc reply, dropping", id);
                        }
                    }
                    Err(err) => {
                        info!("node {}: connection lost: {}", id, err);
                        state.set(ConnState::Disconnected);
                        stream = None;
                    }
                }
            }
        }
    }
    state.set(ConnState::Disconnected);
}

fn connect(id: NodeId, addr: &NodeAddr, state: &SharedConnState) -> Option<TcpStream> {
    state.set(ConnState::Connecting);
    let targets = match format!("{}", addr).to_socket_addrs() {
        Ok(targets) => targets,
        Err(err) => {
            debug!("node {}: cannot resolve {}: {}", id, addr, err);
            state.set(ConnState::Disconnected);
            return None;
        }
    };
    for target in targets {
        if let Ok(stream) = TcpStream::connect_timeout(&target, CONNECT_TIMEOUT) {
            let _ = stream.set_nodelay(true);
            let _ = stream.set_read_timeout(Some(READ_POLL_INTERVAL));
            state.set(ConnState::Connected);
            info!("node {}: connected to {}", id, addr);
            return Some(stream);
        }
    }
    debug!("node {}: failed to connect to {}", id, addr);
    state.set(ConnState::Disconnected);
    None
}

/// Encodes an argv list as a RESP array of bulk strings, the client-facing
/// wire framing of the peer's command surface.
pub(crate) fn encode_command(args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn encode_rpc(rpc: &LinkRpc) -> Vec<u8> {
    match rpc {
        LinkRpc::RequestVote { src, req } => {
            let header = format!(
                "{}:{}:{}:{}",
                req.term.0, req.candidate_id, req.last_log_idx.0, req.last_log_term.0
            );
            encode_command(&[
                b"RAFT.REQUESTVOTE".to_vec(),
                src.to_string().into_bytes(),
                header.into_bytes(),
            ])
        }
        LinkRpc::AppendEntries { src, req } => {
            let header = format!(
                "{}:{}:{}:{}",
                req.term.0, req.prev_log_idx.0, req.prev_log_term.0, req.leader_commit.0
            );
            let mut args = Vec::with_capacity(4 + req.entries.len() * 2);
            args.push(b"RAFT.APPENDENTRIES".to_vec());
            args.push(src.to_string().into_bytes());
            args.push(header.into_bytes());
            args.push(req.entries.len().to_string().into_bytes());
            for entry in &req.entries {
                args.push(
                    format!("{}:{}:{}", entry.term.0, entry.id, entry.kind.as_wire()).into_bytes(),
                );
                args.push(entry.data.to_vec());
            }
            encode_command(&args)
        }
    }
}

fn exchange(stream: &mut TcpStream, request: &[u8]) -> io::Result<Vec<u8>> {
    stream.write_all(request)?;
    read_reply(stream)
}

/// Accumulates bytes from `stream` until they parse as one complete RESP
/// value, or the response deadline passes. Byte garbage fails immediately
/// rather than waiting out the deadline.
pub(crate) fn read_reply(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + RESPONSE_TIMEOUT;
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];

    loop {
        if !buf.is_empty() {
            match RedisProtocolParser::parse(&buf) {
                Ok(_) => return Ok(buf),
                Err(err) if err.is_incomplete() => {}
                Err(err) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed reply: {}", err),
                    ));
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "reply timed out"));
        }
        match stream.read(&mut chunk) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Converts a raw reply into the typed response event for the coordinator.
/// Returns `None` on a malformed reply, which the caller logs and drops.
fn deliver_response(
    id: NodeId,
    rpc: &LinkRpc,
    reply: &[u8],
    events: &Sender<Request>,
) -> Option<()> {
    let (resp, _) = RedisProtocolParser::parse(reply).ok()?;
    let items = match resp {
        Resp::Array(items) => items,
        Resp::Error(text) => {
            debug!(
                "node {}: rpc error reply: {}",
                id,
                String::from_utf8_lossy(text)
            );
            return Some(());
        }
        _ => return None,
    };

    let values: Option<Vec<i64>> = items.iter().map(|item| item.integer()).collect();
    let values = values?;
    if values.iter().any(|value| *value < 0) {
        return None;
    }

    let event = match rpc {
        LinkRpc::RequestVote { .. } => {
            if values.len() != 2 {
                return None;
            }
            Request::VoteReply {
                node: id,
                resp: VoteResponse {
                    term: TermId(values[0] as u64),
                    vote_granted: values[1] != 0,
                },
            }
        }
        LinkRpc::AppendEntries { .. } => {
            if values.len() != 4 {
                return None;
            }
            Request::AppendReply {
                node: id,
                resp: AppendResponse {
                    term: TermId(values[0] as u64),
                    success: values[1] != 0,
                    current_idx: LogIndex(values[2] as u64),
                    first_idx: LogIndex(values[3] as u64),
                },
            }
        }
    };
    let _ = events.send(event);
    Some(())
}
