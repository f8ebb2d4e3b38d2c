//! The request objects carried from client-facing threads to the
//! coordinator, and the blocked-client reply handle.

use crossbeam_channel::{bounded, Receiver, Sender};

use raft::message::{AppendRequest, AppendResponse, NodeId, VoteRequest, VoteResponse};

use crate::protocol::response::RedisResponse;
use crate::replication::NodeAddr;
use crate::storage::RedisString;

/// The reply half of a blocked client.
///
/// Consuming `self` in [`reply`](Self::reply) makes a double unblock
/// unrepresentable; dropping the token without replying surfaces to the
/// waiting client as a disconnected channel, which it reports as a retryable
/// error.
#[derive(Debug)]
pub struct ReplyToken {
    tx: Sender<RedisResponse>,
}

impl ReplyToken {
    /// A token plus the receiver the blocked client waits on.
    pub fn new() -> (ReplyToken, Receiver<RedisResponse>) {
        let (tx, rx) = bounded(1);
        (ReplyToken { tx }, rx)
    }

    /// Unblocks the client with `response`. The client may have given up
    /// waiting, in which case the response is discarded.
    pub fn reply(self, response: RedisResponse) {
        let _ = self.tx.send(response);
    }
}

/// The outcome of a migration transfer connection, posted back to the
/// coordinator by the transfer thread.
#[derive(Debug)]
pub enum MigrateOutcome {
    /// The remote cluster acknowledged the import.
    Ok,
    /// The remote cluster replied with an error.
    RemoteError(String),
    /// The connection dropped before a response arrived.
    Dropped,
    /// The response had an unexpected type or shape.
    Unexpected,
}

/// Everything the coordinator can be asked to do.
///
/// Client-facing variants carry a [`ReplyToken`]; the response variants are
/// posted by link threads when a peer answers an outbound RPC, taking the
/// place of the transport callbacks in the event loop.
#[derive(Debug)]
pub enum Request {
    AddNode {
        id: NodeId,
        addr: NodeAddr,
        /// Synthetic bootstrap requests carry no blocked client.
        reply: Option<ReplyToken>,
    },
    AppendEntries {
        src: NodeId,
        req: AppendRequest,
        reply: ReplyToken,
    },
    RequestVote {
        src: NodeId,
        req: VoteRequest,
        reply: ReplyToken,
    },
    RedisCommand {
        argv: Vec<RedisString>,
        reply: ReplyToken,
    },
    MigrateKeys {
        shard_group: String,
        keys: Vec<RedisString>,
        reply: ReplyToken,
    },
    ImportKeys {
        migrate_term: u64,
        pairs: Vec<(RedisString, RedisString)>,
        reply: ReplyToken,
    },
    VoteReply {
        node: NodeId,
        resp: VoteResponse,
    },
    AppendReply {
        node: NodeId,
        resp: AppendResponse,
    },
    MigrateReply {
        token: u64,
        outcome: MigrateOutcome,
    },
    Shutdown,
}
