//! The replication engine: everything between the command surface of the
//! data store and the Raft consensus library.
//!
//! A single coordinator thread owns the Raft state. Client-facing threads
//! only ever enqueue [`request::Request`] values and wait on their reply
//! channel; per-peer link threads carry the outbound RPCs and feed typed
//! responses back through the same queue.

#[cfg(test)]
mod tests;

pub mod codec;
pub mod coordinator;
pub mod migrate;
pub mod node;
pub mod request;
pub mod shardgroup;

use std::fmt;

pub use coordinator::{spawn, RaftHandle, ReplicationOptions};

/// The dialable address of a cluster node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        NodeAddr {
            host: host.into(),
            port,
        }
    }

    /// Parses `"host:port"`. The host must be non-empty and colon-free, the
    /// port a decimal integer in `1..=65535`.
    pub fn parse(input: &str) -> Option<NodeAddr> {
        let colon = input.find(':')?;
        let (host, port) = input.split_at(colon);
        let port: u16 = port[1..].parse().ok()?;
        if host.is_empty() || host.contains(':') || port == 0 {
            return None;
        }
        Some(NodeAddr {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses a bootstrap peer argument in `node_id:host:port` form.
pub fn parse_peer(input: &str) -> Option<(raft::message::NodeId, NodeAddr)> {
    let colon = input.find(':')?;
    let (id, addr) = input.split_at(colon);
    let id: u64 = id.parse().ok()?;
    if id == 0 {
        return None;
    }
    Some((id, NodeAddr::parse(&addr[1..])?))
}
