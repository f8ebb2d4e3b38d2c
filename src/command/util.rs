use bytes::Bytes;

use raft::message::{AppendRequest, Entry, EntryKind, LogIndex, TermId, VoteRequest};

use crate::protocol::Resp;
use crate::replication::NodeAddr;
use crate::storage::RedisString;

use super::command_error::RedisCommandError;

pub fn get_bytes_vec(resp: Option<&Resp>) -> Result<RedisString, RedisCommandError> {
    match resp {
        Some(Resp::BulkString(data)) | Some(Resp::String(data)) => Ok(data.to_vec()),
        _ => Err(RedisCommandError::ArgNumber),
    }
}

/// Parses a strictly positive node id.
pub fn parse_node_id(arg: &[u8]) -> Result<u64, RedisCommandError> {
    let id: i64 = std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(RedisCommandError::InvalidNodeId)?;
    if id <= 0 {
        return Err(RedisCommandError::InvalidNodeId);
    }
    Ok(id as u64)
}

/// Parses `host:port`, the dialable address of a node.
pub fn parse_addr(arg: &[u8]) -> Result<NodeAddr, RedisCommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(NodeAddr::parse)
        .ok_or(RedisCommandError::InvalidNodeAddress)
}

/// Strict scan of a colon-delimited tuple of exactly `count` non-negative
/// integers, the framing of the Raft RPC headers.
fn parse_colon_tuple(arg: &[u8], count: usize) -> Option<Vec<u64>> {
    let text = std::str::from_utf8(arg).ok()?;
    let fields: Vec<&str> = text.split(':').collect();
    if fields.len() != count {
        return None;
    }
    fields.iter().map(|field| field.parse().ok()).collect()
}

/// Parses `<term:candidate_id:last_log_idx:last_log_term>`.
pub fn parse_requestvote_header(arg: &[u8]) -> Result<VoteRequest, RedisCommandError> {
    let fields = parse_colon_tuple(arg, 4).ok_or(RedisCommandError::InvalidMessage)?;
    Ok(VoteRequest {
        term: TermId(fields[0]),
        candidate_id: fields[1],
        last_log_idx: LogIndex(fields[2]),
        last_log_term: TermId(fields[3]),
    })
}

/// Parses `<term:prev_log_idx:prev_log_term:leader_commit>` into an append
/// request with no entries attached yet.
pub fn parse_appendentries_header(arg: &[u8]) -> Result<AppendRequest, RedisCommandError> {
    let fields = parse_colon_tuple(arg, 4).ok_or(RedisCommandError::InvalidMessage)?;
    Ok(AppendRequest {
        term: TermId(fields[0]),
        prev_log_idx: LogIndex(fields[1]),
        prev_log_term: TermId(fields[2]),
        leader_commit: LogIndex(fields[3]),
        entries: vec![],
    })
}

/// Parses an entry head `<term:id:type>` plus its payload.
pub fn parse_entry(head: &[u8], data: &[u8]) -> Result<Entry, RedisCommandError> {
    let text = std::str::from_utf8(head).map_err(|_| RedisCommandError::InvalidEntry)?;
    let fields: Vec<&str> = text.split(':').collect();
    if fields.len() != 3 {
        return Err(RedisCommandError::InvalidEntry);
    }
    let term: u64 = fields[0].parse().map_err(|_| RedisCommandError::InvalidEntry)?;
    let id: i32 = fields[1].parse().map_err(|_| RedisCommandError::InvalidEntry)?;
    let kind: u32 = fields[2].parse().map_err(|_| RedisCommandError::InvalidEntry)?;
    let kind = EntryKind::from_wire(kind).ok_or(RedisCommandError::InvalidEntry)?;
    Ok(Entry {
        id,
        kind,
        term: TermId(term),
        data: Bytes::copy_from_slice(data),
    })
}
