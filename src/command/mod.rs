#[cfg(test)]
mod tests;

pub mod command_error;
mod util;

use raft::message::{AppendRequest, VoteRequest};

use crate::protocol::Resp;
use crate::replication::NodeAddr;
use crate::storage::RedisString;
use command_error::RedisCommandError;

type Key = RedisString;
type Value = RedisString;

#[derive(Debug, PartialEq)]
pub enum Command {
    Set(Key, Value),
    Get(Key),
    Del(Key),
    Incr(Key),
    Exists(Key),
    Dump(Key),
    Restore(Key, Value),
    Dbsize,
    Ping,
    Quit,
    /// `RAFT <cmd> [args…]`: the wrapped argv, to be replicated through the
    /// log before execution.
    Raft(Vec<RedisString>),
    /// `RAFT MIGRATE <shard_group> <key>…`
    RaftMigrate {
        shard_group: String,
        keys: Vec<Key>,
    },
    /// `RAFT.ADDNODE <node_id> <host:port>`
    RaftAddNode {
        id: u64,
        addr: NodeAddr,
    },
    /// `RAFT.REQUESTVOTE <src_node_id> <term:candidate_id:last_log_idx:last_log_term>`
    RaftRequestVote {
        src: u64,
        req: VoteRequest,
    },
    /// `RAFT.APPENDENTRIES <src_node_id> <header> <n_entries> {<term:id:type> <data>}…`
    RaftAppendEntries {
        src: u64,
        req: AppendRequest,
    },
    /// `RAFT.IMPORT <migrate_term> {<key> <dump_payload>}…`
    RaftImport {
        migrate_term: u64,
        pairs: Vec<(Key, Value)>,
    },
}

impl Command {
    pub fn parse(v: Vec<Resp>) -> Result<Self, RedisCommandError> {
        use util::*;
        use Command::*;
        use RedisCommandError::*;

        match v.first() {
            Some(Resp::BulkString(command)) => match *command {
                b"SET" | b"set" | b"Set" => {
                    let key = get_bytes_vec(v.get(1))?;
                    let value = get_bytes_vec(v.get(2))?;

                    Ok(Set(key, value))
                }
                b"GET" | b"get" | b"Get" => {
                    let key = get_bytes_vec(v.get(1))?;
                    Ok(Get(key))
                }
                b"DEL" | b"del" | b"Del" => {
                    let key = get_bytes_vec(v.get(1))?;
                    Ok(Del(key))
                }
                b"INCR" | b"incr" | b"Incr" => {
                    let key = get_bytes_vec(v.get(1))?;
                    Ok(Incr(key))
                }
                b"EXISTS" | b"exists" | b"Exists" => {
                    let key = get_bytes_vec(v.get(1))?;
                    Ok(Exists(key))
                }
                b"DUMP" | b"dump" | b"Dump" => {
                    let key = get_bytes_vec(v.get(1))?;
                    Ok(Dump(key))
                }
                b"RESTORE" | b"restore" | b"Restore" => {
                    let key = get_bytes_vec(v.get(1))?;
                    let payload = get_bytes_vec(v.get(2))?;
                    Ok(Restore(key, payload))
                }
                b"DBSIZE" | b"dbsize" | b"Dbsize" => Ok(Dbsize),
                b"PING" | b"ping" | b"Ping" => Ok(Ping),
                b"QUIT" | b"quit" | b"Quit" => Ok(Quit),
                b"RAFT" | b"raft" | b"Raft" => {
                    if v.len() < 2 {
                        return Err(ArgNumber);
                    }
                    if let Some(Resp::BulkString(sub)) = v.get(1) {
                        if *sub == b"MIGRATE" || *sub == b"migrate" {
                            // RAFT MIGRATE <shard_group> <key>...
                            if v.len() < 4 {
                                return Err(ArgNumber);
                            }
                            let shard_group =
                                String::from_utf8(get_bytes_vec(v.get(2))?).map_err(|err| {
                                    RedisCommandError::BadString(err.utf8_error())
                                })?;
                            let mut keys = Vec::with_capacity(v.len() - 3);
                            for key in &v[3..] {
                                keys.push(get_bytes_vec(Some(key))?);
                            }
                            return Ok(RaftMigrate { shard_group, keys });
                        }
                    }
                    let mut argv = Vec::with_capacity(v.len() - 1);
                    for arg in &v[1..] {
                        argv.push(get_bytes_vec(Some(arg))?);
                    }
                    Ok(Raft(argv))
                }
                b"RAFT.ADDNODE" | b"raft.addnode" => {
                    if v.len() != 3 {
                        return Err(ArgNumber);
                    }
                    let id = parse_node_id(&get_bytes_vec(v.get(1))?)?;
                    let addr = parse_addr(&get_bytes_vec(v.get(2))?)?;
                    Ok(RaftAddNode { id, addr })
                }
                b"RAFT.REQUESTVOTE" | b"raft.requestvote" => {
                    if v.len() != 3 {
                        return Err(ArgNumber);
                    }
                    let src = parse_node_id(&get_bytes_vec(v.get(1))?)?;
                    let req = parse_requestvote_header(&get_bytes_vec(v.get(2))?)?;
                    Ok(RaftRequestVote { src, req })
                }
                b"RAFT.APPENDENTRIES" | b"raft.appendentries" => {
                    if v.len() < 4 {
                        return Err(ArgNumber);
                    }
                    let src = parse_node_id(&get_bytes_vec(v.get(1))?)?;
                    let mut req = parse_appendentries_header(&get_bytes_vec(v.get(2))?)?;
                    let n_entries: usize = std::str::from_utf8(&get_bytes_vec(v.get(3))?)
                        .ok()
                        .and_then(|text| text.parse().ok())
                        .ok_or(InvalidEntriesCount)?;
                    if v.len() != 4 + 2 * n_entries {
                        return Err(ArgNumber);
                    }
                    req.entries.reserve(n_entries);
                    for i in 0..n_entries {
                        let head = get_bytes_vec(v.get(4 + 2 * i))?;
                        let data = get_bytes_vec(v.get(5 + 2 * i))?;
                        req.entries.push(parse_entry(&head, &data)?);
                    }
                    Ok(RaftAppendEntries { src, req })
                }
                b"RAFT.IMPORT" | b"raft.import" => {
                    if v.len() < 4 || v.len() % 2 != 0 {
                        return Err(ArgNumber);
                    }
                    let migrate_term: u64 = std::str::from_utf8(&get_bytes_vec(v.get(1))?)
                        .ok()
                        .and_then(|text| text.parse().ok())
                        .ok_or(InvalidMessage)?;
                    let mut pairs = Vec::with_capacity((v.len() - 2) / 2);
                    for i in (2..v.len()).step_by(2) {
                        let key = get_bytes_vec(v.get(i))?;
                        let payload = get_bytes_vec(v.get(i + 1))?;
                        pairs.push((key, payload));
                    }
                    Ok(RaftImport {
                        migrate_term,
                        pairs,
                    })
                }
                unsupported_command => Err(NotSupported(
                    String::from_utf8_lossy(unsupported_command).to_string(),
                )),
            },
            _ => Err(InvalidCommand),
        }
    }
}
