use std::sync::{Arc, Mutex};

use crate::{
    command::{command_error::RedisCommandError, Command},
    protocol::{
        self,
        response::{RedisResponse, RedisResponseType},
        Resp,
    },
    replication::request::Request,
    replication::RaftHandle,
    storage::Storage,
};

use super::lock_then_release;

pub fn get_command(bytes: &[u8]) -> Result<Command, RedisCommandError> {
    match protocol::parser::RedisProtocolParser::parse(bytes) {
        Ok((Resp::Array(v), _)) => Command::parse(v),
        Err(err) => Err(RedisCommandError::ProtocolParse(err)),
        _ => Err(RedisCommandError::CommandNotFound),
    }
}

/// Executes one parsed command: data commands run locally under the storage
/// lock; raft-tagged commands block the worker on the coordinator's reply.
pub fn run_command_and_get_response<T: Storage>(
    storage: &Arc<Mutex<T>>,
    raft: &RaftHandle,
    bytes: &[u8],
) -> RedisResponse {
    let command = match get_command(bytes) {
        Ok(command) => command,
        Err(err) => return RedisResponse::error(err),
    };

    match command {
        Command::Raft(argv) => raft.call(|reply| Request::RedisCommand { argv, reply }),
        Command::RaftMigrate { shard_group, keys } => raft.call(|reply| Request::MigrateKeys {
            shard_group,
            keys,
            reply,
        }),
        Command::RaftAddNode { id, addr } => raft.call(|reply| Request::AddNode {
            id,
            addr,
            reply: Some(reply),
        }),
        Command::RaftRequestVote { src, req } => {
            raft.call(|reply| Request::RequestVote { src, req, reply })
        }
        Command::RaftAppendEntries { src, req } => {
            raft.call(|reply| Request::AppendEntries { src, req, reply })
        }
        Command::RaftImport {
            migrate_term,
            pairs,
        } => raft.call(|reply| Request::ImportKeys {
            migrate_term,
            pairs,
            reply,
        }),
        data_command => {
            let mut storage = lock_then_release(storage);
            apply_data_command(&mut *storage, &data_command)
        }
    }
}

/// Executes a data command against the store. This is the single execution
/// path shared by direct client commands and log-entry application.
pub fn apply_data_command<T: Storage>(storage: &mut T, command: &Command) -> RedisResponse {
    use RedisResponseType::*;

    match command {
        Command::Set(key, value) => {
            storage.write(key, value);
            RedisResponse::okay()
        }
        Command::Get(key) => match storage.read(key) {
            Some(value) => RedisResponse::single(SimpleString(value.to_vec())),
            None => RedisResponse::single(Nil),
        },
        Command::Del(key) => {
            let removed = storage.remove(key);
            RedisResponse::single(Integer(removed as i64))
        }
        Command::Incr(key) => match storage.read(key) {
            Some(value) => {
                let parsed = std::str::from_utf8(value)
                    .ok()
                    .and_then(|text| text.parse::<i64>().ok());
                match parsed {
                    Some(int_val) => {
                        let int_val = int_val.wrapping_add(1);
                        storage.write(key, int_val.to_string().as_bytes());
                        RedisResponse::single(Integer(int_val))
                    }
                    None => RedisResponse::error(RedisCommandError::NotAnInteger),
                }
            }
            None => {
                storage.write(key, b"1");
                RedisResponse::single(Integer(1))
            }
        },
        Command::Exists(key) => {
            let exists = if storage.contains(key) { 1 } else { 0 };
            RedisResponse::single(Integer(exists))
        }
        Command::Dump(key) => match storage.dump(key) {
            Some(payload) => RedisResponse::single(BulkString(payload)),
            None => RedisResponse::single(Nil),
        },
        Command::Restore(key, payload) => match storage.restore(key, payload) {
            Ok(()) => RedisResponse::okay(),
            Err(_) => RedisResponse::error(RedisCommandError::BadRestorePayload),
        },
        Command::Dbsize => RedisResponse::single(Integer(storage.size() as i64)),
        Command::Ping => RedisResponse::pong(),
        Command::Quit => RedisResponse::quit(),
        // raft-tagged commands never reach the data path; a log entry
        // carrying one is corrupt
        _ => RedisResponse::error_string("ERR unsupported replicated command"),
    }
}
