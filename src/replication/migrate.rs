//! The key-migration engine.
//!
//! Moves a named set of keys from this shard group to a remote one in three
//! phases: capture the keys with DUMP, transfer them with RAFT.IMPORT over a
//! one-shot connection (with fallback across the remote peer list), and on
//! acknowledgement replicate a DeleteUnlockKeys entry so every local replica
//! removes the keys at the same point in the log.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use raft::message::EntryKind;

use crate::protocol::parser::RedisProtocolParser;
use crate::protocol::response::RedisResponse;
use crate::protocol::Resp;
use crate::replication::codec;
use crate::replication::coordinator::Coordinator;
use crate::replication::node::{encode_command, read_reply};
use crate::replication::request::{MigrateOutcome, ReplyToken, Request};
use crate::replication::NodeAddr;
use crate::server::util::lock_then_release;
use crate::storage::{RedisString, Storage};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A migration in flight: captured payloads parallel to the requested keys,
/// holes where a key did not exist.
pub(crate) struct Migration {
    pub(crate) shard_group: String,
    pub(crate) migrate_term: u64,
    pub(crate) keys: Vec<RedisString>,
    pub(crate) keys_serialized: Vec<Option<RedisString>>,
    pub(crate) num_serialized: usize,
    pub(crate) reply: ReplyToken,
}

impl<T: Storage + Send + 'static> Coordinator<T> {
    /// Phase 1: resolve the shard group and capture the keys, then hand the
    /// transfer to a one-shot connection thread.
    pub(crate) fn handle_migrate_keys(
        &mut self,
        shard_group: String,
        keys: Vec<RedisString>,
        reply: ReplyToken,
    ) {
        // the commit-delete phase submits a log entry, so only the leader
        // may run a migration
        if let Some(error) = self.check_leader() {
            reply.reply(error);
            return;
        }
        let group = match self.shard_groups.get(&shard_group) {
            Some(group) => group.clone(),
            None => {
                reply.reply(RedisResponse::error_string(
                    "ERR couldn't resolve shardgroup id",
                ));
                return;
            }
        };
        let migrate_term = self.raft.current_term().0;

        let mut keys_serialized: Vec<Option<RedisString>> = Vec::with_capacity(keys.len());
        let mut num_serialized = 0usize;
        {
            let mut storage = lock_then_release(&self.adapter.storage);
            for key in &keys {
                if storage.contains(key) {
                    match storage.dump(key) {
                        Some(payload) => {
                            num_serialized += 1;
                            keys_serialized.push(Some(payload));
                        }
                        None => {
                            warn!("DUMP failed for an existing key");
                            reply.reply(RedisResponse::error_string("ERR see logs"));
                            return;
                        }
                    }
                } else {
                    keys_serialized.push(None);
                }
            }
        }

        // nothing to migrate, return quickly
        if num_serialized == 0 {
            reply.reply(RedisResponse::okay());
            return;
        }

        let migration = Migration {
            shard_group,
            migrate_term,
            keys,
            keys_serialized,
            num_serialized,
            reply,
        };
        let command = import_command(&migration);
        info!(
            "migrating {} keys to shard group {} at term {}",
            migration.num_serialized, migration.shard_group, migration.migrate_term
        );

        let token = self.next_migration_token;
        self.next_migration_token += 1;
        self.migrations.insert(token, migration);

        let peers = group.peers;
        let events = self.adapter.events.clone();
        let _ = thread::Builder::new()
            .name("raft-migrate".to_string())
            .spawn(move || {
                let outcome = transfer(&peers, &command);
                let _ = events.send(Request::MigrateReply { token, outcome });
            });
    }

    /// Phase 3: on remote acknowledgement, replicate the DeleteUnlockKeys
    /// entry; on failure, reply and leave the keys untouched.
    pub(crate) fn handle_migrate_reply(&mut self, token: u64, outcome: MigrateOutcome) {
        let migration = match self.migrations.remove(&token) {
            Some(migration) => migration,
            None => {
                debug!("migration reply for unknown token {}", token);
                return;
            }
        };
        match outcome {
            MigrateOutcome::Ok => {
                let transferred: Vec<RedisString> = migration
                    .keys
                    .iter()
                    .zip(&migration.keys_serialized)
                    .filter(|(_, payload)| payload.is_some())
                    .map(|(key, _)| key.clone())
                    .collect();
                let data = codec::serialize_locked_keys(&transferred);
                self.submit_entry(EntryKind::DeleteUnlockKeys, data, migration.reply);
            }
            MigrateOutcome::Dropped => {
                warn!("RAFT.IMPORT failed: connection dropped");
                migration.reply.reply(RedisResponse::error_string(
                    "ERR: Migrate failed importing keys into remote cluster, try again",
                ));
            }
            MigrateOutcome::Unexpected => {
                migration.reply.reply(RedisResponse::error_string(
                    "ERR: received unexpected response from remote cluster, see logs",
                ));
            }
            MigrateOutcome::RemoteError(text) => {
                warn!("RAFT.IMPORT failed: {}", text);
                migration.reply.reply(RedisResponse::error_string(text));
            }
        }
    }
}

/// `RAFT.IMPORT <migrate_term> {<key> <payload>}…` with only the non-hole
/// entries attached.
fn import_command(migration: &Migration) -> Vec<u8> {
    let mut args = Vec::with_capacity(2 + migration.num_serialized * 2);
    args.push(b"RAFT.IMPORT".to_vec());
    args.push(migration.migrate_term.to_string().into_bytes());
    for (key, payload) in migration.keys.iter().zip(&migration.keys_serialized) {
        if let Some(payload) = payload {
            args.push(key.clone());
            args.push(payload.clone());
        }
    }
    encode_command(&args)
}

/// Phase 2: dial the remote peers in order, send the import, classify the
/// response.
fn transfer(peers: &[NodeAddr], command: &[u8]) -> MigrateOutcome {
    let mut stream = match connect_any(peers) {
        Some(stream) => stream,
        None => return MigrateOutcome::Dropped,
    };
    if stream.write_all(command).is_err() {
        return MigrateOutcome::Dropped;
    }
    let reply = match read_reply(&mut stream) {
        Ok(reply) => reply,
        Err(err) => {
            warn!("RAFT.IMPORT transfer failed: {}", err);
            return MigrateOutcome::Dropped;
        }
    };
    match RedisProtocolParser::parse(&reply) {
        Ok((Resp::String(text), _)) if text == b"OK" => MigrateOutcome::Ok,
        Ok((Resp::Error(text), _)) => {
            MigrateOutcome::RemoteError(String::from_utf8_lossy(text).to_string())
        }
        Ok(_) | Err(_) => MigrateOutcome::Unexpected,
    }
}

fn connect_any(peers: &[NodeAddr]) -> Option<TcpStream> {
    for addr in peers {
        let targets = match format!("{}", addr).to_socket_addrs() {
            Ok(targets) => targets,
            Err(_) => continue,
        };
        for target in targets {
            if let Ok(stream) = TcpStream::connect_timeout(&target, CONNECT_TIMEOUT) {
                let _ = stream.set_nodelay(true);
                let _ = stream.set_read_timeout(Some(READ_POLL_INTERVAL));
                debug!("migration connected to {}", addr);
                return Some(stream);
            }
        }
        debug!("migration could not reach {}", addr);
    }
    None
}
