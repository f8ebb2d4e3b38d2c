use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};

use raft::server::Config;

use crate::protocol::parser::RedisProtocolParser;
use crate::protocol::Resp;
use crate::replication::request::Request;
use crate::replication::shardgroup::ShardGroup;
use crate::replication::{spawn, NodeAddr, RaftHandle, ReplicationOptions};
use crate::storage::in_memory::InMemoryStorage;
use crate::storage::Storage;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Options tuned so a single node elects itself within milliseconds.
fn fast_options(node_id: u64) -> ReplicationOptions {
    ReplicationOptions {
        node_id,
        raft: Config {
            election_timeout: 50,
            heartbeat_interval: 20,
            replication_chunk_size: 64 * 1024,
        },
        peers: vec![],
        shard_groups: vec![],
        tick_interval: Duration::from_millis(10),
        initial_tick_delay: Duration::from_millis(10),
    }
}

/// Options whose periodic timer never fires within the test window, keeping
/// the node a term-zero follower for deterministic RPC dispatch tests.
fn follower_options(node_id: u64) -> ReplicationOptions {
    ReplicationOptions {
        initial_tick_delay: Duration::from_secs(600),
        ..fast_options(node_id)
    }
}

fn raft_set(handle: &RaftHandle, key: &[u8], value: &[u8]) -> Vec<u8> {
    handle
        .call(|reply| Request::RedisCommand {
            argv: vec![b"SET".to_vec(), key.to_vec(), value.to_vec()],
            reply,
        })
        .reply()
}

/// Polls a replicated write until the node elects itself.
fn wait_until_leader(handle: &RaftHandle) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if raft_set(handle, b"__warmup", b"1") == b"+OK\r\n".to_vec() {
            return;
        }
        assert!(Instant::now() < deadline, "no leader elected in time");
        thread::sleep(Duration::from_millis(20));
    }
}

/// A one-request remote: accepts a single connection, captures the request
/// bytes, and answers with the scripted reply.
fn scripted_remote(reply: &'static [u8]) -> (u16, Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = unbounded();

    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = stream.set_read_timeout(Some(Duration::from_millis(100)));
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut buf = Vec::new();
            let mut chunk = [0; 512];
            loop {
                if !buf.is_empty() {
                    match RedisProtocolParser::parse(&buf) {
                        Ok(_) => break,
                        Err(err) if err.is_incomplete() => {}
                        Err(_) => break,
                    }
                }
                if Instant::now() >= deadline {
                    break;
                }
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(err)
                        if err.kind() == ErrorKind::WouldBlock
                            || err.kind() == ErrorKind::TimedOut =>
                    {
                        continue
                    }
                    Err(_) => break,
                }
            }
            let _ = tx.send(buf);
            let _ = stream.write_all(reply);
        }
    });

    (port, rx)
}

#[test]
fn parses_bootstrap_peer_arguments() {
    use crate::replication::parse_peer;

    assert_eq!(
        parse_peer("2:127.0.0.1:5001"),
        Some((2, NodeAddr::new("127.0.0.1", 5001)))
    );
    assert_eq!(parse_peer("0:127.0.0.1:5001"), None);
    assert_eq!(parse_peer("2:127.0.0.1"), None);
    assert_eq!(parse_peer("banana"), None);
}

#[test]
fn single_node_replicates_and_reads_back() {
    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    let handle = spawn(fast_options(1), storage.clone());

    wait_until_leader(&handle);
    assert_eq!(raft_set(&handle, b"k", b"v"), b"+OK\r\n".to_vec());

    let get = handle
        .call(|reply| Request::RedisCommand {
            argv: vec![b"GET".to_vec(), b"k".to_vec()],
            reply,
        })
        .reply();
    assert_eq!(get, b"+v\r\n".to_vec());

    // the state machine applied the command to the shared store
    assert_eq!(storage.lock().unwrap().read(b"k"), Some(&b"v"[..]));
    handle.shutdown();
}

#[test]
fn replies_noleader_without_a_quorum() {
    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    // a peer that will never answer keeps the quorum out of reach
    let options = ReplicationOptions {
        peers: vec![(2, NodeAddr::new("127.0.0.1", 1))],
        ..fast_options(1)
    };
    let handle = spawn(options, storage);

    assert_eq!(raft_set(&handle, b"k", b"v"), b"-NOLEADER\r\n".to_vec());
    handle.shutdown();
}

#[test]
fn add_node_twice_reports_exists() {
    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    let handle = spawn(follower_options(1), storage);

    let first = handle
        .call(|reply| Request::AddNode {
            id: 2,
            addr: NodeAddr::new("127.0.0.1", 1),
            reply: Some(reply),
        })
        .reply();
    assert_eq!(first, b"+OK\r\n".to_vec());

    let second = handle
        .call(|reply| Request::AddNode {
            id: 2,
            addr: NodeAddr::new("127.0.0.1", 1),
            reply: Some(reply),
        })
        .reply();
    assert_eq!(second, b"-node id exists\r\n".to_vec());
    handle.shutdown();
}

#[test]
fn requestvote_dispatch_replies_and_persists() {
    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    let handle = spawn(follower_options(1), storage);

    let resp = handle
        .call(|reply| Request::RequestVote {
            src: 2,
            req: raft::message::VoteRequest {
                term: raft::message::TermId(5),
                candidate_id: 2,
                last_log_idx: raft::message::LogIndex(42),
                last_log_term: raft::message::TermId(4),
            },
            reply,
        })
        .reply();
    assert_eq!(resp, b"*2\r\n:5\r\n:1\r\n".to_vec());
    handle.shutdown();
}

#[test]
fn appendentries_dispatch_applies_committed_entries() {
    use bytes::Bytes;
    use raft::message::{AppendRequest, Entry, EntryKind, LogIndex, TermId};

    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    let handle = spawn(follower_options(1), storage.clone());

    let data = crate::replication::codec::serialize(&[vec![
        b"SET".to_vec(),
        b"k".to_vec(),
        b"v".to_vec(),
    ]]);
    let req = AppendRequest {
        term: TermId(1),
        prev_log_idx: LogIndex(0),
        prev_log_term: TermId(0),
        leader_commit: LogIndex(1),
        entries: vec![Entry {
            id: 7,
            kind: EntryKind::Normal,
            term: TermId(1),
            data: Bytes::from(data),
        }],
    };
    let resp = handle
        .call(|reply| Request::AppendEntries { src: 2, req, reply })
        .reply();
    assert_eq!(resp, b"*4\r\n:1\r\n:1\r\n:1\r\n:1\r\n".to_vec());

    // the entry committed and was applied against the local store
    assert_eq!(storage.lock().unwrap().read(b"k"), Some(&b"v"[..]));
    handle.shutdown();
}

#[test]
fn migrate_transfers_keys_and_deletes_locally() {
    init_log();
    let (port, captured) = scripted_remote(b"+OK\r\n");

    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    {
        let mut storage = storage.lock().unwrap();
        storage.write(b"k1", b"v1");
        storage.write(b"k2", b"v2");
    }
    let options = ReplicationOptions {
        shard_groups: vec![ShardGroup::new("sg", vec![NodeAddr::new("127.0.0.1", port)])],
        ..fast_options(1)
    };
    let handle = spawn(options, storage.clone());
    wait_until_leader(&handle);

    let resp = handle
        .call(|reply| Request::MigrateKeys {
            shard_group: "sg".to_string(),
            keys: vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()],
            reply,
        })
        .reply();
    assert_eq!(resp, b"+OK\r\n".to_vec());

    // the import carried exactly the keys that existed, with their payloads
    let request = captured.recv_timeout(Duration::from_secs(5)).unwrap();
    let (resp, _) = RedisProtocolParser::parse(&request).unwrap();
    match resp {
        Resp::Array(items) => {
            let args: Vec<Vec<u8>> = items
                .iter()
                .map(|item| item.bytes().unwrap().to_vec())
                .collect();
            assert_eq!(args.len(), 6);
            assert_eq!(args[0], b"RAFT.IMPORT".to_vec());
            let term: u64 = String::from_utf8(args[1].clone()).unwrap().parse().unwrap();
            assert!(term > 0);
            assert_eq!(args[2], b"k1".to_vec());
            assert_eq!(args[4], b"k2".to_vec());
            // dump payloads carry the version byte then the value
            assert_eq!(args[3], vec![1, b'v', b'1']);
            assert_eq!(args[5], vec![1, b'v', b'2']);
        }
        other => panic!("unexpected import request {:?}", other),
    }

    // migrated keys are gone on the local cluster
    let mut storage = storage.lock().unwrap();
    assert!(!storage.contains(b"k1"));
    assert!(!storage.contains(b"k2"));
    handle.shutdown();
}

#[test]
fn migrate_propagates_remote_error_and_keeps_keys() {
    init_log();
    let (port, _captured) = scripted_remote(b"-IMPORTERR import refused\r\n");

    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    storage.lock().unwrap().write(b"k1", b"v1");
    let options = ReplicationOptions {
        shard_groups: vec![ShardGroup::new("sg", vec![NodeAddr::new("127.0.0.1", port)])],
        ..fast_options(1)
    };
    let handle = spawn(options, storage.clone());
    wait_until_leader(&handle);

    let resp = handle
        .call(|reply| Request::MigrateKeys {
            shard_group: "sg".to_string(),
            keys: vec![b"k1".to_vec()],
            reply,
        })
        .reply();
    assert_eq!(resp, b"-IMPORTERR import refused\r\n".to_vec());

    // no log entry was submitted; the key remains local and untouched
    assert_eq!(storage.lock().unwrap().read(b"k1"), Some(&b"v1"[..]));
    handle.shutdown();
}

#[test]
fn migrate_with_no_existing_keys_is_an_immediate_ok() {
    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    let options = ReplicationOptions {
        // the peer is unreachable, which proves no transfer is attempted
        shard_groups: vec![ShardGroup::new("sg", vec![NodeAddr::new("127.0.0.1", 1)])],
        ..fast_options(1)
    };
    let handle = spawn(options, storage);
    wait_until_leader(&handle);

    let resp = handle
        .call(|reply| Request::MigrateKeys {
            shard_group: "sg".to_string(),
            keys: vec![b"missing".to_vec()],
            reply,
        })
        .reply();
    assert_eq!(resp, b"+OK\r\n".to_vec());
    handle.shutdown();
}

#[test]
fn migrate_to_unknown_shard_group_fails() {
    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    let handle = spawn(fast_options(1), storage);
    wait_until_leader(&handle);

    let resp = handle
        .call(|reply| Request::MigrateKeys {
            shard_group: "nope".to_string(),
            keys: vec![b"k".to_vec()],
            reply,
        })
        .reply();
    assert_eq!(resp, b"-ERR couldn't resolve shardgroup id\r\n".to_vec());
    handle.shutdown();
}

#[test]
fn import_restores_keys_through_the_log() {
    init_log();
    let storage = Arc::new(Mutex::new(InMemoryStorage::new()));
    let handle = spawn(fast_options(1), storage.clone());
    wait_until_leader(&handle);

    // a payload in the dump format: version byte then the value
    let resp = handle
        .call(|reply| Request::ImportKeys {
            migrate_term: 3,
            pairs: vec![(b"k1".to_vec(), vec![1, b'v', b'1'])],
            reply,
        })
        .reply();
    assert_eq!(resp, b"+OK\r\n".to_vec());
    assert_eq!(storage.lock().unwrap().read(b"k1"), Some(&b"v1"[..]));

    let rejected = handle
        .call(|reply| Request::ImportKeys {
            migrate_term: 0,
            pairs: vec![(b"k2".to_vec(), vec![1, b'v'])],
            reply,
        })
        .reply();
    assert_eq!(rejected, b"-ERR invalid migration term\r\n".to_vec());
    handle.shutdown();
}
