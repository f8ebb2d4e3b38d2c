use bytes::Bytes;

use raft::message::{EntryKind, LogIndex, TermId};

use crate::command::command_error::RedisCommandError;
use crate::command::Command;
use crate::protocol::Resp;
use crate::replication::NodeAddr;

fn argv<'a>(args: &'a [&'a [u8]]) -> Vec<Resp<'a>> {
    args.iter().map(|arg| Resp::BulkString(arg)).collect()
}

#[test]
fn set_command() {
    let commands: Vec<&[u8]> = vec![b"SET", b"set"];
    for cmd in commands {
        let command = Command::parse(argv(&[cmd, b"mykey", b"value"])).unwrap();
        assert_eq!(command, Command::Set(b"mykey".to_vec(), b"value".to_vec()));
    }
}

#[test]
fn raft_wrapped_command() {
    let command = Command::parse(argv(&[b"RAFT", b"SET", b"k", b"v"])).unwrap();
    assert_eq!(
        command,
        Command::Raft(vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()])
    );

    let err = Command::parse(argv(&[b"RAFT"])).unwrap_err();
    assert!(matches!(err, RedisCommandError::ArgNumber));
}

#[test]
fn raft_migrate_command() {
    let command = Command::parse(argv(&[b"RAFT", b"MIGRATE", b"sg-1", b"k1", b"k2"])).unwrap();
    assert_eq!(
        command,
        Command::RaftMigrate {
            shard_group: "sg-1".to_string(),
            keys: vec![b"k1".to_vec(), b"k2".to_vec()],
        }
    );

    // a migrate with no keys is an arity error
    let err = Command::parse(argv(&[b"RAFT", b"MIGRATE", b"sg-1"])).unwrap_err();
    assert!(matches!(err, RedisCommandError::ArgNumber));
}

#[test]
fn raft_addnode_command() {
    let command = Command::parse(argv(&[b"RAFT.ADDNODE", b"2", b"127.0.0.1:5001"])).unwrap();
    assert_eq!(
        command,
        Command::RaftAddNode {
            id: 2,
            addr: NodeAddr::new("127.0.0.1", 5001),
        }
    );

    let err = Command::parse(argv(&[b"RAFT.ADDNODE", b"0", b"127.0.0.1:5001"])).unwrap_err();
    assert!(matches!(err, RedisCommandError::InvalidNodeId));

    let err = Command::parse(argv(&[b"RAFT.ADDNODE", b"2", b"127.0.0.1"])).unwrap_err();
    assert!(matches!(err, RedisCommandError::InvalidNodeAddress));

    let err = Command::parse(argv(&[b"RAFT.ADDNODE", b"2", b"127.0.0.1:0"])).unwrap_err();
    assert!(matches!(err, RedisCommandError::InvalidNodeAddress));
}

#[test]
fn raft_requestvote_command() {
    let command = Command::parse(argv(&[b"RAFT.REQUESTVOTE", b"2", b"5:2:42:4"])).unwrap();
    match command {
        Command::RaftRequestVote { src, req } => {
            assert_eq!(src, 2);
            assert_eq!(req.term, TermId(5));
            assert_eq!(req.candidate_id, 2);
            assert_eq!(req.last_log_idx, LogIndex(42));
            assert_eq!(req.last_log_term, TermId(4));
        }
        other => panic!("unexpected command {:?}", other),
    }

    // strict scan: wrong field count or non-integers reply `invalid message`
    for bad in [&b"5:2:42"[..], b"5:2:42:4:9", b"5:x:42:4", b""].iter() {
        let err = Command::parse(argv(&[b"RAFT.REQUESTVOTE", b"2", *bad])).unwrap_err();
        assert!(matches!(err, RedisCommandError::InvalidMessage), "{:?}", bad);
    }
}

#[test]
fn raft_appendentries_command() {
    let command = Command::parse(argv(&[
        b"RAFT.APPENDENTRIES",
        b"1",
        b"3:1:1:2",
        b"2",
        b"3:17:0",
        b"payload-a",
        b"3:18:2",
        b"",
    ]))
    .unwrap();
    match command {
        Command::RaftAppendEntries { src, req } => {
            assert_eq!(src, 1);
            assert_eq!(req.term, TermId(3));
            assert_eq!(req.prev_log_idx, LogIndex(1));
            assert_eq!(req.prev_log_term, TermId(1));
            assert_eq!(req.leader_commit, LogIndex(2));
            assert_eq!(req.entries.len(), 2);
            assert_eq!(req.entries[0].id, 17);
            assert_eq!(req.entries[0].kind, EntryKind::Normal);
            assert_eq!(req.entries[0].data, Bytes::from_static(b"payload-a"));
            assert_eq!(req.entries[1].kind, EntryKind::Noop);
        }
        other => panic!("unexpected command {:?}", other),
    }

    // n_entries must match the arguments that follow
    let err = Command::parse(argv(&[
        b"RAFT.APPENDENTRIES",
        b"1",
        b"3:1:1:2",
        b"2",
        b"3:17:0",
        b"payload-a",
    ]))
    .unwrap_err();
    assert!(matches!(err, RedisCommandError::ArgNumber));

    let err = Command::parse(argv(&[
        b"RAFT.APPENDENTRIES",
        b"1",
        b"3:1:1:2",
        b"1",
        b"3:17:9",
        b"payload-a",
    ]))
    .unwrap_err();
    assert!(matches!(err, RedisCommandError::InvalidEntry));
}

#[test]
fn raft_import_command() {
    let command = Command::parse(argv(&[b"RAFT.IMPORT", b"4", b"k1", b"p1", b"k2", b"p2"])).unwrap();
    assert_eq!(
        command,
        Command::RaftImport {
            migrate_term: 4,
            pairs: vec![
                (b"k1".to_vec(), b"p1".to_vec()),
                (b"k2".to_vec(), b"p2".to_vec()),
            ],
        }
    );

    let err = Command::parse(argv(&[b"RAFT.IMPORT", b"4", b"k1"])).unwrap_err();
    assert!(matches!(err, RedisCommandError::ArgNumber));
}

#[test]
fn unsupported_command() {
    let err = Command::parse(argv(&[b"FLUSHALL"])).unwrap_err();
    assert!(matches!(err, RedisCommandError::NotSupported(_)));
}
