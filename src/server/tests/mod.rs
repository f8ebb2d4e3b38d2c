use redis::{Commands, Connection};

use crate::server::{Server, ServerState};
use crate::storage::in_memory::InMemoryStorage;

fn get_server_connection(port: u16) -> (Server, Connection) {
    let server = Server::new(InMemoryStorage::new(), port);
    assert_eq!(server.start(), Some(ServerState::Started));

    let redis_client = redis::Client::open(format!("redis://127.0.0.1:{}/", port)).unwrap();
    (server, redis_client.get_connection().unwrap())
}

#[test]
#[serial]
fn string_commands_roundtrip() {
    let (server, mut con) = get_server_connection(16501);

    let _: () = con.set("key", "value").unwrap();
    let value: String = con.get("key").unwrap();
    assert_eq!(value, "value");

    let exists: i64 = redis::cmd("EXISTS").arg("key").query(&mut con).unwrap();
    assert_eq!(exists, 1);

    let removed: i64 = con.del("key").unwrap();
    assert_eq!(removed, 1);
    let exists: i64 = redis::cmd("EXISTS").arg("key").query(&mut con).unwrap();
    assert_eq!(exists, 0);

    assert_eq!(server.stop(), Some(ServerState::Stopped));
}

#[test]
#[serial]
fn incr_and_dbsize() {
    let (server, mut con) = get_server_connection(16502);

    let value: i64 = redis::cmd("INCR").arg("counter").query(&mut con).unwrap();
    assert_eq!(value, 1);
    let value: i64 = redis::cmd("INCR").arg("counter").query(&mut con).unwrap();
    assert_eq!(value, 2);

    let _: () = con.set("other", "x").unwrap();
    let size: i64 = redis::cmd("DBSIZE").query(&mut con).unwrap();
    assert_eq!(size, 2);

    let _: () = con.set("nan", "abc").unwrap();
    let err = redis::cmd("INCR")
        .arg("nan")
        .query::<i64>(&mut con)
        .unwrap_err();
    assert!(err.detail().unwrap_or_default().contains("integer"));

    assert_eq!(server.stop(), Some(ServerState::Stopped));
}

#[test]
#[serial]
fn dump_restore_on_the_wire() {
    let (server, mut con) = get_server_connection(16503);

    let _: () = con.set("key", "value").unwrap();
    let payload: Vec<u8> = redis::cmd("DUMP").arg("key").query(&mut con).unwrap();

    let _: () = redis::cmd("RESTORE")
        .arg("copy")
        .arg(payload)
        .query(&mut con)
        .unwrap();
    let value: String = con.get("copy").unwrap();
    assert_eq!(value, "value");

    let err = redis::cmd("RESTORE")
        .arg("bad")
        .arg("not a dump payload")
        .query::<String>(&mut con)
        .unwrap_err();
    assert!(err.detail().unwrap_or_default().contains("payload"));

    assert_eq!(server.stop(), Some(ServerState::Stopped));
}

#[test]
#[serial]
fn unknown_command_is_an_error() {
    let (server, mut con) = get_server_connection(16504);

    let err = redis::cmd("FLUSHALL").query::<String>(&mut con).unwrap_err();
    assert!(err.detail().unwrap_or_default().contains("not supported"));

    assert_eq!(server.stop(), Some(ServerState::Stopped));
}
