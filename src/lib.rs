#[cfg(test)]
#[macro_use]
extern crate serial_test;

use std::ffi::CStr;
use std::os::raw::c_char;

use storage::in_memory::InMemoryStorage;

use crate::replication::{parse_peer, ReplicationOptions};
use crate::server::{Server, ServerState};


pub mod command;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod storage;

/// Drives a server handle towards `target`, shielding the C surface from
/// null handles. Only `Started` and `Stopped` are reachable targets.
unsafe fn change_server_state(server: *mut Server, target: ServerState) -> bool {
    let server = match server.as_ref() {
        Some(server) => server,
        None => return false,
    };
    let outcome = match target {
        ServerState::Started => server.start(),
        ServerState::Stopped => server.stop(),
        _ => None,
    };
    outcome == Some(target)
}

/// Single-node constructor: a replication group of one.
#[allow(clippy::missing_safety_doc)]
#[no_mangle]
pub unsafe extern "C" fn raftis_server_new(port: u16) -> *mut Server {
    raftis_cluster_server_new(1, port, std::ptr::null())
}

/// Cluster constructor. `peers` is a comma-separated list of
/// `node_id:host:port` bootstrap entries and may be null for none. A zero
/// node id, a non-UTF-8 peer string, or an unparseable peer spec yields a
/// null handle.
#[allow(clippy::missing_safety_doc)]
#[no_mangle]
pub unsafe extern "C" fn raftis_cluster_server_new(
    node_id: u64,
    port: u16,
    peers: *const c_char,
) -> *mut Server {
    if node_id == 0 {
        return std::ptr::null_mut();
    }
    let mut options = ReplicationOptions {
        node_id,
        ..ReplicationOptions::default()
    };
    if !peers.is_null() {
        let specs = match CStr::from_ptr(peers).to_str() {
            Ok(specs) => specs,
            Err(_) => return std::ptr::null_mut(),
        };
        for spec in specs.split(',').filter(|spec| !spec.is_empty()) {
            match parse_peer(spec) {
                Some(peer) => options.peers.push(peer),
                None => return std::ptr::null_mut(),
            }
        }
    }
    Box::into_raw(Box::new(Server::new_with_options(
        InMemoryStorage::default(),
        options,
        port,
    )))
}

#[allow(clippy::missing_safety_doc)]
#[no_mangle]
pub unsafe extern "C" fn raftis_server_free(server: *mut Server) {
    if !server.is_null() {
        let _ = Box::from_raw(server);
    }
}

#[allow(clippy::missing_safety_doc)]
#[no_mangle]
pub unsafe extern "C" fn raftis_server_start(server: *mut Server) -> bool {
    change_server_state(server, ServerState::Started)
}

#[allow(clippy::missing_safety_doc)]
#[no_mangle]
pub unsafe extern "C" fn raftis_server_stop(server: *mut Server) -> bool {
    change_server_state(server, ServerState::Stopped)
}
