mod run_command;
// re-export run_command
pub use run_command::*;

use crossbeam_channel::Receiver;
use mpb::BusSender;

use crate::server::ServerState;

use std::{
    io::{ErrorKind, Read},
    net::TcpStream,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use crate::protocol::parser::RedisProtocolParser;
use crate::replication::RaftHandle;
use crate::storage::Storage;

use super::{CloseConnection, ReceivedDataLength};

const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);
const REQUEST_DEADLINE: Duration = Duration::from_secs(2);

pub fn lock_then_release<T: Storage>(storage: &Arc<Mutex<T>>) -> MutexGuard<T> {
    loop {
        match storage.lock() {
            Ok(storage) => {
                return storage;
            }
            Err(_) => {
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

pub fn stop_sig_received(recv: &Receiver<ServerState>, sender: &BusSender<ServerState>) -> bool {
    if let Ok(recv_state) = recv.try_recv() {
        if recv_state == ServerState::Stop {
            // notify that the server has been stopped
            sender.send(ServerState::Stopped);
            return true;
        }
    }

    false
}

/// Reads one client request: accumulates bytes until they parse as a
/// complete RESP value, the connection goes quiet, or the peer closes.
fn get_bytes_from_request(stream: &TcpStream) -> (Vec<u8>, ReceivedDataLength, CloseConnection) {
    let _ = stream.set_read_timeout(Some(READ_POLL_INTERVAL));
    let deadline = Instant::now() + REQUEST_DEADLINE;

    let mut reader = stream;
    let mut buf = Vec::new();
    let mut chunk = [0; 512];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return (buf, 0, true),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                match RedisProtocolParser::parse(&buf) {
                    Ok(_) => break,
                    Err(err) if err.is_incomplete() => {}
                    // malformed request: stop reading, the dispatch path
                    // turns the parse failure into an error reply
                    Err(_) => break,
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                if buf.is_empty() || Instant::now() >= deadline {
                    break;
                }
            }
            Err(_) => return (buf, 0, true),
        }
    }

    let buf_length = buf.len();
    (buf, buf_length, false)
}

pub fn handle_request<T: Storage>(
    storage: &Arc<Mutex<T>>,
    raft: &RaftHandle,
    mut stream: &TcpStream,
) -> (CloseConnection, ReceivedDataLength) {
    use std::io::Write;

    let (buf, buf_length, closed) = get_bytes_from_request(stream);
    if closed {
        return (true, buf_length);
    }
    if buf_length == 0 {
        return (false, 0);
    }

    let response = run_command_and_get_response(storage, raft, &buf);
    let close_connection = response.is_quit();
    let _ = stream.write(response.reply().as_slice());

    (close_connection, buf_length)
}
