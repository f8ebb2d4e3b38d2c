#[cfg(test)]
mod tests;

pub(crate) mod util;
use util::*;

use std::io::ErrorKind;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use log::info;
use mpb::MPB;

use crate::replication::{self, ReplicationOptions};
use crate::storage::Storage;

type CloseConnection = bool;
type ReceivedDataLength = usize;

pub struct Server {
    server_state_bus: Arc<MPB<ServerState>>,
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum ServerState {
    Start,
    Started,
    Stop,
    Stopped,
    Timeout,
    Error(String),
}

impl Server {
    /// A standalone server: a replication group of one node.
    pub fn new<T: Storage + Send + 'static>(storage: T, port: u16) -> Self {
        Server::new_with_options(storage, ReplicationOptions::default(), port)
    }

    pub fn new_with_options<T: Storage + Send + 'static>(
        storage: T,
        options: ReplicationOptions,
        port: u16,
    ) -> Self {
        let server = Server {
            server_state_bus: Arc::new(MPB::new()),
        };

        server._init_configuration(format!("0.0.0.0:{}", port), storage, options);
        server
    }

    fn _init_configuration<A: Into<String>, T: Storage + Send + 'static>(
        &self,
        addr: A,
        storage: T,
        options: ReplicationOptions,
    ) {
        let addr = addr.into();
        let bus = self.server_state_bus.clone();

        let _ = thread::spawn(move || {
            let storage = Arc::new(Mutex::new(storage));
            let state_recv = bus.receiver();

            loop {
                match state_recv.recv() {
                    Ok(server_state) => {
                        if server_state == ServerState::Start {
                            start_server(&addr, &bus, &storage, &options);
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    }

    fn change_state(&self, change_to: ServerState) -> Option<ServerState> {
        let send_state_ch = self.server_state_bus.sender();

        let post_change_to_state = match change_to {
            ServerState::Start => ServerState::Started,
            ServerState::Stop => ServerState::Stopped,
            ServerState::Started
            | ServerState::Stopped
            | ServerState::Timeout
            | ServerState::Error(_) => return None,
        };

        let receiver = self.server_state_bus.receiver();

        let _ = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            send_state_ch.send(change_to);
        });

        // wait for changing state
        while let Ok(server_state) = receiver.recv_timeout(Duration::from_secs(5)) {
            if server_state == post_change_to_state {
                return Some(server_state);
            }
        }

        Some(ServerState::Timeout)
    }

    /// start server
    pub fn start(&self) -> Option<ServerState> {
        self.change_state(ServerState::Start)
    }

    /// stop server
    pub fn stop(&self) -> Option<ServerState> {
        self.change_state(ServerState::Stop)
    }
}

fn start_server<T: Storage + Send + 'static>(
    addr: &str,
    bus: &MPB<ServerState>,
    storage: &Arc<Mutex<T>>,
    options: &ReplicationOptions,
) {
    let state_send = bus.sender();
    let state_recv = bus.receiver();

    let listener = match TcpListener::bind(addr) {
        Ok(listener) => {
            // notify that the server has been started
            state_send.send(ServerState::Started);
            let _ = listener.set_nonblocking(true);
            listener
        }
        Err(err) => {
            state_send.send(ServerState::Error(format!("{}", err)));
            thread::sleep(Duration::from_millis(10));
            return;
        }
    };

    info!("listening on {} as node {}", addr, options.node_id);

    // the replication engine runs for as long as this server instance
    let raft = replication::spawn(options.clone(), storage.clone());

    // peer links hold their connection for the lifetime of the cluster, so
    // the pool must outsize the expected peer count plus client traffic
    let thread_pool = match rayon::ThreadPoolBuilder::new()
        .thread_name(|_| "request handler".to_string())
        .num_threads(8)
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            panic!("{:?}", err);
        }
    };

    // listen incoming requests
    for stream in listener.incoming() {
        match stream {
            Ok(tcp_stream) => {
                let storage = storage.clone();
                let raft_handle = raft.clone();
                let conn_recv = bus.receiver();
                let conn_send = bus.sender();

                thread_pool.spawn(move || {
                    let mut last_update = SystemTime::now();

                    loop {
                        let (close_connection, received_data_length) =
                            handle_request(&storage, &raft_handle, &tcp_stream);

                        if received_data_length > 0 {
                            // reset the last time we received data
                            last_update = SystemTime::now();
                        } else {
                            // delay the loop
                            thread::sleep(Duration::from_millis(10));
                        }

                        if stop_sig_received(&conn_recv, &conn_send) || close_connection {
                            // let's close the connection
                            return;
                        }

                        if let Ok(duration) = SystemTime::now().duration_since(last_update) {
                            if duration.as_secs() >= 300 {
                                // close the connection after 300 secs of inactivity
                                return;
                            }
                        }
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(_) => {
                break;
            }
        }

        if stop_sig_received(&state_recv, &state_send) {
            // let's gracefully shutdown the server
            break;
        }
    }

    raft.shutdown();
}
