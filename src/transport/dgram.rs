// Copyright 2024 the palisade developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Datagram connections to upstream name servers.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::Error;
use crate::message::Message;

/// A long-lived, connected UDP socket to one upstream name server.
///
/// Any number of queries may be in flight on the connection at once:
/// each registers a pending-waiter slot keyed by its query ID before
/// sending, and a background reader task demultiplexes inbound
/// datagrams to the matching slot. The socket itself is free for the
/// next sender as soon as a query's datagram has been written.
pub(super) struct DgramConn {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

struct Shared {
    pending: Mutex<HashMap<u16, oneshot::Sender<Message>>>,
    closed: AtomicBool,
}

impl DgramConn {
    /// Dials a new connection to `addr` and starts its reader task.
    pub(super) async fn dial(addr: SocketAddr) -> Result<Self, Error> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::Dial(Arc::new(e)))?;
        socket
            .connect(addr)
            .await
            .map_err(|e| Error::Dial(Arc::new(e)))?;

        let socket = Arc::new(socket);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(run_reader(socket.clone(), shared.clone()));
        Ok(Self {
            socket,
            shared,
            reader,
        })
    }

    /// Sends `msg` under a fresh query ID and waits for the matching
    /// response, up to `deadline`. On expiry, the pending slot is
    /// removed and the wait abandoned.
    pub(super) async fn exchange(&self, msg: &Message, deadline: Duration) -> Result<Message, Error> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.shared.pending.lock().unwrap();
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(Error::Read(Arc::new(closed_error())));
            }
            let mut id = rand::random::<u16>();
            while pending.contains_key(&id) {
                id = rand::random::<u16>();
            }
            pending.insert(id, tx);
            id
        };

        let mut query = msg.clone();
        query.id = id;
        let packed = match query.pack(true) {
            Ok(packed) => packed,
            Err(e) => {
                self.shared.pending.lock().unwrap().remove(&id);
                return Err(e.into());
            }
        };

        if let Err(e) = self.socket.send(&packed).await {
            self.shared.pending.lock().unwrap().remove(&id);
            self.shared.closed.store(true, Ordering::Release);
            return Err(Error::Write(Arc::new(e)));
        }

        match timeout(deadline, rx).await {
            Ok(Ok(response)) => Ok(response),
            // The reader task died and dropped our sender.
            Ok(Err(_)) => Err(Error::Read(Arc::new(closed_error()))),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&id);
                Err(Error::Cancelled)
            }
        }
    }

    /// Returns whether the connection has failed and should be evicted
    /// from the pool.
    pub(super) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Tears the connection down.
    pub(super) fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.reader.abort();
        self.shared.pending.lock().unwrap().clear();
    }
}

impl Drop for DgramConn {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receives datagrams and routes each response to the waiter registered
/// under its query ID. Exits (failing the connection) on socket error.
async fn run_reader(socket: Arc<UdpSocket>, shared: Arc<Shared>) {
    let mut buf = vec![0u8; u16::MAX as usize];
    loop {
        match socket.recv(&mut buf).await {
            Ok(len) => {
                let response = match Message::unpack(&buf[..len]) {
                    Ok(response) => response,
                    Err(e) => {
                        debug!("dropping undecodable datagram: {e}");
                        continue;
                    }
                };
                if !response.response {
                    continue;
                }
                let waiter = shared.pending.lock().unwrap().remove(&response.id);
                match waiter {
                    // The waiter may have timed out and gone away; the
                    // response is then dropped on the floor.
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!("no waiter for response id {}", response.id),
                }
            }
            Err(e) => {
                debug!("datagram reader exiting: {e}");
                shared.closed.store(true, Ordering::Release);
                // Dropping the senders wakes every pending waiter with
                // an error.
                shared.pending.lock().unwrap().clear();
                return;
            }
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
}
