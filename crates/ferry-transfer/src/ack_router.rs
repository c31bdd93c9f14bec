//! Demultiplexes acknowledgments arriving on the server's shared UDP socket.
//!
//! Every sender transmits from the one socket whose port is advertised in the
//! download response, so acks for all sessions land on that socket. An ack
//! carries only a sequence number; the router attributes it to a session by
//! the endpoint it came from and forwards it over that sender's channel.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ferry_protocol::{DATAGRAM_MAX, decode_ack};

use crate::error::TransferError;
use crate::socket::is_timeout;

/// Acks buffered per route before new ones are dropped.
const ROUTE_CAPACITY: usize = 64;

type Routes = Arc<Mutex<HashMap<SocketAddr, Sender<u32>>>>;

pub struct AckRouter {
    socket: Arc<UdpSocket>,
    routes: Routes,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// A registered endpoint. Dropping it frees the endpoint for a new transfer.
pub struct AckRoute {
    peer: SocketAddr,
    rx: Receiver<u32>,
    routes: Routes,
}

impl AckRoute {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn acks(&self) -> &Receiver<u32> {
        &self.rx
    }
}

impl Drop for AckRoute {
    fn drop(&mut self) {
        self.routes.lock().remove(&self.peer);
    }
}

impl AckRouter {
    /// Start the router thread on `socket`. The socket should have a read
    /// timeout so the thread can observe [`shutdown`](Self::shutdown).
    pub fn start(socket: Arc<UdpSocket>) -> std::io::Result<Self> {
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_socket = socket.clone();
        let thread_routes = routes.clone();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("ack-router".into())
            .spawn(move || route_loop(&thread_socket, &thread_routes, &thread_stop))?;

        Ok(Self {
            socket,
            routes,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    /// Claim `peer` for one transfer. Fails if another transfer to the same
    /// endpoint is still in flight, since its acks could not be told apart.
    pub fn register(&self, peer: SocketAddr) -> Result<AckRoute, TransferError> {
        let mut routes = self.routes.lock();
        if routes.contains_key(&peer) {
            return Err(TransferError::EndpointBusy(peer));
        }
        let (tx, rx) = bounded(ROUTE_CAPACITY);
        routes.insert(peer, tx);
        Ok(AckRoute {
            peer,
            rx,
            routes: self.routes.clone(),
        })
    }

    pub fn active_routes(&self) -> usize {
        self.routes.lock().len()
    }

    /// Stop the router thread and wait for it. Registered routes see their
    /// channel disconnect.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        self.routes.lock().clear();
    }
}

impl Drop for AckRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn route_loop(socket: &UdpSocket, routes: &Routes, stop: &AtomicBool) {
    let mut buf = [0u8; DATAGRAM_MAX];
    info!(
        "ack router listening on {}",
        socket
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into())
    );

    while !stop.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                // e.g. ICMP port-unreachable surfacing as ConnectionReset on Windows.
                debug!("ack router recv error: {}", e);
                continue;
            }
        };

        let sequence = match decode_ack(&buf[..len]) {
            Ok(seq) => seq,
            Err(e) => {
                debug!("discarding datagram from {}: {}", src, e);
                continue;
            }
        };

        let routes = routes.lock();
        match routes.get(&src) {
            Some(tx) => {
                if tx.try_send(sequence).is_err() {
                    warn!("ack queue full for {}, dropping ack {}", src, sequence);
                }
            }
            None => debug!("ack {} from unknown endpoint {}", sequence, src),
        }
    }
}
