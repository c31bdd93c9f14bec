//! State shared by the accept loop, the control handlers and the transfer
//! threads of one server instance.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use ferry_transfer::{
    AckRouter, SendReport, SessionRegistry, TracingLogger, TransferLogger, TransferProgress,
    TransferSet,
};

use crate::catalog::FileCatalog;
use crate::config::ServerConfig;

/// A control connection that is currently being served.
pub struct ConnectedClient {
    pub connected_at: Instant,
    /// Clone of the handler's stream, kept so shutdown can unblock its reads.
    stream: TcpStream,
}

pub struct ServerContext {
    config: ServerConfig,
    catalog: Arc<dyn FileCatalog>,
    sessions: SessionRegistry<TransferProgress>,
    router: AckRouter,
    transfers: TransferSet<SendReport>,
    clients: Mutex<HashMap<SocketAddr, ConnectedClient>>,
    logger: Arc<dyn TransferLogger>,
    stopping: AtomicBool,
}

impl ServerContext {
    /// `router` must own the bound datagram socket whose port is advertised
    /// in download responses.
    pub fn new(config: ServerConfig, catalog: Arc<dyn FileCatalog>, router: AckRouter) -> Self {
        Self {
            config,
            catalog,
            sessions: SessionRegistry::new(),
            router,
            transfers: TransferSet::new(),
            clients: Mutex::new(HashMap::new()),
            logger: Arc::new(TracingLogger),
            stopping: AtomicBool::new(false),
        }
    }

    /// Replace the per-transfer event logger.
    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &dyn FileCatalog {
        &*self.catalog
    }

    pub fn sessions(&self) -> &SessionRegistry<TransferProgress> {
        &self.sessions
    }

    pub fn router(&self) -> &AckRouter {
        &self.router
    }

    pub fn transfers(&self) -> &TransferSet<SendReport> {
        &self.transfers
    }

    pub fn logger(&self) -> &Arc<dyn TransferLogger> {
        &self.logger
    }

    /// Port of the shared datagram socket.
    pub fn udp_port(&self) -> u16 {
        self.router
            .socket()
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(self.config.udp_port)
    }

    /// IPv4 address to put in a download response for a request that arrived
    /// on a connection whose local end is `local`.
    pub fn advertised_ip(&self, local: SocketAddr) -> Ipv4Addr {
        if let Some(ip) = self.config.advertise_addr {
            return ip;
        }
        match local.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => ip,
            IpAddr::V6(ip) => ip.to_ipv4_mapped().unwrap_or(Ipv4Addr::LOCALHOST),
            IpAddr::V4(_) => Ipv4Addr::LOCALHOST,
        }
    }

    pub fn add_client(&self, peer: SocketAddr, stream: TcpStream) {
        self.clients.lock().insert(
            peer,
            ConnectedClient {
                connected_at: Instant::now(),
                stream,
            },
        );
    }

    pub fn remove_client(&self, peer: SocketAddr) {
        if let Some(client) = self.clients.lock().remove(&peer) {
            debug!(%peer, "client left after {:?}", client.connected_at.elapsed());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Shut down every open control connection so blocked handlers return.
    pub fn disconnect_clients(&self) {
        for (peer, client) in self.clients.lock().iter() {
            debug!(%peer, "closing control connection");
            let _ = client.stream.shutdown(Shutdown::Both);
        }
    }

    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}
