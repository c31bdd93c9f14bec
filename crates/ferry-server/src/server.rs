//! Accept loop and server lifecycle.
//!
//! ```text
//! TcpListener (non-blocking, polled) --accept--> TaskQueue<Connection>
//!                                                    |
//!                                     worker: handler::serve(ctx, conn)
//!                                                    |
//!                                 download --> TransferSet: run_sender thread
//!                                                    ^
//!                        shared UdpSocket --acks--> AckRouter thread
//! ```

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use ferry_transfer::{AckRouter, bind_udp};

use crate::catalog::FileCatalog;
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::handler::{self, Connection};
use crate::task_queue::TaskQueue;

/// How often the accept loop checks for a stop request.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub struct Server {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
}

impl Server {
    /// Bind the control listener and the shared datagram socket, and start
    /// the ack router.
    pub fn bind(config: ServerConfig, catalog: Arc<dyn FileCatalog>) -> Result<Self, ServerError> {
        let tcp_addr = config.tcp_addr();
        let listener = bind_tcp(tcp_addr).map_err(|source| ServerError::Bind {
            addr: tcp_addr,
            source,
        })?;

        let udp_addr = config.udp_addr();
        let udp = bind_udp(udp_addr).map_err(|source| ServerError::Bind {
            addr: udp_addr,
            source,
        })?;
        let router = AckRouter::start(Arc::new(udp))?;

        let ctx = Arc::new(ServerContext::new(config, catalog, router));
        info!(
            "ferry server listening on {} (tcp), {} (udp)",
            listener.local_addr()?,
            ctx.router().socket().local_addr()?
        );
        Ok(Self { ctx, listener })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn udp_addr(&self) -> io::Result<SocketAddr> {
        self.ctx.router().socket().local_addr()
    }

    /// Ask [`run`](Self::run) to return. Open control connections are closed
    /// so their handlers finish; `run` then cancels and joins the transfers.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.ctx.request_stop();
        self.ctx.disconnect_clients();
    }

    /// Accept control connections until [`shutdown`](Self::shutdown) is
    /// called, then tear everything down and join every thread.
    pub fn run(&self) -> Result<(), ServerError> {
        let config = self.ctx.config();
        let worker_ctx = self.ctx.clone();
        let stop_ctx = self.ctx.clone();
        let queue = TaskQueue::new(
            config.workers,
            config.slots,
            move |conn: Connection| handler::serve(&worker_ctx, conn),
            move || stop_ctx.request_stop(),
        )?;
        info!(workers = config.workers, slots = config.slots, "task queue started");

        let result = self.accept_loop(&queue);

        // Handlers block on their sockets; close them before joining workers.
        self.ctx.disconnect_clients();
        drop(queue);

        // Stopping the router disconnects every ack channel, so senders
        // blocked waiting for an ack return at once.
        self.ctx.transfers().cancel_all();
        self.ctx.router().shutdown();
        for (session_id, result) in self.ctx.transfers().join_all() {
            if let Err(e) = result {
                info!(session_id, "transfer ended at shutdown: {}", e);
            }
        }
        info!("server stopped");
        result
    }

    fn accept_loop(&self, queue: &TaskQueue<Connection>) -> Result<(), ServerError> {
        self.listener.set_nonblocking(true)?;

        while !self.ctx.is_stopping() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // Accepted sockets may inherit the listener's non-blocking mode.
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(%peer, "cannot configure connection: {}", e);
                        continue;
                    }
                    match stream.try_clone() {
                        Ok(handle) => self.ctx.add_client(peer, handle),
                        Err(e) => {
                            warn!(%peer, "cannot track connection: {}", e);
                            continue;
                        }
                    }
                    info!(%peer, clients = self.ctx.client_count(), "client connected");
                    if let Err(rejected) = queue.produce(Connection { stream, peer }) {
                        self.ctx.remove_client(rejected.peer);
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }

            for (session_id, result) in self.ctx.transfers().reap_finished() {
                if let Err(e) = result {
                    info!(session_id, "reaped failed transfer: {}", e);
                }
            }
        }
        Ok(())
    }
}

fn bind_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}
