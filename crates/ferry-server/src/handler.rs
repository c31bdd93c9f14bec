//! Per-connection control channel.
//!
//! ```text
//! AwaitCommand --Quit / EOF / read error / malformed frame--> Closed
//!      ^  |
//!      |  +--ListFilesRequest--> ListFilesResponse
//!      |  +--DownloadRequest---> DownloadError
//!      |  |                  \-> DownloadResponse + spawn sender
//!      +--+
//! ```

use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpStream};
use std::sync::Arc;

use tracing::{debug, info, warn};

use ferry_protocol::{
    Command, CommandReader, DecodeError, DownloadRequest, DownloadResponse, ReadError,
    fit_listing, write_command,
};
use ferry_transfer::{AckRoute, SenderConfig, TransferError, TransferProgress, run_sender};

use crate::context::ServerContext;

/// An accepted control connection, as queued for a worker.
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// Serve one control connection until the peer quits or disconnects.
/// Returns false once the server is stopping, which drains the task queue.
pub fn serve(ctx: &Arc<ServerContext>, conn: Connection) -> bool {
    let session = Session { ctx, conn };
    let peer = session.conn.peer;
    info!(%peer, "control session started");

    match serve_commands(ctx, &session.conn.stream, peer) {
        Ok(()) => debug!(%peer, "control session closed"),
        Err(e) => debug!(%peer, "control transport closed: {}", e),
    }

    drop(session);
    !ctx.is_stopping()
}

/// Closes the connection and forgets the client when dropped, including
/// while unwinding from a panic in the command loop.
struct Session<'a> {
    ctx: &'a ServerContext,
    conn: Connection,
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let peer = self.conn.peer;
        let _ = self.conn.stream.shutdown(Shutdown::Both);
        self.ctx.remove_client(peer);
        info!(%peer, clients = self.ctx.client_count(), "client disconnected");
    }
}

fn serve_commands(
    ctx: &Arc<ServerContext>,
    stream: &TcpStream,
    peer: SocketAddr,
) -> std::io::Result<()> {
    let mut reader = CommandReader::new(stream);
    let mut writer = stream;

    loop {
        let command = match reader.read_command() {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(ReadError::Io(e)) => return Err(e),
            // Frames carry no length prefix, so a malformed one leaves
            // nothing to resynchronise on.
            Err(ReadError::Decode(e @ DecodeError::MalformedFrame(_))) => {
                warn!(%peer, "closing after malformed frame: {}", e);
                return Ok(());
            }
            Err(ReadError::Decode(e)) => {
                debug!(%peer, "discarding bad frame: {}", e);
                continue;
            }
        };

        match command {
            Command::Quit => {
                info!(%peer, "client quit");
                return Ok(());
            }
            Command::ListFilesRequest => {
                let mut names = ctx.catalog().list().unwrap_or_else(|e| {
                    warn!(%peer, "cannot list files: {}", e);
                    Vec::new()
                });
                let dropped = fit_listing(&mut names);
                if dropped > 0 {
                    warn!(%peer, dropped, "file list too long for one response, truncated");
                }
                debug!(%peer, count = names.len(), "listing files");
                write_command(&mut writer, &Command::ListFilesResponse { names })?;
            }
            Command::DownloadRequest(request) => match prepare_download(ctx, stream, peer, request) {
                Some(pending) => {
                    if let Err(e) = write_command(&mut writer, &pending.response) {
                        ctx.sessions().remove(pending.sender.session_id);
                        return Err(e);
                    }
                    pending.spawn(ctx);
                }
                None => write_command(&mut writer, &Command::DownloadError)?,
            },
            other => {
                debug!(%peer, id = ?other.id(), "ignoring command not valid from a client");
            }
        }
    }
}

/// A transfer whose response is ready to send. The sender thread is only
/// started after the client has the response.
struct PendingTransfer {
    response: Command,
    sender: SenderConfig,
    route: AckRoute,
    progress: Arc<TransferProgress>,
}

impl PendingTransfer {
    fn spawn(self, ctx: &Arc<ServerContext>) {
        let PendingTransfer {
            sender,
            route,
            progress,
            ..
        } = self;
        let session_id = sender.session_id;
        let thread_ctx = ctx.clone();
        let thread_progress = progress.clone();

        let spawned = ctx.transfers().spawn(session_id, progress, move || {
            let socket = thread_ctx.router().socket().clone();
            let result = run_sender(sender, &socket, route.acks(), &thread_progress);
            thread_ctx.sessions().remove(session_id);
            drop(route);
            match &result {
                Ok(report) => info!(
                    session_id,
                    bytes = report.bytes_sent,
                    chunks = report.chunks,
                    retransmits = report.retransmits,
                    sha256 = %report.sha256,
                    "transfer complete"
                ),
                Err(e) => warn!(session_id, "transfer aborted: {}", e),
            }
            result
        });

        if let Err(e) = spawned {
            warn!(session_id, "cannot start sender thread: {}", e);
            ctx.sessions().remove(session_id);
        }
    }
}

/// Validate a download request and reserve its session. `None` means the
/// request is refused with `DownloadError`.
fn prepare_download(
    ctx: &Arc<ServerContext>,
    stream: &TcpStream,
    peer: SocketAddr,
    request: DownloadRequest,
) -> Option<PendingTransfer> {
    let Some(entry) = ctx.catalog().lookup(&request.filename) else {
        info!(%peer, file = %request.filename, "file not found");
        return None;
    };
    let Ok(file_size) = u32::try_from(entry.size) else {
        warn!(%peer, file = %request.filename, "{}", TransferError::FileTooLarge(entry.size));
        return None;
    };

    // A client that does not know its own address declares 0.0.0.0.
    let mut target = request.client_addr;
    if target.ip().is_unspecified() {
        if let SocketAddr::V4(peer_v4) = peer {
            target = SocketAddrV4::new(*peer_v4.ip(), target.port());
        }
    }
    let target = SocketAddr::V4(target);

    let route = match ctx.router().register(target) {
        Ok(route) => route,
        Err(e) => {
            warn!(%peer, file = %request.filename, "{}", e);
            return None;
        }
    };

    let session_id = ctx.sessions().issue_id();
    let progress = ctx
        .sessions()
        .get_or_insert_with(session_id, || TransferProgress::new(session_id));

    let local = stream
        .local_addr()
        .unwrap_or_else(|_| ctx.config().tcp_addr());
    let server_addr = SocketAddrV4::new(ctx.advertised_ip(local), ctx.udp_port());

    info!(
        %peer,
        session_id,
        file = %request.filename,
        size = file_size,
        %target,
        "download accepted"
    );

    Some(PendingTransfer {
        response: Command::DownloadResponse(DownloadResponse {
            server_addr,
            session_id,
            file_size,
            filename: request.filename,
        }),
        sender: SenderConfig {
            file_path: entry.path,
            target_addr: target,
            session_id,
            file_size,
            ack_timeout: ctx.config().ack_timeout,
            max_retries: ctx.config().max_retries,
            logger: Some(ctx.logger().clone()),
        },
        route,
        progress,
    })
}
