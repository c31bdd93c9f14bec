//! Download orchestration: one datagram socket and one receiver thread per
//! requested file.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use ferry_protocol::is_plain_filename;
use ferry_transfer::{
    ReceiveReport, ReceiverConfig, SessionRegistry, TracingLogger, TransferError, TransferLogger,
    TransferProgress, TransferSet, bind_udp, run_receiver,
};

use crate::config::ClientConfig;
use crate::control::{ControlClient, DownloadOffer};
use crate::error::ClientError;

pub struct Downloads {
    config: ClientConfig,
    sessions: Arc<SessionRegistry<TransferProgress>>,
    transfers: TransferSet<ReceiveReport>,
    logger: Arc<dyn TransferLogger>,
}

impl Downloads {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            transfers: TransferSet::new(),
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Request `filename` over `control` and start receiving it in the
    /// background. Returns the session id the server assigned.
    pub fn start(&self, control: &mut ControlClient, filename: &str) -> Result<u32, ClientError> {
        if !is_plain_filename(filename) {
            return Err(ClientError::InvalidFilename(filename.to_string()));
        }
        fs::create_dir_all(&self.config.download_dir)?;

        // Bound before the request so no early chunk is lost.
        let socket = bind_udp(self.config.client_addr)?;
        let local = socket.local_addr()?;
        let declared = match local.ip() {
            IpAddr::V4(ip) => SocketAddrV4::new(ip, local.port()),
            IpAddr::V6(_) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local.port()),
        };

        let offer = control.request_download(filename, declared)?;
        let expected_sender = sender_endpoint(&offer, control.peer_addr());
        let session_id = offer.session_id;
        let output_path: PathBuf = self.config.download_dir.join(filename);
        info!(
            session_id,
            file = filename,
            size = offer.file_size,
            from = %expected_sender,
            "download started"
        );

        let progress = self
            .sessions
            .get_or_insert_with(session_id, || TransferProgress::new(session_id));
        let receiver = ReceiverConfig {
            output_path,
            session_id,
            file_size: offer.file_size,
            expected_sender,
            idle_timeout: self.config.idle_timeout,
            linger: self.config.linger,
            logger: Some(self.logger.clone()),
        };

        let sessions = self.sessions.clone();
        let thread_progress = progress.clone();
        let spawned = self.transfers.spawn(session_id, progress, move || {
            let result = run_receiver(receiver, socket, &thread_progress);
            sessions.remove(session_id);
            result
        });
        if let Err(e) = spawned {
            self.sessions.remove(session_id);
            return Err(e.into());
        }
        Ok(session_id)
    }

    pub fn progress(&self, session_id: u32) -> Option<Arc<TransferProgress>> {
        self.sessions.get(session_id)
    }

    /// Stop every running download at its next poll. `wait_all` then
    /// returns with those downloads failed as cancelled.
    pub fn cancel_all(&self) {
        for (session_id, progress) in self.sessions.entries() {
            info!(
                session_id,
                done = format_args!("{:.0}%", progress.fraction() * 100.0),
                "cancelling download"
            );
        }
        self.transfers.cancel_all();
    }

    /// Wait for every download and report each one.
    pub fn wait_all(&self) -> Vec<(u32, Result<ReceiveReport, TransferError>)> {
        let results = self.transfers.join_all();
        for (session_id, result) in &results {
            match result {
                Ok(report) => info!(
                    session_id,
                    path = %report.path.display(),
                    bytes = report.bytes_written,
                    duplicates = report.duplicates,
                    sha256 = %report.sha256,
                    "download complete"
                ),
                Err(e) => warn!(session_id, "download failed: {}", e),
            }
        }
        results
    }
}

/// Fold the outcome of a batch of downloads into one result. `refused`
/// counts requests that never started.
pub fn check_outcome(
    results: &[(u32, Result<ReceiveReport, TransferError>)],
    refused: usize,
) -> Result<(), ClientError> {
    let failed = refused + results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        return Err(ClientError::DownloadsFailed {
            failed,
            requested: refused + results.len(),
        });
    }
    Ok(())
}

/// The endpoint chunks will arrive from. A server that advertises 0.0.0.0 is
/// taken to mean the host behind the control connection.
fn sender_endpoint(offer: &DownloadOffer, control_peer: SocketAddr) -> SocketAddr {
    if offer.server_addr.ip().is_unspecified() {
        SocketAddr::new(control_peer.ip(), offer.server_addr.port())
    } else {
        offer.server_addr
    }
}
