//! Stop-and-wait sender.
//!
//! ```text
//! read chunk n --> send --> wait ack (timeout) --+--> ack == n : next chunk
//!                   ^                            |
//!                   +------ timeout / ack != n --+
//! ```
//!
//! Sequence numbers start at 1 and chunk `n` covers bytes
//! `[(n - 1) * 1024, min(n * 1024, file_size))`. Exactly one chunk is in
//! flight at a time. Acks arrive on a channel rather than the socket, so the
//! server can share one socket between many senders (see [`AckRouter`]).
//!
//! [`AckRouter`]: crate::AckRouter

use std::fs::File;
use std::io::{self, Read};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use sha2::{Digest, Sha256};

use ferry_protocol::{CHUNK_SIZE, DataChunk};

use crate::error::TransferError;
use crate::logging::{TransferEvent, TransferLogger, emit};
use crate::progress::TransferProgress;
use crate::socket::send_datagram;

const COMPONENT: &str = "sender";

/// Configuration for one outbound transfer.
pub struct SenderConfig {
    pub file_path: PathBuf,
    pub target_addr: SocketAddr,
    pub session_id: u32,
    /// Size advertised to the client. The file must hold at least this many
    /// bytes.
    pub file_size: u32,
    pub ack_timeout: Duration,
    /// Resends allowed per chunk before giving up. 0 retries forever.
    pub max_retries: u32,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

/// Result of a completed send.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub session_id: u32,
    pub bytes_sent: u64,
    pub chunks: u32,
    pub retransmits: u64,
    /// Hex SHA-256 of the bytes sent.
    pub sha256: String,
    pub elapsed: Duration,
}

/// Where the next chunk of a session goes.
struct OutboundSession {
    session_id: u32,
    next_sequence: u32,
    destination: SocketAddr,
}

/// Send the file described by `config` to its target, one chunk at a time.
/// Blocks until every chunk is acknowledged, the transfer is cancelled through
/// `progress`, or a chunk exhausts its retries.
pub fn run_sender(
    config: SenderConfig,
    socket: &UdpSocket,
    acks: &Receiver<u32>,
    progress: &TransferProgress,
) -> Result<SendReport, TransferError> {
    let result = send_file(&config, socket, acks, progress);
    if let Err(ref e) = result {
        emit(
            config.logger.as_ref(),
            COMPONENT,
            config.session_id,
            TransferEvent::Error { message: e.to_string() },
        );
    }
    progress.finish(&result);
    result
}

fn send_file(
    config: &SenderConfig,
    socket: &UdpSocket,
    acks: &Receiver<u32>,
    progress: &TransferProgress,
) -> Result<SendReport, TransferError> {
    let mut file = File::open(&config.file_path).map_err(|source| TransferError::Open {
        path: config.file_path.clone(),
        source,
    })?;

    let started = Instant::now();
    let logger = config.logger.as_ref();
    progress.start(config.file_size as u64);
    emit(
        logger,
        COMPONENT,
        config.session_id,
        TransferEvent::Started {
            peer: config.target_addr,
            file_size: config.file_size,
        },
    );

    let mut session = OutboundSession {
        session_id: config.session_id,
        next_sequence: 1,
        destination: config.target_addr,
    };
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut datagram = BytesMut::with_capacity(CHUNK_SIZE + ferry_protocol::CHUNK_HEADER);
    let mut offset: u32 = 0;
    let mut retransmits: u64 = 0;

    while offset < config.file_size {
        let len = (config.file_size - offset).min(CHUNK_SIZE as u32) as usize;
        file.read_exact(&mut buf[..len]).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TransferError::SizeMismatch {
                expected: config.file_size,
            },
            _ => TransferError::Io(e),
        })?;

        let chunk = DataChunk {
            session_id: session.session_id,
            file_size: config.file_size,
            file_offset: offset,
            sequence: session.next_sequence,
            data: Bytes::copy_from_slice(&buf[..len]),
        };
        datagram.clear();
        chunk.encode(&mut datagram);

        retransmits += deliver(config, &session, socket, acks, progress, &datagram)?;

        hasher.update(&buf[..len]);
        progress.record_chunk(len);
        offset += len as u32;
        session.next_sequence = session.next_sequence.wrapping_add(1);
    }

    let elapsed = started.elapsed();
    emit(
        logger,
        COMPONENT,
        config.session_id,
        TransferEvent::TransferComplete {
            total_bytes: offset as u64,
            duration_ms: elapsed.as_millis() as u64,
            retransmits,
        },
    );

    Ok(SendReport {
        session_id: config.session_id,
        bytes_sent: offset as u64,
        chunks: session.next_sequence - 1,
        retransmits,
        sha256: hex::encode(hasher.finalize()),
        elapsed,
    })
}

/// Send one encoded chunk until its ack arrives. Returns the number of
/// resends it took.
fn deliver(
    config: &SenderConfig,
    session: &OutboundSession,
    socket: &UdpSocket,
    acks: &Receiver<u32>,
    progress: &TransferProgress,
    datagram: &[u8],
) -> Result<u64, TransferError> {
    let logger = config.logger.as_ref();
    let sequence = session.next_sequence;
    let mut attempt: u32 = 0;

    loop {
        if progress.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        attempt = attempt.saturating_add(1);
        if config.max_retries != 0 && attempt - 1 > config.max_retries {
            return Err(TransferError::TransferFailed {
                sequence,
                attempts: attempt - 1,
            });
        }
        if attempt > 1 {
            progress.record_retransmit();
        }

        send_datagram(socket, datagram, session.destination)?;
        emit(
            logger,
            COMPONENT,
            session.session_id,
            TransferEvent::ChunkSent {
                sequence,
                len: datagram.len() - ferry_protocol::CHUNK_HEADER,
                attempt,
            },
        );

        // A stale ack does not restart the wait; anything but the expected
        // ack within the window triggers a resend.
        match acks.recv_timeout(config.ack_timeout) {
            Ok(ack) if ack == sequence => return Ok(attempt as u64 - 1),
            Ok(ack) => emit(
                logger,
                COMPONENT,
                session.session_id,
                TransferEvent::UnexpectedAck { expected: sequence, got: ack },
            ),
            Err(RecvTimeoutError::Timeout) => emit(
                logger,
                COMPONENT,
                session.session_id,
                TransferEvent::AckTimeout { sequence, attempt },
            ),
            Err(RecvTimeoutError::Disconnected) => return Err(TransferError::Cancelled),
        }
    }
}
