//! Receiving side of a transfer.
//!
//! ```text
//! recv_from --> source == sender? --> decode --> ReceiveSession::apply --> ack
//!                  | no                 | err          |
//!                  v                    v              v
//!               log, drop           log, drop    positioned write
//! ```
//!
//! [`ReceiveSession`] holds the sequencing rules and is independent of the
//! socket; [`run_receiver`] drives it from a bound UDP socket until the whole
//! file has arrived.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use ferry_protocol::{DATAGRAM_MAX, DataChunk, encode_ack};

use crate::error::TransferError;
use crate::logging::{TransferEvent, TransferLogger, emit};
use crate::progress::TransferProgress;
use crate::socket::{POLL_INTERVAL, is_timeout, send_datagram};

const COMPONENT: &str = "receiver";

/// What the receiver did with one chunk, and which sequence number to ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkVerdict {
    /// Written at its offset.
    Accepted { ack: u32 },
    /// Already written earlier. Not rewritten, but acked again.
    Duplicate { ack: u32 },
    /// Ahead of the expected chunk. The ack names the last chunk accepted.
    Gap { ack: u32 },
    /// Belongs to another session. Dropped without an ack.
    WrongSession,
    /// Advertises a file size other than the one negotiated. Dropped.
    Inconsistent,
}

impl ChunkVerdict {
    pub fn ack(&self) -> Option<u32> {
        match *self {
            Self::Accepted { ack } | Self::Duplicate { ack } | Self::Gap { ack } => Some(ack),
            Self::WrongSession | Self::Inconsistent => None,
        }
    }
}

/// Receiver-side state of one session.
#[derive(Debug)]
pub struct ReceiveSession {
    session_id: u32,
    source: SocketAddr,
    file_size: u32,
    expected: u32,
    bytes_received: u64,
    seen: HashSet<u32>,
}

impl ReceiveSession {
    pub fn new(session_id: u32, source: SocketAddr, file_size: u32) -> Self {
        Self {
            session_id,
            source,
            file_size,
            expected: 1,
            bytes_received: 0,
            seen: HashSet::new(),
        }
    }

    /// Only the endpoint named in the download response may feed this session.
    pub fn admits(&self, from: SocketAddr) -> bool {
        from == self.source
    }

    pub fn expected_sequence(&self) -> u32 {
        self.expected
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received >= self.file_size as u64
    }

    /// Apply one decoded chunk, writing its data to `out` if it is the next
    /// one expected.
    pub fn apply<W: Write + Seek>(
        &mut self,
        chunk: &DataChunk,
        out: &mut W,
    ) -> io::Result<ChunkVerdict> {
        if chunk.session_id != self.session_id {
            return Ok(ChunkVerdict::WrongSession);
        }
        if chunk.file_size != self.file_size {
            return Ok(ChunkVerdict::Inconsistent);
        }

        let seq = chunk.sequence;
        if seq < self.expected || self.seen.contains(&seq) {
            return Ok(ChunkVerdict::Duplicate { ack: seq });
        }
        if seq > self.expected {
            return Ok(ChunkVerdict::Gap { ack: self.expected - 1 });
        }

        out.seek(SeekFrom::Start(chunk.file_offset as u64))?;
        out.write_all(&chunk.data)?;

        self.seen.insert(seq);
        self.expected += 1;
        self.bytes_received += chunk.data.len() as u64;
        Ok(ChunkVerdict::Accepted { ack: seq })
    }
}

/// Configuration for one inbound transfer.
pub struct ReceiverConfig {
    pub output_path: PathBuf,
    pub session_id: u32,
    pub file_size: u32,
    /// Server datagram endpoint from the download response.
    pub expected_sender: SocketAddr,
    /// Give up if nothing arrives from the sender for this long.
    pub idle_timeout: Option<Duration>,
    /// After the last chunk, keep re-acking for this long in case the final
    /// ack was lost.
    pub linger: Duration,
    pub logger: Option<Arc<dyn TransferLogger>>,
}

/// Result of a completed receive.
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    pub session_id: u32,
    pub path: PathBuf,
    pub bytes_written: u64,
    pub chunks: u32,
    pub duplicates: u64,
    /// Hex SHA-256 of the bytes written.
    pub sha256: String,
    pub elapsed: Duration,
}

/// Per-run bookkeeping shared by the receive and linger phases.
struct Inbound<'a> {
    config: &'a ReceiverConfig,
    socket: &'a UdpSocket,
    progress: &'a TransferProgress,
    session: ReceiveSession,
    file: File,
    hasher: Sha256,
    duplicates: u64,
}

/// Receive one file on `socket`, which must already be bound to the endpoint
/// declared in the download request. Blocks until the file is complete, the
/// transfer is cancelled through `progress`, or the idle timeout expires.
pub fn run_receiver(
    config: ReceiverConfig,
    socket: UdpSocket,
    progress: &TransferProgress,
) -> Result<ReceiveReport, TransferError> {
    let result = receive_file(&config, &socket, progress);
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

fn receive_file(
    config: &ReceiverConfig,
    socket: &UdpSocket,
    progress: &TransferProgress,
) -> Result<ReceiveReport, TransferError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&config.output_path)
        .map_err(|source| TransferError::Open {
            path: config.output_path.clone(),
            source,
        })?;
    file.set_len(config.file_size as u64)?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;

    let started = Instant::now();
    progress.start(config.file_size as u64);
    emit(
        config.logger.as_ref(),
        COMPONENT,
        config.session_id,
        TransferEvent::Started {
            peer: config.expected_sender,
            file_size: config.file_size,
        },
    );

    let mut inbound = Inbound {
        config,
        socket,
        progress,
        session: ReceiveSession::new(config.session_id, config.expected_sender, config.file_size),
        file,
        hasher: Sha256::new(),
        duplicates: 0,
    };

    let mut buf = [0u8; DATAGRAM_MAX];
    let mut last_heard = Instant::now();
    while !inbound.session.is_complete() {
        if progress.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if let Some(limit) = config.idle_timeout {
            if last_heard.elapsed() >= limit {
                return Err(TransferError::IdleTimeout(limit));
            }
        }
        if let Some((len, src)) = recv(socket, &mut buf)? {
            if inbound.handle(&buf[..len], src)? {
                last_heard = Instant::now();
            }
        }
    }

    inbound.file.sync_all()?;
    let elapsed = started.elapsed();
    emit(
        config.logger.as_ref(),
        COMPONENT,
        config.session_id,
        TransferEvent::TransferComplete {
            total_bytes: inbound.session.bytes_received(),
            duration_ms: elapsed.as_millis() as u64,
            retransmits: inbound.duplicates,
        },
    );

    let deadline = Instant::now() + config.linger;
    while Instant::now() < deadline && !progress.is_cancelled() {
        if let Some((len, src)) = recv(socket, &mut buf)? {
            inbound.handle(&buf[..len], src)?;
        }
    }

    Ok(ReceiveReport {
        session_id: config.session_id,
        path: config.output_path.clone(),
        bytes_written: inbound.session.bytes_received(),
        chunks: inbound.session.expected_sequence() - 1,
        duplicates: inbound.duplicates,
        sha256: hex::encode(inbound.hasher.finalize()),
        elapsed,
    })
}

/// One datagram, or `None` when the poll interval passed without one.
fn recv(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
    match socket.recv_from(buf) {
        Ok(received) => Ok(Some(received)),
        Err(ref e) if is_timeout(e) => Ok(None),
        // Windows reports ICMP port-unreachable from an earlier ack here.
        Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
        Err(e) => Err(e),
    }
}

impl Inbound<'_> {
    /// Process one datagram. Returns true if it was a chunk from the sender
    /// for this session.
    fn handle(&mut self, datagram: &[u8], src: SocketAddr) -> Result<bool, TransferError> {
        let logger = self.config.logger.as_ref();
        let session_id = self.config.session_id;

        if !self.session.admits(src) {
            emit(logger, COMPONENT, session_id, TransferEvent::EndpointMismatch { from: src });
            return Ok(false);
        }

        let chunk = match DataChunk::decode(datagram) {
            Ok(chunk) => chunk,
            Err(e) => {
                emit(
                    logger,
                    COMPONENT,
                    session_id,
                    TransferEvent::Malformed { from: src, reason: e.to_string() },
                );
                return Ok(false);
            }
        };

        let verdict = self.session.apply(&chunk, &mut self.file)?;
        match verdict {
            ChunkVerdict::Accepted { .. } => {
                self.hasher.update(&chunk.data);
                self.progress.record_chunk(chunk.data.len());
                emit(
                    logger,
                    COMPONENT,
                    session_id,
                    TransferEvent::ChunkAccepted {
                        sequence: chunk.sequence,
                        offset: chunk.file_offset,
                        len: chunk.data.len(),
                    },
                );
            }
            ChunkVerdict::Duplicate { .. } => {
                self.duplicates += 1;
                self.progress.record_retransmit();
                emit(
                    logger,
                    COMPONENT,
                    session_id,
                    TransferEvent::DuplicateChunk { sequence: chunk.sequence },
                );
            }
            ChunkVerdict::Gap { .. } => emit(
                logger,
                COMPONENT,
                session_id,
                TransferEvent::GapDetected {
                    expected: self.session.expected_sequence(),
                    got: chunk.sequence,
                },
            ),
            ChunkVerdict::WrongSession => {
                emit(
                    logger,
                    COMPONENT,
                    session_id,
                    TransferEvent::SessionMismatch { got: chunk.session_id },
                );
                return Ok(false);
            }
            ChunkVerdict::Inconsistent => {
                emit(
                    logger,
                    COMPONENT,
                    session_id,
                    TransferEvent::Malformed {
                        from: src,
                        reason: format!("file size {} != {}", chunk.file_size, self.config.file_size),
                    },
                );
                return Ok(false);
            }
        }

        if let Some(ack) = verdict.ack() {
            send_datagram(self.socket, &encode_ack(ack), src)?;
        }
        Ok(true)
    }
}
