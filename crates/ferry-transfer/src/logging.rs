//! Structured per-transfer event logging.
//!
//! Sender and receiver report what happens to each chunk through a
//! [`TransferLogger`]. The default writes to `tracing`; tests can plug in a
//! logger that records events.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Structured log entry for one transfer.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub session_id: u32,
    pub event: TransferEvent,
}

/// One step of a transfer, as seen by either end.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Sender or receiver started
    Started {
        peer: SocketAddr,
        file_size: u32,
    },
    /// Sender: chunk datagram sent (attempt 1 is the first send)
    ChunkSent {
        sequence: u32,
        len: usize,
        attempt: u32,
    },
    /// Sender: no ack within the timeout
    AckTimeout {
        sequence: u32,
        attempt: u32,
    },
    /// Sender: ack for another sequence number
    UnexpectedAck {
        expected: u32,
        got: u32,
    },
    /// Receiver: chunk written
    ChunkAccepted {
        sequence: u32,
        offset: u32,
        len: usize,
    },
    /// Receiver: already-accepted chunk arrived again
    DuplicateChunk {
        sequence: u32,
    },
    /// Receiver: chunk from the future, resend requested
    GapDetected {
        expected: u32,
        got: u32,
    },
    /// Receiver: datagram from an endpoint other than the expected sender
    EndpointMismatch {
        from: SocketAddr,
    },
    /// Receiver: chunk for another session
    SessionMismatch {
        got: u32,
    },
    /// Datagram that failed to decode
    Malformed {
        from: SocketAddr,
        reason: String,
    },
    /// Every byte delivered (sender) or written (receiver)
    TransferComplete {
        total_bytes: u64,
        duration_ms: u64,
        retransmits: u64,
    },
    /// Transfer ended with an error
    Error {
        message: String,
    },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { peer, file_size } => {
                write!(f, "started peer={} size={}", peer, file_size)
            }
            Self::ChunkSent { sequence, len, attempt } => {
                write!(f, "chunk_sent seq={} len={} attempt={}", sequence, len, attempt)
            }
            Self::AckTimeout { sequence, attempt } => {
                write!(f, "ack_timeout seq={} attempt={}", sequence, attempt)
            }
            Self::UnexpectedAck { expected, got } => {
                write!(f, "unexpected_ack expected={} got={}", expected, got)
            }
            Self::ChunkAccepted { sequence, offset, len } => {
                write!(f, "chunk_accepted seq={} offset={} len={}", sequence, offset, len)
            }
            Self::DuplicateChunk { sequence } => {
                write!(f, "duplicate_chunk seq={}", sequence)
            }
            Self::GapDetected { expected, got } => {
                write!(f, "gap_detected expected={} got={}", expected, got)
            }
            Self::EndpointMismatch { from } => {
                write!(f, "endpoint_mismatch from={}", from)
            }
            Self::SessionMismatch { got } => {
                write!(f, "session_mismatch got={}", got)
            }
            Self::Malformed { from, reason } => {
                write!(f, "malformed from={}: {}", from, reason)
            }
            Self::TransferComplete { total_bytes, duration_ms, retransmits } => {
                write!(
                    f,
                    "transfer_complete bytes={} duration_ms={} retransmits={}",
                    total_bytes, duration_ms, retransmits
                )
            }
            Self::Error { message } => {
                write!(f, "error: {}", message)
            }
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing,
/// collect events for inspection, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Forwards events to `tracing`: lifecycle at info, per-chunk at debug.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        // Lifecycle and anomalies at info, per-chunk traffic at debug.
        match &entry.event {
            TransferEvent::Error { .. } => {
                tracing::warn!(
                    component = entry.component,
                    session_id = entry.session_id,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::Started { .. }
            | TransferEvent::TransferComplete { .. }
            | TransferEvent::EndpointMismatch { .. }
            | TransferEvent::AckTimeout { .. } => {
                tracing::info!(
                    component = entry.component,
                    session_id = entry.session_id,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    session_id = entry.session_id,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// Drops every event.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

/// Emit `event` if a logger is configured.
pub(crate) fn emit(
    logger: Option<&Arc<dyn TransferLogger>>,
    component: &'static str,
    session_id: u32,
    event: TransferEvent,
) {
    if let Some(logger) = logger {
        logger.log(TransferLog { component, session_id, event });
    }
}
