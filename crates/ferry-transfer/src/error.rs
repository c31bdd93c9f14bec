use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use ferry_protocol::DecodeError;

/// Why a single transfer stopped. A failed transfer never affects other
/// sessions.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] DecodeError),

    #[error("cannot open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("chunk {sequence} unacknowledged after {attempts} attempts")]
    TransferFailed { sequence: u32, attempts: u32 },

    #[error("file is {0} bytes, larger than a u32 size field allows")]
    FileTooLarge(u64),

    #[error("file ended before the advertised {expected} bytes")]
    SizeMismatch { expected: u32 },

    #[error("a transfer to {0} is already in flight")]
    EndpointBusy(SocketAddr),

    #[error("no datagram from the sender for {0:?}")]
    IdleTimeout(Duration),

    #[error("transfer thread panicked")]
    Panicked,
}
