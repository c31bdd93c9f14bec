use std::io;

use thiserror::Error;

/// Failure to turn bytes into a frame.
///
/// Decode errors are always recovered locally: the offending frame is
/// discarded and no response is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ends before the frame does. `needed` is the total frame
    /// length known so far, counted from the start of the frame.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    TruncatedFrame { needed: usize, available: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("unknown command id 0x{0:02x}")]
    UnknownCommand(u8),
}

/// Failure while reading a command off a byte stream.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("control stream I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
