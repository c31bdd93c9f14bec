use std::io;

use thiserror::Error;

use ferry_protocol::{CommandId, DecodeError, ReadError};
use ferry_transfer::TransferError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad frame from server: {0}")]
    Decode(#[from] DecodeError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("server has no file named {0:?}")]
    FileNotFound(String),

    #[error("unexpected reply from server: {0:?}")]
    UnexpectedReply(CommandId),

    #[error("server closed the control connection")]
    Disconnected,

    #[error("refusing file name {0:?}")]
    InvalidFilename(String),

    #[error("{failed} of {requested} download(s) failed")]
    DownloadsFailed { failed: usize, requested: usize },
}

impl From<ReadError> for ClientError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Io(e) => Self::Io(e),
            ReadError::Decode(e) => Self::Decode(e),
        }
    }
}
