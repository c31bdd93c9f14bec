//! Ferry wire protocol: control-channel command frames, data-chunk datagrams
//! and acknowledgments.
//!
//! Everything here is pure. No sockets, no files. Both the server and the
//! client link this crate so the two roles cannot drift apart.
//!
//! All multi-byte integers are big-endian.

pub mod chunk;
pub mod command;
pub mod cursor;
pub mod error;
pub mod stream;

pub use chunk::{
    ACK_LEN, CHUNK_HEADER, CHUNK_SIZE, DATAGRAM_MAX, DataChunk, decode_ack, encode_ack,
};
pub use command::{
    Command, CommandId, DownloadRequest, DownloadResponse, fit_listing, is_plain_filename,
    list_bytes,
};
pub use cursor::FrameCursor;
pub use error::{DecodeError, ReadError};
pub use stream::{CommandReader, write_command};
