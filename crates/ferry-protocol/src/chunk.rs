//! Datagram frames: file data chunks and their acknowledgments.
//!
//! ```text
//! [0..4]    Session ID (u32 BE)
//! [4..8]    File size (u32 BE)
//! [8..12]   File offset of this chunk (u32 BE)
//! [12..16]  Chunk length (u32 BE)
//! [16..20]  Sequence number (u32 BE), first chunk is 1
//! [20..]    Chunk data
//! ```
//!
//! An acknowledgment is exactly four bytes: the acknowledged sequence number.

use bytes::{BufMut, Bytes, BytesMut};

use crate::cursor::FrameCursor;
use crate::error::DecodeError;

/// Data bytes carried per chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Chunk header size in bytes.
pub const CHUNK_HEADER: usize = 20;

/// Upper bound on any datagram either side sends or expects.
pub const DATAGRAM_MAX: usize = 2000;

/// Acknowledgment datagram size.
pub const ACK_LEN: usize = 4;

/// One slice of a file, framed for the datagram channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub session_id: u32,
    pub file_size: u32,
    pub file_offset: u32,
    pub sequence: u32,
    pub data: Bytes,
}

impl DataChunk {
    #[inline]
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER + self.data.len()
    }

    /// Byte offset just past this chunk.
    #[inline]
    pub fn end_offset(&self) -> u64 {
        self.file_offset as u64 + self.data.len() as u64
    }

    /// Append the wire form to `buf`.
    ///
    /// # Panics
    /// Panics if the frame would not fit in `DATAGRAM_MAX`.
    pub fn encode(&self, buf: &mut BytesMut) {
        assert!(self.encoded_len() <= DATAGRAM_MAX);
        buf.reserve(self.encoded_len());
        buf.put_u32(self.session_id);
        buf.put_u32(self.file_size);
        buf.put_u32(self.file_offset);
        buf.put_u32(self.data.len() as u32);
        buf.put_u32(self.sequence);
        buf.put_slice(&self.data);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one received datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = FrameCursor::new(datagram);
        let session_id = cur.u32()?;
        let file_size = cur.u32()?;
        let file_offset = cur.u32()?;
        let chunk_len = cur.u32()? as usize;
        let sequence = cur.u32()?;

        if chunk_len > DATAGRAM_MAX - CHUNK_HEADER {
            return Err(DecodeError::MalformedFrame("chunk length exceeds datagram limit"));
        }
        let data = cur.bytes(chunk_len)?;
        if cur.remaining() != 0 {
            return Err(DecodeError::MalformedFrame("trailing bytes after chunk data"));
        }
        if file_offset as u64 + chunk_len as u64 > file_size as u64 {
            return Err(DecodeError::MalformedFrame("chunk extends past end of file"));
        }

        Ok(Self {
            session_id,
            file_size,
            file_offset,
            sequence,
            data: Bytes::copy_from_slice(data),
        })
    }
}

pub fn encode_ack(sequence: u32) -> [u8; ACK_LEN] {
    sequence.to_be_bytes()
}

/// Decode an acknowledgment datagram. Anything but exactly four bytes is
/// rejected.
pub fn decode_ack(datagram: &[u8]) -> Result<u32, DecodeError> {
    let mut cur = FrameCursor::new(datagram);
    let sequence = cur.u32()?;
    if cur.remaining() != 0 {
        return Err(DecodeError::MalformedFrame("acknowledgment longer than 4 bytes"));
    }
    Ok(sequence)
}
