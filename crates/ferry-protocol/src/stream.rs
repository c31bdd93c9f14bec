//! Command framing over a reliable byte stream.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

use crate::command::Command;
use crate::error::{DecodeError, ReadError};

const READ_CHUNK: usize = 1024;

/// Pulls whole commands out of a byte stream.
///
/// A stream read may deliver part of a frame or several frames at once; the
/// reader buffers until a complete frame can be decoded.
pub struct CommandReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: Read> CommandReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next command.
    ///
    /// Returns `Ok(None)` when the peer closed the stream. On a decode error
    /// the buffered bytes are discarded so the next call starts fresh.
    pub fn read_command(&mut self) -> Result<Option<Command>, ReadError> {
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            if !self.buf.is_empty() {
                match Command::decode(&self.buf) {
                    Ok((command, used)) => {
                        self.buf.advance(used);
                        return Ok(Some(command));
                    }
                    Err(DecodeError::TruncatedFrame { .. }) => {}
                    Err(e) => {
                        self.buf.clear();
                        return Err(e.into());
                    }
                }
            }

            let n = match self.inner.read(&mut scratch) {
                Ok(0) => return Ok(None),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.buf.extend_from_slice(&scratch[..n]);
        }
    }
}

/// Write one command frame.
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> io::Result<()> {
    writer.write_all(&command.to_bytes())?;
    writer.flush()
}
