//! Bounds-checked reader over a received frame.

use std::net::Ipv4Addr;

use bytes::Buf;

use crate::error::DecodeError;

/// Reads big-endian fields from a byte slice, failing with
/// [`DecodeError::TruncatedFrame`] instead of reading past the end.
#[derive(Debug)]
pub struct FrameCursor<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> FrameCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, len: buf.len() }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.len - self.buf.remaining()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fail unless `n` more bytes are available.
    pub fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::TruncatedFrame {
                needed: self.position() + n,
                available: self.len,
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn ipv4(&mut self) -> Result<Ipv4Addr, DecodeError> {
        self.u32().map(Ipv4Addr::from)
    }

    /// Borrow the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// A `u32` length prefix followed by that many bytes of UTF-8.
    pub fn string(&mut self, max_len: usize) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        if len > max_len {
            return Err(DecodeError::MalformedFrame("string length exceeds limit"));
        }
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| DecodeError::MalformedFrame("string is not valid UTF-8"))
    }
}
