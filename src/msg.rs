//! Length-prefixed record buffers and 4-byte-aligned byte streams.
//!
//! A record on the wire is a 4-byte header followed by the payload. The
//! header's low 31 bits carry the payload length in bytes; the high bit
//! flags the last fragment of the record. Payloads are padded with zero
//! bytes to a 4-byte boundary, and the pad bytes are not counted in the
//! header length. Receivers must reject non-zero padding.

use crate::error::{Error, Result};

/// Size of the record header preceding every payload.
pub const HEADER_LEN: usize = 4;

/// Header bit marking the final fragment of a record.
const LAST_FRAGMENT: u32 = 0x8000_0000;

/// Number of pad bytes that bring `len` up to a 4-byte boundary.
fn pad_len(len: usize) -> usize {
    len.wrapping_neg() & 3
}

/// A framed record: header plus payload in one contiguous allocation.
pub struct MsgBuf {
    buf: Vec<u8>,
}

impl MsgBuf {
    /// Allocates a record buffer for a `len`-byte payload and writes the
    /// header.
    ///
    /// In RPC record marking (RFC 5531 section 11) a clear high bit means
    /// another fragment follows. Continuation fragments are not produced
    /// here, so the last-record bit is always set.
    ///
    /// # Panics
    ///
    /// Panics if `len` does not fit in the header's 31 length bits.
    pub fn alloc(len: usize) -> MsgBuf {
        assert!(
            len < LAST_FRAGMENT as usize,
            "record length {len} out of range"
        );

        let mut buf = vec![0u8; HEADER_LEN + len];
        buf[..HEADER_LEN].copy_from_slice(&(len as u32 | LAST_FRAGMENT).to_le_bytes());
        MsgBuf { buf }
    }

    /// Payload length in bytes; the header is not counted.
    pub fn len(&self) -> usize {
        self.buf.len() - HEADER_LEN
    }

    /// True for a record with an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[HEADER_LEN..]
    }

    /// The payload bytes, writable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_LEN..]
    }

    /// Header and payload exactly as they appear on the wire.
    pub fn raw(&self) -> &[u8] {
        &self.buf
    }
}

/// Writes raw byte runs into a 4-byte-aligned word stream.
pub struct WriteCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WriteCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> WriteCursor<'a> {
        WriteCursor { buf, pos: 0 }
    }

    /// Copies `src` at the cursor, zero-pads to the next 4-byte boundary,
    /// and advances past the padding.
    ///
    /// # Panics
    ///
    /// Panics if the padded run does not fit in the remaining buffer; the
    /// caller sizes the buffer when allocating the record.
    pub fn put_bytes(&mut self, src: &[u8]) {
        let end = self.pos + src.len();
        let padded = end + pad_len(src.len());
        assert!(padded <= self.buf.len(), "put_bytes past end of buffer");

        self.buf[self.pos..end].copy_from_slice(src);
        self.buf[end..padded].fill(0);
        self.pos = padded;
    }

    /// Bytes written so far, padding included.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

/// Reads raw byte runs back out of a 4-byte-aligned word stream.
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> ReadCursor<'a> {
        ReadCursor { buf, pos: 0 }
    }

    /// Copies `out.len()` bytes from the cursor and consumes the padding
    /// that brings the run to a 4-byte boundary.
    ///
    /// Fails with [`Error::ShouldBeZero`] if any pad byte is non-zero, and
    /// with [`Error::Overrun`] if the padded run extends past the buffer.
    /// The cursor does not advance on failure.
    pub fn get_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        let end = self.pos + out.len();
        let padded = end + pad_len(out.len());
        if padded > self.buf.len() {
            return Err(Error::Overrun);
        }

        out.copy_from_slice(&self.buf[self.pos..end]);
        if self.buf[end..padded].iter().any(|&b| b != 0) {
            return Err(Error::ShouldBeZero);
        }

        self.pos = padded;
        Ok(())
    }

    /// Bytes consumed so far, padding included.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes remaining past the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
