//! Bounds-checked cursor over a frame buffer.
//!
//! Both the strict decoder and the lazy field readers walk frames through a
//! [`FieldReader`]. Every primitive read bumps a counter so callers can tell
//! whether a lookup touched the buffer at all.

#![expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]

use bytes::Bytes;

use super::FrameError;

/// Forward-only reader over a shared frame buffer.
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a Bytes,
    pos: usize,
    reads: usize,
}

impl<'a> FieldReader<'a> {
    /// Start reading `buf` at byte offset `pos`.
    #[must_use]
    pub const fn new(buf: &'a Bytes, pos: usize) -> Self { Self { buf, pos, reads: 0 } }

    /// Current byte offset.
    #[must_use]
    pub const fn position(&self) -> usize { self.pos }

    /// Bytes left after the current offset.
    #[must_use]
    pub const fn remaining(&self) -> usize { self.buf.len().saturating_sub(self.pos) }

    /// Number of primitive reads performed so far.
    #[must_use]
    pub const fn reads(&self) -> usize { self.reads }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        self.reads += 1;
        let buf: &'a Bytes = self.buf;
        let end = self.pos.checked_add(len).ok_or(FrameError::ShortBuffer)?;
        let slice = buf.get(self.pos..end).ok_or(FrameError::ShortBuffer)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        self.take(N)?
            .try_into()
            .map_err(|_| FrameError::ShortBuffer)
    }

    /// Read one byte.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] at the end of the buffer.
    pub fn u8(&mut self) -> Result<u8, FrameError> {
        let [b] = self.array::<1>()?;
        Ok(b)
    }

    /// Read a big-endian `u16`.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if fewer than two bytes remain.
    pub fn u16(&mut self) -> Result<u16, FrameError> { Ok(u16::from_be_bytes(self.array()?)) }

    /// Read a big-endian `u32`.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if fewer than four bytes remain.
    pub fn u32(&mut self) -> Result<u32, FrameError> { Ok(u32::from_be_bytes(self.array()?)) }

    /// Read a big-endian `u64`.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if fewer than eight bytes remain.
    pub fn u64(&mut self) -> Result<u64, FrameError> { Ok(u64::from_be_bytes(self.array()?)) }

    /// Slice `len` bytes out of the buffer without copying.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if fewer than `len` bytes remain.
    pub fn bytes(&mut self, len: usize) -> Result<Bytes, FrameError> {
        let start = self.pos;
        self.take(len)?;
        Ok(self.buf.slice(start..self.pos))
    }

    /// Advance past `len` bytes.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if fewer than `len` bytes remain.
    pub fn skip(&mut self, len: usize) -> Result<(), FrameError> { self.take(len).map(|_| ()) }

    /// Read a value preceded by a one-byte length.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if the value is truncated.
    pub fn len1_bytes(&mut self) -> Result<Bytes, FrameError> {
        let len = self.u8()?;
        self.bytes(usize::from(len))
    }

    /// Read a value preceded by a two-byte length.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if the value is truncated.
    pub fn len2_bytes(&mut self) -> Result<Bytes, FrameError> {
        let len = self.u16()?;
        self.bytes(usize::from(len))
    }

    /// Skip a value preceded by a one-byte length.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if the value is truncated.
    pub fn skip_len1(&mut self) -> Result<(), FrameError> {
        let len = self.u8()?;
        self.skip(usize::from(len))
    }

    /// Read a UTF-8 string preceded by a one-byte length.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if truncated or
    /// [`FrameError::InvalidUtf8`] naming `field` if not valid UTF-8.
    pub fn str1(&mut self, field: &'static str) -> Result<String, FrameError> {
        let raw = self.len1_bytes()?;
        utf8(&raw, field).map(str::to_owned)
    }

    /// Read a UTF-8 string preceded by a two-byte length.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if truncated or
    /// [`FrameError::InvalidUtf8`] naming `field` if not valid UTF-8.
    pub fn str2(&mut self, field: &'static str) -> Result<String, FrameError> {
        let raw = self.len2_bytes()?;
        utf8(&raw, field).map(str::to_owned)
    }
}

/// Validate `raw` as UTF-8, naming `field` in the error.
///
/// # Errors
/// Returns [`FrameError::InvalidUtf8`] if `raw` is not valid UTF-8.
pub fn utf8<'b>(raw: &'b [u8], field: &'static str) -> Result<&'b str, FrameError> {
    std::str::from_utf8(raw).map_err(|_| FrameError::InvalidUtf8(field))
}
