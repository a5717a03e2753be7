//! Envelope fields shared by call, continuation and control frames.
//!
//! Each type knows how to read itself from a [`FieldReader`] and append
//! itself to a [`FrameWriter`]. Lengths are validated on write so an encoded
//! frame never carries a prefix that disagrees with its value.

use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use crate::{
    checksum::ChecksumType,
    frame::{FieldReader, FrameError},
};

bitflags! {
    /// Flags byte at the front of call and continuation frames.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CallFlags: u8 {
        /// Bit 0: more fragments of this call follow.
        const MORE_FRAGMENTS = 0x01;
        /// Bit 1: the call is streaming.
        const STREAMING = 0x02;
    }
}

impl CallFlags {
    /// Whether further continuation frames follow this one.
    #[must_use]
    pub const fn has_more(self) -> bool { self.contains(Self::MORE_FRAGMENTS) }
}

/// Distributed tracing span carried by calls, cancels, claims and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Tracing {
    /// Span id.
    pub span_id: u64,
    /// Parent span id.
    pub parent_id: u64,
    /// Trace id.
    pub trace_id: u64,
    /// Trace flags (bit 0: sampled).
    pub flags: u8,
}

impl Tracing {
    /// Read a 25-byte tracing span.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if truncated.
    pub fn read(rdr: &mut FieldReader<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            span_id: rdr.u64()?,
            parent_id: rdr.u64()?,
            trace_id: rdr.u64()?,
            flags: rdr.u8()?,
        })
    }

    fn write(&self, out: &mut FrameWriter) {
        out.buf.put_u64(self.span_id);
        out.buf.put_u64(self.parent_id);
        out.buf.put_u64(self.trace_id);
        out.buf.put_u8(self.flags);
    }
}

/// Transport header key naming the calling service.
pub const CALLER_NAME_KEY: &str = "cn";
/// Transport header key naming the argument scheme (`raw`, `json`, `thrift`).
pub const ARG_SCHEME_KEY: &str = "as";

/// Ordered string-to-string transport headers.
///
/// Keys are unique; insertion order is preserved on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportHeaders(Vec<(String, String)>);

impl TransportHeaders {
    /// Create an empty header set.
    #[must_use]
    pub const fn new() -> Self { Self(Vec::new()) }

    /// Insert or replace a header, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let key = name.into();
        let value = text.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
            return;
        }
        self.0.push((key, value));
    }

    /// Look up a header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over headers in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub const fn len(&self) -> usize { self.0.len() }

    /// Whether no headers are present.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Read call-frame headers: `nh:1 (k~1 v~1){nh}`.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if truncated or
    /// [`FrameError::InvalidUtf8`] for non UTF-8 keys or values.
    pub fn read_short(rdr: &mut FieldReader<'_>) -> Result<Self, FrameError> {
        let count = rdr.u8()?;
        let mut headers = Self(Vec::with_capacity(usize::from(count)));
        for _ in 0..count {
            let key = rdr.str1("header key")?;
            let value = rdr.str1("header value")?;
            headers.insert(key, value);
        }
        Ok(headers)
    }

    /// Read init-frame headers: `nh:2 (k~2 v~2){nh}`.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if truncated or
    /// [`FrameError::InvalidUtf8`] for non UTF-8 keys or values.
    pub fn read_long(rdr: &mut FieldReader<'_>) -> Result<Self, FrameError> {
        let count = rdr.u16()?;
        let mut headers = Self(Vec::with_capacity(usize::from(count)));
        for _ in 0..count {
            let key = rdr.str2("init header key")?;
            let value = rdr.str2("init header value")?;
            headers.insert(key, value);
        }
        Ok(headers)
    }

    fn write_short(&self, out: &mut FrameWriter) -> Result<(), FrameError> {
        out.put_u8_len("header count", self.0.len())?;
        for (key, value) in &self.0 {
            out.put_len1("header key", key.as_bytes())?;
            out.put_len1("header value", value.as_bytes())?;
        }
        Ok(())
    }

    fn write_long(&self, out: &mut FrameWriter) -> Result<(), FrameError> {
        out.put_u16_len("init header count", self.0.len())?;
        for (key, value) in &self.0 {
            out.put_len2("init header key", key.as_bytes())?;
            out.put_len2("init header value", value.as_bytes())?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TransportHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Checksum descriptor: type tag plus value (absent for
/// [`ChecksumType::None`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChecksumField {
    /// Declared algorithm.
    pub kind: ChecksumType,
    /// Running checksum through the end of this frame.
    pub value: u32,
}

impl ChecksumField {
    /// Descriptor for `kind` with a zero value, used on the write path.
    #[must_use]
    pub const fn of(kind: ChecksumType) -> Self { Self { kind, value: 0 } }

    /// Read a checksum descriptor.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if truncated or
    /// [`FrameError::UnknownChecksumType`] for an undefined tag.
    pub fn read(rdr: &mut FieldReader<'_>) -> Result<Self, FrameError> {
        let kind = ChecksumType::from_code(rdr.u8()?)?;
        let value = if kind.value_len() == 0 { 0 } else { rdr.u32()? };
        Ok(Self { kind, value })
    }

    /// Write the tag and a zeroed value slot, returning the slot offset.
    fn write_placeholder(&self, out: &mut FrameWriter) -> Option<usize> {
        out.buf.put_u8(self.kind.code());
        if self.kind.value_len() == 0 {
            return None;
        }
        let at = out.buf.len();
        out.buf.put_u32(0);
        Some(at)
    }
}

/// Result code of a call response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseCode {
    /// The call succeeded.
    #[default]
    Ok,
    /// The handler reported an application error.
    Error,
    /// Any other code.
    Other(u8),
}

impl From<u8> for ResponseCode {
    fn from(v: u8) -> Self {
        match v {
            0x00 => Self::Ok,
            0x01 => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(c: ResponseCode) -> Self {
        match c {
            ResponseCode::Ok => 0x00,
            ResponseCode::Error => 0x01,
            ResponseCode::Other(v) => v,
        }
    }
}

/// Code carried by an error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Not a valid value for code.
    Invalid,
    /// The call timed out.
    Timeout,
    /// The call was cancelled.
    Cancelled,
    /// The handler is too busy.
    Busy,
    /// The call was declined.
    Declined,
    /// Unexpected handler failure.
    Unexpected,
    /// The request was malformed.
    BadRequest,
    /// A network error occurred.
    NetworkError,
    /// The handler is unhealthy.
    Unhealthy,
    /// Connection-level protocol error.
    ProtocolError,
    /// Any other code.
    Other(u8),
}

impl From<u8> for ErrorCode {
    fn from(v: u8) -> Self {
        match v {
            0x00 => Self::Invalid,
            0x01 => Self::Timeout,
            0x02 => Self::Cancelled,
            0x03 => Self::Busy,
            0x04 => Self::Declined,
            0x05 => Self::Unexpected,
            0x06 => Self::BadRequest,
            0x07 => Self::NetworkError,
            0x08 => Self::Unhealthy,
            0xff => Self::ProtocolError,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(c: ErrorCode) -> Self {
        match c {
            ErrorCode::Invalid => 0x00,
            ErrorCode::Timeout => 0x01,
            ErrorCode::Cancelled => 0x02,
            ErrorCode::Busy => 0x03,
            ErrorCode::Declined => 0x04,
            ErrorCode::Unexpected => 0x05,
            ErrorCode::BadRequest => 0x06,
            ErrorCode::NetworkError => 0x07,
            ErrorCode::Unhealthy => 0x08,
            ErrorCode::ProtocolError => 0xff,
            ErrorCode::Other(v) => v,
        }
    }
}

/// Append-only frame builder with length-checked prefixed writes.
#[derive(Debug, Default)]
pub(crate) struct FrameWriter {
    pub(crate) buf: BytesMut,
}

impl FrameWriter {
    pub(crate) fn put_u8_len(&mut self, field: &'static str, len: usize) -> Result<(), FrameError> {
        let n = u8::try_from(len).map_err(|_| FrameError::FieldTooLong {
            field,
            len,
            max: usize::from(u8::MAX),
        })?;
        self.buf.put_u8(n);
        Ok(())
    }

    pub(crate) fn put_u16_len(
        &mut self,
        field: &'static str,
        len: usize,
    ) -> Result<(), FrameError> {
        let n = u16::try_from(len).map_err(|_| FrameError::FieldTooLong {
            field,
            len,
            max: usize::from(u16::MAX),
        })?;
        self.buf.put_u16(n);
        Ok(())
    }

    pub(crate) fn put_len1(&mut self, field: &'static str, value: &[u8]) -> Result<(), FrameError> {
        self.put_u8_len(field, value.len())?;
        self.buf.put_slice(value);
        Ok(())
    }

    pub(crate) fn put_len2(&mut self, field: &'static str, value: &[u8]) -> Result<(), FrameError> {
        self.put_u16_len(field, value.len())?;
        self.buf.put_slice(value);
        Ok(())
    }

    pub(crate) fn put_tracing(&mut self, tracing: &Tracing) { tracing.write(self); }

    pub(crate) fn put_short_headers(
        &mut self,
        headers: &TransportHeaders,
    ) -> Result<(), FrameError> {
        headers.write_short(self)
    }

    pub(crate) fn put_long_headers(
        &mut self,
        headers: &TransportHeaders,
    ) -> Result<(), FrameError> {
        headers.write_long(self)
    }

    pub(crate) fn put_checksum_placeholder(&mut self, field: &ChecksumField) -> Option<usize> {
        field.write_placeholder(self)
    }

    /// Overwrite four bytes at `at` with a big-endian value.
    pub(crate) fn patch_u32(&mut self, at: usize, value: u32) -> Result<(), FrameError> {
        let slot = self
            .buf
            .get_mut(at..at + 4)
            .ok_or(FrameError::ShortBuffer)?;
        #[expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]
        slot.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}
