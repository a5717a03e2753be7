//! Frame values and the fixed frame header.
//!
//! A [`Frame`] is one length-prefixed unit of the wire protocol: an immutable
//! buffer plus the eagerly decoded size, type and id from its first 16 bytes.
//! Everything past the header is decoded on demand by [`crate::lazy`] or in
//! one pass by [`crate::codec`].

pub mod errors;
mod header;
mod reader;

use bytes::Bytes;

pub use errors::FrameError;
pub use header::{FrameHeader, FrameType};
pub use reader::{FieldReader, utf8};

/// Length of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 16;
/// Length of the big-endian size prefix at the front of every frame.
pub const LENGTH_PREFIX_LEN: usize = 2;
/// Largest frame the 16-bit size prefix can describe.
pub const MAX_FRAME_SIZE: usize = 0xFFFF;
/// Encoded length of a tracing span.
pub const TRACING_LEN: usize = 25;

/// One complete frame.
///
/// The buffer is never mutated once the frame is built; cloning is cheap as
/// the storage is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    buf: Bytes,
}

impl Frame {
    /// Build a frame from a complete length-prefixed buffer.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if the buffer cannot hold a header
    /// and [`FrameError::SizeMismatch`] if the declared size disagrees with
    /// the buffer length.
    pub fn new(buf: Bytes) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(&buf)?;
        if usize::from(header.size) != buf.len() {
            return Err(FrameError::SizeMismatch {
                declared: usize::from(header.size),
                actual: buf.len(),
            });
        }
        Ok(Self { header, buf })
    }

    /// Return the parsed header.
    #[must_use]
    pub const fn header(&self) -> &FrameHeader { &self.header }

    /// Frame id.
    #[must_use]
    pub const fn id(&self) -> u32 { self.header.id }

    /// Frame type.
    #[must_use]
    pub const fn kind(&self) -> FrameType { self.header.kind }

    /// Total frame size, header included.
    #[must_use]
    pub const fn size(&self) -> usize { self.buf.len() }

    /// Full frame bytes, header included.
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes { &self.buf }

    /// Frame payload following the 16-byte header, without copying.
    #[must_use]
    pub fn payload(&self) -> Bytes { self.buf.slice(FRAME_HEADER_LEN..) }

    /// Consume the frame and return its buffer.
    #[must_use]
    pub fn into_bytes(self) -> Bytes { self.buf }
}

impl TryFrom<Bytes> for Frame {
    type Error = FrameError;

    fn try_from(value: Bytes) -> Result<Self, Self::Error> { Self::new(value) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn raw_frame(size: u16, kind: u8, id: u32, body: &[u8]) -> Bytes {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        buf.extend_from_slice(&size.to_be_bytes());
        buf.push(kind);
        buf.push(0);
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(body);
        Bytes::from(buf)
    }

    #[test]
    fn parses_header_eagerly() {
        let frame = Frame::new(raw_frame(18, 0xd0, 7, &[1, 2])).expect("frame");
        assert_eq!(frame.id(), 7);
        assert_eq!(frame.kind(), FrameType::PingRequest);
        assert_eq!(frame.size(), 18);
        assert_eq!(&frame.payload()[..], &[1, 2]);
    }

    #[rstest]
    #[case::declared_longer(20, 2)]
    #[case::declared_shorter(16, 2)]
    fn rejects_size_mismatch(#[case] declared: u16, #[case] body_len: usize) {
        let err = Frame::new(raw_frame(declared, 0xd0, 1, &vec![0; body_len]))
            .expect_err("size mismatch");
        assert!(matches!(err, FrameError::SizeMismatch { .. }));
    }

    #[test]
    fn rejects_short_buffer() {
        let err = Frame::new(Bytes::from_static(&[0, 4, 1, 0])).expect_err("short");
        assert!(matches!(err, FrameError::ShortBuffer));
    }
}
