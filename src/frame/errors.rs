//! Error types for frame reassembly, envelope decoding and checksums.

use thiserror::Error;
use tokio::io;

use super::FrameType;

/// Errors raised by the framer, the envelope codec and the lazy readers.
///
/// Protocol-level problems are always returned as values; nothing in this
/// crate panics on malformed input.
#[derive(Debug, Error)]
pub enum FrameError {
    /// `write` was called with an empty chunk (caller contract violation).
    #[error("empty chunk written to framer")]
    EmptyChunk,
    /// A length prefix declared a frame too short to contain its own prefix,
    /// or, once dispatched, its 16-byte header.
    #[error("invalid frame length {0}")]
    InvalidFrameLength(u16),
    /// A length prefix or fixed field reaches past the end of the buffer.
    #[error("buffer too short")]
    ShortBuffer,
    /// The declared frame size does not match the buffer length.
    #[error("size mismatch: declared {declared}, actual {actual}")]
    SizeMismatch {
        /// Size carried in the frame header.
        declared: usize,
        /// Number of bytes actually present.
        actual: usize,
    },
    /// Bytes remain after every field of the frame body was decoded.
    #[error("{0} trailing bytes after frame body")]
    TrailingBytes(usize),
    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    /// The requested field does not exist for this frame type.
    #[error("field {field} not present on {kind} frames")]
    FieldUnavailable {
        /// Name of the requested field.
        field: &'static str,
        /// Type of the frame that was asked.
        kind: FrameType,
    },
    /// The frame type code is not understood by the strict decoder.
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),
    /// The checksum type tag is not defined by the protocol.
    #[error("unknown checksum type {0:#04x}")]
    UnknownChecksumType(u8),
    /// The checksum type is defined but cannot be computed here.
    #[error("unsupported checksum type {0:#04x}")]
    UnsupportedChecksum(u8),
    /// The computed checksum differs from the value carried on the wire.
    #[error("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        /// Value carried by the frame.
        expected: u32,
        /// Value computed over the argument bytes.
        actual: u32,
    },
    /// A frame exceeds the configured maximum size.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A field is too long for its length prefix when encoding.
    #[error("{field} of {len} bytes exceeds limit {max}")]
    FieldTooLong {
        /// Name of the oversized field.
        field: &'static str,
        /// Length of the supplied value.
        len: usize,
        /// Largest length the prefix can express.
        max: usize,
    },
    /// A frame arrived out of sequence for the call it belongs to.
    #[error("unexpected {kind} frame for call {id}")]
    UnexpectedFrame {
        /// Frame id of the offending frame.
        id: u32,
        /// Type of the offending frame.
        kind: FrameType,
    },
    /// The stream ended part-way through a frame.
    #[error("stream ended with {0} bytes of an incomplete frame")]
    TruncatedStream(usize),
    /// I/O error while reading the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A read did not complete within the configured timeout.
    #[error("I/O timeout")]
    Timeout,
}

impl FrameError {
    /// Whether the error leaves the byte stream unusable.
    ///
    /// Fatal errors mean frame boundaries can no longer be trusted and the
    /// connection should be dropped. The rest are local to one frame or call.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyChunk
                | Self::InvalidFrameLength(_)
                | Self::FrameTooLarge { .. }
                | Self::TruncatedStream(_)
                | Self::Io(_)
                | Self::Timeout
        )
    }
}
