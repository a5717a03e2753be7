//! Tokio codec adapter for frame I/O.
//!
//! [`FrameCodec`] implements Tokio's [`Decoder`] and [`Encoder`] traits so a
//! socket can be wrapped in [`tokio_util::codec::Framed`] when the caller
//! prefers pulling frames over pushing chunks through a
//! [`crate::framer::StreamFramer`].
//!
//! ```rust,ignore
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use tchannel_wire::codec::FrameCodec;
//!
//! async fn handle_connection(stream: TcpStream) {
//!     let mut framed = Framed::new(stream, FrameCodec::new());
//!     // Use framed.next() and framed.send() for frame I/O
//! }
//! ```

#![expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::FrameBody;
use crate::frame::{FRAME_HEADER_LEN, Frame, FrameError, LENGTH_PREFIX_LEN, MAX_FRAME_SIZE};

/// Length-prefixed frame codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self { Self::new() }
}

impl FrameCodec {
    /// Codec accepting frames up to the protocol maximum.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Reject frames larger than `max` bytes.
    #[must_use]
    pub const fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Configured maximum frame size.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize { self.max_frame_size }
}

impl Decoder for FrameCodec {
    type Error = FrameError;
    type Item = Frame;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&[hi, lo]) = src.get(..LENGTH_PREFIX_LEN) else {
            return Ok(None);
        };
        let prefix = u16::from_be_bytes([hi, lo]);
        let len = usize::from(prefix);
        if len < FRAME_HEADER_LEN {
            return Err(FrameError::InvalidFrameLength(prefix));
        }
        if len > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        Frame::new(src.split_to(len).freeze()).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.size() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: item.size(),
                max: self.max_frame_size,
            });
        }
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

/// Encodes a typed body under the given frame id.
impl Encoder<(u32, FrameBody)> for FrameCodec {
    type Error = FrameError;

    fn encode(
        &mut self,
        (id, body): (u32, FrameBody),
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let raw = body.encode(id)?;
        if raw.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: raw.len(),
                max: self.max_frame_size,
            });
        }
        dst.extend_from_slice(&raw);
        Ok(())
    }
}
