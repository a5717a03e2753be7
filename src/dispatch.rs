//! Per-connection frame dispatch.
//!
//! [`Dispatcher`] sits between the framer and application code. It applies
//! the oversized-frame policy, builds a [`Frame`], decodes it the way the
//! connection was configured to ([`DecodeMode`]) and hands the result to an
//! [`InboundHandler`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    codec::{FrameBody, decode_strict},
    config::WireConfig,
    frame::{Frame, FrameError, MAX_FRAME_SIZE},
    framer::{FrameBytes, FrameSink},
    lazy::LazyFrame,
};

/// How inbound frames are decoded, fixed when the connection is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Hand over a [`LazyFrame`]; fields are read on demand. Suits
    /// forwarding proxies that route on the service name alone.
    Lazy,
    /// Decode and checksum-verify every field up front.
    #[default]
    Strict,
}

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    /// Frame wrapped for lazy field access.
    Lazy(LazyFrame),
    /// Fully decoded frame.
    Strict {
        /// Raw frame the body was decoded from.
        frame: Frame,
        /// Decoded body.
        body: FrameBody,
    },
}

impl Inbound {
    /// Frame id.
    #[must_use]
    pub const fn id(&self) -> u32 { self.frame().id() }

    /// Underlying frame.
    #[must_use]
    pub const fn frame(&self) -> &Frame {
        match self {
            Self::Lazy(lazy) => lazy.frame(),
            Self::Strict { frame, .. } => frame,
        }
    }
}

/// Consumer of decoded frames.
pub trait InboundHandler<C> {
    /// Handle one frame.
    ///
    /// # Errors
    /// An error aborts the current [`crate::framer::StreamFramer::write`].
    fn handle(&mut self, context: &C, inbound: Inbound) -> Result<(), FrameError>;

    /// Called when a frame fails strict decoding with a call-level error
    /// (see [`FrameError::is_fatal`]). The default drops the frame.
    ///
    /// # Errors
    /// Returning an error escalates it to the connection.
    fn rejected(
        &mut self,
        _context: &C,
        _frame: &Frame,
        _err: FrameError,
    ) -> Result<(), FrameError> {
        Ok(())
    }
}

impl<C> InboundHandler<C> for Vec<Inbound> {
    fn handle(&mut self, _context: &C, inbound: Inbound) -> Result<(), FrameError> {
        self.push(inbound);
        Ok(())
    }
}

/// Frame sink that enforces a size limit and decodes per [`DecodeMode`].
#[derive(Debug)]
pub struct Dispatcher<H> {
    mode: DecodeMode,
    max_frame_size: usize,
    handler: H,
}

impl<H> Dispatcher<H> {
    /// Dispatcher with the protocol's maximum frame size.
    #[must_use]
    pub const fn new(mode: DecodeMode, handler: H) -> Self {
        Self {
            mode,
            max_frame_size: MAX_FRAME_SIZE,
            handler,
        }
    }

    /// Dispatcher configured from `config`.
    #[must_use]
    pub const fn from_config(config: &WireConfig, handler: H) -> Self {
        Self {
            mode: config.decode_mode,
            max_frame_size: config.max_frame_size,
            handler,
        }
    }

    /// Reject frames larger than `max` bytes.
    #[must_use]
    pub const fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Decode mode in use.
    #[must_use]
    pub const fn mode(&self) -> DecodeMode { self.mode }

    /// Borrow the handler.
    #[must_use]
    pub const fn handler(&self) -> &H { &self.handler }

    /// Consume the dispatcher and return the handler.
    #[must_use]
    pub fn into_handler(self) -> H { self.handler }
}

impl<C, H: InboundHandler<C>> FrameSink<C> for Dispatcher<H> {
    fn on_frame(&mut self, context: &C, bytes: FrameBytes) -> Result<(), FrameError> {
        let size = bytes.len();
        if size > self.max_frame_size {
            warn!(size, max = self.max_frame_size, "oversized frame rejected");
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        let zero_copy = bytes.is_zero_copy();
        let frame = Frame::new(bytes.into_bytes()).map_err(|err| match err {
            FrameError::ShortBuffer => {
                warn!(size, "frame shorter than its header");
                FrameError::InvalidFrameLength(u16::try_from(size).unwrap_or(u16::MAX))
            }
            other => other,
        })?;
        let id = frame.id();
        debug!(id, kind = %frame.kind(), size, zero_copy, "dispatching frame");
        let inbound = match self.mode {
            DecodeMode::Lazy => Inbound::Lazy(LazyFrame::new(frame)),
            DecodeMode::Strict => match decode_strict(&frame) {
                Ok(body) => Inbound::Strict { frame, body },
                Err(err) if !err.is_fatal() => {
                    warn!(id, error = %err, "frame rejected");
                    return self.handler.rejected(context, &frame, err);
                }
                Err(err) => return Err(err),
            },
        };
        self.handler.handle(context, inbound)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use super::*;
    use crate::{
        checksum::ChecksumType,
        codec::{CallRequest, ChecksumField},
        framer::StreamFramer,
    };

    fn call_bytes() -> Bytes {
        FrameBody::CallRequest(CallRequest {
            service: "geo".to_owned(),
            checksum: ChecksumField::of(ChecksumType::Crc32),
            args: vec![Bytes::from_static(b"lookup")],
            ..CallRequest::default()
        })
        .encode(21)
        .expect("encode")
    }

    #[rstest]
    #[case(DecodeMode::Lazy)]
    #[case(DecodeMode::Strict)]
    fn dispatches_per_mode(#[case] mode: DecodeMode) {
        let mut framer = StreamFramer::new((), Dispatcher::new(mode, Vec::new()));
        framer.write(call_bytes()).expect("write");
        let handled = framer.into_sink().into_handler();
        let inbound = handled.first().expect("one frame");
        assert_eq!(inbound.id(), 21);
        match (mode, inbound) {
            (DecodeMode::Lazy, Inbound::Lazy(_))
            | (DecodeMode::Strict, Inbound::Strict { .. }) => {}
            other => panic!("unexpected dispatch {other:?}"),
        }
    }

    #[test]
    fn oversized_frames_are_fatal() {
        let dispatcher = Dispatcher::new(DecodeMode::Lazy, Vec::new()).with_max_frame_size(32);
        let mut framer = StreamFramer::new((), dispatcher);
        let err = framer.write(call_bytes()).expect_err("too large");
        assert!(matches!(err, FrameError::FrameTooLarge { max: 32, .. }));
        assert!(err.is_fatal());
    }

    #[derive(Default)]
    struct Rejections(Vec<u32>);

    impl InboundHandler<()> for Rejections {
        fn handle(&mut self, _context: &(), _inbound: Inbound) -> Result<(), FrameError> { Ok(()) }

        fn rejected(
            &mut self,
            _context: &(),
            frame: &Frame,
            err: FrameError,
        ) -> Result<(), FrameError> {
            assert!(matches!(err, FrameError::ChecksumMismatch { .. }));
            self.0.push(frame.id());
            Ok(())
        }
    }

    #[test]
    fn call_level_errors_go_to_handler() {
        let mut raw = call_bytes().to_vec();
        let last = raw.last_mut().expect("arg byte");
        *last ^= 0x20;
        let dispatcher = Dispatcher::new(DecodeMode::Strict, Rejections::default());
        let mut framer = StreamFramer::new((), dispatcher);
        framer.write(Bytes::from(raw)).expect("not fatal");
        assert_eq!(framer.into_sink().into_handler().0, vec![21]);
    }

    #[test]
    fn frame_shorter_than_header_is_fatal() {
        let mut chunk = vec![0x00, 0x04, 0xd0, 0x00];
        chunk.extend_from_slice(&crate::test_helpers::ping(9).expect("ping"));
        let mut framer = StreamFramer::new((), Dispatcher::new(DecodeMode::Lazy, Vec::new()));
        let err = framer.write(Bytes::from(chunk)).expect_err("short frame");
        assert!(matches!(err, FrameError::InvalidFrameLength(4)));
        assert!(err.is_fatal());
        assert!(framer.is_idle());
        assert!(framer.sink().handler().is_empty());
    }

    #[test]
    fn serde_names_are_snake_case() {
        let mode: DecodeMode = serde_json::from_str("\"lazy\"").expect("parse");
        assert_eq!(mode, DecodeMode::Lazy);
    }
}
