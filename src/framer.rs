//! Stream framer: reassembles length-prefixed frames from arbitrary chunks.
//!
//! A transport hands [`StreamFramer::write`] whatever one read returned. The
//! framer slices complete frames out of the chunk and hands them to a
//! [`FrameSink`] in arrival order. Bytes that do not yet form a complete frame
//! are carried over to the next call.
//!
//! Frames that lie wholly inside one chunk are delivered as
//! [`FrameBytes::View`], sharing the chunk's storage. Frames that straddle two
//! or more chunks are assembled in the carry buffer and delivered as
//! [`FrameBytes::Owned`].

#![expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]

use std::ops::Deref;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::frame::{FrameError, LENGTH_PREFIX_LEN};

/// Buffer holding exactly one length-prefixed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBytes {
    /// Zero-copy view into the chunk passed to [`StreamFramer::write`].
    View(Bytes),
    /// Buffer assembled from bytes that spanned several chunks.
    Owned(Bytes),
}

impl FrameBytes {
    /// Whether the frame shares storage with the caller's chunk.
    #[must_use]
    pub const fn is_zero_copy(&self) -> bool { matches!(self, Self::View(_)) }

    /// Borrow the frame bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes {
        match self {
            Self::View(b) | Self::Owned(b) => b,
        }
    }

    /// Consume the wrapper and return the frame bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::View(b) | Self::Owned(b) => b,
        }
    }
}

impl Deref for FrameBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target { self.as_bytes() }
}

impl From<FrameBytes> for Bytes {
    fn from(value: FrameBytes) -> Self { value.into_bytes() }
}

/// Receiver of complete frames.
///
/// Called synchronously from [`StreamFramer::write`], once per frame, in
/// stream order. Returning an error aborts the write and resets the framer.
pub trait FrameSink<C> {
    /// Handle one complete frame.
    ///
    /// # Errors
    /// Any error is returned unchanged from [`StreamFramer::write`].
    fn on_frame(&mut self, context: &C, frame: FrameBytes) -> Result<(), FrameError>;
}

impl<C> FrameSink<C> for Vec<FrameBytes> {
    fn on_frame(&mut self, _context: &C, frame: FrameBytes) -> Result<(), FrameError> {
        self.push(frame);
        Ok(())
    }
}

/// Incremental frame reassembler for one byte stream.
///
/// `C` is an opaque context (typically a connection id) passed to the sink
/// with every frame.
#[derive(Debug)]
pub struct StreamFramer<C, S> {
    context: C,
    sink: S,
    carry: BytesMut,
    /// Length of the frame being carried; zero until its prefix is known.
    target: usize,
}

impl<C, S: FrameSink<C>> StreamFramer<C, S> {
    /// Create a framer delivering frames to `sink`.
    #[must_use]
    pub fn new(context: C, sink: S) -> Self {
        Self {
            context,
            sink,
            carry: BytesMut::new(),
            target: 0,
        }
    }

    /// Context supplied at construction.
    #[must_use]
    pub const fn context(&self) -> &C { &self.context }

    /// Borrow the sink.
    #[must_use]
    pub const fn sink(&self) -> &S { &self.sink }

    /// Mutably borrow the sink.
    pub const fn sink_mut(&mut self) -> &mut S { &mut self.sink }

    /// Consume the framer and return its sink.
    #[must_use]
    pub fn into_sink(self) -> S { self.sink }

    /// Number of bytes carried towards the next frame.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.carry.len() }

    /// Whether no partial frame is carried.
    #[must_use]
    pub fn is_idle(&self) -> bool { self.carry.is_empty() }

    /// Discard any partial frame.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.target = 0;
    }

    /// Feed one chunk read from the stream.
    ///
    /// # Errors
    /// Returns [`FrameError::EmptyChunk`] for a zero-length chunk (state is
    /// left untouched), [`FrameError::InvalidFrameLength`] for a prefix below
    /// two bytes, or whatever the sink returns. On any error other than
    /// `EmptyChunk` the carried bytes are discarded.
    pub fn write(&mut self, chunk: Bytes) -> Result<(), FrameError> {
        if chunk.is_empty() {
            return Err(FrameError::EmptyChunk);
        }
        let res = self.feed(chunk);
        if res.is_err() {
            self.reset();
        }
        res
    }

    fn feed(&mut self, mut chunk: Bytes) -> Result<(), FrameError> {
        if !self.carry.is_empty() && !self.complete_carried(&mut chunk)? {
            return Ok(());
        }
        while !chunk.is_empty() {
            let Some(prefix) = read_prefix(&chunk) else {
                trace!(carried = chunk.len(), "partial length prefix carried");
                self.carry.extend_from_slice(&chunk);
                return Ok(());
            };
            let len = checked_len(prefix)?;
            if chunk.len() < len {
                trace!(frame_len = len, carried = chunk.len(), "partial frame carried");
                self.target = len;
                self.carry.reserve(len);
                self.carry.extend_from_slice(&chunk);
                return Ok(());
            }
            trace!(frame_len = len, "frame sliced from chunk");
            let frame = chunk.split_to(len);
            self.sink.on_frame(&self.context, FrameBytes::View(frame))?;
        }
        Ok(())
    }

    /// Top up the carry from the head of `chunk`, advancing past the bytes
    /// used. Returns `true` once the carried frame has been delivered.
    fn complete_carried(&mut self, chunk: &mut Bytes) -> Result<bool, FrameError> {
        if self.target == 0 {
            // One prefix byte is carried; the other leads this chunk.
            let Some(prefix) = read_prefix_split(&self.carry, chunk) else {
                self.carry.extend_from_slice(chunk);
                chunk.clear();
                return Ok(false);
            };
            self.target = checked_len(prefix)?;
            self.carry.reserve(self.target - self.carry.len());
        }
        let need = self.target - self.carry.len();
        if chunk.len() < need {
            self.carry.extend_from_slice(chunk);
            chunk.clear();
            return Ok(false);
        }
        self.carry.extend_from_slice(&chunk.split_to(need));
        let frame = self.carry.split().freeze();
        trace!(frame_len = frame.len(), "frame assembled from carry");
        self.target = 0;
        self.sink.on_frame(&self.context, FrameBytes::Owned(frame))?;
        Ok(true)
    }
}

fn read_prefix(buf: &[u8]) -> Option<u16> {
    match buf {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Rebuild a length prefix whose bytes may be split between the carry and
/// the head of the next chunk.
fn read_prefix_split(carry: &[u8], head: &[u8]) -> Option<u16> {
    match (carry, head) {
        ([hi, lo, ..], _) | ([hi], [lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

fn checked_len(len: u16) -> Result<usize, FrameError> {
    if usize::from(len) < LENGTH_PREFIX_LEN {
        return Err(FrameError::InvalidFrameLength(len));
    }
    Ok(usize::from(len))
}
