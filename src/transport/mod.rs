//! Async adapters between Tokio I/O and the synchronous framer.
//!
//! [`FramePump`] reads an [`AsyncRead`] in bounded chunks and pushes each one
//! into a [`StreamFramer`]. [`write_frames`] sends encoded frames, for
//! instance the output of [`crate::fragment::CallFragmenter`], to an
//! [`AsyncWrite`].

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::debug;

use crate::{
    config::{DEFAULT_READ_CHUNK_SIZE, WireConfig},
    frame::FrameError,
    framer::{FrameSink, StreamFramer},
};

/// Reads a byte stream and feeds it to a framer until EOF.
#[derive(Debug)]
pub struct FramePump<R> {
    reader: R,
    chunk_size: usize,
    read_timeout: Option<Duration>,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FramePump<R> {
    /// Pump with the default chunk size and no read timeout.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            chunk_size: DEFAULT_READ_CHUNK_SIZE,
            read_timeout: None,
            buf: BytesMut::new(),
        }
    }

    /// Pump using the chunk size and timeout from `config`.
    #[must_use]
    pub fn from_config(reader: R, config: &WireConfig) -> Self {
        Self::new(reader)
            .with_chunk_size(config.read_chunk_size)
            .with_timeout(config.read_timeout())
    }

    /// Request at most `size` bytes per read. Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Fail a read that does not complete within `limit`.
    #[must_use]
    pub const fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.read_timeout = limit;
        self
    }

    /// Bytes requested per read.
    #[must_use]
    pub const fn chunk_size(&self) -> usize { self.chunk_size }

    /// Release the underlying reader.
    #[must_use]
    pub fn into_inner(self) -> R { self.reader }

    /// Read the next chunk, or `None` at EOF.
    ///
    /// Each chunk is a freshly frozen buffer, so frames the framer emits as
    /// views keep only their own chunk alive.
    ///
    /// # Errors
    /// Returns [`FrameError::Io`] on read failure and [`FrameError::Timeout`]
    /// when the configured timeout elapses.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, FrameError> {
        self.buf.reserve(self.chunk_size);
        let mut limited = (&mut self.buf).limit(self.chunk_size);
        let read = self.reader.read_buf(&mut limited);
        let n = match self.read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| FrameError::Timeout)??,
            None => read.await?,
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }

    /// Drive `framer` until the reader reports EOF.
    ///
    /// Returns the number of bytes read.
    ///
    /// # Errors
    /// Propagates read and framer errors. Returns
    /// [`FrameError::TruncatedStream`] if EOF arrives part-way through a
    /// frame.
    pub async fn run<C, S: FrameSink<C>>(
        &mut self,
        framer: &mut StreamFramer<C, S>,
    ) -> Result<usize, FrameError> {
        let mut total = 0usize;
        while let Some(chunk) = self.read_chunk().await? {
            total = total.saturating_add(chunk.len());
            framer.write(chunk)?;
        }
        if !framer.is_idle() {
            let pending = framer.pending_len();
            debug!(pending, total, "stream ended mid-frame");
            return Err(FrameError::TruncatedStream(pending));
        }
        debug!(total, "stream closed");
        Ok(total)
    }
}

/// Write each frame in order, then flush.
///
/// # Errors
/// Returns [`FrameError::Io`] on write failure and [`FrameError::Timeout`]
/// if the whole batch does not complete within `limit`.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frames: &[Bytes],
    limit: Option<Duration>,
) -> Result<(), FrameError> {
    let send = async {
        for frame in frames {
            writer.write_all(frame).await?;
        }
        writer.flush().await
    };
    match limit {
        Some(dur) => timeout(dur, send)
            .await
            .map_err(|_| FrameError::Timeout)??,
        None => send.await?,
    }
    debug!(count = frames.len(), "frames written");
    Ok(())
}
