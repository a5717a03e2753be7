//! Per-frame memo of field boundaries and decoded values.

use bytes::Bytes;

use crate::{
    codec::{ChecksumField, TransportHeaders},
    frame::{FieldReader, FrameError},
};

/// Variable-length fields whose cache entries can be dropped with
/// [`super::LazyFrame::reset_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LazyField {
    /// Service name of a call request.
    Service,
    /// Caller name transport header (`cn`).
    CallerName,
    /// Transport header map.
    Headers,
    /// Checksum descriptor.
    Checksum,
    /// First argument (method name).
    Arg1,
}

/// Caller-owned slot for the poolable readers.
///
/// Reusing one value across many frames avoids a fresh allocation per read.
/// After a read exactly one of `value` or `err` is set.
#[derive(Debug)]
pub struct ReadResult<T> {
    /// Decoded value on success.
    pub value: Option<T>,
    /// Decode error on failure.
    pub err: Option<FrameError>,
}

impl<T> Default for ReadResult<T> {
    fn default() -> Self {
        Self {
            value: None,
            err: None,
        }
    }
}

impl<T> ReadResult<T> {
    /// Empty result slot.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Clear both slots.
    pub fn clear(&mut self) {
        self.value = None;
        self.err = None;
    }

    /// Whether the last read succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool { self.err.is_none() && self.value.is_some() }

    pub(crate) fn set(&mut self, res: Result<T, FrameError>) {
        match res {
            Ok(v) => {
                self.value = Some(v);
                self.err = None;
            }
            Err(e) => {
                self.value = None;
                self.err = Some(e);
            }
        }
    }

    /// Move the outcome out, leaving the slot empty.
    ///
    /// # Errors
    /// Returns the stored decode error, if any.
    pub fn take(&mut self) -> Result<Option<T>, FrameError> {
        match self.err.take() {
            Some(e) => {
                self.value = None;
                Err(e)
            }
            None => Ok(self.value.take()),
        }
    }
}

/// Offsets are absolute positions in the frame buffer. Entries are written
/// once and only dropped by [`FieldCache::reset`].
#[derive(Debug, Default, Clone)]
pub(crate) struct FieldCache {
    pub(crate) service_end: Option<usize>,
    pub(crate) headers_end: Option<usize>,
    pub(crate) checksum_end: Option<usize>,
    pub(crate) service: Option<String>,
    pub(crate) caller_name: Option<Option<String>>,
    pub(crate) headers: Option<TransportHeaders>,
    pub(crate) checksum: Option<ChecksumField>,
    pub(crate) arg1: Option<Bytes>,
    reads: usize,
}

impl FieldCache {
    pub(crate) const fn reads(&self) -> usize { self.reads }

    pub(crate) const fn record(&mut self, rdr: &FieldReader<'_>) { self.reads += rdr.reads(); }

    /// Forget `field` and every boundary at or after its start.
    pub(crate) fn reset(&mut self, field: LazyField) {
        match field {
            LazyField::Service => {
                self.service = None;
                self.service_end = None;
                self.reset(LazyField::Headers);
            }
            LazyField::CallerName | LazyField::Headers => {
                self.caller_name = None;
                self.headers = None;
                self.headers_end = None;
                self.reset(LazyField::Checksum);
            }
            LazyField::Checksum => {
                self.checksum = None;
                self.checksum_end = None;
                self.reset(LazyField::Arg1);
            }
            LazyField::Arg1 => self.arg1 = None,
        }
    }
}
