//! Lazy, memoised field access for call frames.
//!
//! Routing a call only needs its service name, sometimes the caller name or
//! the method (arg1). [`LazyFrame`] reads those on demand. Because the
//! service name, headers and checksum are variable length, locating a field
//! means walking every field before it; each boundary passed on the way is
//! recorded in the frame's field cache so later requests resume from there instead
//! of re-scanning.
//!
//! Field layout relative to the start of the frame:
//!
//! | Frame type      | Fixed fields                  | Variable fields                 |
//! |-----------------|-------------------------------|---------------------------------|
//! | `CallRequest`   | flags@16, ttl@17, tracing@21  | service@46, headers, csum, args |
//! | `CallResponse`  | flags@16, code@17, tracing@18 | headers@43, csum, args          |
//! | `Call*Continue` | flags@16                      | csum@17, args                   |

mod cache;

use bytes::Bytes;

use self::cache::FieldCache;
pub use self::cache::{LazyField, ReadResult};
use crate::{
    codec::{
        CALLER_NAME_KEY,
        CallFlags,
        ChecksumField,
        ResponseCode,
        Tracing,
        TransportHeaders,
    },
    frame::{
        FRAME_HEADER_LEN,
        FieldReader,
        Frame,
        FrameError,
        FrameType,
        TRACING_LEN,
        utf8,
    },
};

const FLAGS_AT: usize = FRAME_HEADER_LEN;
const TTL_AT: usize = FLAGS_AT + 1;
const CODE_AT: usize = FLAGS_AT + 1;
const REQUEST_TRACING_AT: usize = TTL_AT + 4;
const RESPONSE_TRACING_AT: usize = CODE_AT + 1;
const SERVICE_AT: usize = REQUEST_TRACING_AT + TRACING_LEN;
const RESPONSE_HEADERS_AT: usize = RESPONSE_TRACING_AT + TRACING_LEN;
const CONTINUE_CHECKSUM_AT: usize = FLAGS_AT + 1;

/// A frame paired with its field cache.
///
/// Readers take `&mut self` because a miss fills the cache. The cache lives
/// and dies with this value.
#[derive(Debug, Clone)]
pub struct LazyFrame {
    frame: Frame,
    cache: FieldCache,
}

impl From<Frame> for LazyFrame {
    fn from(frame: Frame) -> Self { Self::new(frame) }
}

impl LazyFrame {
    /// Wrap `frame` with an empty cache.
    #[must_use]
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            cache: FieldCache::default(),
        }
    }

    /// Underlying frame.
    #[must_use]
    pub const fn frame(&self) -> &Frame { &self.frame }

    /// Drop the cache and return the frame.
    #[must_use]
    pub fn into_frame(self) -> Frame { self.frame }

    /// Frame id.
    #[must_use]
    pub const fn id(&self) -> u32 { self.frame.id() }

    /// Frame type.
    #[must_use]
    pub const fn kind(&self) -> FrameType { self.frame.kind() }

    /// Primitive buffer reads performed by the variable-length readers so
    /// far. A cache hit leaves this unchanged.
    #[must_use]
    pub const fn scan_count(&self) -> usize { self.cache.reads() }

    /// Forget `field` and everything located after it so the next read
    /// scans again. Intended for measuring cold reads.
    pub fn reset_field(&mut self, field: LazyField) { self.cache.reset(field); }

    const fn unavailable(&self, field: &'static str) -> FrameError {
        FrameError::FieldUnavailable {
            field,
            kind: self.kind(),
        }
    }

    const fn fixed(&self, at: usize) -> FieldReader<'_> {
        FieldReader::new(self.frame.as_bytes(), at)
    }

    /// Call flags of a call or continuation frame.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for other frame types and
    /// [`FrameError::ShortBuffer`] if the frame is truncated.
    pub fn flags(&self) -> Result<CallFlags, FrameError> {
        let kind = self.kind();
        if !(kind.is_call() || kind.is_continuation()) {
            return Err(self.unavailable("flags"));
        }
        Ok(CallFlags::from_bits_retain(self.fixed(FLAGS_AT).u8()?))
    }

    /// Time to live of a call request.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for other frame types and
    /// [`FrameError::ShortBuffer`] if the frame is truncated.
    pub fn ttl(&self) -> Result<u32, FrameError> {
        if self.kind() != FrameType::CallRequest {
            return Err(self.unavailable("ttl"));
        }
        self.fixed(TTL_AT).u32()
    }

    /// Response code of a call response.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for other frame types and
    /// [`FrameError::ShortBuffer`] if the frame is truncated.
    pub fn code(&self) -> Result<ResponseCode, FrameError> {
        if self.kind() != FrameType::CallResponse {
            return Err(self.unavailable("code"));
        }
        Ok(ResponseCode::from(self.fixed(CODE_AT).u8()?))
    }

    /// Tracing span of a call request or response.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for other frame types and
    /// [`FrameError::ShortBuffer`] if the frame is truncated.
    pub fn read_tracing(&self) -> Result<Tracing, FrameError> {
        let at = match self.kind() {
            FrameType::CallRequest => REQUEST_TRACING_AT,
            FrameType::CallResponse => RESPONSE_TRACING_AT,
            _ => return Err(self.unavailable("tracing")),
        };
        Tracing::read(&mut self.fixed(at))
    }

    fn service_end(&mut self) -> Result<usize, FrameError> {
        if let Some(end) = self.cache.service_end {
            return Ok(end);
        }
        if self.kind() != FrameType::CallRequest {
            return Err(self.unavailable("service"));
        }
        let mut rdr = FieldReader::new(self.frame.as_bytes(), SERVICE_AT);
        let res = rdr.skip_len1();
        self.cache.record(&rdr);
        res?;
        let end = rdr.position();
        self.cache.service_end = Some(end);
        Ok(end)
    }

    fn service_bytes(&mut self) -> Result<Bytes, FrameError> {
        let end = self.service_end()?;
        Ok(self.frame.as_bytes().slice(SERVICE_AT + 1..end))
    }

    /// Service name of a call request.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for other frame types,
    /// [`FrameError::ShortBuffer`] if truncated, or
    /// [`FrameError::InvalidUtf8`].
    pub fn read_service_str(&mut self) -> Result<&str, FrameError> {
        if self.cache.service.is_none() {
            let raw = self.service_bytes()?;
            let name = utf8(&raw, "service")?.to_owned();
            self.cache.service = Some(name);
        }
        self.cache.service.as_deref().ok_or(FrameError::ShortBuffer)
    }

    /// Poolable form of [`LazyFrame::read_service_str`] yielding the raw,
    /// zero-copy service bytes.
    pub fn read_service_into(&mut self, out: &mut ReadResult<Bytes>) {
        out.set(self.service_bytes());
    }

    fn headers_start(&mut self) -> Result<usize, FrameError> {
        match self.kind() {
            FrameType::CallRequest => self.service_end(),
            FrameType::CallResponse => Ok(RESPONSE_HEADERS_AT),
            _ => Err(self.unavailable("headers")),
        }
    }

    /// Caller name (`cn` transport header), located without building the
    /// header map. The last occurrence wins, matching
    /// [`TransportHeaders::insert`].
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for non-call frames,
    /// [`FrameError::ShortBuffer`] if truncated, or
    /// [`FrameError::InvalidUtf8`].
    pub fn read_caller_name_str(&mut self) -> Result<Option<&str>, FrameError> {
        if self.cache.caller_name.is_none() {
            let from_map = self
                .cache
                .headers
                .as_ref()
                .map(|map| map.get(CALLER_NAME_KEY).map(str::to_owned));
            let name = from_map.map_or_else(|| self.scan_caller_name(), Ok)?;
            self.cache.caller_name = Some(name);
        }
        Ok(self.cache.caller_name.as_ref().and_then(Option::as_deref))
    }

    fn scan_caller_name(&mut self) -> Result<Option<String>, FrameError> {
        let start = self.headers_start()?;
        let mut rdr = FieldReader::new(self.frame.as_bytes(), start);
        let res = find_header(&mut rdr, CALLER_NAME_KEY.as_bytes());
        self.cache.record(&rdr);
        let found = res?;
        self.cache.headers_end = Some(rdr.position());
        found
            .map(|raw| utf8(&raw, "header value").map(str::to_owned))
            .transpose()
    }

    /// Transport headers of a call request or response.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for non-call frames,
    /// [`FrameError::ShortBuffer`] if truncated, or
    /// [`FrameError::InvalidUtf8`].
    pub fn read_headers(&mut self) -> Result<&TransportHeaders, FrameError> {
        if self.cache.headers.is_none() {
            let start = self.headers_start()?;
            let mut rdr = FieldReader::new(self.frame.as_bytes(), start);
            let res = TransportHeaders::read_short(&mut rdr);
            self.cache.record(&rdr);
            let headers = res?;
            self.cache.headers_end = Some(rdr.position());
            self.cache.headers = Some(headers);
        }
        self.cache.headers.as_ref().ok_or(FrameError::ShortBuffer)
    }

    fn headers_end(&mut self) -> Result<usize, FrameError> {
        if let Some(end) = self.cache.headers_end {
            return Ok(end);
        }
        let start = self.headers_start()?;
        let mut rdr = FieldReader::new(self.frame.as_bytes(), start);
        let res = skip_headers(&mut rdr);
        self.cache.record(&rdr);
        res?;
        let end = rdr.position();
        self.cache.headers_end = Some(end);
        Ok(end)
    }

    /// Checksum descriptor of a call or continuation frame.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for other frame types,
    /// [`FrameError::ShortBuffer`] if truncated, or
    /// [`FrameError::UnknownChecksumType`].
    pub fn read_checksum(&mut self) -> Result<ChecksumField, FrameError> {
        if let Some(field) = self.cache.checksum {
            return Ok(field);
        }
        let start = match self.kind() {
            FrameType::CallRequest | FrameType::CallResponse => self.headers_end()?,
            FrameType::CallRequestContinue | FrameType::CallResponseContinue => {
                CONTINUE_CHECKSUM_AT
            }
            _ => return Err(self.unavailable("checksum")),
        };
        let mut rdr = FieldReader::new(self.frame.as_bytes(), start);
        let res = ChecksumField::read(&mut rdr);
        self.cache.record(&rdr);
        let field = res?;
        self.cache.checksum_end = Some(rdr.position());
        self.cache.checksum = Some(field);
        Ok(field)
    }

    fn checksum_end(&mut self) -> Result<usize, FrameError> {
        self.read_checksum()?;
        self.cache.checksum_end.ok_or(FrameError::ShortBuffer)
    }

    /// First argument (the method name) of a call request or response, as
    /// a zero-copy slice of the frame.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldUnavailable`] for other frame types or
    /// [`FrameError::ShortBuffer`] if truncated or absent.
    pub fn read_arg1(&mut self) -> Result<Bytes, FrameError> {
        if let Some(arg1) = &self.cache.arg1 {
            return Ok(arg1.clone());
        }
        if !self.kind().is_call() {
            return Err(self.unavailable("arg1"));
        }
        let start = self.checksum_end()?;
        let mut rdr = FieldReader::new(self.frame.as_bytes(), start);
        let res = rdr.len2_bytes();
        self.cache.record(&rdr);
        let arg1 = res?;
        self.cache.arg1 = Some(arg1.clone());
        Ok(arg1)
    }

    /// [`LazyFrame::read_arg1`] validated as UTF-8.
    ///
    /// # Errors
    /// As for [`LazyFrame::read_arg1`], plus [`FrameError::InvalidUtf8`].
    pub fn read_arg1_str(&mut self) -> Result<&str, FrameError> {
        self.read_arg1()?;
        let raw = self.cache.arg1.as_ref().ok_or(FrameError::ShortBuffer)?;
        utf8(raw, "arg1")
    }

    /// Poolable form of [`LazyFrame::read_arg1`].
    pub fn read_arg1_into(&mut self, out: &mut ReadResult<Bytes>) { out.set(self.read_arg1()); }
}

/// Walk a header block, returning the value of the last `key` entry.
fn find_header(rdr: &mut FieldReader<'_>, key: &[u8]) -> Result<Option<Bytes>, FrameError> {
    let count = rdr.u8()?;
    let mut found = None;
    for _ in 0..count {
        let name = rdr.len1_bytes()?;
        if name == key {
            found = Some(rdr.len1_bytes()?);
        } else {
            rdr.skip_len1()?;
        }
    }
    Ok(found)
}

fn skip_headers(rdr: &mut FieldReader<'_>) -> Result<(), FrameError> {
    let count = rdr.u8()?;
    for _ in 0..count {
        rdr.skip_len1()?;
        rdr.skip_len1()?;
    }
    Ok(())
}
