//! Shared builders for unit, integration and fuzz tests.
//!
//! Available to the crate's own tests and, with the `test-support` feature,
//! to the `tests/` suites.

pub mod tracing;

use bytes::Bytes;

use crate::{
    checksum::ChecksumType,
    codec::{CALLER_NAME_KEY, CallRequest, CallResponse, ChecksumField, FrameBody, TransportHeaders},
    frame::FrameError,
    framer::{FrameBytes, StreamFramer},
};

/// Encode a self-contained call request.
///
/// # Errors
/// Propagates encoder errors such as an over-long service name.
pub fn call_request(
    id: u32,
    service: &str,
    caller: Option<&str>,
    args: &[&[u8]],
    checksum: ChecksumType,
) -> Result<Bytes, FrameError> {
    let mut headers = TransportHeaders::new();
    if let Some(name) = caller {
        headers.insert(CALLER_NAME_KEY, name);
    }
    FrameBody::CallRequest(CallRequest {
        ttl: 1000,
        service: service.to_owned(),
        headers,
        checksum: ChecksumField::of(checksum),
        args: args.iter().map(|arg| Bytes::copy_from_slice(arg)).collect(),
        ..CallRequest::default()
    })
    .encode(id)
}

/// Encode a self-contained successful call response.
///
/// # Errors
/// Propagates encoder errors.
pub fn call_response(
    id: u32,
    args: &[&[u8]],
    checksum: ChecksumType,
) -> Result<Bytes, FrameError> {
    FrameBody::CallResponse(CallResponse {
        checksum: ChecksumField::of(checksum),
        args: args.iter().map(|arg| Bytes::copy_from_slice(arg)).collect(),
        ..CallResponse::default()
    })
    .encode(id)
}

/// Encode a ping request.
///
/// # Errors
/// Never fails in practice; the signature matches the other builders.
pub fn ping(id: u32) -> Result<Bytes, FrameError> { FrameBody::PingRequest.encode(id) }

/// Cut `stream` into chunks whose sizes cycle through `sizes`.
///
/// Zero sizes are treated as one so every chunk is non-empty.
#[must_use]
pub fn chunk_cyclic(stream: &Bytes, sizes: &[usize]) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    let mut at = 0;
    let mut cycle = sizes.iter().copied().cycle();
    while at < stream.len() {
        let step = cycle.next().unwrap_or(stream.len()).max(1);
        let end = at.saturating_add(step).min(stream.len());
        chunks.push(stream.slice(at..end));
        at = end;
    }
    chunks
}

/// Run `chunks` through a fresh collecting framer.
///
/// # Errors
/// Returns the first framer error.
pub fn collect_frames<I>(chunks: I) -> Result<Vec<FrameBytes>, FrameError>
where
    I: IntoIterator<Item = Bytes>,
{
    let mut framer = StreamFramer::new((), Vec::new());
    for chunk in chunks {
        framer.write(chunk)?;
    }
    Ok(framer.into_sink())
}
