//! Typed frame bodies and their strict encode/decode.

use bytes::{BufMut, Bytes};

use super::envelope::{
    CallFlags,
    ChecksumField,
    ErrorCode,
    FrameWriter,
    ResponseCode,
    Tracing,
    TransportHeaders,
};
use crate::{
    checksum::Checksum,
    frame::{
        FRAME_HEADER_LEN,
        FieldReader,
        Frame,
        FrameError,
        FrameHeader,
        FrameType,
        MAX_FRAME_SIZE,
    },
};

/// First frame of a call request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallRequest {
    /// Fragmentation and streaming flags.
    pub flags: CallFlags,
    /// Time to live in milliseconds.
    pub ttl: u32,
    /// Tracing span.
    pub tracing: Tracing,
    /// Target service name, at most 255 bytes.
    pub service: String,
    /// Transport headers.
    pub headers: TransportHeaders,
    /// Checksum descriptor.
    pub checksum: ChecksumField,
    /// Argument chunks carried by this frame.
    pub args: Vec<Bytes>,
}

/// First frame of a call response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallResponse {
    /// Fragmentation and streaming flags.
    pub flags: CallFlags,
    /// Response code.
    pub code: ResponseCode,
    /// Tracing span.
    pub tracing: Tracing,
    /// Transport headers.
    pub headers: TransportHeaders,
    /// Checksum descriptor.
    pub checksum: ChecksumField,
    /// Argument chunks carried by this frame.
    pub args: Vec<Bytes>,
}

/// Continuation of a fragmented call request or response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallContinue {
    /// Fragmentation and streaming flags.
    pub flags: CallFlags,
    /// Checksum descriptor.
    pub checksum: ChecksumField,
    /// Argument chunks; the first continues the previous frame's last
    /// argument.
    pub args: Vec<Bytes>,
}

/// Connection initialisation request or response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Init {
    /// Protocol version.
    pub version: u16,
    /// Init headers (`host_port`, `process_name` and so on).
    pub headers: TransportHeaders,
}

/// Cancellation of an in-flight call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cancel {
    /// Time to live in milliseconds.
    pub ttl: u32,
    /// Tracing span of the cancelled call.
    pub tracing: Tracing,
    /// Reason for cancelling.
    pub why: String,
}

/// Claim of a speculatively sent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Claim {
    /// Time to live in milliseconds.
    pub ttl: u32,
    /// Tracing span of the claimed call.
    pub tracing: Tracing,
}

/// Error frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Error code.
    pub code: ErrorCode,
    /// Tracing span of the failed call.
    pub tracing: Tracing,
    /// Human readable message.
    pub message: String,
}

/// Fully materialised frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    /// `0x01`
    InitRequest(Init),
    /// `0x02`
    InitResponse(Init),
    /// `0x03`
    CallRequest(CallRequest),
    /// `0x04`
    CallResponse(CallResponse),
    /// `0x13`
    CallRequestContinue(CallContinue),
    /// `0x14`
    CallResponseContinue(CallContinue),
    /// `0xc0`
    Cancel(Cancel),
    /// `0xc1`
    Claim(Claim),
    /// `0xd0`
    PingRequest,
    /// `0xd1`
    PingResponse,
    /// `0xff`
    Error(ErrorFrame),
}

impl FrameBody {
    /// Frame type this body encodes as.
    #[must_use]
    pub const fn kind(&self) -> FrameType {
        match self {
            Self::InitRequest(_) => FrameType::InitRequest,
            Self::InitResponse(_) => FrameType::InitResponse,
            Self::CallRequest(_) => FrameType::CallRequest,
            Self::CallResponse(_) => FrameType::CallResponse,
            Self::CallRequestContinue(_) => FrameType::CallRequestContinue,
            Self::CallResponseContinue(_) => FrameType::CallResponseContinue,
            Self::Cancel(_) => FrameType::Cancel,
            Self::Claim(_) => FrameType::Claim,
            Self::PingRequest => FrameType::PingRequest,
            Self::PingResponse => FrameType::PingResponse,
            Self::Error(_) => FrameType::Error,
        }
    }

    /// Call flags for call and continuation bodies.
    #[must_use]
    pub const fn call_flags(&self) -> Option<CallFlags> {
        match self {
            Self::CallRequest(c) => Some(c.flags),
            Self::CallResponse(c) => Some(c.flags),
            Self::CallRequestContinue(c) | Self::CallResponseContinue(c) => Some(c.flags),
            _ => None,
        }
    }

    /// Checksum descriptor for call and continuation bodies.
    #[must_use]
    pub const fn checksum(&self) -> Option<ChecksumField> {
        match self {
            Self::CallRequest(c) => Some(c.checksum),
            Self::CallResponse(c) => Some(c.checksum),
            Self::CallRequestContinue(c) | Self::CallResponseContinue(c) => Some(c.checksum),
            _ => None,
        }
    }

    /// Argument chunks for call and continuation bodies.
    #[must_use]
    pub fn args(&self) -> Option<&[Bytes]> {
        match self {
            Self::CallRequest(c) => Some(&c.args),
            Self::CallResponse(c) => Some(&c.args),
            Self::CallRequestContinue(c) | Self::CallResponseContinue(c) => Some(&c.args),
            _ => None,
        }
    }

    /// Decode every field of `frame`.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] for truncated fields,
    /// [`FrameError::TrailingBytes`] if the body is not consumed exactly,
    /// [`FrameError::UnknownFrameType`] for unrecognised types, and UTF-8 or
    /// checksum-tag errors from the individual fields.
    pub fn decode(frame: &Frame) -> Result<Self, FrameError> {
        let mut rdr = FieldReader::new(frame.as_bytes(), FRAME_HEADER_LEN);
        let body = match frame.kind() {
            FrameType::InitRequest => Self::InitRequest(decode_init(&mut rdr)?),
            FrameType::InitResponse => Self::InitResponse(decode_init(&mut rdr)?),
            FrameType::CallRequest => Self::CallRequest(CallRequest {
                flags: CallFlags::from_bits_retain(rdr.u8()?),
                ttl: rdr.u32()?,
                tracing: Tracing::read(&mut rdr)?,
                service: rdr.str1("service")?,
                headers: TransportHeaders::read_short(&mut rdr)?,
                checksum: ChecksumField::read(&mut rdr)?,
                args: decode_args(&mut rdr)?,
            }),
            FrameType::CallResponse => Self::CallResponse(CallResponse {
                flags: CallFlags::from_bits_retain(rdr.u8()?),
                code: ResponseCode::from(rdr.u8()?),
                tracing: Tracing::read(&mut rdr)?,
                headers: TransportHeaders::read_short(&mut rdr)?,
                checksum: ChecksumField::read(&mut rdr)?,
                args: decode_args(&mut rdr)?,
            }),
            FrameType::CallRequestContinue => Self::CallRequestContinue(decode_continue(&mut rdr)?),
            FrameType::CallResponseContinue => {
                Self::CallResponseContinue(decode_continue(&mut rdr)?)
            }
            FrameType::Cancel => Self::Cancel(Cancel {
                ttl: rdr.u32()?,
                tracing: Tracing::read(&mut rdr)?,
                why: rdr.str2("cancel reason")?,
            }),
            FrameType::Claim => Self::Claim(Claim {
                ttl: rdr.u32()?,
                tracing: Tracing::read(&mut rdr)?,
            }),
            FrameType::PingRequest => Self::PingRequest,
            FrameType::PingResponse => Self::PingResponse,
            FrameType::Error => Self::Error(ErrorFrame {
                code: ErrorCode::from(rdr.u8()?),
                tracing: Tracing::read(&mut rdr)?,
                message: rdr.str2("error message")?,
            }),
            FrameType::Other(code) => return Err(FrameError::UnknownFrameType(code)),
        };
        match rdr.remaining() {
            0 => Ok(body),
            extra => Err(FrameError::TrailingBytes(extra)),
        }
    }

    /// Encode as a complete frame with id `id`.
    ///
    /// For call and continuation bodies the checksum value is computed over
    /// this frame's argument chunks; the `value` held in the body's
    /// [`ChecksumField`] is ignored.
    ///
    /// # Errors
    /// Returns [`FrameError::FieldTooLong`] for oversized strings, headers or
    /// argument chunks, [`FrameError::FrameTooLarge`] if the frame exceeds
    /// 65535 bytes, and [`FrameError::UnsupportedChecksum`] for Farmhash.
    pub fn encode(&self, id: u32) -> Result<Bytes, FrameError> { self.encode_with_prior(id, 0) }

    /// Encode, resuming the checksum from the running value of the previous
    /// fragment of the same call.
    ///
    /// # Errors
    /// As for [`FrameBody::encode`].
    pub fn encode_with_prior(&self, id: u32, prior: u32) -> Result<Bytes, FrameError> {
        let mut out = FrameWriter::default();
        out.buf.put_bytes(0, FRAME_HEADER_LEN);
        match self {
            Self::InitRequest(init) | Self::InitResponse(init) => {
                out.buf.put_u16(init.version);
                out.put_long_headers(&init.headers)?;
            }
            Self::CallRequest(call) => {
                out.buf.put_u8(call.flags.bits());
                out.buf.put_u32(call.ttl);
                out.put_tracing(&call.tracing);
                out.put_len1("service", call.service.as_bytes())?;
                out.put_short_headers(&call.headers)?;
                encode_args(&mut out, &call.checksum, &call.args, prior)?;
            }
            Self::CallResponse(call) => {
                out.buf.put_u8(call.flags.bits());
                out.buf.put_u8(call.code.into());
                out.put_tracing(&call.tracing);
                out.put_short_headers(&call.headers)?;
                encode_args(&mut out, &call.checksum, &call.args, prior)?;
            }
            Self::CallRequestContinue(cont) | Self::CallResponseContinue(cont) => {
                out.buf.put_u8(cont.flags.bits());
                encode_args(&mut out, &cont.checksum, &cont.args, prior)?;
            }
            Self::Cancel(cancel) => {
                out.buf.put_u32(cancel.ttl);
                out.put_tracing(&cancel.tracing);
                out.put_len2("cancel reason", cancel.why.as_bytes())?;
            }
            Self::Claim(claim) => {
                out.buf.put_u32(claim.ttl);
                out.put_tracing(&claim.tracing);
            }
            Self::PingRequest | Self::PingResponse => {}
            Self::Error(err) => {
                out.buf.put_u8(err.code.into());
                out.put_tracing(&err.tracing);
                out.put_len2("error message", err.message.as_bytes())?;
            }
        }
        finish_frame(out, self.kind(), id)
    }

    /// Encode and wrap as a [`Frame`].
    ///
    /// # Errors
    /// As for [`FrameBody::encode`].
    pub fn to_frame(&self, id: u32) -> Result<Frame, FrameError> { Frame::new(self.encode(id)?) }
}

/// Strict decode that also verifies the checksum of a self-contained call.
///
/// Call frames with `MORE_FRAGMENTS` set carry a running value that can only
/// be checked once the call is reassembled, so they are returned unverified.
///
/// # Errors
/// Everything [`FrameBody::decode`] returns, plus
/// [`FrameError::ChecksumMismatch`] and [`FrameError::UnsupportedChecksum`].
pub fn decode_strict(frame: &Frame) -> Result<FrameBody, FrameError> {
    let body = FrameBody::decode(frame)?;
    if !frame.kind().is_call() {
        return Ok(body);
    }
    if let (Some(flags), Some(field), Some(args)) =
        (body.call_flags(), body.checksum(), body.args())
    {
        if !flags.has_more() {
            verify_checksum(field, 0, args)?;
        }
    }
    Ok(body)
}

/// Check `field` against the running checksum of `args` resumed from
/// `prior`.
///
/// # Errors
/// Returns [`FrameError::ChecksumMismatch`] when the values differ and
/// [`FrameError::UnsupportedChecksum`] for Farmhash.
pub fn verify_checksum(field: ChecksumField, prior: u32, args: &[Bytes]) -> Result<(), FrameError> {
    let mut csum = Checksum::resume(field.kind, prior)?;
    for arg in args {
        csum.update(arg);
    }
    let actual = csum.finish();
    if field.kind.verify(actual, field.value) {
        Ok(())
    } else {
        Err(FrameError::ChecksumMismatch {
            expected: field.value,
            actual,
        })
    }
}

fn decode_init(rdr: &mut FieldReader<'_>) -> Result<Init, FrameError> {
    Ok(Init {
        version: rdr.u16()?,
        headers: TransportHeaders::read_long(rdr)?,
    })
}

fn decode_continue(rdr: &mut FieldReader<'_>) -> Result<CallContinue, FrameError> {
    Ok(CallContinue {
        flags: CallFlags::from_bits_retain(rdr.u8()?),
        checksum: ChecksumField::read(rdr)?,
        args: decode_args(rdr)?,
    })
}

fn decode_args(rdr: &mut FieldReader<'_>) -> Result<Vec<Bytes>, FrameError> {
    let mut args = Vec::new();
    while rdr.remaining() > 0 {
        args.push(rdr.len2_bytes()?);
    }
    Ok(args)
}

fn encode_args(
    out: &mut FrameWriter,
    field: &ChecksumField,
    args: &[Bytes],
    prior: u32,
) -> Result<(), FrameError> {
    let mut csum = Checksum::resume(field.kind, prior)?;
    let slot = out.put_checksum_placeholder(field);
    for arg in args {
        out.put_len2("arg", arg)?;
        csum.update(arg);
    }
    if let Some(at) = slot {
        out.patch_u32(at, csum.finish())?;
    }
    Ok(())
}

fn finish_frame(mut out: FrameWriter, kind: FrameType, id: u32) -> Result<Bytes, FrameError> {
    let len = out.buf.len();
    let size = u16::try_from(len).map_err(|_| FrameError::FrameTooLarge {
        size: len,
        max: MAX_FRAME_SIZE,
    })?;
    let mut raw = [0u8; FRAME_HEADER_LEN];
    FrameHeader { size, kind, id }.write_bytes(&mut raw);
    out.buf
        .get_mut(..FRAME_HEADER_LEN)
        .ok_or(FrameError::ShortBuffer)?
        .copy_from_slice(&raw);
    Ok(out.buf.freeze())
}
