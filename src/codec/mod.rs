//! Frame envelope codec.
//!
//! Strict, single-pass encoding and decoding of every frame type, plus the
//! envelope field types shared with the lazy readers in [`crate::lazy`]. The
//! [`framed`] submodule adapts frames to Tokio's codec traits.

mod body;
mod envelope;
pub mod framed;

pub use self::{
    body::{
        CallContinue,
        CallRequest,
        CallResponse,
        Cancel,
        Claim,
        ErrorFrame,
        FrameBody,
        Init,
        decode_strict,
        verify_checksum,
    },
    envelope::{
        ARG_SCHEME_KEY,
        CALLER_NAME_KEY,
        CallFlags,
        ChecksumField,
        ErrorCode,
        ResponseCode,
        Tracing,
        TransportHeaders,
    },
    framed::FrameCodec,
};
