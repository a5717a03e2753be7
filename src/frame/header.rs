//! Fixed 16-byte frame header shared by every frame type.

#![expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]

use super::{FRAME_HEADER_LEN, FrameError};

/// Frame type codes carried at offset 2 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Connection initialisation request.
    InitRequest,
    /// Connection initialisation response.
    InitResponse,
    /// First frame of an outbound call.
    CallRequest,
    /// First frame of a call response.
    CallResponse,
    /// Continuation of a fragmented call request.
    CallRequestContinue,
    /// Continuation of a fragmented call response.
    CallResponseContinue,
    /// Cancellation of an in-flight call.
    Cancel,
    /// Claim of a speculatively sent call.
    Claim,
    /// Liveness probe.
    PingRequest,
    /// Reply to a liveness probe.
    PingResponse,
    /// Protocol or call level error.
    Error,
    /// Any type code not defined above.
    Other(u8),
}

impl FrameType {
    /// Whether the frame opens a call (request or response).
    #[must_use]
    pub const fn is_call(self) -> bool { matches!(self, Self::CallRequest | Self::CallResponse) }

    /// Whether the frame continues a fragmented call.
    #[must_use]
    pub const fn is_continuation(self) -> bool {
        matches!(self, Self::CallRequestContinue | Self::CallResponseContinue)
    }

    /// Continuation type matching a call frame type, if any.
    #[must_use]
    pub const fn continuation(self) -> Option<Self> {
        match self {
            Self::CallRequest | Self::CallRequestContinue => Some(Self::CallRequestContinue),
            Self::CallResponse | Self::CallResponseContinue => Some(Self::CallResponseContinue),
            _ => None,
        }
    }
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x01 => Self::InitRequest,
            0x02 => Self::InitResponse,
            0x03 => Self::CallRequest,
            0x04 => Self::CallResponse,
            0x13 => Self::CallRequestContinue,
            0x14 => Self::CallResponseContinue,
            0xc0 => Self::Cancel,
            0xc1 => Self::Claim,
            0xd0 => Self::PingRequest,
            0xd1 => Self::PingResponse,
            0xff => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(t: FrameType) -> Self {
        match t {
            FrameType::InitRequest => 0x01,
            FrameType::InitResponse => 0x02,
            FrameType::CallRequest => 0x03,
            FrameType::CallResponse => 0x04,
            FrameType::CallRequestContinue => 0x13,
            FrameType::CallResponseContinue => 0x14,
            FrameType::Cancel => 0xc0,
            FrameType::Claim => 0xc1,
            FrameType::PingRequest => 0xd0,
            FrameType::PingResponse => 0xd1,
            FrameType::Error => 0xff,
            FrameType::Other(v) => v,
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitRequest => f.write_str("InitRequest"),
            Self::InitResponse => f.write_str("InitResponse"),
            Self::CallRequest => f.write_str("CallRequest"),
            Self::CallResponse => f.write_str("CallResponse"),
            Self::CallRequestContinue => f.write_str("CallRequestContinue"),
            Self::CallResponseContinue => f.write_str("CallResponseContinue"),
            Self::Cancel => f.write_str("Cancel"),
            Self::Claim => f.write_str("Claim"),
            Self::PingRequest => f.write_str("PingRequest"),
            Self::PingResponse => f.write_str("PingResponse"),
            Self::Error => f.write_str("Error"),
            Self::Other(v) => write!(f, "Other({v:#04x})"),
        }
    }
}

/// Parsed frame header.
///
/// | Field    | Offset | Size | Description                              |
/// |----------|--------|------|------------------------------------------|
/// | size     | 0      | 2    | Total frame length including the header  |
/// | type     | 2      | 1    | [`FrameType`] code                       |
/// | reserved | 3      | 1    | Zero                                     |
/// | id       | 4      | 4    | Frame id shared by continuation frames   |
/// | reserved | 8      | 8    | Zero                                     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total size of the frame in bytes, header included.
    pub size: u16,
    /// Frame type.
    pub kind: FrameType,
    /// Correlation id.
    pub id: u32,
}

impl FrameHeader {
    /// Parse a frame header from a 16-byte buffer.
    #[must_use = "use the returned header"]
    pub fn from_bytes(buf: &[u8; FRAME_HEADER_LEN]) -> Self {
        let [s0, s1, ty, _, i0, i1, i2, i3, ..] = *buf;
        Self {
            size: u16::from_be_bytes([s0, s1]),
            kind: FrameType::from(ty),
            id: u32::from_be_bytes([i0, i1, i2, i3]),
        }
    }

    /// Write the header to a 16-byte buffer, zeroing the reserved bytes.
    pub fn write_bytes(&self, buf: &mut [u8; FRAME_HEADER_LEN]) {
        let [s0, s1] = self.size.to_be_bytes();
        let [i0, i1, i2, i3] = self.id.to_be_bytes();
        *buf = [s0, s1, self.kind.into(), 0, i0, i1, i2, i3, 0, 0, 0, 0, 0, 0, 0, 0];
    }

    /// Parse a frame header from the front of a byte slice.
    ///
    /// # Errors
    /// Returns [`FrameError::ShortBuffer`] if fewer than 16 bytes are present.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        let hdr: &[u8; FRAME_HEADER_LEN] = buf
            .get(..FRAME_HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(FrameError::ShortBuffer)?;
        Ok(Self::from_bytes(hdr))
    }
}
