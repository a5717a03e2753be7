//! Checksums over call argument bytes.
//!
//! A call declares its checksum type in every call and continuation frame.
//! The value is a running checksum: each frame resumes from the value carried
//! by the previous frame of the same call, so state can be fed fragment by
//! fragment without ever holding the whole argument sequence.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::frame::FrameError;

/// Checksum algorithm declared by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumType {
    /// No checksum; no value is carried on the wire.
    None,
    /// CRC-32 (IEEE).
    #[default]
    Crc32,
    /// Farmhash `Fingerprint32`. Recognised on the wire but not computable.
    Farmhash32,
    /// CRC-32C (Castagnoli).
    Crc32C,
}

impl ChecksumType {
    /// Wire tag for this checksum type.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Crc32 => 0x01,
            Self::Farmhash32 => 0x02,
            Self::Crc32C => 0x03,
        }
    }

    /// Look up a checksum type by wire tag.
    ///
    /// # Errors
    /// Returns [`FrameError::UnknownChecksumType`] for undefined tags.
    pub const fn from_code(code: u8) -> Result<Self, FrameError> {
        match code {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Crc32),
            0x02 => Ok(Self::Farmhash32),
            0x03 => Ok(Self::Crc32C),
            other => Err(FrameError::UnknownChecksumType(other)),
        }
    }

    /// Number of value bytes following the tag on the wire.
    #[must_use]
    pub const fn value_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 | Self::Farmhash32 | Self::Crc32C => 4,
        }
    }

    /// Compare a computed value with the one carried on the wire.
    ///
    /// [`ChecksumType::None`] always verifies.
    #[must_use]
    pub const fn verify(self, value: u32, expected: u32) -> bool {
        matches!(self, Self::None) || value == expected
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    None,
    Crc32(u32),
    Crc32C(u32),
}

/// Incremental checksum state.
#[derive(Debug, Clone, Copy)]
pub struct Checksum {
    kind: ChecksumType,
    state: State,
}

impl Checksum {
    /// Start a fresh checksum.
    ///
    /// # Errors
    /// Returns [`FrameError::UnsupportedChecksum`] for
    /// [`ChecksumType::Farmhash32`].
    pub fn start(kind: ChecksumType) -> Result<Self, FrameError> { Self::resume(kind, 0) }

    /// Resume from the running value carried by a previous fragment.
    ///
    /// # Errors
    /// Returns [`FrameError::UnsupportedChecksum`] for
    /// [`ChecksumType::Farmhash32`].
    pub fn resume(kind: ChecksumType, prior: u32) -> Result<Self, FrameError> {
        let state = match kind {
            ChecksumType::None => State::None,
            ChecksumType::Crc32 => State::Crc32(prior),
            ChecksumType::Crc32C => State::Crc32C(prior),
            ChecksumType::Farmhash32 => {
                return Err(FrameError::UnsupportedChecksum(kind.code()));
            }
        };
        Ok(Self { kind, state })
    }

    /// Algorithm in use.
    #[must_use]
    pub const fn kind(&self) -> ChecksumType { self.kind }

    /// Feed one argument chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.state {
            State::None => {}
            State::Crc32(crc) => {
                let mut hasher = Hasher::new_with_initial(*crc);
                hasher.update(chunk);
                *crc = hasher.finalize();
            }
            State::Crc32C(crc) => *crc = crc32c_append(*crc, chunk),
        }
    }

    /// Current value. The state stays usable for further updates.
    #[must_use]
    pub fn finish(&self) -> u32 {
        match self.state {
            State::None => 0,
            State::Crc32(crc) | State::Crc32C(crc) => crc,
        }
    }
}

const CRC32C_POLY: u32 = 0x82F6_3B78;

#[expect(
    clippy::cast_possible_truncation,
    clippy::indexing_slicing,
    reason = "loop index stays below 256"
)]
const fn crc32c_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ CRC32C_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32C_TABLE: [u32; 256] = crc32c_table();

#[expect(clippy::indexing_slicing, reason = "index is masked to 0..=255")]
fn crc32c_append(prior: u32, data: &[u8]) -> u32 {
    let mut crc = !prior;
    for &byte in data {
        crc = CRC32C_TABLE[((crc ^ u32::from(byte)) & 0xff) as usize] ^ (crc >> 8);
    }
    !crc
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn checksum_of(kind: ChecksumType, chunks: &[&[u8]]) -> u32 {
        let mut csum = Checksum::start(kind).expect("supported");
        for chunk in chunks {
            csum.update(chunk);
        }
        csum.finish()
    }

    #[rstest]
    #[case::crc32(ChecksumType::Crc32, 0xCBF4_3926)]
    #[case::crc32c(ChecksumType::Crc32C, 0xE306_9283)]
    #[case::none(ChecksumType::None, 0)]
    fn matches_reference_check_values(#[case] kind: ChecksumType, #[case] expected: u32) {
        assert_eq!(checksum_of(kind, &[b"123456789"]), expected);
    }

    #[rstest]
    #[case(0x00, ChecksumType::None, 0)]
    #[case(0x01, ChecksumType::Crc32, 4)]
    #[case(0x02, ChecksumType::Farmhash32, 4)]
    #[case(0x03, ChecksumType::Crc32C, 4)]
    fn tags_and_widths(#[case] code: u8, #[case] kind: ChecksumType, #[case] width: usize) {
        assert_eq!(ChecksumType::from_code(code).expect("known"), kind);
        assert_eq!(kind.code(), code);
        assert_eq!(kind.value_len(), width);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            ChecksumType::from_code(0x09),
            Err(FrameError::UnknownChecksumType(0x09))
        ));
    }

    #[test]
    fn farmhash_is_not_computable() {
        assert!(matches!(
            Checksum::start(ChecksumType::Farmhash32),
            Err(FrameError::UnsupportedChecksum(0x02))
        ));
    }

    #[test]
    fn none_always_verifies() {
        assert!(ChecksumType::None.verify(1, 2));
        assert!(ChecksumType::Crc32.verify(5, 5));
        assert!(!ChecksumType::Crc32C.verify(5, 6));
    }

    #[test]
    fn finish_does_not_consume_state() {
        let mut csum = Checksum::start(ChecksumType::Crc32).expect("crc32");
        csum.update(b"1234");
        assert_eq!(csum.finish(), 0x9BE3_E0A3);
        csum.update(b"56789");
        assert_eq!(csum.finish(), 0xCBF4_3926);
    }

    proptest! {
        #[test]
        fn resuming_equals_single_pass(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            split in any::<prop::sample::Index>(),
            kind in prop_oneof![Just(ChecksumType::Crc32), Just(ChecksumType::Crc32C)],
        ) {
            let at = split.index(data.len() + 1);
            let (head, tail) = data.split_at(at);
            let prior = checksum_of(kind, &[head]);
            let mut resumed = Checksum::resume(kind, prior).expect("supported");
            resumed.update(tail);
            prop_assert_eq!(resumed.finish(), checksum_of(kind, &[&data]));
        }
    }
}
