//! Wire-protocol core of a multiplexed RPC transport.
//!
//! Bytes from a duplex stream are split into length-prefixed frames by
//! [`framer::StreamFramer`]. Each frame can then be read field by field
//! through [`lazy::LazyFrame`], which memoises scan progress so routing on a
//! service name never decodes the rest of the frame, or decoded in one pass
//! by [`codec::FrameBody::decode`]. Argument bytes are protected by a
//! frame-declared [`checksum`].
//!
//! Around that core sit the fragmenter and assembler for calls larger than
//! one frame ([`fragment`]), per-connection decode selection ([`dispatch`]),
//! layered configuration ([`config`]) and an async read pump
//! ([`transport`]).

pub mod checksum;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod fragment;
pub mod frame;
pub mod framer;
pub mod inspect;
pub mod lazy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;
pub mod transport;
