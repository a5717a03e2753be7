//! AFL target driving the framer, lazy readers and strict decoder.
//!
//! The first input byte picks the chunk size; the rest is the byte stream.
//! Any panic is a finding. Decode errors are expected.

use bytes::Bytes;
use tchannel_wire::{
    codec::decode_strict,
    dispatch::{DecodeMode, Dispatcher, Inbound},
    fragment::CallAssembler,
    framer::StreamFramer,
    lazy::LazyFrame,
};

/// Number of successful reads out of the seven attempted.
fn exercise(lazy: &mut LazyFrame) -> usize {
    [
        lazy.read_service_str().is_ok(),
        lazy.read_caller_name_str().is_ok(),
        lazy.read_headers().is_ok(),
        lazy.read_checksum().is_ok(),
        lazy.read_arg1().is_ok(),
        lazy.read_tracing().is_ok(),
        decode_strict(lazy.frame()).is_ok(),
    ]
    .into_iter()
    .filter(|ok| *ok)
    .count()
}

fn run(data: &[u8]) {
    let Some((&first, rest)) = data.split_first() else {
        return;
    };
    let step = usize::from(first).max(1);
    let stream = Bytes::copy_from_slice(rest);
    let mut framer = StreamFramer::new((), Dispatcher::new(DecodeMode::Lazy, Vec::new()));
    let mut at = 0;
    while at < stream.len() {
        let end = at.saturating_add(step).min(stream.len());
        if framer.write(stream.slice(at..end)).is_err() {
            break;
        }
        at = end;
    }
    let mut assembler = CallAssembler::new();
    let inbound = framer.into_sink().into_handler();
    let frames = inbound.len();
    let mut successes = 0usize;
    for item in inbound {
        if let Inbound::Lazy(mut lazy) = item {
            successes += exercise(&mut lazy);
            if assembler.push(lazy.frame()).is_err() {
                assembler.discard(lazy.frame().kind(), lazy.id());
            }
        }
    }
    assert!(successes <= frames * 7);
}

fn main() { afl::fuzz!(|data: &[u8]| run(data)); }
