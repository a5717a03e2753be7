//! Lazy field readers agree with strict decoding.

use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;
use tchannel_wire::{
    checksum::ChecksumType,
    codec::{
        ARG_SCHEME_KEY,
        CALLER_NAME_KEY,
        CallFlags,
        CallRequest,
        CallResponse,
        ChecksumField,
        FrameBody,
        ResponseCode,
        Tracing,
        TransportHeaders,
        decode_strict,
    },
    frame::{Frame, FrameError},
    lazy::{LazyField, LazyFrame, ReadResult},
    test_helpers::call_request,
};

fn strict_request(frame: &Frame) -> CallRequest {
    match decode_strict(frame).expect("strict decode") {
        FrameBody::CallRequest(req) => req,
        other => panic!("expected call request, got {other:?}"),
    }
}

fn strict_response(frame: &Frame) -> CallResponse {
    match decode_strict(frame).expect("strict decode") {
        FrameBody::CallResponse(res) => res,
        other => panic!("expected call response, got {other:?}"),
    }
}

fn tracing_span() -> impl Strategy<Value = Tracing> {
    (any::<u64>(), any::<u64>(), any::<u64>(), any::<u8>()).prop_map(
        |(span_id, parent_id, trace_id, flags)| Tracing {
            span_id,
            parent_id,
            trace_id,
            flags,
        },
    )
}

fn checksum_kind() -> impl Strategy<Value = ChecksumType> {
    prop_oneof![
        Just(ChecksumType::None),
        Just(ChecksumType::Crc32),
        Just(ChecksumType::Crc32C),
    ]
}

proptest! {
    #[test]
    fn lazy_matches_strict(
        service in "[a-z][a-z0-9-]{0,40}",
        caller in proptest::option::of("[a-z]{1,12}"),
        method in proptest::collection::vec(any::<u8>(), 0..64),
        body in proptest::collection::vec(any::<u8>(), 0..512),
        kind in checksum_kind(),
        id in any::<u32>(),
    ) {
        let args: [&[u8]; 2] = [&method, &body];
        let raw = call_request(id, &service, caller.as_deref(), &args, kind).expect("encode");
        let frame = Frame::new(raw).expect("frame");
        let strict = strict_request(&frame);
        let mut lazy = LazyFrame::new(frame);

        prop_assert_eq!(lazy.id(), id);
        prop_assert_eq!(lazy.read_service_str().expect("service"), strict.service.as_str());
        prop_assert_eq!(
            lazy.read_caller_name_str().expect("caller"),
            strict.headers.get(CALLER_NAME_KEY)
        );
        prop_assert_eq!(lazy.read_checksum().expect("checksum"), strict.checksum);
        let arg1 = strict.args.first().cloned().expect("arg");
        prop_assert_eq!(lazy.read_arg1().expect("arg1"), arg1);
        prop_assert_eq!(lazy.read_headers().expect("headers"), &strict.headers);
        prop_assert_eq!(lazy.flags().expect("flags"), strict.flags);
        prop_assert_eq!(lazy.ttl().expect("ttl"), strict.ttl);
    }

    #[test]
    fn lazy_matches_strict_for_responses(
        code in any::<u8>(),
        tracing in tracing_span(),
        scheme in prop_oneof![Just("raw"), Just("json"), Just("thrift")],
        extra in proptest::collection::vec(("[a-z]{3,8}", "[ -~]{0,16}"), 0..4),
        method in proptest::collection::vec(any::<u8>(), 0..64),
        body in proptest::collection::vec(any::<u8>(), 0..512),
        kind in checksum_kind(),
        id in any::<u32>(),
    ) {
        let mut headers: TransportHeaders = extra.into_iter().collect();
        headers.insert(ARG_SCHEME_KEY, scheme);
        let raw = FrameBody::CallResponse(CallResponse {
            flags: CallFlags::empty(),
            code: ResponseCode::from(code),
            tracing,
            headers,
            checksum: ChecksumField::of(kind),
            args: vec![Bytes::from(method), Bytes::from(body)],
        })
        .encode(id)
        .expect("encode");
        let frame = Frame::new(raw).expect("frame");
        let strict = strict_response(&frame);
        let mut lazy = LazyFrame::new(frame);

        prop_assert_eq!(lazy.id(), id);
        prop_assert_eq!(lazy.code().expect("code"), strict.code);
        prop_assert_eq!(lazy.read_tracing().expect("tracing"), strict.tracing);
        prop_assert_eq!(lazy.flags().expect("flags"), strict.flags);
        prop_assert_eq!(lazy.read_headers().expect("headers"), &strict.headers);
        prop_assert_eq!(lazy.read_checksum().expect("checksum"), strict.checksum);
        let arg1 = strict.args.first().cloned().expect("arg");
        prop_assert_eq!(lazy.read_arg1().expect("arg1"), arg1);
        let no_ttl = matches!(lazy.ttl(), Err(FrameError::FieldUnavailable { .. }));
        prop_assert!(no_ttl);
    }

    #[test]
    fn repeated_reads_do_not_rescan(
        service in "[a-z]{1,20}",
        method in proptest::collection::vec(any::<u8>(), 0..32),
    ) {
        let raw = call_request(1, &service, Some("me"), &[&method], ChecksumType::Crc32)
            .expect("encode");
        let mut lazy = LazyFrame::new(Frame::new(raw).expect("frame"));
        lazy.read_arg1().expect("arg1");
        let scanned = lazy.scan_count();
        lazy.read_service_str().expect("service");
        lazy.read_caller_name_str().expect("caller");
        lazy.read_checksum().expect("checksum");
        lazy.read_arg1().expect("arg1");
        prop_assert_eq!(lazy.scan_count(), scanned);
    }

    #[test]
    fn any_argument_byte_flip_is_detected(
        body in proptest::collection::vec(any::<u8>(), 1..256),
        pick in any::<prop::sample::Index>(),
        bit in 0u8..8,
        kind in prop_oneof![Just(ChecksumType::Crc32), Just(ChecksumType::Crc32C)],
    ) {
        let raw = call_request(5, "svc", None, &[b"m", &body], kind).expect("encode");
        let mut bytes = raw.to_vec();
        let at = bytes.len() - body.len() + pick.index(body.len());
        if let Some(byte) = bytes.get_mut(at) {
            *byte ^= 1 << bit;
        }
        let frame = Frame::new(Bytes::from(bytes)).expect("frame");
        let mismatch = matches!(decode_strict(&frame), Err(FrameError::ChecksumMismatch { .. }));
        prop_assert!(mismatch);
        let mut lazy = LazyFrame::new(frame);
        prop_assert_eq!(lazy.read_service_str().expect("service"), "svc");
    }
}

#[rstest]
#[case(ChecksumType::None)]
#[case(ChecksumType::Crc32)]
#[case(ChecksumType::Crc32C)]
fn strict_round_trip(#[case] kind: ChecksumType) {
    let raw = call_request(8, "payments", Some("web"), &[b"charge", b"{\"amount\":3}"], kind)
        .expect("encode");
    let frame = Frame::new(raw.clone()).expect("frame");
    let body = decode_strict(&frame).expect("decode");
    assert_eq!(body.encode(8).expect("re-encode"), raw);
}

#[test]
fn poolable_readers_share_frame_storage() {
    let raw = call_request(2, "routing", None, &[b"resolve"], ChecksumType::Crc32).expect("encode");
    let base = raw.as_ptr() as usize;
    let end = base + raw.len();
    let mut lazy = LazyFrame::new(Frame::new(raw).expect("frame"));
    let mut slot = ReadResult::new();
    for _ in 0..3 {
        lazy.read_service_into(&mut slot);
        let service = slot.take().expect("ok").expect("value");
        assert_eq!(&service[..], b"routing");
        let at = service.as_ptr() as usize;
        assert!(at >= base && at < end);
    }
    lazy.read_arg1_into(&mut slot);
    assert_eq!(slot.take().expect("ok").as_deref(), Some(&b"resolve"[..]));
}

#[test]
fn reset_forces_rescan_from_field() {
    let raw = call_request(3, "svc", Some("a"), &[b"m"], ChecksumType::Crc32).expect("encode");
    let mut lazy = LazyFrame::new(Frame::new(raw).expect("frame"));
    lazy.read_arg1().expect("arg1");
    let warm = lazy.scan_count();
    lazy.reset_field(LazyField::Checksum);
    lazy.read_arg1().expect("arg1");
    assert!(lazy.scan_count() > warm);
    assert_eq!(lazy.read_service_str().expect("service"), "svc");
}
