//! Async reading of frames from Tokio streams.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tchannel_wire::{
    checksum::ChecksumType,
    codec::FrameCodec,
    config::WireConfig,
    dispatch::{DecodeMode, Dispatcher, Inbound},
    frame::FrameError,
    framer::StreamFramer,
    test_helpers::{call_request, chunk_cyclic, ping},
    transport::{FramePump, write_frames},
};
use tokio::io::{AsyncWriteExt, duplex};
use tokio_util::codec::FramedRead;

fn calls(count: u32) -> Vec<Bytes> {
    (0..count)
        .map(|id| {
            let service = format!("svc-{id}");
            call_request(id, &service, Some("pump"), &[b"ping"], ChecksumType::Crc32).expect("call")
        })
        .collect()
}

#[tokio::test]
async fn pump_routes_lazily_over_duplex() {
    let frames = calls(20);
    let (mut tx, rx) = duplex(256);
    let writer = tokio::spawn({
        let frames = frames.clone();
        async move {
            let stream: Bytes = frames.iter().flatten().copied().collect();
            for chunk in chunk_cyclic(&stream, &[5, 70, 33]) {
                tx.write_all(&chunk).await.expect("write");
            }
        }
    });
    let config = WireConfig {
        decode_mode: DecodeMode::Lazy,
        read_chunk_size: 64,
        ..WireConfig::default()
    };
    let mut framer = StreamFramer::new((), Dispatcher::from_config(&config, Vec::new()));
    let total = FramePump::from_config(rx, &config)
        .run(&mut framer)
        .await
        .expect("pump");
    writer.await.expect("writer");
    assert_eq!(total, frames.iter().map(Bytes::len).sum::<usize>());
    let services: Vec<String> = framer
        .into_sink()
        .into_handler()
        .into_iter()
        .map(|inbound| match inbound {
            Inbound::Lazy(mut lazy) => lazy.read_service_str().expect("service").to_owned(),
            Inbound::Strict { .. } => panic!("configured lazy"),
        })
        .collect();
    let expected: Vec<String> = (0..20).map(|id| format!("svc-{id}")).collect();
    assert_eq!(services, expected);
}

#[tokio::test]
async fn written_batch_decodes_with_codec() {
    let mut frames = calls(3);
    frames.push(ping(99).expect("ping"));
    let (mut tx, rx) = duplex(1024);
    write_frames(&mut tx, &frames, Some(Duration::from_secs(1)))
        .await
        .expect("write");
    drop(tx);
    let decoded: Vec<_> = FramedRead::new(rx, FrameCodec::new())
        .map(|res| res.expect("frame").id())
        .collect()
        .await;
    assert_eq!(decoded, vec![0, 1, 2, 99]);
}

#[tokio::test]
async fn codec_rejects_oversized_prefix() {
    let frame = calls(1).pop().expect("frame");
    let mut framed = FramedRead::new(&frame[..], FrameCodec::new().with_max_frame_size(32));
    let err = framed.next().await.expect("item").expect_err("too large");
    assert!(matches!(err, FrameError::FrameTooLarge { max: 32, .. }));
}
