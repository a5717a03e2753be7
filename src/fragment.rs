//! Splitting calls across continuation frames and joining them back.
//!
//! A call whose arguments do not fit in one frame is sent as a call frame
//! followed by continuation frames sharing its id. Every frame except the
//! last sets [`CallFlags::MORE_FRAGMENTS`]. Within a frame each chunk is one
//! argument, except that the first chunk of a continuation frame extends the
//! last argument of the frame before it. When an argument ends exactly at a
//! frame boundary the next frame opens with an empty chunk.
//!
//! Each frame carries the running checksum through the end of its own
//! chunks; only the terminal frame's value is checked.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::{
    checksum::{Checksum, ChecksumType},
    codec::{
        CallContinue,
        CallFlags,
        CallRequest,
        CallResponse,
        ChecksumField,
        FrameBody,
        ResponseCode,
        Tracing,
        TransportHeaders,
    },
    config::WireConfig,
    frame::{Frame, FrameError, FrameType, LENGTH_PREFIX_LEN, MAX_FRAME_SIZE},
};

/// Envelope of the opening frame of a call, without its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallHead {
    /// A call request.
    Request {
        /// Time to live in milliseconds.
        ttl: u32,
        /// Tracing span.
        tracing: Tracing,
        /// Target service.
        service: String,
        /// Transport headers.
        headers: TransportHeaders,
    },
    /// A call response.
    Response {
        /// Response code.
        code: ResponseCode,
        /// Tracing span.
        tracing: Tracing,
        /// Transport headers.
        headers: TransportHeaders,
    },
}

impl CallHead {
    /// Frame type of the opening frame.
    #[must_use]
    pub const fn kind(&self) -> FrameType {
        match self {
            Self::Request { .. } => FrameType::CallRequest,
            Self::Response { .. } => FrameType::CallResponse,
        }
    }

    fn body(&self, flags: CallFlags, checksum: ChecksumField, args: Vec<Bytes>) -> FrameBody {
        match self {
            Self::Request {
                ttl,
                tracing,
                service,
                headers,
            } => FrameBody::CallRequest(CallRequest {
                flags,
                ttl: *ttl,
                tracing: *tracing,
                service: service.clone(),
                headers: headers.clone(),
                checksum,
                args,
            }),
            Self::Response {
                code,
                tracing,
                headers,
            } => FrameBody::CallResponse(CallResponse {
                flags,
                code: *code,
                tracing: *tracing,
                headers: headers.clone(),
                checksum,
                args,
            }),
        }
    }

    fn continuation(
        &self,
        flags: CallFlags,
        checksum: ChecksumField,
        args: Vec<Bytes>,
    ) -> FrameBody {
        let cont = CallContinue {
            flags,
            checksum,
            args,
        };
        match self {
            Self::Request { .. } => FrameBody::CallRequestContinue(cont),
            Self::Response { .. } => FrameBody::CallResponseContinue(cont),
        }
    }
}

/// Splits a call's arguments into frames no larger than a size limit.
#[derive(Debug, Clone, Copy)]
pub struct CallFragmenter {
    max_frame_size: usize,
    checksum: ChecksumType,
}

impl Default for CallFragmenter {
    fn default() -> Self { Self::new(MAX_FRAME_SIZE) }
}

impl CallFragmenter {
    /// Fragmenter producing frames of at most `max_frame_size` bytes (capped
    /// at 65535), using CRC-32 checksums.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
            checksum: ChecksumType::Crc32,
        }
    }

    /// Fragmenter sized and checksummed per `config`.
    #[must_use]
    pub fn from_config(config: &WireConfig) -> Self {
        Self::new(config.max_frame_size).with_checksum(config.checksum)
    }

    /// Use `kind` for the call checksum.
    #[must_use]
    pub const fn with_checksum(mut self, kind: ChecksumType) -> Self {
        self.checksum = kind;
        self
    }

    /// Encode `head` and `args` as one or more frames with id `id`.
    ///
    /// # Errors
    /// Returns [`FrameError::FrameTooLarge`] when the envelope leaves no room
    /// for argument bytes, [`FrameError::UnsupportedChecksum`] for Farmhash,
    /// and any encode error of the envelope fields.
    pub fn fragment(
        &self,
        id: u32,
        head: &CallHead,
        args: &[Bytes],
    ) -> Result<Vec<Bytes>, FrameError> {
        let field = ChecksumField::of(self.checksum);
        let mut running = Checksum::start(self.checksum)?;
        let mut cursor = ArgCursor::default();
        let mut frames = Vec::new();
        loop {
            let first = frames.is_empty();
            let probe = if first {
                head.body(CallFlags::empty(), field, Vec::new())
            } else {
                head.continuation(CallFlags::empty(), field, Vec::new())
            };
            let overhead = probe.encode(id)?.len();
            let space = self.max_frame_size.saturating_sub(overhead);
            let before = cursor.position();
            let chunks = cursor.fill(args, space, !first);
            if cursor.position() == before && !cursor.is_done(args) {
                return Err(FrameError::FrameTooLarge {
                    size: overhead + LENGTH_PREFIX_LEN + 1,
                    max: self.max_frame_size,
                });
            }
            let more = !cursor.is_done(args);
            let flags = if more {
                CallFlags::MORE_FRAGMENTS
            } else {
                CallFlags::empty()
            };
            let prior = running.finish();
            for chunk in &chunks {
                running.update(chunk);
            }
            let body = if first {
                head.body(flags, field, chunks)
            } else {
                head.continuation(flags, field, chunks)
            };
            frames.push(body.encode_with_prior(id, prior)?);
            if !more {
                break;
            }
        }
        debug!(id, frames = frames.len(), "call fragmented");
        Ok(frames)
    }
}

/// Position within the argument list being fragmented.
#[derive(Debug, Default)]
struct ArgCursor {
    index: usize,
    offset: usize,
    /// The previous frame's last chunk completed its argument.
    at_boundary: bool,
}

impl ArgCursor {
    const fn is_done(&self, args: &[Bytes]) -> bool { self.index >= args.len() }

    const fn position(&self) -> (usize, usize) { (self.index, self.offset) }

    /// Take as many chunks as fit in `space` bytes of a frame.
    fn fill(&mut self, args: &[Bytes], mut space: usize, continuation: bool) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if continuation && self.at_boundary {
            if space < LENGTH_PREFIX_LEN {
                return chunks;
            }
            chunks.push(Bytes::new());
            space -= LENGTH_PREFIX_LEN;
        }
        while let Some(arg) = args.get(self.index) {
            let rest = arg.len() - self.offset;
            let room = space
                .saturating_sub(LENGTH_PREFIX_LEN)
                .min(usize::from(u16::MAX));
            if space < LENGTH_PREFIX_LEN || (room == 0 && rest > 0) {
                break;
            }
            let take = rest.min(room);
            chunks.push(arg.slice(self.offset..self.offset + take));
            space -= LENGTH_PREFIX_LEN + take;
            self.offset += take;
            if self.offset < arg.len() {
                self.at_boundary = false;
                return chunks;
            }
            self.index += 1;
            self.offset = 0;
            self.at_boundary = true;
        }
        chunks
    }
}

/// A call reassembled from its frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledCall {
    /// Frame id shared by every fragment.
    pub id: u32,
    /// Envelope of the opening frame.
    pub head: CallHead,
    /// Checksum declared by the call.
    pub checksum: ChecksumType,
    /// Complete arguments.
    pub args: Vec<Bytes>,
    /// Number of frames the call arrived in.
    pub frames: usize,
}

#[derive(Debug)]
struct PartialCall {
    head: CallHead,
    checksum: Checksum,
    pieces: Vec<Vec<Bytes>>,
    frames: usize,
}

impl PartialCall {
    fn extend(&mut self, args: Vec<Bytes>, continues_last: bool) {
        let mut iter = args.into_iter();
        if continues_last {
            if let Some(first) = iter.next() {
                self.checksum.update(&first);
                match self.pieces.last_mut() {
                    Some(last) => last.push(first),
                    None => self.pieces.push(vec![first]),
                }
            }
        }
        for arg in iter {
            self.checksum.update(&arg);
            self.pieces.push(vec![arg]);
        }
        self.frames += 1;
    }

    fn into_call(self, id: u32) -> AssembledCall {
        AssembledCall {
            id,
            checksum: self.checksum.kind(),
            head: self.head,
            args: self.pieces.into_iter().map(join).collect(),
            frames: self.frames,
        }
    }
}

fn join(pieces: Vec<Bytes>) -> Bytes {
    if pieces.len() == 1 {
        return pieces.into_iter().next().unwrap_or_default();
    }
    let total = pieces.iter().map(Bytes::len).sum();
    let mut out = BytesMut::with_capacity(total);
    for piece in &pieces {
        out.extend_from_slice(piece);
    }
    out.freeze()
}

/// Key of an in-flight call: the continuation type it expects and its id.
///
/// A response reuses its request's id, so the same id can be open once per
/// direction.
type CallKey = (FrameType, u32);

/// Reassembles fragmented calls, possibly interleaved, keyed by direction
/// and frame id.
#[derive(Debug, Default)]
pub struct CallAssembler {
    partial: HashMap<CallKey, PartialCall>,
}

impl CallAssembler {
    /// Empty assembler.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of calls still waiting for fragments.
    #[must_use]
    pub fn in_flight(&self) -> usize { self.partial.len() }

    /// Drop the partial call that a frame of type `kind` with id `id` belongs
    /// to, for example after a cancel frame. Returns whether one was pending.
    pub fn discard(&mut self, kind: FrameType, id: u32) -> bool {
        kind.continuation()
            .and_then(|cont| self.partial.remove(&(cont, id)))
            .is_some()
    }

    /// Feed one frame. Returns the call once its terminal frame arrives.
    ///
    /// # Errors
    /// Returns [`FrameError::UnexpectedFrame`] for a non-call frame, a call
    /// frame reusing an id already in flight in the same direction, a
    /// continuation with no open call in its direction, or a continuation
    /// switching checksum type; [`FrameError::ChecksumMismatch`] if the
    /// terminal value disagrees; and any strict decode error. On error the
    /// affected call is dropped.
    pub fn push(&mut self, frame: &Frame) -> Result<Option<AssembledCall>, FrameError> {
        let id = frame.id();
        let kind = frame.kind();
        let unexpected = FrameError::UnexpectedFrame { id, kind };
        match FrameBody::decode(frame)? {
            FrameBody::CallRequest(call) => {
                let head = CallHead::Request {
                    ttl: call.ttl,
                    tracing: call.tracing,
                    service: call.service,
                    headers: call.headers,
                };
                self.open(id, head, call.flags, call.checksum, call.args)
            }
            FrameBody::CallResponse(call) => {
                let head = CallHead::Response {
                    code: call.code,
                    tracing: call.tracing,
                    headers: call.headers,
                };
                self.open(id, head, call.flags, call.checksum, call.args)
            }
            FrameBody::CallRequestContinue(cont) | FrameBody::CallResponseContinue(cont) => {
                let key = (kind, id);
                let mut call = self.partial.remove(&key).ok_or(unexpected)?;
                if call.checksum.kind() != cont.checksum.kind {
                    return Err(FrameError::UnexpectedFrame { id, kind });
                }
                call.extend(cont.args, true);
                self.settle(key, call, cont.flags, cont.checksum)
            }
            _ => Err(unexpected),
        }
    }

    fn open(
        &mut self,
        id: u32,
        head: CallHead,
        flags: CallFlags,
        field: ChecksumField,
        args: Vec<Bytes>,
    ) -> Result<Option<AssembledCall>, FrameError> {
        let kind = head.kind();
        let Some(continuation) = kind.continuation() else {
            return Err(FrameError::UnexpectedFrame { id, kind });
        };
        let key = (continuation, id);
        if self.partial.remove(&key).is_some() {
            return Err(FrameError::UnexpectedFrame { id, kind });
        }
        let mut call = PartialCall {
            head,
            checksum: Checksum::start(field.kind)?,
            pieces: Vec::new(),
            frames: 0,
        };
        call.extend(args, false);
        self.settle(key, call, flags, field)
    }

    fn settle(
        &mut self,
        key: CallKey,
        call: PartialCall,
        flags: CallFlags,
        field: ChecksumField,
    ) -> Result<Option<AssembledCall>, FrameError> {
        let (_, id) = key;
        if flags.has_more() {
            self.partial.insert(key, call);
            return Ok(None);
        }
        let actual = call.checksum.finish();
        if !field.kind.verify(actual, field.value) {
            return Err(FrameError::ChecksumMismatch {
                expected: field.value,
                actual,
            });
        }
        debug!(id, frames = call.frames, "call assembled");
        Ok(Some(call.into_call(id)))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::lazy::LazyFrame;

    fn request_head() -> CallHead {
        CallHead::Request {
            ttl: 100,
            tracing: Tracing::default(),
            service: "blobstore".to_owned(),
            headers: [("as", "raw")].into_iter().collect(),
        }
    }

    fn assemble(frames: &[Bytes]) -> AssembledCall {
        let mut asm = CallAssembler::new();
        let mut done = None;
        for raw in frames {
            let frame = Frame::new(raw.clone()).expect("frame");
            if let Some(call) = asm.push(&frame).expect("push") {
                done = Some(call);
            }
        }
        assert_eq!(asm.in_flight(), 0);
        done.expect("assembled call")
    }

    #[test]
    fn small_call_is_one_frame() {
        let args = [Bytes::from_static(b"get"), Bytes::from_static(b"key")];
        let frames = CallFragmenter::default()
            .fragment(1, &request_head(), &args)
            .expect("fragment");
        assert_eq!(frames.len(), 1);
        let call = assemble(&frames);
        assert_eq!(call.args, args.to_vec());
        assert_eq!(call.frames, 1);
    }

    #[rstest]
    #[case(ChecksumType::None)]
    #[case(ChecksumType::Crc32)]
    #[case(ChecksumType::Crc32C)]
    fn large_argument_spans_frames(#[case] kind: ChecksumType) {
        let big: Bytes = (0..=250u8).cycle().take(5000).collect();
        let args = [Bytes::from_static(b"put"), Bytes::new(), big];
        let frames = CallFragmenter::new(512)
            .with_checksum(kind)
            .fragment(9, &request_head(), &args)
            .expect("fragment");
        assert!(frames.len() > 1);
        for (i, raw) in frames.iter().enumerate() {
            assert!(raw.len() <= 512);
            let lazy = LazyFrame::new(Frame::new(raw.clone()).expect("frame"));
            let more = lazy.flags().expect("flags").has_more();
            assert_eq!(more, i + 1 < frames.len());
        }
        let call = assemble(&frames);
        assert_eq!(call.args, args.to_vec());
        assert_eq!(call.checksum, kind);
    }

    #[test]
    fn argument_ending_on_frame_boundary_gets_empty_lead_chunk() {
        let head = request_head();
        let overhead = head
            .body(CallFlags::empty(), ChecksumField::of(ChecksumType::Crc32), Vec::new())
            .encode(1)
            .expect("encode")
            .len();
        // arg1 fills the first frame exactly.
        let arg1 = Bytes::from(vec![b'a'; 100]);
        let arg2 = Bytes::from_static(b"second");
        let frames = CallFragmenter::new(overhead + LENGTH_PREFIX_LEN + 100)
            .fragment(5, &head, &[arg1.clone(), arg2.clone()])
            .expect("fragment");
        assert_eq!(frames.len(), 2);
        let cont = Frame::new(frames.get(1).cloned().expect("continuation")).expect("frame");
        let FrameBody::CallRequestContinue(body) = FrameBody::decode(&cont).expect("decode") else {
            panic!("expected continuation");
        };
        assert_eq!(body.args, vec![Bytes::new(), arg2.clone()]);
        assert_eq!(assemble(&frames).args, vec![arg1, arg2]);
    }

    #[test]
    fn corrupted_fragment_fails_terminal_check() {
        let args = [Bytes::from(vec![7u8; 2000])];
        let frames = CallFragmenter::new(600)
            .fragment(2, &request_head(), &args)
            .expect("fragment");
        let mut asm = CallAssembler::new();
        let mut first = frames.first().expect("first").to_vec();
        let last = first.last_mut().expect("byte");
        *last ^= 0xff;
        let opening = Frame::new(Bytes::from(first)).expect("frame");
        assert!(asm.push(&opening).expect("open").is_none());
        let mut result = Ok(None);
        for raw in frames.iter().skip(1) {
            result = asm.push(&Frame::new(raw.clone()).expect("frame"));
        }
        assert!(matches!(result, Err(FrameError::ChecksumMismatch { .. })));
    }

    #[test]
    fn interleaved_calls_are_kept_apart() {
        let fragmenter = CallFragmenter::new(300);
        let a = fragmenter
            .fragment(1, &request_head(), &[Bytes::from(vec![1u8; 700])])
            .expect("a");
        let b = fragmenter
            .fragment(2, &request_head(), &[Bytes::from(vec![2u8; 700])])
            .expect("b");
        let mut asm = CallAssembler::new();
        let mut done = Vec::new();
        for (x, y) in a.iter().zip(&b) {
            for raw in [x, y] {
                let frame = Frame::new(raw.clone()).expect("frame");
                if let Some(call) = asm.push(&frame).expect("push") {
                    done.push(call);
                }
            }
        }
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|c| c.args.first().map(Bytes::len) == Some(700)));
    }

    #[test]
    fn continuation_without_call_is_unexpected() {
        let cont = FrameBody::CallRequestContinue(CallContinue::default())
            .to_frame(4)
            .expect("frame");
        let mut asm = CallAssembler::new();
        assert!(matches!(
            asm.push(&cont),
            Err(FrameError::UnexpectedFrame {
                id: 4,
                kind: FrameType::CallRequestContinue
            })
        ));
    }

    #[test]
    fn config_sets_limit_and_checksum() {
        let config = WireConfig {
            max_frame_size: 400,
            checksum: ChecksumType::Crc32C,
            ..WireConfig::default()
        };
        let args = [Bytes::from(vec![5u8; 1500])];
        let frames = CallFragmenter::from_config(&config)
            .fragment(3, &request_head(), &args)
            .expect("fragment");
        assert!(frames.len() > 3);
        assert!(frames.iter().all(|raw| raw.len() <= 400));
        let call = assemble(&frames);
        assert_eq!(call.checksum, ChecksumType::Crc32C);
        assert_eq!(call.args, args.to_vec());
    }

    #[test]
    fn request_and_response_sharing_an_id_stay_apart() {
        let request = CallFragmenter::new(300)
            .fragment(1, &request_head(), &[Bytes::from(vec![3u8; 700])])
            .expect("request");
        assert!(request.len() > 2);
        let response_head = CallHead::Response {
            code: ResponseCode::Ok,
            tracing: Tracing::default(),
            headers: TransportHeaders::default(),
        };
        let response = CallFragmenter::default()
            .fragment(1, &response_head, &[Bytes::from_static(b"pong")])
            .expect("response");
        let mut asm = CallAssembler::new();
        let (opening, rest) = request.split_first().expect("opening frame");
        assert!(asm.push(&Frame::new(opening.clone()).expect("frame")).expect("open").is_none());
        let reply = response.first().cloned().expect("response frame");
        let answered = asm
            .push(&Frame::new(reply).expect("frame"))
            .expect("response")
            .expect("single-frame response");
        assert_eq!(answered.head, response_head);
        assert_eq!(asm.in_flight(), 1);
        let mut done = None;
        for raw in rest {
            done = asm.push(&Frame::new(raw.clone()).expect("frame")).expect("continue");
        }
        let call = done.expect("request assembled");
        assert_eq!(call.head.kind(), FrameType::CallRequest);
        assert_eq!(call.args.first().map(Bytes::len), Some(700));
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn discard_only_drops_one_direction() {
        let request = CallFragmenter::new(300)
            .fragment(6, &request_head(), &[Bytes::from(vec![0u8; 700])])
            .expect("request");
        let mut asm = CallAssembler::new();
        let opening = Frame::new(request.first().cloned().expect("opening")).expect("frame");
        assert!(asm.push(&opening).expect("open").is_none());
        assert!(!asm.discard(FrameType::CallResponse, 6));
        assert!(asm.discard(FrameType::CallRequestContinue, 6));
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn envelope_too_large_for_limit() {
        let err = CallFragmenter::new(40)
            .fragment(1, &request_head(), &[Bytes::from_static(b"x")])
            .expect_err("no room");
        assert!(matches!(err, FrameError::FrameTooLarge { max: 40, .. }));
    }
}
