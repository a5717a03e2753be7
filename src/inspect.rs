//! Capture-file inspector behind the `frame-inspect` binary.
//!
//! The capture is read through [`FramePump`] in configurable chunk sizes,
//! split by the framer, decoded by the [`Dispatcher`] in the configured mode
//! and summarised one line per frame.

use std::{
    fmt,
    io::{self, BufWriter, Write},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use cli_defs::{Cli, FormatArg, ModeArg};
use serde::Serialize;
use tokio::fs::File;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::{
    checksum::ChecksumType,
    codec::{ARG_SCHEME_KEY, CALLER_NAME_KEY, CallFlags, FrameBody},
    config::{ConfigOverrides, WireConfig},
    dispatch::{DecodeMode, Dispatcher, Inbound, InboundHandler},
    fragment::{AssembledCall, CallAssembler},
    frame::{Frame, FrameError, FrameType},
    framer::StreamFramer,
    lazy::LazyFrame,
    transport::FramePump,
};

/// Parse the command line, install a subscriber and inspect the capture.
///
/// # Errors
/// Returns configuration, I/O and fatal framing errors.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let stats = inspect(&cli, io::stdout()).await?;
    info!(
        frames = stats.frames,
        rejected = stats.rejected,
        calls = stats.calls,
        "capture decoded"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .is_err()
    {
        debug!("tracing subscriber already installed");
    }
}

/// Map command-line flags onto configuration overrides.
#[must_use]
pub fn overrides(cli: &Cli) -> ConfigOverrides {
    ConfigOverrides {
        max_frame_size: cli.max_frame_size,
        decode_mode: cli.mode.map(|mode| match mode {
            ModeArg::Lazy => DecodeMode::Lazy,
            ModeArg::Strict => DecodeMode::Strict,
        }),
        read_chunk_size: cli.chunk_size,
    }
}

/// Inspect the capture named by `cli`, writing summaries to `out`.
///
/// # Errors
/// Returns configuration, I/O and fatal framing errors.
pub async fn inspect<W: Write>(cli: &Cli, out: W) -> Result<InspectStats> {
    let config = WireConfig::load_with(cli.config.as_deref(), &overrides(cli))?;
    debug!(?config, "configuration loaded");
    let file = File::open(&cli.input)
        .await
        .with_context(|| format!("opening {}", cli.input.display()))?;
    let inspector = Inspector::new(BufWriter::new(out), cli.format, cli.assemble);
    let mut framer = StreamFramer::new((), Dispatcher::from_config(&config, inspector));
    let mut pump = FramePump::from_config(file, &config);
    let outcome = pump.run(&mut framer).await;
    let stats = framer.into_sink().into_handler().finish()?;
    let bytes = outcome.with_context(|| format!("decoding {}", cli.input.display()))?;
    debug!(bytes, "capture consumed");
    Ok(stats)
}

/// Counters reported once a capture is consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InspectStats {
    /// Frames summarised.
    pub frames: usize,
    /// Frames rejected by strict decoding or reassembly.
    pub rejected: usize,
    /// Fragmented calls reassembled.
    pub calls: usize,
}

/// One line of inspector output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameSummary {
    /// Frame id.
    pub id: u32,
    /// Frame type name.
    pub kind: String,
    /// Total frame size.
    pub size: usize,
    /// Service of a call request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Caller name header of a call request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    /// Argument scheme header of a strictly decoded call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// First argument, lossily decoded as UTF-8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arg1: Option<String>,
    /// Declared checksum type of call frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumType>,
    /// Whether more fragments follow.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub more_fragments: bool,
    /// Field decode error or error-frame message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FrameSummary {
    fn lazy(lazy: &mut LazyFrame) -> Self {
        let mut summary = Self::header(lazy.id(), lazy.kind(), lazy.frame().size());
        if let Err(err) = summary.read_lazy(lazy) {
            summary.error = Some(err.to_string());
        }
        summary
    }

    fn strict(id: u32, size: usize, body: &FrameBody) -> Self {
        let mut summary = Self::header(id, body.kind(), size);
        summary.checksum = body.checksum().map(|field| field.kind);
        summary.more_fragments = body.call_flags().is_some_and(CallFlags::has_more);
        match body {
            FrameBody::CallRequest(req) => {
                summary.service = Some(req.service.clone());
                summary.caller = req.headers.get(CALLER_NAME_KEY).map(str::to_owned);
                summary.scheme = req.headers.get(ARG_SCHEME_KEY).map(str::to_owned);
            }
            FrameBody::CallResponse(res) => {
                summary.scheme = res.headers.get(ARG_SCHEME_KEY).map(str::to_owned);
            }
            FrameBody::Error(frame) => {
                summary.error = Some(format!("{:?}: {}", frame.code, frame.message));
            }
            _ => {}
        }
        if body.kind().is_call() {
            summary.arg1 = body.args().and_then(<[Bytes]>::first).map(|arg| lossy(arg));
        }
        summary
    }

    fn header(id: u32, kind: FrameType, size: usize) -> Self {
        Self {
            id,
            kind: kind.to_string(),
            size,
            ..Self::default()
        }
    }

    fn read_lazy(&mut self, lazy: &mut LazyFrame) -> Result<(), FrameError> {
        let kind = lazy.kind();
        if !kind.is_call() && !kind.is_continuation() {
            return Ok(());
        }
        self.more_fragments = lazy.flags()?.has_more();
        if kind == FrameType::CallRequest {
            self.service = Some(lazy.read_service_str()?.to_owned());
            self.caller = lazy.read_caller_name_str()?.map(str::to_owned);
        }
        self.checksum = Some(lazy.read_checksum()?.kind);
        if kind.is_call() {
            self.arg1 = Some(lossy(&lazy.read_arg1()?));
        }
        Ok(())
    }
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10} {:<22} {:>5}B", self.id, self.kind, self.size)?;
        if let Some(service) = &self.service {
            write!(f, " service={service}")?;
        }
        if let Some(caller) = &self.caller {
            write!(f, " caller={caller}")?;
        }
        if let Some(scheme) = &self.scheme {
            write!(f, " as={scheme}")?;
        }
        if let Some(arg1) = &self.arg1 {
            write!(f, " arg1={arg1:?}")?;
        }
        if let Some(checksum) = self.checksum {
            write!(f, " checksum={checksum:?}")?;
        }
        if self.more_fragments {
            f.write_str(" more")?;
        }
        if let Some(error) = &self.error {
            write!(f, " error={error}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Rejection {
    id: u32,
    rejected: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10} rejected: {}", self.id, self.rejected)
    }
}

#[derive(Debug, Serialize)]
struct CallSummary {
    call: u32,
    frames: usize,
    arg_lens: Vec<usize>,
}

impl From<&AssembledCall> for CallSummary {
    fn from(call: &AssembledCall) -> Self {
        Self {
            call: call.id,
            frames: call.frames,
            arg_lens: call.args.iter().map(Bytes::len).collect(),
        }
    }
}

impl fmt::Display for CallSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>10} call complete: {} frames, arg lengths {:?}",
            self.call, self.frames, self.arg_lens
        )
    }
}

/// Handler that prints a summary per inbound frame.
#[derive(Debug)]
pub struct Inspector<W: Write> {
    out: W,
    format: FormatArg,
    assembler: Option<CallAssembler>,
    stats: InspectStats,
}

impl<W: Write> Inspector<W> {
    /// Inspector writing to `out`, optionally reassembling fragmented calls.
    #[must_use]
    pub fn new(out: W, format: FormatArg, assemble: bool) -> Self {
        Self {
            out,
            format,
            assembler: assemble.then(CallAssembler::new),
            stats: InspectStats::default(),
        }
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> InspectStats { self.stats }

    /// Flush output and return the final counters.
    ///
    /// # Errors
    /// Returns the flush error.
    pub fn finish(mut self) -> io::Result<InspectStats> {
        self.out.flush()?;
        Ok(self.stats)
    }

    fn emit<T: Serialize + fmt::Display>(&mut self, item: &T) -> Result<(), FrameError> {
        match self.format {
            FormatArg::Text => writeln!(self.out, "{item}")?,
            FormatArg::Json => {
                serde_json::to_writer(&mut self.out, item).map_err(io::Error::from)?;
                writeln!(self.out)?;
            }
        }
        Ok(())
    }

    fn assemble(&mut self, inbound: &Inbound) -> Result<(), FrameError> {
        let Some(assembler) = self.assembler.as_mut() else {
            return Ok(());
        };
        let frame = inbound.frame();
        if !frame.kind().is_call() && !frame.kind().is_continuation() {
            return Ok(());
        }
        match assembler.push(frame) {
            Ok(Some(call)) => {
                self.stats.calls += 1;
                self.emit(&CallSummary::from(&call))
            }
            Ok(None) => Ok(()),
            Err(err) if !err.is_fatal() => {
                assembler.discard(frame.kind(), frame.id());
                self.stats.rejected += 1;
                self.emit(&Rejection {
                    id: frame.id(),
                    rejected: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

impl<C, W: Write> InboundHandler<C> for Inspector<W> {
    fn handle(&mut self, _context: &C, mut inbound: Inbound) -> Result<(), FrameError> {
        let summary = match &mut inbound {
            Inbound::Lazy(lazy) => FrameSummary::lazy(lazy),
            Inbound::Strict { frame, body } => FrameSummary::strict(frame.id(), frame.size(), body),
        };
        self.stats.frames += 1;
        self.emit(&summary)?;
        self.assemble(&inbound)
    }

    fn rejected(&mut self, _context: &C, frame: &Frame, err: FrameError) -> Result<(), FrameError> {
        self.stats.rejected += 1;
        if let Some(assembler) = self.assembler.as_mut() {
            assembler.discard(frame.kind(), frame.id());
        }
        self.emit(&Rejection {
            id: frame.id(),
            rejected: err.to_string(),
        })
    }
}

fn lossy(bytes: &[u8]) -> String { String::from_utf8_lossy(bytes).into_owned() }

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use figment::Jail;
    use rstest::rstest;

    use super::*;
    use crate::{
        fragment::{CallFragmenter, CallHead},
        test_helpers::{call_request, ping},
    };

    fn cli(input: &Path, mode: ModeArg, format: FormatArg, assemble: bool) -> Cli {
        Cli {
            input: input.to_path_buf(),
            config: None,
            chunk_size: Some(3),
            mode: Some(mode),
            max_frame_size: None,
            assemble,
            format,
        }
    }

    fn capture() -> Vec<u8> {
        let mut wire = ping(1).expect("ping").to_vec();
        wire.extend_from_slice(
            &call_request(2, "geo", Some("edge"), &[b"lookup", b"{}"], ChecksumType::Crc32)
                .expect("call"),
        );
        wire
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
    }

    fn run_inspect(cli_args: &Cli) -> (InspectStats, String) {
        let mut out = Vec::new();
        let stats = runtime().block_on(inspect(cli_args, &mut out)).expect("inspect");
        (stats, String::from_utf8(out).expect("utf8"))
    }

    #[rstest]
    #[case(ModeArg::Lazy)]
    #[case(ModeArg::Strict)]
    fn summarises_each_frame(#[case] mode: ModeArg) {
        Jail::expect_with(|j| {
            j.create_binary("capture.bin", &capture())?;
            let path = PathBuf::from("capture.bin");
            let (stats, text) = run_inspect(&cli(&path, mode, FormatArg::Text, false));
            assert_eq!(stats.frames, 2);
            let mut lines = text.lines();
            assert!(lines.next().expect("ping line").contains("PingRequest"));
            let call = lines.next().expect("call line");
            assert!(call.contains("service=geo"));
            assert!(call.contains("caller=edge"));
            assert!(call.contains("arg1=\"lookup\""));
            Ok(())
        });
    }

    #[test]
    fn json_lines_parse() {
        Jail::expect_with(|j| {
            j.create_binary("capture.bin", &capture())?;
            let path = PathBuf::from("capture.bin");
            let (_, text) = run_inspect(&cli(&path, ModeArg::Strict, FormatArg::Json, false));
            let rows: Vec<serde_json::Value> = text
                .lines()
                .map(|line| serde_json::from_str(line).expect("json"))
                .collect();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows.get(1).and_then(|r| r.get("service")), Some(&"geo".into()));
            assert_eq!(rows.get(1).and_then(|r| r.get("checksum")), Some(&"crc32".into()));
            Ok(())
        });
    }

    #[test]
    fn reassembles_fragmented_calls() {
        let head = CallHead::Request {
            ttl: 100,
            tracing: crate::codec::Tracing::default(),
            service: "bulk".to_owned(),
            headers: [(ARG_SCHEME_KEY, "raw")].into_iter().collect(),
        };
        let args = [
            Bytes::from_static(b"put"),
            Bytes::from_static(b""),
            Bytes::from(vec![9u8; 600]),
        ];
        let frames = CallFragmenter::new(256)
            .fragment(7, &head, &args)
            .expect("fragment");
        assert!(frames.len() > 2);
        let wire: Vec<u8> = frames.iter().flat_map(|f| f.iter().copied()).collect();
        Jail::expect_with(|j| {
            j.create_binary("capture.bin", &wire)?;
            let path = PathBuf::from("capture.bin");
            let (stats, text) = run_inspect(&cli(&path, ModeArg::Strict, FormatArg::Text, true));
            assert_eq!(stats.calls, 1);
            assert_eq!(stats.frames, frames.len());
            assert!(text.contains("call complete"));
            assert!(text.contains("[3, 0, 600]"));
            assert!(text.contains("service=bulk as=raw"));
            Ok(())
        });
    }

    #[test]
    fn corrupted_call_is_reported_not_fatal() {
        let mut wire = capture();
        if let Some(last) = wire.last_mut() {
            *last ^= 0x01;
        }
        Jail::expect_with(|j| {
            j.create_binary("capture.bin", &wire)?;
            let path = PathBuf::from("capture.bin");
            let (stats, text) = run_inspect(&cli(&path, ModeArg::Strict, FormatArg::Text, false));
            assert_eq!(stats.frames, 1);
            assert_eq!(stats.rejected, 1);
            assert!(text.contains("rejected: checksum mismatch"));
            Ok(())
        });
    }

    #[test]
    fn truncated_capture_fails() {
        let mut wire = capture();
        wire.truncate(wire.len() - 4);
        Jail::expect_with(|j| {
            j.create_binary("capture.bin", &wire)?;
            let cli_args = cli(Path::new("capture.bin"), ModeArg::Lazy, FormatArg::Text, false);
            let err = runtime()
                .block_on(inspect(&cli_args, Vec::new()))
                .expect_err("truncated");
            let frame_err = err.downcast_ref::<FrameError>().expect("frame error");
            assert!(matches!(frame_err, FrameError::TruncatedStream(_)));
            Ok(())
        });
    }

    #[test]
    fn mode_flag_maps_to_decode_mode() {
        let args = cli(Path::new("x"), ModeArg::Lazy, FormatArg::Text, false);
        assert_eq!(overrides(&args).decode_mode, Some(DecodeMode::Lazy));
        assert_eq!(overrides(&args).read_chunk_size, Some(3));
    }
}
