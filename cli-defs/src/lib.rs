//! Shared CLI type definitions for the `frame-inspect` binary.
//!
//! Kept in a separate crate so `build.rs` can render the man page without
//! pulling in the runtime library.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// How inbound frames are decoded.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModeArg {
    /// Read fields on demand.
    Lazy,
    /// Decode and verify every field.
    Strict,
}

/// Output format for frame summaries.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatArg {
    /// One human readable line per frame.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Decode a captured TChannel byte stream and print one summary per frame.
#[derive(Parser, Serialize, Debug, Clone)]
#[command(name = "frame-inspect", version, about)]
pub struct Cli {
    /// Capture file holding the raw byte stream.
    pub input: PathBuf,
    /// TOML configuration file.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
    /// Bytes fed to the framer per write.
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Decode strategy.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
    /// Reject frames larger than this many bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,
    /// Reassemble fragmented calls and report them once complete.
    #[arg(long)]
    pub assemble: bool,
    /// Output format.
    #[arg(long, value_enum, default_value_t)]
    pub format: FormatArg,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    #[test]
    fn command_is_well_formed() { Cli::command().debug_assert(); }

    #[rstest]
    fn parses_overrides() {
        let cli = Cli::try_parse_from([
            "frame-inspect",
            "capture.bin",
            "--chunk-size",
            "7",
            "--mode",
            "lazy",
            "--format",
            "json",
            "--assemble",
        ])
        .expect("parse");
        assert_eq!(cli.input, PathBuf::from("capture.bin"));
        assert_eq!(cli.chunk_size, Some(7));
        assert_eq!(cli.mode, Some(ModeArg::Lazy));
        assert_eq!(cli.format, FormatArg::Json);
        assert!(cli.assemble);
        assert!(cli.config.is_none());
    }

    #[rstest]
    #[case(&["frame-inspect"])]
    #[case(&["frame-inspect", "x", "--mode", "eager"])]
    fn rejects_bad_invocations(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_err());
    }
}
