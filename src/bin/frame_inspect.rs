//! Binary entry point for the capture inspector.
//!
//! The logic lives in `tchannel_wire::inspect`; this binary only delegates.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> { tchannel_wire::inspect::run().await }
