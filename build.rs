//! Build script for man page generation.
//!
//! Renders a man page for the `frame-inspect` binary using `clap_mangen`. The
//! CLI definitions come from the `cli-defs` crate so the build script does
//! not depend on the library itself.

use std::{env, fs, io, path::PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;
use cli_defs::Cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=cli-defs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            // Cargo does not set OUT_DIR for `cargo check` or IDE analysis runs.
            return Ok(());
        }
    };

    let man = Man::new(Cli::command());
    let mut file = fs::File::create(out_dir.join("frame-inspect.1"))?;
    man.render(&mut file)?;

    Ok(())
}
