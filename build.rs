//! Build script that renders the `block-csi(1)` man page.
//!
//! The page is generated from the same clap tree the binary parses, so flag
//! documentation cannot drift from behaviour. It lands in `OUT_DIR` for
//! packaging to pick up.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_PAGE: &str = "block-csi.1";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let mut page = Vec::new();
    Man::new(cli::Cli::command()).render(&mut page)?;
    fs::write(out_dir.join(MAN_PAGE), page)?;

    Ok(())
}
