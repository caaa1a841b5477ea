//! Command-line front end for the archive extractor.
//!
//! `seedctl` reads an archive file into memory and extracts it into a
//! target directory, the same way a boot sequence would seed a freshly
//! created filesystem. Mostly useful for preparing and inspecting seed
//! images from a development machine.

use std::fs::create_dir_all;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use bootseed::listing::write_listing;
use bootseed::vfs::HostFs;

/// Extract an in-memory ustar archive into a directory
#[derive(Debug, Parser)]
#[clap(name = "seedctl", version)]
struct App {
    /// Archive file to extract
    archive: PathBuf,

    /// Directory to extract into (created if missing)
    target: PathBuf,

    /// Print a listing of the target directory afterwards
    #[clap(long)]
    list: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let app = App::parse();

    let buffer = std::fs::read(&app.archive)
        .with_context(|| format!("reading archive {:?}", app.archive))?;

    create_dir_all(&app.target)
        .with_context(|| format!("creating target directory {:?}", app.target))?;
    let mut fs = HostFs::open(&app.target)?;

    bootseed::extract(&buffer, &mut fs)
        .with_context(|| format!("extracting {:?}", app.archive))?;

    if app.list {
        let mut stdout = std::io::stdout().lock();
        write_listing(&fs, Path::new("."), &mut stdout)?;
        stdout.flush()?;
    }

    Ok(())
}
