//! Diagnostic directory listing.
//!
//! Boot sequences use this after extraction to eyeball the seeded
//! filesystem; it is not required for correctness.

use std::io;
use std::path::Path;

use crate::vfs::{DirEntry, FileKind, Filesystem};

/// List the directory at `path`, sorted by name.
///
/// # Errors
///
/// Fails if the directory cannot be enumerated.
pub fn list_directory<F: Filesystem>(fs: &F, path: &Path) -> io::Result<Vec<DirEntry>> {
    let mut entries = fs.read_dir(path)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Write a one-line-per-entry listing of the directory at `path`.
///
/// Format: `name [kind] [size=N]`.
///
/// # Errors
///
/// Fails if the directory cannot be enumerated or the writer fails.
pub fn write_listing<F: Filesystem, W: io::Write>(
    fs: &F,
    path: &Path,
    out: &mut W,
) -> io::Result<()> {
    for entry in list_directory(fs, path)? {
        let kind = match entry.kind {
            FileKind::Directory => "directory",
            FileKind::Regular => "regular file",
            FileKind::Other => "other",
        };
        writeln!(
            out,
            "{} [{}] [size={}]",
            entry.name.to_string_lossy(),
            kind,
            entry.size
        )?;
    }
    Ok(())
}
