//! Single-pass extraction of an in-memory archive into a filesystem.
//!
//! The driver loop decodes one header block at a time, verifies its
//! checksum, and dispatches on the entry type. Content blocks are consumed
//! by the file materializer; every other entry type occupies the header
//! block alone. The cursor only ever moves forward, so even when an
//! individual entry cannot be materialized the stream stays aligned and
//! extraction can continue with the next header.
//!
//! Failure policy (see [`ExtractError`]): a checksum mismatch, an
//! unresolvable directory conflict, or a short write aborts the whole run.
//! A file that cannot be opened is the one recoverable case: the entry is
//! logged and skipped, its content blocks are stepped over, and the run
//! continues.

use std::ffi::OsStr;
use std::io::{self, Write as _};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

use crate::header::{EntryType, Header};
use crate::vfs::{FileKind, Filesystem};
use crate::BLOCK_SIZE;

/// Errors that abort an extraction run.
///
/// Each variant is a distinct terminal status for caller branching; a
/// successful run (including one ended by the end-of-archive marker) is
/// `Ok(())`.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A header's recomputed checksum did not match its stored value.
    ///
    /// This indicates stream corruption; nothing after the offending
    /// header is materialized.
    #[error("invalid header checksum at offset {offset}: stored {stored}, computed {computed}")]
    ChecksumInvalid {
        /// Byte offset of the header block within the archive buffer.
        offset: usize,
        /// The checksum decoded from the header.
        stored: u64,
        /// The checksum recomputed over the header bytes.
        computed: u64,
    },

    /// A directory could not be created and the conflict was unresolvable.
    #[error("failed to create directory {path:?}")]
    DirectoryCreateFailed {
        /// The directory the archive asked for.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: io::Error,
    },

    /// A content write failed or wrote fewer bytes than requested.
    ///
    /// A short write signals a full or failing storage device, which is
    /// not recoverable locally.
    #[error("failed writing {path:?}")]
    FileWriteFailed {
        /// The file being written when the failure occurred.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: io::Error,
    },
}

/// Forward-only, block-aligned position in the archive buffer.
///
/// The cursor starts every header read on a 512-byte boundary and never
/// moves backward. Content-block advances are clamped at the end of the
/// buffer so a truncated archive cannot push the position out of range.
#[derive(Debug)]
pub struct ArchiveCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ArchiveCursor<'a> {
    /// Create a cursor at the start of the buffer.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset from the start of the buffer.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes remaining past the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Yield the next 512-byte block and advance past it.
    ///
    /// Returns `None` when fewer than 512 bytes remain, which ends the
    /// run cleanly.
    pub fn take_block(&mut self) -> Option<&'a [u8; BLOCK_SIZE]> {
        let block = self.buf[self.pos..].first_chunk::<BLOCK_SIZE>()?;
        self.pos += BLOCK_SIZE;
        Some(block)
    }

    /// Advance past `n` content blocks without reading them.
    ///
    /// Clamped to the end of the buffer.
    pub fn skip_blocks(&mut self, n: u64) {
        let bytes = n.saturating_mul(BLOCK_SIZE as u64);
        let bytes = usize::try_from(bytes).unwrap_or(usize::MAX);
        self.pos = self.pos.saturating_add(bytes).min(self.buf.len());
    }
}

/// Extract every entry of the archive in `buffer` into `fs`.
///
/// Terminates successfully when fewer than 512 bytes remain or when a
/// block without the `ustar` magic token is reached (the end-of-archive
/// marker; producers pad the stream with zero blocks). Terminates with an
/// error on checksum mismatch, unresolvable directory conflict, or a
/// failed content write — see [`ExtractError`].
///
/// The call is synchronous and holds no locks; two concurrent calls
/// against the same destination must be serialized by the caller.
///
/// # Errors
///
/// Returns the first aborting failure encountered; entries before it have
/// already been materialized and are left in place.
pub fn extract<F: Filesystem>(buffer: &[u8], fs: &mut F) -> Result<(), ExtractError> {
    let mut cursor = ArchiveCursor::new(buffer);
    debug!("extracting archive: {} bytes", buffer.len());

    while let Some(block) = cursor.take_block() {
        let offset = cursor.position() - BLOCK_SIZE;
        let header = Header::from_block(block);

        if !header.has_magic() {
            // The end-of-archive marker. A nonzero block without magic at
            // offset zero means the buffer was never an archive at all;
            // that case still ends the run successfully, but loudly.
            if !header.is_empty() && offset == 0 {
                warn!("buffer does not look like a ustar archive");
            } else {
                debug!("end of archive at offset {offset}");
            }
            break;
        }

        if let Err(e) = header.verify_checksum() {
            return Err(ExtractError::ChecksumInvalid {
                offset,
                stored: e.stored,
                computed: e.computed,
            });
        }

        let path = entry_path(header.name());
        match header.entry_type() {
            EntryType::Directory => materialize_directory(fs, &path)?,
            EntryType::Regular => materialize_file(fs, &path, header.size(), &mut cursor)?,
            EntryType::Symlink => {
                // Parsed but deliberately never created: the target
                // filesystems have no link support.
                warn!(
                    "symbolic links are not supported, skipping {:?} -> {:?}",
                    path,
                    OsStr::from_bytes(header.link_target()),
                );
            }
            EntryType::Other(flag) => {
                // Non-regular entries carry no content blocks, so nothing
                // beyond the header needs to be skipped.
                warn!("unsupported entry type {flag:#04x}, skipping {path:?}");
            }
        }
    }

    Ok(())
}

/// Create a directory, tolerating pre-existing state.
///
/// Policy, in order: attempt creation; if the path already exists as a
/// directory, succeed (idempotent re-extraction); if it exists as
/// something else, remove it and retry once; any other failure aborts.
fn materialize_directory<F: Filesystem>(fs: &mut F, path: &Path) -> Result<(), ExtractError> {
    let fail = |source: io::Error| ExtractError::DirectoryCreateFailed {
        path: path.to_owned(),
        source,
    };

    match fs.make_dir(path) {
        Ok(()) => {
            debug!("created directory {path:?}");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match fs.stat(path) {
            Ok(FileKind::Directory) => {
                debug!("directory {path:?} already exists");
                Ok(())
            }
            Ok(_) => {
                debug!("replacing non-directory {path:?}");
                fs.remove(path).map_err(fail)?;
                fs.make_dir(path).map_err(fail)
            }
            Err(e) => Err(fail(e)),
        },
        Err(e) => Err(fail(e)),
    }
}

/// Create a file and stream its declared content blocks from the archive.
///
/// If the file cannot be opened the entry is skipped but the cursor is
/// still advanced past its content, preserving stream alignment; this is
/// the only per-entry failure that does not abort the run. A write that
/// returns less than the requested length aborts. The destination handle
/// is dropped (closed) on every path out of this function.
fn materialize_file<F: Filesystem>(
    fs: &mut F,
    path: &Path,
    size: u64,
    cursor: &mut ArchiveCursor<'_>,
) -> Result<(), ExtractError> {
    let nblocks = size.div_ceil(BLOCK_SIZE as u64);

    let mut file = match fs.create(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("cannot create {path:?}, skipping entry: {e}");
            cursor.skip_blocks(nblocks);
            return Ok(());
        }
    };

    let mut remaining = size;
    for _ in 0..nblocks {
        let Some(block) = cursor.take_block() else {
            warn!("archive truncated inside {path:?}");
            return Ok(());
        };
        // The final block is zero-padded; only the logical bytes reach
        // the destination.
        let len = usize::try_from(remaining.min(BLOCK_SIZE as u64)).expect("len <= 512");
        let written = file
            .write(&block[..len])
            .map_err(|source| ExtractError::FileWriteFailed {
                path: path.to_owned(),
                source,
            })?;
        if written != len {
            return Err(ExtractError::FileWriteFailed {
                path: path.to_owned(),
                source: io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("wrote {written} of {len} bytes"),
                ),
            });
        }
        remaining -= len as u64;
    }

    debug!("wrote {path:?} ({size} bytes)");
    Ok(())
}

/// Normalize an archive entry name into a destination-relative path.
///
/// Directory entries conventionally end in `/`; names may also carry a
/// leading `/` or `./`. All archive paths are interpreted relative to the
/// filesystem root handed to [`extract`].
fn entry_path(name: &[u8]) -> PathBuf {
    let name = name.strip_prefix(b"./").unwrap_or(name);
    let name = name.strip_prefix(b"/").unwrap_or(name);
    let name = name.strip_suffix(b"/").unwrap_or(name);
    PathBuf::from(OsStr::from_bytes(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{finish, pack_dir, pack_file, MemFs};

    fn archive(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = Vec::new();
        for part in parts {
            buf.extend_from_slice(part);
        }
        finish(&mut buf);
        buf
    }

    #[test]
    fn test_directory_then_file() {
        let buf = archive(&[pack_dir("data/"), pack_file("data/hello.txt", b"hi\n")]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        assert!(fs.is_dir("data"));
        assert_eq!(fs.file_content("data/hello.txt").unwrap(), b"hi\n");
    }

    #[test]
    fn test_empty_buffer() {
        let mut fs = MemFs::new();
        extract(&[], &mut fs).unwrap();
    }

    #[test]
    fn test_corrupted_checksum_aborts() {
        let mut buf = archive(&[pack_file("first.txt", b"one"), pack_file("second.txt", b"two")]);
        // Corrupt a name byte of the second header (at block 2: header,
        // content, header).
        buf[2 * BLOCK_SIZE] ^= 0x01;
        let mut fs = MemFs::new();

        let err = extract(&buf, &mut fs).unwrap_err();
        assert!(matches!(
            err,
            ExtractError::ChecksumInvalid { offset, .. } if offset == 2 * BLOCK_SIZE
        ));

        // Nothing after the corrupted entry is materialized.
        assert!(fs.file_content("first.txt").is_some());
        assert!(fs.file_content("second.txt").is_none());
        assert!(fs.file_content("tecond.txt").is_none());
    }

    #[test]
    fn test_directories_are_idempotent() {
        let buf = archive(&[pack_dir("a/"), pack_dir("a/b/"), pack_dir("c/")]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();
        extract(&buf, &mut fs).unwrap();

        assert!(fs.is_dir("a"));
        assert!(fs.is_dir("a/b"));
        assert!(fs.is_dir("c"));
    }

    #[test]
    fn test_directory_replaces_existing_file() {
        let mut fs = MemFs::new();
        fs.seed_file("data", b"i am in the way");

        let buf = archive(&[pack_dir("data/")]);
        extract(&buf, &mut fs).unwrap();

        assert!(fs.is_dir("data"));
    }

    #[test]
    fn test_unopenable_file_is_skipped() {
        // "missing/file.txt" has no parent directory, so create() fails;
        // the entry is skipped and the following entries still land.
        let buf = archive(&[
            pack_file("missing/file.txt", b"lost"),
            pack_file("kept.txt", b"kept"),
        ]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        assert!(fs.file_content("missing/file.txt").is_none());
        assert_eq!(fs.file_content("kept.txt").unwrap(), b"kept");
    }

    #[test]
    fn test_short_write_aborts() {
        let buf = archive(&[pack_file("big.bin", &[0xabu8; 700])]);
        let mut fs = MemFs::new();
        fs.set_write_budget(600);

        let err = extract(&buf, &mut fs).unwrap_err();
        assert!(matches!(err, ExtractError::FileWriteFailed { .. }));
    }

    #[test]
    fn test_zero_size_file_consumes_no_content_blocks() {
        let buf = archive(&[pack_file("empty", b""), pack_file("after", b"x")]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        assert_eq!(fs.file_content("empty").unwrap(), b"");
        assert_eq!(fs.file_content("after").unwrap(), b"x");
    }

    #[test]
    fn test_block_aligned_file() {
        // Exactly two content blocks, no padding.
        let content = vec![0x5au8; 2 * BLOCK_SIZE];
        let buf = archive(&[pack_file("aligned.bin", &content), pack_file("tail", b"t")]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        assert_eq!(fs.file_content("aligned.bin").unwrap(), content);
        assert_eq!(fs.file_content("tail").unwrap(), b"t");
    }

    #[test]
    fn test_unaligned_size_keeps_logical_length() {
        let content = vec![0x11u8; BLOCK_SIZE + 3];
        let buf = archive(&[pack_file("odd.bin", &content)]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        // Logical size governs the destination, not the padded block count.
        assert_eq!(fs.file_content("odd.bin").unwrap().len(), BLOCK_SIZE + 3);
    }

    #[test]
    fn test_symlink_is_not_materialized() {
        let mut link = crate::test::header_block("link", b'2', 0);
        link[157..163].copy_from_slice(b"target");
        crate::test::seal_checksum(&mut link);

        let buf = archive(&[link.to_vec(), pack_file("real.txt", b"real")]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        assert!(fs.stat_path("link").is_none());
        assert_eq!(fs.file_content("real.txt").unwrap(), b"real");
    }

    #[test]
    fn test_unknown_entry_type_is_skipped() {
        let mut fifo = crate::test::header_block("pipe", b'6', 0);
        crate::test::seal_checksum(&mut fifo);

        let buf = archive(&[fifo.to_vec(), pack_file("next.txt", b"n")]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        assert!(fs.stat_path("pipe").is_none());
        assert_eq!(fs.file_content("next.txt").unwrap(), b"n");
    }

    #[test]
    fn test_zero_block_terminates() {
        let mut buf = pack_dir("seen/");
        buf.extend_from_slice(&[0u8; BLOCK_SIZE]);
        // An entry after the terminator must not be processed.
        buf.extend_from_slice(&pack_dir("unseen/"));
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        assert!(fs.is_dir("seen"));
        assert!(!fs.is_dir("unseen"));
    }

    #[test]
    fn test_non_archive_buffer_is_success() {
        // Leniency inherited from the original: a buffer without the
        // magic token ends the run as if the archive were empty.
        let buf = vec![0x42u8; 4 * BLOCK_SIZE];
        let mut fs = MemFs::new();
        extract(&buf, &mut fs).unwrap();
    }

    #[test]
    fn test_truncated_content_is_success() {
        let mut buf = pack_file("cut.bin", &[7u8; 900]);
        buf.truncate(BLOCK_SIZE + 512); // header plus one of two blocks
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();

        // The partial content that was present is preserved.
        assert_eq!(fs.file_content("cut.bin").unwrap(), &[7u8; 512]);
    }

    #[test]
    fn test_double_extraction_overwrites_files() {
        let buf = archive(&[pack_dir("d/"), pack_file("d/f", b"payload")]);
        let mut fs = MemFs::new();

        extract(&buf, &mut fs).unwrap();
        extract(&buf, &mut fs).unwrap();

        assert_eq!(fs.file_content("d/f").unwrap(), b"payload");
    }

    #[test]
    fn test_entry_path_normalization() {
        assert_eq!(entry_path(b"data/"), PathBuf::from("data"));
        assert_eq!(entry_path(b"./data/x"), PathBuf::from("data/x"));
        assert_eq!(entry_path(b"/abs"), PathBuf::from("abs"));
    }

    #[test]
    fn test_cursor_clamps_skip() {
        let buf = [0u8; 100];
        let mut cursor = ArchiveCursor::new(&buf);
        cursor.skip_blocks(u64::MAX);
        assert_eq!(cursor.position(), 100);
        assert!(cursor.take_block().is_none());
    }
}
