//! Seed a freshly created filesystem from an in-memory ustar archive.
//!
//! This crate implements the extraction step of a boot sequence: a raw
//! archive image (ustar-style 512-byte header blocks followed by content
//! blocks) is held in memory, a blank filesystem has just been created on a
//! RAM block device, and [`extract`] walks the archive in a single forward
//! pass, materializing each entry as a directory or regular file.
//!
//! The archive buffer is read-only for the whole call and traversal never
//! moves backward. Decoded headers are ephemeral: no whole-archive index is
//! built. Re-running extraction over the same buffer is idempotent for
//! directories and overwrites existing files.
//!
//! The destination is abstracted behind the [`vfs::Filesystem`] trait so the
//! same driver serves a real directory tree ([`vfs::HostFs`]) and the
//! in-memory filesystem used in tests.
//!
//! # Example
//!
//! ```no_run
//! use bootseed::{extract, vfs::HostFs};
//!
//! let buffer = std::fs::read("seed.tar")?;
//! let mut fs = HostFs::open(std::path::Path::new("/srv/seed"))?;
//! extract(&buffer, &mut fs)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod console;
pub mod extract;
pub mod header;
pub mod listing;
pub mod vfs;


pub use extract::{extract, ExtractError};
pub use header::{EntryType, Header};

/// Size of one archive block in bytes.
///
/// Headers occupy exactly one block; file content is stored in as many
/// blocks as the declared size requires, the last one zero-padded to the
/// boundary.
pub const BLOCK_SIZE: usize = 512;
