//! Zerocopy-based decoding of ustar-style header blocks.
//!
//! Every entry in the archive is preceded by one 512-byte header block.
//! The fields relevant to extraction live at fixed byte offsets:
//!
//! | Offset | Size | Field    | Description                            |
//! |--------|------|----------|----------------------------------------|
//! | 0      | 100  | name     | Entry path (null-terminated if < 100)  |
//! | 100    | 8    | mode     | File mode in octal ASCII (unused)      |
//! | 108    | 8    | uid      | Owner user ID in octal ASCII (unused)  |
//! | 116    | 8    | gid      | Owner group ID in octal ASCII (unused) |
//! | 124    | 12   | size     | Content size in octal ASCII            |
//! | 136    | 12   | mtime    | Modification time (unused)             |
//! | 148    | 8    | checksum | Header checksum in octal ASCII         |
//! | 156    | 1    | typeflag | Entry type (see [`EntryType`])         |
//! | 157    | 100  | linkname | Link target for symbolic links         |
//! | 257    | 5+   | magic    | "ustar"                                |
//!
//! Numeric fields are parsed leniently: digit bytes accumulate base-8,
//! everything else (NUL and space padding, stray bytes) is skipped. Real
//! producers pad these fields inconsistently and the original consumers of
//! this format accepted all of them; rejecting non-digit bytes here would
//! reject conforming archives.

use std::fmt;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::BLOCK_SIZE;

/// Leading magic bytes every header block must carry.
///
/// Only the first five bytes are checked, which accepts both the POSIX
/// `"ustar\0"` and GNU `"ustar "` spellings. A block without this token is
/// treated as the end of the archive, not as an error: most producers pad
/// the stream with zero blocks.
pub const MAGIC: &[u8; 5] = b"ustar";

/// Errors produced when decoding a header block.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// The provided data is too short to contain a header block.
    #[error("insufficient data: expected {BLOCK_SIZE} bytes, got {0}")]
    InsufficientData(usize),
}

/// Header checksum verification failure.
///
/// Carries both sides of the comparison so callers can log them.
#[derive(Debug, Error)]
#[error("checksum mismatch: stored {stored}, computed {computed}")]
pub struct ChecksumMismatch {
    /// The checksum value decoded from the header's checksum field.
    pub stored: u64,
    /// The checksum recomputed over the header bytes.
    pub computed: u64,
}

/// The kind of filesystem object an entry describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file (typeflag `'0'`, or NUL for pre-POSIX producers).
    Regular,
    /// Directory (typeflag `'5'`).
    Directory,
    /// Symbolic link (typeflag `'2'`). Decoded but never materialized.
    Symlink,
    /// Any other typeflag. Reported and skipped during extraction.
    Other(u8),
}

impl EntryType {
    /// Decode an entry type from the raw typeflag byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' | b'\0' => EntryType::Regular,
            b'5' => EntryType::Directory,
            b'2' => EntryType::Symlink,
            other => EntryType::Other(other),
        }
    }
}

impl From<u8> for EntryType {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

/// One 512-byte header block, accessed in place.
///
/// The struct is a zerocopy view: [`Header::from_block`] reinterprets a
/// borrowed block of archive memory without copying it. Field accessors
/// read from the fixed offsets in the table above.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Header {
    bytes: [u8; BLOCK_SIZE],
}

impl Header {
    /// Reinterpret a 512-byte block as a header.
    #[must_use]
    pub fn from_block(block: &[u8; BLOCK_SIZE]) -> &Header {
        Header::ref_from_bytes(block).expect("block is exactly one header")
    }

    /// Parse a header from the front of a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InsufficientData`] if fewer than 512 bytes
    /// are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Header, HeaderError> {
        if bytes.len() < BLOCK_SIZE {
            return Err(HeaderError::InsufficientData(bytes.len()));
        }
        Header::ref_from_bytes(&bytes[..BLOCK_SIZE])
            .map_err(|_| HeaderError::InsufficientData(bytes.len()))
    }

    /// Get a reference to the underlying block.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.bytes
    }

    /// The entry path, truncated at the first NUL (at most 99 bytes).
    #[must_use]
    pub fn name(&self) -> &[u8] {
        truncate_null(&self.bytes[0..100])
    }

    /// The link target for symbolic link entries.
    #[must_use]
    pub fn link_target(&self) -> &[u8] {
        truncate_null(&self.bytes[157..257])
    }

    /// The entry type decoded from the typeflag byte.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        EntryType::from_byte(self.bytes[156])
    }

    /// The declared content size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        parse_octal(&self.bytes[124..136])
    }

    /// The checksum value stored in the header's checksum field.
    #[must_use]
    pub fn stored_checksum(&self) -> u64 {
        parse_octal(&self.bytes[148..156])
    }

    /// Whether the magic field starts with [`MAGIC`].
    #[must_use]
    pub fn has_magic(&self) -> bool {
        &self.bytes[257..262] == MAGIC
    }

    /// Whether the whole block is zero.
    ///
    /// Archives conventionally end with two zero blocks; any one of them
    /// terminates traversal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    /// Recompute the header checksum.
    ///
    /// The checksum is the unsigned sum of all 512 header bytes with the
    /// 8 bytes of the checksum field itself substituted by ASCII space.
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        let mut sum: u64 = 0;
        for (i, &byte) in self.bytes.iter().enumerate() {
            if (148..156).contains(&i) {
                sum += u64::from(b' ');
            } else {
                sum += u64::from(byte);
            }
        }
        sum
    }

    /// Verify the stored checksum against the recomputed one.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumMismatch`] carrying both values when they differ.
    pub fn verify_checksum(&self) -> Result<(), ChecksumMismatch> {
        let stored = self.stored_checksum();
        let computed = self.compute_checksum();
        if stored == computed {
            Ok(())
        } else {
            Err(ChecksumMismatch { stored, computed })
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("name", &String::from_utf8_lossy(self.name()))
            .field("entry_type", &self.entry_type())
            .field("size", &self.size())
            .field("has_magic", &self.has_magic())
            .finish()
    }
}

/// Parse a base-8 ASCII numeric field, leniently.
///
/// Bytes `'0'..='9'` accumulate as digits; every other byte (leading or
/// embedded NUL, space padding, anything unexpected) is silently skipped.
/// This deliberately matches what real producers emit and must not be
/// tightened to a strict octal parser.
#[must_use]
pub fn parse_octal(field: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &byte in field {
        if byte.is_ascii_digit() {
            value = value * 8 + u64::from(byte - b'0');
        }
    }
    value
}

/// Truncate a byte slice at the first NUL byte.
///
/// Used to extract null-terminated strings from fixed-size fields. If no
/// NUL is found the entire slice is returned.
#[must_use]
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}
