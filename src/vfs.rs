//! The filesystem capability surface consumed by extraction.
//!
//! Extraction only needs five operations from its destination: make a
//! directory, remove a path, stat a path, open a file for write-truncate,
//! and enumerate a directory for diagnostics. [`Filesystem`] captures
//! exactly that surface; [`HostFs`] implements it against a real directory
//! tree using fd-relative `rustix` calls, and the test module provides an
//! in-memory implementation with failure injection.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use rustix::fd::OwnedFd;
use rustix::fs::{mkdirat, openat, statat, unlinkat, AtFlags, Dir, FileType, OFlags, CWD};

/// The kind of object a path resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// A directory.
    Directory,
    /// A regular file.
    Regular,
    /// Anything else (device node, fifo, symlink, ...).
    Other,
}

/// One entry of a directory listing.
#[derive(Clone, Debug)]
pub struct DirEntry {
    /// The entry's name within its directory.
    pub name: OsString,
    /// What the entry is.
    pub kind: FileKind,
    /// Logical size in bytes; zero for non-regular entries.
    pub size: u64,
}

/// Destination filesystem operations used by [`extract`](crate::extract).
///
/// All paths are relative to the implementation's root. Write handles are
/// closed by dropping them; [`io::Write::write`] reports the number of
/// bytes actually written, and a short count is meaningful (full device).
pub trait Filesystem {
    /// Handle for writing file content.
    type File: io::Write;

    /// Create a directory. Fails with [`io::ErrorKind::AlreadyExists`] if
    /// the path already exists, whatever its kind.
    fn make_dir(&mut self, path: &Path) -> io::Result<()>;

    /// Remove a file or (empty) directory.
    fn remove(&mut self, path: &Path) -> io::Result<()>;

    /// Report what `path` currently is.
    fn stat(&self, path: &Path) -> io::Result<FileKind>;

    /// Open `path` for writing, creating it or truncating existing content.
    fn create(&mut self, path: &Path) -> io::Result<Self::File>;

    /// Enumerate the entries of the directory at `path`, in no particular
    /// order, excluding `.` and `..`.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// [`Filesystem`] over a real directory tree.
///
/// Holds an `O_PATH` fd for the root directory and resolves every
/// operation relative to it, so the destination cannot drift if the
/// process later changes its working directory.
#[derive(Debug)]
pub struct HostFs {
    root: OwnedFd,
}

impl HostFs {
    /// Open the directory at `path` as the extraction root.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not exist or is not a directory.
    pub fn open(path: &Path) -> io::Result<Self> {
        let root = openat(
            CWD,
            path,
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
            0.into(),
        )?;
        Ok(Self { root })
    }
}

impl Filesystem for HostFs {
    type File = File;

    fn make_dir(&mut self, path: &Path) -> io::Result<()> {
        mkdirat(&self.root, path, 0o755.into())?;
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        match unlinkat(&self.root, path, AtFlags::empty()) {
            Err(rustix::io::Errno::ISDIR) => {
                unlinkat(&self.root, path, AtFlags::REMOVEDIR)?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    fn stat(&self, path: &Path) -> io::Result<FileKind> {
        let stat = statat(&self.root, path, AtFlags::SYMLINK_NOFOLLOW)?;
        Ok(kind_of(FileType::from_raw_mode(stat.st_mode)))
    }

    fn create(&mut self, path: &Path) -> io::Result<Self::File> {
        let fd = openat(
            &self.root,
            path,
            OFlags::CREATE | OFlags::WRONLY | OFlags::TRUNC | OFlags::CLOEXEC,
            0o644.into(),
        )?;
        Ok(File::from(fd))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let fd = openat(
            &self.root,
            path,
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            0.into(),
        )?;

        let mut entries = vec![];
        for item in Dir::read_from(&fd)? {
            let entry = item?;
            let name = entry.file_name().to_bytes();
            if name == b"." || name == b".." {
                continue;
            }
            let stat = statat(&fd, entry.file_name(), AtFlags::SYMLINK_NOFOLLOW)?;
            let kind = kind_of(FileType::from_raw_mode(stat.st_mode));
            entries.push(DirEntry {
                name: OsString::from(std::ffi::OsStr::from_bytes(name)),
                kind,
                size: if kind == FileKind::Regular {
                    stat.st_size as u64
                } else {
                    0
                },
            });
        }
        Ok(entries)
    }
}

fn kind_of(file_type: FileType) -> FileKind {
    match file_type {
        FileType::Directory => FileKind::Directory,
        FileType::RegularFile => FileKind::Regular,
        _ => FileKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn host() -> (tempfile::TempDir, HostFs) {
        let dir = tempfile::TempDir::new().unwrap();
        let fs = HostFs::open(dir.path()).unwrap();
        (dir, fs)
    }

    #[test]
    fn test_make_dir_and_stat() {
        let (_dir, mut fs) = host();
        fs.make_dir(Path::new("sub")).unwrap();
        assert_eq!(fs.stat(Path::new("sub")).unwrap(), FileKind::Directory);

        let err = fs.make_dir(Path::new("sub")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_create_write_and_stat() {
        let (_dir, mut fs) = host();
        let mut file = fs.create(Path::new("f.txt")).unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        assert_eq!(fs.stat(Path::new("f.txt")).unwrap(), FileKind::Regular);

        // Re-creating truncates.
        drop(fs.create(Path::new("f.txt")).unwrap());
        let entries = fs.read_dir(Path::new(".")).unwrap();
        let entry = entries.iter().find(|e| e.name == "f.txt").unwrap();
        assert_eq!(entry.size, 0);
    }

    #[test]
    fn test_remove_file_and_directory() {
        let (_dir, mut fs) = host();
        fs.make_dir(Path::new("d")).unwrap();
        drop(fs.create(Path::new("f")).unwrap());

        fs.remove(Path::new("f")).unwrap();
        fs.remove(Path::new("d")).unwrap();

        assert_eq!(
            fs.stat(Path::new("f")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            fs.stat(Path::new("d")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_read_dir_skips_dot_entries() {
        let (_dir, mut fs) = host();
        fs.make_dir(Path::new("a")).unwrap();
        drop(fs.create(Path::new("b")).unwrap());

        let mut names: Vec<_> = fs
            .read_dir(Path::new("."))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, [OsString::from("a"), OsString::from("b")]);
    }

    #[test]
    fn test_create_in_missing_parent_fails() {
        let (_dir, mut fs) = host();
        assert!(fs.create(Path::new("no/such/parent")).is_err());
    }
}
