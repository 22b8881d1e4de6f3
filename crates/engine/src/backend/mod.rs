//! The uniform file backend contract.
//!
//! Every storage family (local, SAF tree, OTG, remote share, root shell)
//! implements [`FileBackend`]; the router picks exactly one per call.

pub mod local;
pub mod volume;

use std::io::{self, Read, Seek, Write};

use fmcore_common::{BackendKind, Entry, VfsResult, CHILD_COUNT_UNKNOWABLE};

pub use local::LocalBackend;
pub use volume::VolumeBackend;

/// Default copy buffer size (64KB).
pub const DEFAULT_COPY_BUFFER: usize = 64 * 1024;

/// Readable and seekable stream.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// A write stream whose content becomes visible only on [`finish`](WriteStream::finish).
///
/// Dropping a stream without finishing it discards the written data.
pub trait WriteStream: Write + Send {
    /// Flush and commit the written content to its destination.
    fn finish(self: Box<Self>) -> VfsResult<()>;
}

/// Operations every backend supports.
pub trait FileBackend: Send + Sync {
    /// Backend family.
    fn kind(&self) -> BackendKind;

    /// List a directory.
    fn list(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>>;

    /// Describe a single path.
    fn stat(&self, path: &str) -> VfsResult<Entry>;

    /// Open a file for sequential reading.
    fn open_read(&self, path: &str) -> VfsResult<Box<dyn Read + Send>>;

    /// Open a file for random access. Backends without native seeking spool
    /// the content into an anonymous temporary file first.
    fn open_read_seekable(&self, path: &str) -> VfsResult<Box<dyn ReadSeek>> {
        let mut reader = self.open_read(path)?;
        let mut spool = tempfile::tempfile()?;
        io::copy(&mut reader, &mut spool)?;
        spool.rewind()?;
        Ok(Box::new(spool))
    }

    /// Open a file for writing, replacing any existing content on finish.
    fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteStream>>;

    /// Create a directory and any missing parents. Succeeds if it already exists.
    fn mkdir(&self, path: &str) -> VfsResult<()>;

    /// Delete a file or a directory tree.
    fn delete(&self, path: &str) -> VfsResult<()>;

    /// Rename within this backend.
    fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Number of children of a directory.
    fn child_count(&self, path: &str, include_hidden: bool) -> VfsResult<i64>;

    /// Fill in child counts for the directories of a listing.
    ///
    /// Failures are per-entry: the affected entry becomes unknowable and the
    /// rest are still computed.
    fn fill_child_counts(&self, entries: &mut [Entry], include_hidden: bool) {
        for entry in entries.iter_mut().filter(|e| e.needs_child_count()) {
            match self.child_count(&entry.path, include_hidden) {
                Ok(count) => entry.set_child_count(count),
                Err(e) => {
                    tracing::debug!(path = %entry.path, error = %e, "child count failed");
                    entry.child_count = CHILD_COUNT_UNKNOWABLE;
                }
            }
        }
    }

    /// Refresh file sizes before sorting by size. Listings already carry
    /// sizes, so the default does nothing.
    fn fill_file_sizes(&self, _entries: &mut [Entry]) {}

    /// Whether a path exists.
    fn exists(&self, path: &str) -> VfsResult<bool>;

    /// Reapply a modification time. Returns false when unsupported.
    fn set_modified(&self, _path: &str, _modified_millis: i64) -> VfsResult<bool> {
        Ok(false)
    }

    /// The plain filesystem location of a path, when the backend has one.
    fn local_path(&self, _path: &str) -> Option<std::path::PathBuf> {
        None
    }
}

/// Copy a reader into a writer through a fixed-size buffer, checking
/// `cancelled` between chunks.
pub fn copy_buffered<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    cancelled: F,
) -> VfsResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
    F: Fn() -> bool,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        if cancelled() {
            return Err(fmcore_common::VfsError::Cancelled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_buffered_small_buffer() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        let n = copy_buffered(&mut Cursor::new(&data), &mut out, 7, || false).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn test_copy_buffered_cancelled() {
        let mut out = Vec::new();
        let result = copy_buffered(&mut Cursor::new(vec![1u8; 100]), &mut out, 10, || true);
        assert!(matches!(result, Err(fmcore_common::VfsError::Cancelled)));
        assert!(out.is_empty());
    }
}
