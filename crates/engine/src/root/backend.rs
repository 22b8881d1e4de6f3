//! [`FileBackend`] adapter over the privileged shell.
//!
//! Content moves through local staging files: reads `cat` the privileged
//! file into a temp file we own, writes are staged locally and copied over
//! the destination on finish.

use std::io::{Read, Write};
use std::sync::Arc;

use fmcore_common::{BackendKind, Entry, VfsError, VfsResult, CHILD_COUNT_UNKNOWABLE};
use tempfile::NamedTempFile;

use super::executor::RootShellExecutor;
use crate::backend::{FileBackend, ReadSeek, WriteStream};

/// Serves paths outside the normal storage APIs.
pub struct RootBackend {
    executor: Arc<RootShellExecutor>,
}

impl RootBackend {
    /// Wrap an executor.
    pub fn new(executor: Arc<RootShellExecutor>) -> Self {
        Self { executor }
    }

    /// The executor behind this backend.
    pub fn executor(&self) -> &Arc<RootShellExecutor> {
        &self.executor
    }

    fn stage_read(&self, path: &str) -> VfsResult<NamedTempFile> {
        let staging = NamedTempFile::new()?;
        self.executor.copy_out(path, staging.path())?;
        Ok(staging)
    }
}

struct RootWriteStream {
    executor: Arc<RootShellExecutor>,
    staging: NamedTempFile,
    destination: String,
}

impl Write for RootWriteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.staging.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.staging.flush()
    }
}

impl WriteStream for RootWriteStream {
    fn finish(mut self: Box<Self>) -> VfsResult<()> {
        self.staging.flush()?;
        self.executor
            .copy_in(self.staging.path(), &self.destination)?;
        tracing::debug!(path = %self.destination, "Root write committed");
        Ok(())
    }
}

impl FileBackend for RootBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Root
    }

    fn list(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>> {
        self.executor.list_directory(path, include_hidden)
    }

    fn stat(&self, path: &str) -> VfsResult<Entry> {
        self.executor.stat(path)
    }

    fn open_read(&self, path: &str) -> VfsResult<Box<dyn Read + Send>> {
        Ok(Box::new(self.stage_read(path)?))
    }

    fn open_read_seekable(&self, path: &str) -> VfsResult<Box<dyn ReadSeek>> {
        Ok(Box::new(self.stage_read(path)?))
    }

    fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteStream>> {
        if !self.executor.is_available() {
            return Err(VfsError::BackendUnavailable(
                "root access is not available".to_string(),
            ));
        }
        Ok(Box::new(RootWriteStream {
            executor: self.executor.clone(),
            staging: NamedTempFile::new()?,
            destination: path.to_string(),
        }))
    }

    fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.executor.mkdir(path)
    }

    fn delete(&self, path: &str) -> VfsResult<()> {
        self.executor.delete(path)
    }

    fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.executor.rename(from, to)
    }

    fn child_count(&self, path: &str, include_hidden: bool) -> VfsResult<i64> {
        self.executor.child_count(path, include_hidden)
    }

    fn fill_child_counts(&self, entries: &mut [Entry], include_hidden: bool) {
        if let Err(e) = self.executor.fill_child_counts(entries, include_hidden) {
            tracing::warn!(error = %e, "Batched child count failed");
            for entry in entries.iter_mut().filter(|e| e.needs_child_count()) {
                entry.child_count = CHILD_COUNT_UNKNOWABLE;
            }
        }
    }

    fn fill_file_sizes(&self, entries: &mut [Entry]) {
        if let Err(e) = self.executor.fill_file_sizes(entries) {
            tracing::warn!(error = %e, "Batched size query failed");
        }
    }

    fn exists(&self, path: &str) -> VfsResult<bool> {
        self.executor.exists(path)
    }
}
