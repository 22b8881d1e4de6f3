//! Backend dispatch.
//!
//! The `FileBackendRouter` classifies each path and hands the call to
//! exactly one backend. Callers never branch on the storage family; results
//! are never merged across backends.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fmcore_common::{
    base_name, join_path, sort_entries, BackendKind, Entry, PathClassifier, RemotePath, VfsError,
    VfsResult, CHILD_COUNT_UNKNOWABLE,
};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{
    copy_buffered, FileBackend, LocalBackend, ReadSeek, VolumeBackend, WriteStream,
    DEFAULT_COPY_BUFFER,
};
use crate::config::Config;
use crate::remote::{RemoteBackend, SessionRegistry};
use crate::root::{RootBackend, RootShellExecutor};

/// Ordering applied to listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Directories first, then case-insensitive by name.
    #[default]
    Name,
    /// Directories first, then largest file first.
    Size,
}

/// Options for [`FileBackendRouter::list_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub include_hidden: bool,
    pub child_counts: bool,
    pub sort: SortOrder,
}

/// Access a backend decision is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Dispatches uniform file operations to the backend owning each path.
pub struct FileBackendRouter {
    classifier: PathClassifier,
    local: Arc<LocalBackend>,
    saf: Arc<VolumeBackend>,
    otg: Arc<VolumeBackend>,
    root: Option<Arc<RootBackend>>,
    sessions: Option<Arc<SessionRegistry>>,
}

impl FileBackendRouter {
    /// Router over local storage and the classifier's removable volumes.
    /// Root access and remote shares are off until attached.
    pub fn new(classifier: PathClassifier) -> Self {
        let saf = VolumeBackend::saf(classifier.saf_roots().to_vec(), Vec::new());
        let otg = VolumeBackend::otg(classifier.otg_roots().to_vec());
        Self {
            classifier,
            local: Arc::new(LocalBackend::new()),
            saf: Arc::new(saf),
            otg: Arc::new(otg),
            root: None,
            sessions: None,
        }
    }

    /// Build from configuration. Root is attached only when enabled.
    pub fn from_config(config: &Config, sessions: Option<Arc<SessionRegistry>>) -> VfsResult<Self> {
        let classifier = PathClassifier::new(
            config.storage.internal_root.clone(),
            config.storage.otg_roots.clone(),
            config.storage.saf_roots.clone(),
        );
        let mut router = Self::new(classifier);
        for grant in &config.storage.saf_grants {
            router.saf.grant(grant.clone());
        }
        if config.root.enabled {
            let executor = RootShellExecutor::spawn(&config.root.su_binary)?;
            router = router.with_root(Arc::new(executor));
        }
        if let Some(sessions) = sessions {
            router = router.with_sessions(sessions);
        }
        Ok(router)
    }

    /// Enable the root backend.
    pub fn with_root(mut self, executor: Arc<RootShellExecutor>) -> Self {
        self.root = Some(Arc::new(RootBackend::new(executor)));
        self
    }

    /// Serve remote paths through a session registry.
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// The path classifier.
    pub fn classifier(&self) -> &PathClassifier {
        &self.classifier
    }

    /// The SAF volume backend, for granting trees.
    pub fn saf(&self) -> &VolumeBackend {
        &self.saf
    }

    /// Select the backend for a path.
    pub fn backend_for(&self, path: &str) -> VfsResult<Arc<dyn FileBackend>> {
        self.select(path, Access::Read)
    }

    fn select(&self, path: &str, access: Access) -> VfsResult<Arc<dyn FileBackend>> {
        let kind = self.classifier.classify(path);
        let backend: Arc<dyn FileBackend> = match kind {
            BackendKind::Remote { .. } => {
                let remote = RemotePath::parse(path)?;
                let sessions = self.sessions.as_ref().ok_or_else(|| {
                    VfsError::BackendUnavailable("remote shares are not configured".to_string())
                })?;
                Arc::new(RemoteBackend::new(sessions.session(&remote.id)?))
            }
            BackendKind::SafRestricted => self.saf.clone(),
            BackendKind::Otg => self.otg.clone(),
            BackendKind::Local | BackendKind::Root => match &self.root {
                Some(root)
                    if !self.classifier.is_internal(path)
                        && !locally_accessible(Path::new(path), access) =>
                {
                    root.clone()
                }
                _ => self.local.clone(),
            },
        };
        debug!(path = %path, backend = backend.kind().label(), "routed");
        Ok(backend)
    }

    /// List a directory sorted by name.
    pub fn list(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>> {
        self.list_with(
            path,
            &ListOptions {
                include_hidden,
                ..ListOptions::default()
            },
        )
    }

    /// List a directory with optional child counts and ordering.
    pub fn list_with(&self, path: &str, options: &ListOptions) -> VfsResult<Vec<Entry>> {
        let backend = self.select(path, Access::Read)?;
        let mut entries = backend.list(path, options.include_hidden)?;
        if options.child_counts {
            backend.fill_child_counts(&mut entries, options.include_hidden);
        }
        match options.sort {
            SortOrder::Name => sort_entries(&mut entries),
            SortOrder::Size => {
                backend.fill_file_sizes(&mut entries);
                sort_by_size(&mut entries);
            }
        }
        Ok(entries)
    }

    /// Describe a single path.
    pub fn stat(&self, path: &str) -> VfsResult<Entry> {
        self.select(path, Access::Read)?.stat(path)
    }

    /// Open a file for reading.
    pub fn open_read(&self, path: &str) -> VfsResult<Box<dyn Read + Send>> {
        self.select(path, Access::Read)?.open_read(path)
    }

    /// Open a file for random access.
    pub fn open_read_seekable(&self, path: &str) -> VfsResult<Box<dyn ReadSeek>> {
        self.select(path, Access::Read)?.open_read_seekable(path)
    }

    /// Open a file for writing. Content is committed by `finish`.
    pub fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteStream>> {
        self.select(path, Access::Write)?.open_write(path)
    }

    /// Create a directory and its parents.
    pub fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.select(path, Access::Write)?.mkdir(path)
    }

    /// Delete the file or directory an entry describes.
    pub fn delete(&self, entry: &Entry) -> VfsResult<()> {
        reject_synthetic(entry)?;
        self.delete_path(&entry.path)
    }

    /// Delete a file or directory tree by path.
    pub fn delete_path(&self, path: &str) -> VfsResult<()> {
        info!(path = %path, "delete");
        self.select(path, Access::Write)?.delete(path)
    }

    /// Rename within one backend.
    pub fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let source = self.select(from, Access::Write)?;
        let target = self.select(to, Access::Write)?;
        if source.kind() != target.kind() {
            return Err(VfsError::InvalidPath(format!(
                "cannot rename across backends: {} -> {}",
                from, to
            )));
        }
        source.rename(from, to)
    }

    /// Child count of a directory entry. Files are unknowable.
    pub fn child_count(&self, entry: &Entry, include_hidden: bool) -> VfsResult<i64> {
        reject_synthetic(entry)?;
        if !entry.is_directory {
            return Ok(CHILD_COUNT_UNKNOWABLE);
        }
        self.select(&entry.path, Access::Read)?
            .child_count(&entry.path, include_hidden)
    }

    /// Fill child counts for a listing in place.
    ///
    /// Entries of one listing share a backend, so the first real entry
    /// selects it; batched backends answer in one round trip.
    pub fn fill_child_counts(&self, entries: &mut [Entry], include_hidden: bool) -> VfsResult<()> {
        let Some(path) = entries
            .iter()
            .find(|e| !e.is_synthetic())
            .map(|e| e.path.clone())
        else {
            return Ok(());
        };
        let backend = self.select(&path, Access::Read)?;
        backend.fill_child_counts(entries, include_hidden);
        Ok(())
    }

    /// Whether a path exists.
    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        self.select(path, Access::Read)?.exists(path)
    }

    /// Reapply a modification time where the backend supports it.
    pub fn set_modified(&self, path: &str, modified_millis: i64) -> VfsResult<bool> {
        self.select(path, Access::Write)?
            .set_modified(path, modified_millis)
    }

    /// Plain filesystem location `path` can be written at, when the backend
    /// that would serve a write has one.
    pub fn writable_local_path(&self, path: &str) -> Option<PathBuf> {
        self.select(path, Access::Write).ok()?.local_path(path)
    }

    /// Move a file or directory tree.
    ///
    /// Within one backend this is a rename. Across backends, or when the
    /// rename would cross filesystems, the tree is copied and every file is
    /// verified by re-reading the destination before the source is deleted.
    /// On any failure the source is left untouched.
    pub fn move_path(&self, from: &str, to: &str, cancel: &CancellationToken) -> VfsResult<()> {
        let source = self.select(from, Access::Write)?;
        let target = self.select(to, Access::Write)?;
        if target.exists(to)? {
            return Err(VfsError::PermissionDenied(format!("destination exists: {}", to)));
        }

        if source.kind() == target.kind() {
            debug!(from = %from, to = %to, "move by rename");
            match source.rename(from, to) {
                Err(VfsError::CrossDevice(reason)) => {
                    debug!(from = %from, to = %to, reason = %reason, "rename crosses devices, copying");
                }
                other => return other,
            }
        }

        let files = self.copy_tree(from, to, cancel)?;
        if cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        source.delete(from)?;
        info!(from = %from, to = %to, files, "Moved across backends");
        Ok(())
    }

    /// Breadth-first copy of `from` to `to`, verifying each file.
    fn copy_tree(&self, from: &str, to: &str, cancel: &CancellationToken) -> VfsResult<usize> {
        let mut queue = VecDeque::new();
        queue.push_back((self.stat(from)?, to.to_string()));
        let mut files = 0;

        while let Some((entry, dest)) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(VfsError::Cancelled);
            }
            if entry.is_directory {
                self.mkdir(&dest)?;
                for child in self.list(&entry.path, true)? {
                    let child_dest = join_path(&dest, &child.name);
                    queue.push_back((child, child_dest));
                }
            } else {
                self.copy_verified(&entry, &dest, cancel)?;
                files += 1;
            }
        }
        Ok(files)
    }

    fn copy_verified(&self, entry: &Entry, dest: &str, cancel: &CancellationToken) -> VfsResult<()> {
        let mut reader = self.open_read(&entry.path)?;
        let mut writer = self.open_write(dest)?;
        let mut hashing = HashingWriter {
            inner: &mut writer,
            hasher: Sha256::new(),
        };
        copy_buffered(&mut reader, &mut hashing, DEFAULT_COPY_BUFFER, || {
            cancel.is_cancelled()
        })?;
        let written = hashing.hasher.finalize();
        writer.finish()?;

        if entry.modified_millis > 0 {
            if let Err(e) = self.set_modified(dest, entry.modified_millis) {
                debug!(path = %dest, error = %e, "mtime not applied");
            }
        }

        let mut check = HashingWriter {
            inner: std::io::sink(),
            hasher: Sha256::new(),
        };
        std::io::copy(&mut self.open_read(dest)?, &mut check)?;
        if check.hasher.finalize() != written {
            warn!(source = %entry.path, dest = %dest, "Copy verification failed");
            return Err(VfsError::Io(format!(
                "verification failed for {}",
                base_name(dest)
            )));
        }
        Ok(())
    }
}

fn reject_synthetic(entry: &Entry) -> VfsResult<()> {
    if entry.is_synthetic() {
        Err(VfsError::InvalidPath(format!(
            "{} is not a filesystem entry",
            entry.name
        )))
    } else {
        Ok(())
    }
}

fn sort_by_size(entries: &mut [Entry]) {
    entries.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        (true, true) => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        (false, false) => b
            .size
            .cmp(&a.size)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
    });
}

/// Whether the plain filesystem can serve `path` for the given access.
///
/// Checks the nearest existing ancestor. Write access is tested with an
/// anonymous temp file, which leaves nothing behind.
fn locally_accessible(path: &Path, access: Access) -> bool {
    let mut candidate = path;
    loop {
        match std::fs::metadata(candidate) {
            Ok(meta) => {
                return match access {
                    Access::Read if meta.is_dir() => std::fs::read_dir(candidate).is_ok(),
                    Access::Read => std::fs::File::open(candidate).is_ok(),
                    Access::Write if meta.is_dir() => tempfile::tempfile_in(candidate).is_ok(),
                    Access::Write => std::fs::OpenOptions::new().write(true).open(candidate).is_ok(),
                };
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => match candidate.parent() {
                Some(parent) => candidate = parent,
                None => return false,
            },
            Err(_) => return false,
        }
    }
}

/// Writer adapter that hashes everything passing through.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
