//! Removable volumes: SAF-restricted SD cards and OTG devices.
//!
//! Both are plain mounts underneath, but access is gated: a SAF volume can
//! only be touched inside a tree the user granted, and an OTG volume only
//! while its device is attached.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fmcore_common::{lexical_normalize, BackendKind, Entry, VfsError, VfsResult};

use super::local::LocalBackend;
use super::{FileBackend, ReadSeek, WriteStream};

/// Gated access to a family of removable volumes.
pub struct VolumeBackend {
    kind: BackendKind,
    roots: Vec<PathBuf>,
    grants: RwLock<Vec<PathBuf>>,
    inner: LocalBackend,
}

impl VolumeBackend {
    /// SD-card volumes reachable only through granted trees.
    pub fn saf(roots: Vec<PathBuf>, grants: Vec<PathBuf>) -> Self {
        Self {
            kind: BackendKind::SafRestricted,
            roots: normalize_all(roots),
            grants: RwLock::new(normalize_all(grants)),
            inner: LocalBackend::new(),
        }
    }

    /// OTG volumes, available while attached.
    pub fn otg(roots: Vec<PathBuf>) -> Self {
        Self {
            kind: BackendKind::Otg,
            roots: normalize_all(roots),
            grants: RwLock::new(Vec::new()),
            inner: LocalBackend::new(),
        }
    }

    /// Grant access to a tree. Returns false if it is not on one of the volumes.
    pub fn grant(&self, tree: impl Into<PathBuf>) -> bool {
        let tree = lexical_normalize(&tree.into());
        if !self.roots.iter().any(|r| tree.starts_with(r)) {
            return false;
        }
        match self.grants.write() {
            Ok(mut grants) => {
                if !grants.contains(&tree) {
                    tracing::info!(tree = %tree.display(), "SAF tree granted");
                    grants.push(tree);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Drop a previously granted tree.
    pub fn revoke(&self, tree: &Path) {
        if let Ok(mut grants) = self.grants.write() {
            grants.retain(|g| g != tree);
        }
    }

    /// Check the gate for a path.
    fn check(&self, path: &str) -> VfsResult<()> {
        let normalized = lexical_normalize(Path::new(path));
        let root = self
            .roots
            .iter()
            .find(|r| normalized.starts_with(r))
            .ok_or_else(|| {
                VfsError::BackendUnavailable(format!("{} is not on a known volume", path))
            })?;

        match self.kind {
            BackendKind::Otg => {
                if !root.is_dir() {
                    return Err(VfsError::BackendUnavailable(format!(
                        "OTG device at {} is not attached",
                        root.display()
                    )));
                }
            }
            _ => {
                let grants = self
                    .grants
                    .read()
                    .map_err(|_| VfsError::BackendUnavailable("grant table poisoned".to_string()))?;
                if !grants.iter().any(|g| normalized.starts_with(g)) {
                    return Err(VfsError::BackendUnavailable(format!(
                        "no access grant covers {}",
                        path
                    )));
                }
            }
        }
        Ok(())
    }
}

fn normalize_all(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.iter().map(|p| lexical_normalize(p)).collect()
}

impl FileBackend for VolumeBackend {
    fn kind(&self) -> BackendKind {
        self.kind.clone()
    }

    fn list(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>> {
        self.check(path)?;
        self.inner.list(path, include_hidden)
    }

    fn stat(&self, path: &str) -> VfsResult<Entry> {
        self.check(path)?;
        self.inner.stat(path)
    }

    fn open_read(&self, path: &str) -> VfsResult<Box<dyn Read + Send>> {
        self.check(path)?;
        self.inner.open_read(path)
    }

    fn open_read_seekable(&self, path: &str) -> VfsResult<Box<dyn ReadSeek>> {
        self.check(path)?;
        self.inner.open_read_seekable(path)
    }

    fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteStream>> {
        self.check(path)?;
        self.inner.open_write(path)
    }

    fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.check(path)?;
        self.inner.mkdir(path)
    }

    fn delete(&self, path: &str) -> VfsResult<()> {
        self.check(path)?;
        self.inner.delete(path)
    }

    fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.check(from)?;
        self.check(to)?;
        self.inner.rename(from, to)
    }

    fn child_count(&self, path: &str, include_hidden: bool) -> VfsResult<i64> {
        self.check(path)?;
        self.inner.child_count(path, include_hidden)
    }

    fn exists(&self, path: &str) -> VfsResult<bool> {
        self.check(path)?;
        self.inner.exists(path)
    }

    fn set_modified(&self, path: &str, modified_millis: i64) -> VfsResult<bool> {
        self.check(path)?;
        self.inner.set_modified(path, modified_millis)
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        self.check(path).ok()?;
        self.inner.local_path(path)
    }
}
