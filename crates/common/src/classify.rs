//! Mapping paths to the backend that owns them.

use std::path::{Component, Path, PathBuf};

use crate::path::{is_remote_path, REMOTE_ID_ENCODED_LEN, REMOTE_PREFIX};

/// The backend family responsible for a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Directly accessible filesystem.
    Local,
    /// Removable volume that must go through a granted document tree.
    SafRestricted,
    /// USB on-the-go volume.
    Otg,
    /// Remote share, keyed by the encoded remote id.
    Remote {
        /// Encoded remote id embedded in the path.
        id: String,
    },
    /// Privileged shell access.
    Root,
}

impl BackendKind {
    /// Short label used in logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::SafRestricted => "saf",
            BackendKind::Otg => "otg",
            BackendKind::Remote { .. } => "remote",
            BackendKind::Root => "root",
        }
    }
}

/// Classifies paths against the known storage volumes.
///
/// Classification is pure: it never touches the filesystem and never fails.
/// Anything unrecognized falls back to [`BackendKind::Local`]; whether root
/// access is used instead is decided by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathClassifier {
    internal_root: PathBuf,
    otg_roots: Vec<PathBuf>,
    saf_roots: Vec<PathBuf>,
}

impl PathClassifier {
    /// Create a classifier for the given volume layout.
    pub fn new(internal_root: impl Into<PathBuf>, otg_roots: Vec<PathBuf>, saf_roots: Vec<PathBuf>) -> Self {
        Self {
            internal_root: lexical_normalize(&internal_root.into()),
            otg_roots: otg_roots.iter().map(|p| lexical_normalize(p)).collect(),
            saf_roots: saf_roots.iter().map(|p| lexical_normalize(p)).collect(),
        }
    }

    /// Internal storage root.
    pub fn internal_root(&self) -> &Path {
        &self.internal_root
    }

    /// Mounted OTG volume roots.
    pub fn otg_roots(&self) -> &[PathBuf] {
        &self.otg_roots
    }

    /// SD-card volume roots that require tree grants.
    pub fn saf_roots(&self) -> &[PathBuf] {
        &self.saf_roots
    }

    /// Classify a path.
    pub fn classify(&self, path: &str) -> BackendKind {
        if is_remote_path(path) {
            let id = path
                .get(REMOTE_PREFIX.len()..REMOTE_PREFIX.len() + REMOTE_ID_ENCODED_LEN)
                .unwrap_or_default()
                .to_string();
            return BackendKind::Remote { id };
        }

        let normalized = lexical_normalize(Path::new(path));
        if normalized.starts_with(&self.internal_root) {
            return BackendKind::Local;
        }
        if self.otg_roots.iter().any(|root| normalized.starts_with(root)) {
            return BackendKind::Otg;
        }
        if self.saf_roots.iter().any(|root| normalized.starts_with(root)) {
            return BackendKind::SafRestricted;
        }
        BackendKind::Local
    }

    /// Whether a path is on internal storage.
    pub fn is_internal(&self, path: &str) -> bool {
        !is_remote_path(path) && lexical_normalize(Path::new(path)).starts_with(&self.internal_root)
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::RemoteId;

    fn classifier() -> PathClassifier {
        PathClassifier::new(
            "/storage/emulated/0",
            vec![PathBuf::from("/mnt/media_rw/usb1")],
            vec![PathBuf::from("/storage/1A2B-3C4D")],
        )
    }

    #[test]
    fn test_remote_takes_precedence() {
        let id = RemoteId::from_bytes([3; 8]);
        let kind = classifier().classify(&id.path_for("share/docs"));
        assert_eq!(kind, BackendKind::Remote { id: id.encode() });
    }

    #[test]
    fn test_internal_is_local() {
        let c = classifier();
        assert_eq!(c.classify("/storage/emulated/0"), BackendKind::Local);
        assert_eq!(c.classify("/storage/emulated/0/Download/a.zip"), BackendKind::Local);
        assert!(c.is_internal("/storage/emulated/0/Music"));
    }

    #[test]
    fn test_otg_and_saf() {
        let c = classifier();
        assert_eq!(c.classify("/mnt/media_rw/usb1/photos"), BackendKind::Otg);
        assert_eq!(c.classify("/storage/1A2B-3C4D/DCIM"), BackendKind::SafRestricted);
    }

    #[test]
    fn test_prefix_must_match_whole_component() {
        let c = classifier();
        assert_eq!(c.classify("/storage/emulated/01/x"), BackendKind::Local);
        assert!(!c.is_internal("/storage/emulated/01/x"));
        assert_eq!(c.classify("/mnt/media_rw/usb10"), BackendKind::Local);
    }

    #[test]
    fn test_unknown_falls_back_to_local() {
        let c = classifier();
        assert_eq!(c.classify("/data/data/app"), BackendKind::Local);
        assert_eq!(c.classify(""), BackendKind::Local);
        assert_eq!(c.classify("relative/path"), BackendKind::Local);
    }

    #[test]
    fn test_dot_dot_cannot_escape_into_volume() {
        let c = classifier();
        assert_eq!(
            c.classify("/storage/emulated/0/../../mnt/media_rw/usb1/x"),
            BackendKind::Otg
        );
    }

    #[test]
    fn test_classify_is_pure() {
        let c = classifier();
        let path = "/storage/1A2B-3C4D/Music";
        assert_eq!(c.classify(path), c.classify(path));
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(lexical_normalize(Path::new("/../..")), PathBuf::from("/"));
    }
}
