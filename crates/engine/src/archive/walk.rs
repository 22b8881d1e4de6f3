//! Breadth-first tree walk across backends.
//!
//! [`Walk`] is a lazy iterator over an explicit work queue, so tree depth
//! never grows the call stack. Each step performs at most one directory
//! listing, and cancellation is checked before every listing.

use std::collections::VecDeque;
use std::sync::Arc;

use fmcore_common::{base_name, Entry, VfsError, VfsResult};
use tokio_util::sync::CancellationToken;

use crate::router::FileBackendRouter;

/// One walked item and its name relative to its source's parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkItem {
    pub entry: Entry,
    /// Slash-separated, no trailing slash.
    pub relative: String,
}

/// Lazy breadth-first walk over one or more source paths.
///
/// Not restartable: a new walk must be created to retry. The walk ends
/// after the first error.
pub struct Walk {
    router: Arc<FileBackendRouter>,
    cancel: CancellationToken,
    include_hidden: bool,
    seeds: VecDeque<String>,
    directories: VecDeque<WalkItem>,
    ready: VecDeque<WalkItem>,
    finished: bool,
}

impl Walk {
    /// Walk `sources`. Each source keeps its own name as the top component.
    pub fn new(
        router: Arc<FileBackendRouter>,
        sources: &[String],
        include_hidden: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            router,
            cancel,
            include_hidden,
            seeds: sources.iter().cloned().collect(),
            directories: VecDeque::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn step(&mut self) -> VfsResult<Option<WalkItem>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Ok(Some(item));
            }

            if self.cancel.is_cancelled() {
                return Err(VfsError::Cancelled);
            }

            if let Some(source) = self.seeds.pop_front() {
                let entry = self.router.stat(&source)?;
                let item = WalkItem {
                    relative: base_name(&source).to_string(),
                    entry,
                };
                if item.entry.is_directory {
                    self.directories.push_back(item.clone());
                }
                return Ok(Some(item));
            }

            let Some(dir) = self.directories.pop_front() else {
                return Ok(None);
            };
            for child in self.router.list(&dir.entry.path, self.include_hidden)? {
                let item = WalkItem {
                    relative: format!("{}/{}", dir.relative, child.name),
                    entry: child,
                };
                if item.entry.is_directory {
                    self.directories.push_back(item.clone());
                }
                self.ready.push_back(item);
            }
        }
    }
}

impl Iterator for Walk {
    type Item = VfsResult<WalkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmcore_common::PathClassifier;
    use std::fs;
    use tempfile::TempDir;

    fn router(root: &TempDir) -> Arc<FileBackendRouter> {
        Arc::new(FileBackendRouter::new(PathClassifier::new(
            root.path(),
            Vec::new(),
            Vec::new(),
        )))
    }

    fn path(root: &TempDir, rel: &str) -> String {
        root.path().join(rel).to_string_lossy().into_owned()
    }

    #[test]
    fn test_breadth_first_order() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("docs/deep")).unwrap();
        fs::write(root.path().join("docs/a.txt"), "a").unwrap();
        fs::write(root.path().join("docs/deep/b.txt"), "b").unwrap();
        fs::write(root.path().join("readme.txt"), "r").unwrap();

        let walk = Walk::new(
            router(&root),
            &[path(&root, "docs"), path(&root, "readme.txt")],
            false,
            CancellationToken::new(),
        );
        let names: Vec<String> = walk.map(|i| i.unwrap().relative).collect();
        assert_eq!(
            names,
            vec!["docs", "readme.txt", "docs/deep", "docs/a.txt", "docs/deep/b.txt"]
        );
    }

    #[test]
    fn test_deep_tree_without_recursion() {
        let root = TempDir::new().unwrap();
        let mut dir = root.path().join("top");
        for _ in 0..200 {
            dir = dir.join("d");
        }
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("leaf"), "x").unwrap();

        let walk = Walk::new(
            router(&root),
            &[path(&root, "top")],
            false,
            CancellationToken::new(),
        );
        let items: Vec<WalkItem> = walk.map(|i| i.unwrap()).collect();
        assert_eq!(items.len(), 202);
        assert!(items.last().unwrap().relative.ends_with("/d/leaf"));
    }

    #[test]
    fn test_cancel_stops_walk() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("a/b")).unwrap();
        let cancel = CancellationToken::new();
        let mut walk = Walk::new(router(&root), &[path(&root, "a")], false, cancel.clone());

        assert!(walk.next().unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(walk.next(), Some(Err(VfsError::Cancelled))));
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let root = TempDir::new().unwrap();
        let mut walk = Walk::new(
            router(&root),
            &[path(&root, "nope")],
            false,
            CancellationToken::new(),
        );
        assert!(matches!(walk.next(), Some(Err(VfsError::NotFound(_)))));
        assert!(walk.next().is_none());
    }
}
