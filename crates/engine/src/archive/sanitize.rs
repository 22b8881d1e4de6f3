//! Entry name sanitization for extraction.

use std::path::{Component, Path, PathBuf};

use fmcore_common::{VfsError, VfsResult};

/// Resolve an archive entry name against the extraction root.
///
/// The entry is normalized lexically and must stay inside `root`. Absolute
/// names, drive prefixes and `..` segments that climb out of the root are
/// rejected with [`VfsError::TraversalRejected`].
pub fn resolve_entry_target(root: &str, entry_name: &str) -> VfsResult<String> {
    let trimmed = entry_name.trim_end_matches('/');
    let entry = Path::new(trimmed);
    let reject = || VfsError::TraversalRejected(entry_name.to_string());

    let mut relative = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(reject());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(reject()),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(reject());
    }

    let base = Path::new(root);
    let resolved = base.join(&relative);
    if !resolved.starts_with(base) {
        return Err(reject());
    }
    Ok(resolved.to_string_lossy().into_owned())
}

/// Name of the folder an archive extracts into: its file name without the
/// final extension.
pub fn archive_stem(archive_name: &str) -> &str {
    let name = fmcore_common::base_name(archive_name);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names() {
        assert_eq!(
            resolve_entry_target("/sd/extracted/out", "docs/a.txt").unwrap(),
            "/sd/extracted/out/docs/a.txt"
        );
        assert_eq!(
            resolve_entry_target("/sd/extracted/out", "docs/").unwrap(),
            "/sd/extracted/out/docs"
        );
        assert_eq!(
            resolve_entry_target("/x/out", "a/../b.txt").unwrap(),
            "/x/out/b.txt"
        );
    }

    #[test]
    fn test_traversal_rejected() {
        for name in ["../../evil", "../evil.txt", "a/../../evil", "/etc/passwd", "..", "./"] {
            assert!(
                matches!(
                    resolve_entry_target("/sd/x/out", name),
                    Err(VfsError::TraversalRejected(_))
                ),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_remote_root() {
        assert_eq!(
            resolve_entry_target("r@AAAAAAAAAAA:/share/out", "a.txt").unwrap(),
            "r@AAAAAAAAAAA:/share/out/a.txt"
        );
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem("/sd/out.zip"), "out");
        assert_eq!(archive_stem("backup.tar.zip"), "backup.tar");
        assert_eq!(archive_stem(".hidden"), ".hidden");
        assert_eq!(archive_stem("noext"), "noext");
    }
}
