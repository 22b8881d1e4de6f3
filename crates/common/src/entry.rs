//! Backend-independent directory entries.

use serde::{Deserialize, Serialize};

use crate::path::is_remote_path;

/// Child count has not been computed yet.
pub const CHILD_COUNT_UNKNOWN: i64 = -1;

/// Child count cannot be computed for this entry.
pub const CHILD_COUNT_UNKNOWABLE: i64 = -2;

/// One filesystem object as reported by any backend listing.
///
/// Section headers and grid dividers are synthetic presentation markers;
/// they never correspond to an on-disk object and every backend operation
/// rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Backend-qualified path (plain absolute path or `r@<id>:<rel>`).
    pub path: String,
    /// Display name (last path component).
    pub name: String,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Number of children, or one of the `CHILD_COUNT_*` sentinels.
    pub child_count: i64,
    /// Size in bytes; 0 for directories unless pre-computed.
    pub size: u64,
    /// Last modification time in milliseconds since the Unix epoch.
    pub modified_millis: i64,
    /// Synthetic grouping marker.
    #[serde(default)]
    pub is_section_header: bool,
    /// Synthetic layout marker.
    #[serde(default)]
    pub is_grid_divider: bool,
}

impl Entry {
    /// Create a file entry.
    pub fn file(path: impl Into<String>, name: impl Into<String>, size: u64, modified_millis: i64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            is_directory: false,
            child_count: CHILD_COUNT_UNKNOWABLE,
            size,
            modified_millis,
            is_section_header: false,
            is_grid_divider: false,
        }
    }

    /// Create a directory entry with an uncomputed child count.
    pub fn directory(path: impl Into<String>, name: impl Into<String>, modified_millis: i64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            is_directory: true,
            child_count: CHILD_COUNT_UNKNOWN,
            size: 0,
            modified_millis,
            is_section_header: false,
            is_grid_divider: false,
        }
    }

    /// Create a section header marker.
    pub fn section_header(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            path: String::new(),
            name: title,
            is_directory: false,
            child_count: CHILD_COUNT_UNKNOWABLE,
            size: 0,
            modified_millis: 0,
            is_section_header: true,
            is_grid_divider: false,
        }
    }

    /// Create a grid divider marker.
    pub fn grid_divider() -> Self {
        Self {
            path: String::new(),
            name: String::new(),
            is_directory: false,
            child_count: CHILD_COUNT_UNKNOWABLE,
            size: 0,
            modified_millis: 0,
            is_section_header: false,
            is_grid_divider: true,
        }
    }

    /// True for presentation markers that do not exist on disk.
    pub fn is_synthetic(&self) -> bool {
        self.is_section_header || self.is_grid_divider
    }

    /// Whether the child count still needs computing.
    pub fn needs_child_count(&self) -> bool {
        self.is_directory && !self.is_synthetic() && self.child_count == CHILD_COUNT_UNKNOWN
    }

    /// Record a computed child count. Negative values collapse to unknowable.
    pub fn set_child_count(&mut self, count: i64) {
        self.child_count = if count < 0 { CHILD_COUNT_UNKNOWABLE } else { count };
    }
}

/// Sort entries directories-first, then case-insensitive by name.
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
}

/// Last path component of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    let start = match trimmed.rfind('/') {
        Some(idx) => idx + 1,
        // `r@<id>:name` has no slash before the first component.
        None if is_remote_path(trimmed) => trimmed.find(':').map_or(0, |idx| idx + 1),
        None => 0,
    };
    &trimmed[start..]
}

/// Join a parent path and a child name with a single slash.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') || parent.ends_with(':') || parent.is_empty() {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Parent of a slash-separated path, if any.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        Some("/")
    } else {
        Some(&trimmed[..idx])
    }
}
