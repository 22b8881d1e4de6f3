//! Browsing an archive without extracting it.
//!
//! The central directory is read once into a flat list of entries, each
//! tagged with the virtual folder it lives in. Folders that exist only as
//! prefixes of file names are synthesized.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};

use fmcore_common::{sort_entries, Entry, VfsResult};
use zip::ZipArchive;

use super::sanitize::resolve_entry_target;
use super::{map_open_error, map_zip_error, zip_millis};

/// An archive entry and its virtual parent folder (`""` at the top level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub entry: Entry,
    pub virtual_dir: String,
    pub encrypted: bool,
}

/// Flat index of an archive's entries.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    entries: Vec<IndexedEntry>,
}

fn split_virtual(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

impl ArchiveIndex {
    /// Read the central directory. Works on encrypted archives without a
    /// password since only metadata is read.
    pub fn build<R: Read + Seek>(reader: R) -> VfsResult<Self> {
        let mut archive = ZipArchive::new(reader).map_err(map_open_error)?;

        let mut by_path: BTreeMap<String, IndexedEntry> = BTreeMap::new();
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).map_err(map_zip_error)?;
            let raw = file.name().to_string();
            let path = raw.trim_end_matches('/').to_string();
            if path.is_empty() || resolve_entry_target("/", &raw).is_err() {
                tracing::warn!(entry = %raw, "Ignoring unsafe archive entry name");
                continue;
            }

            let modified = file.last_modified().and_then(zip_millis).unwrap_or(0);
            let (dir, name) = split_virtual(&path);
            let entry = if file.is_dir() {
                Entry::directory(path.clone(), name, modified)
            } else {
                Entry::file(path.clone(), name, file.size(), modified)
            };
            by_path.insert(
                path.clone(),
                IndexedEntry {
                    entry,
                    virtual_dir: dir.to_string(),
                    encrypted: file.encrypted(),
                },
            );
        }

        // Synthesize folders implied by deeper names.
        let implied: Vec<String> = by_path
            .keys()
            .flat_map(|path| {
                path.match_indices('/')
                    .map(|(idx, _)| path[..idx].to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        for dir_path in implied {
            by_path.entry(dir_path.clone()).or_insert_with(|| {
                let (dir, name) = split_virtual(&dir_path);
                IndexedEntry {
                    entry: Entry::directory(dir_path.clone(), name, 0),
                    virtual_dir: dir.to_string(),
                    encrypted: false,
                }
            });
        }

        let mut children: HashMap<String, i64> = HashMap::new();
        for indexed in by_path.values() {
            *children.entry(indexed.virtual_dir.clone()).or_default() += 1;
        }
        let entries = by_path
            .into_values()
            .map(|mut indexed| {
                if indexed.entry.is_directory {
                    let count = children.get(&indexed.entry.path).copied().unwrap_or(0);
                    indexed.entry.set_child_count(count);
                }
                indexed
            })
            .collect();

        Ok(Self { entries })
    }

    /// Every entry, in path order.
    pub fn entries(&self) -> &[IndexedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry needs a password.
    pub fn is_encrypted(&self) -> bool {
        self.entries.iter().any(|e| e.encrypted)
    }

    /// Contents of one virtual folder, directories first. `""` or `"/"` is
    /// the top level.
    pub fn list(&self, dir: &str) -> Vec<Entry> {
        let dir = dir.trim_matches('/');
        let mut listed: Vec<Entry> = self
            .entries
            .iter()
            .filter(|e| e.virtual_dir == dir)
            .map(|e| e.entry.clone())
            .collect();
        sort_entries(&mut listed);
        listed
    }
}
