//! Persistent remote share storage.
//!
//! Remotes are kept as a list of independently serialized JSON records so
//! one damaged record never takes the others down with it. The store
//! persists to `<data_dir>/remotes.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use fmcore_common::{RemoteDescriptor, RemoteId};
use serde::{Deserialize, Serialize};

/// Wrapper for serializing the remote store.
#[derive(Debug, Serialize, Deserialize)]
struct RemoteStoreData {
    /// Version of the store format.
    version: u32,
    /// One JSON object string per remote.
    remotes: Vec<String>,
}

/// Thread-safe store for configured remotes, in insertion order.
pub struct RemoteStore {
    path: PathBuf,
    remotes: RwLock<Vec<RemoteDescriptor>>,
}

impl RemoteStore {
    /// Creates a new store that will persist to the given path.
    ///
    /// This does not load the file; call `load()` to read existing data.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            remotes: RwLock::new(Vec::new()),
        }
    }

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the store from disk.
    ///
    /// A missing file yields an empty store. Records that fail to parse are
    /// skipped with a warning.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!("Remote store not found at {:?}, starting empty", self.path);
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read remote store: {}", self.path.display()))?;

        let data: RemoteStoreData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse remote store: {}", self.path.display()))?;

        let mut loaded = Vec::with_capacity(data.remotes.len());
        for (index, record) in data.remotes.iter().enumerate() {
            match RemoteDescriptor::from_record(record) {
                Ok(desc) if loaded.iter().any(|d: &RemoteDescriptor| d.id == desc.id) => {
                    tracing::warn!(remote_id = %desc.id, "Skipping duplicate remote record");
                }
                Ok(desc) => loaded.push(desc),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping unreadable remote record");
                }
            }
        }

        let mut remotes = self
            .remotes
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on remote store"))?;
        *remotes = loaded;

        tracing::info!("Loaded {} remotes from {:?}", remotes.len(), self.path);
        Ok(())
    }

    /// Saves the store to disk using a temp file and rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create remote store directory: {}", parent.display())
            })?;
        }

        let remotes = self
            .remotes
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on remote store"))?;

        let records = remotes
            .iter()
            .map(|r| r.to_record())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to serialize remote record")?;
        let data = RemoteStoreData {
            version: 1,
            remotes: records,
        };
        let contents =
            serde_json::to_string_pretty(&data).context("Failed to serialize remote store")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).with_context(|| {
            format!("Failed to write temp remote store: {}", temp_path.display())
        })?;
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp remote store {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!("Saved {} remotes to {:?}", remotes.len(), self.path);
        Ok(())
    }

    /// Adds a remote. Fails if the id is already taken.
    ///
    /// Does not automatically save; call `save()` after making changes.
    pub fn add(&self, remote: RemoteDescriptor) -> Result<()> {
        let mut remotes = self
            .remotes
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on remote store"))?;

        if remotes.iter().any(|r| r.id == remote.id) {
            anyhow::bail!("Remote id {} already exists", remote.id);
        }
        tracing::info!(remote_id = %remote.id, name = %remote.name, "Adding remote");
        remotes.push(remote);
        Ok(())
    }

    /// Replaces an existing remote with the same id.
    pub fn update(&self, remote: RemoteDescriptor) -> Result<()> {
        let mut remotes = self
            .remotes
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on remote store"))?;

        let slot = remotes
            .iter_mut()
            .find(|r| r.id == remote.id)
            .ok_or_else(|| anyhow::anyhow!("Remote {} not found", remote.id))?;
        tracing::info!(remote_id = %remote.id, "Updating remote");
        *slot = remote;
        Ok(())
    }

    /// Removes a remote, returning it if it existed.
    pub fn remove(&self, id: &RemoteId) -> Result<Option<RemoteDescriptor>> {
        let mut remotes = self
            .remotes
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on remote store"))?;

        let position = remotes.iter().position(|r| &r.id == id);
        let removed = position.map(|idx| remotes.remove(idx));
        if let Some(ref remote) = removed {
            tracing::info!(remote_id = %remote.id, name = %remote.name, "Removed remote");
        }
        Ok(removed)
    }

    /// Looks up a remote by id.
    pub fn get(&self, id: &RemoteId) -> Result<Option<RemoteDescriptor>> {
        let remotes = self
            .remotes
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on remote store"))?;
        Ok(remotes.iter().find(|r| &r.id == id).cloned())
    }

    /// All remotes in insertion order.
    pub fn list(&self) -> Result<Vec<RemoteDescriptor>> {
        let remotes = self
            .remotes
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on remote store"))?;
        Ok(remotes.clone())
    }
}
