//! Registry of live remote sessions.
//!
//! At most one session exists per configured remote. Sessions are created
//! lazily from the remote store on first use and live until closed.

use std::sync::Arc;

use dashmap::DashMap;
use fmcore_common::{RemoteId, VfsError, VfsResult};

use super::session::{RemoteSession, SessionTimeouts};
use super::smb::SmbConnector;
use super::store::RemoteStore;
use super::SharedVault;

/// Thread-safe session registry using DashMap.
pub struct SessionRegistry {
    sessions: DashMap<RemoteId, Arc<RemoteSession>>,
    store: Arc<RemoteStore>,
    connector: Option<Arc<dyn SmbConnector>>,
    vault: SharedVault,
    timeouts: SessionTimeouts,
}

impl SessionRegistry {
    /// Create an empty registry.
    ///
    /// Without a connector every remote path reports the backend as unavailable.
    pub fn new(
        store: Arc<RemoteStore>,
        connector: Option<Arc<dyn SmbConnector>>,
        vault: SharedVault,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            connector,
            vault,
            timeouts,
        }
    }

    /// The remote store sessions are created from.
    pub fn store(&self) -> &Arc<RemoteStore> {
        &self.store
    }

    /// Get the session for a remote, creating it if needed.
    pub fn session(&self, id: &RemoteId) -> VfsResult<Arc<RemoteSession>> {
        if let Some(existing) = self.sessions.get(id) {
            return Ok(existing.clone());
        }

        let connector = self.connector.clone().ok_or_else(|| {
            VfsError::BackendUnavailable("no SMB client is configured".to_string())
        })?;
        let descriptor = self
            .store
            .get(id)
            .map_err(|e| VfsError::Config(e.to_string()))?
            .ok_or_else(|| VfsError::NotFound(format!("remote {}", id)))?;

        let session = self
            .sessions
            .entry(*id)
            .or_insert_with(|| {
                tracing::debug!(remote_id = %id, "Creating remote session");
                Arc::new(RemoteSession::new(
                    descriptor,
                    connector,
                    self.vault.clone(),
                    self.timeouts,
                ))
            })
            .clone();
        Ok(session)
    }

    /// Close and forget the session for a remote.
    pub fn close(&self, id: &RemoteId) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                tracing::info!(remote_id = %id, "Closed remote session");
                true
            }
            None => false,
        }
    }

    /// Close every session.
    pub fn close_all(&self) {
        let ids: Vec<RemoteId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.close(&id);
        }
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
