//! One live connection to a remote share.

use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fmcore_common::{join_path, sort_entries, Entry, RemoteDescriptor, RemotePath, VfsError, VfsResult};

use super::smb::{SmbConnectParams, SmbConnector, SmbDirEntry, SmbShare};
use super::SharedVault;

/// Connection lifecycle.
enum SessionState {
    Disconnected,
    Connecting,
    Connected(Box<dyn SmbShare>),
}

impl SessionState {
    fn label(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected(_) => "connected",
        }
    }
}

/// Transport timeouts applied on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub idle: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(120),
            idle: Duration::from_secs(240),
        }
    }
}

/// A session against one configured remote.
///
/// Connecting is serialized: while one caller is connecting, others fail
/// fast instead of queueing. A session broken by a transport error is torn
/// down to `Disconnected` and must be connected again; nothing is retried
/// automatically.
pub struct RemoteSession {
    descriptor: RemoteDescriptor,
    connector: Arc<dyn SmbConnector>,
    vault: SharedVault,
    timeouts: SessionTimeouts,
    state: Mutex<SessionState>,
}

impl RemoteSession {
    /// Create a disconnected session.
    pub fn new(
        descriptor: RemoteDescriptor,
        connector: Arc<dyn SmbConnector>,
        vault: SharedVault,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            descriptor,
            connector,
            vault,
            timeouts,
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    /// The remote this session serves.
    pub fn descriptor(&self) -> &RemoteDescriptor {
        &self.descriptor
    }

    fn lock_state(&self) -> VfsResult<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| VfsError::ConnectionFailed("session state poisoned".to_string()))
    }

    /// Whether the session currently holds a mounted share.
    pub fn is_connected(&self) -> bool {
        self.lock_state()
            .map(|s| matches!(*s, SessionState::Connected(_)))
            .unwrap_or(false)
    }

    /// Connect if not already connected.
    pub fn connect(&self) -> VfsResult<()> {
        {
            let mut state = self.lock_state()?;
            match *state {
                SessionState::Connected(_) => return Ok(()),
                SessionState::Connecting => {
                    return Err(VfsError::ConnectionFailed("already connecting".to_string()))
                }
                SessionState::Disconnected => *state = SessionState::Connecting,
            }
        }

        let result = self.open_share();

        let mut state = self.lock_state()?;
        match result {
            Ok(share) => {
                *state = SessionState::Connected(share);
                tracing::info!(
                    remote_id = %self.descriptor.id,
                    host = %self.descriptor.host,
                    share = %self.descriptor.share,
                    "Remote session connected"
                );
                Ok(())
            }
            Err(e) => {
                *state = SessionState::Disconnected;
                tracing::warn!(remote_id = %self.descriptor.id, error = %e, "Remote connect failed");
                Err(e)
            }
        }
    }

    fn open_share(&self) -> VfsResult<Box<dyn SmbShare>> {
        let (host, port) = self.descriptor.host_and_port()?;
        let password = if self.descriptor.has_password() {
            self.vault.decrypt(&self.descriptor.encrypted_password)?
        } else {
            String::new()
        };

        let params = SmbConnectParams {
            host,
            port,
            username: self.descriptor.username.clone(),
            password,
            domain: self.descriptor.domain.clone(),
            share: self.descriptor.share.clone(),
            connect_timeout: self.timeouts.connect,
            idle_timeout: self.timeouts.idle,
        };
        tracing::debug!(remote_id = %self.descriptor.id, ?params, "Opening remote share");
        self.connector.connect(&params)
    }

    /// Release the share. Idempotent.
    pub fn close(&self) {
        if let Ok(mut state) = self.lock_state() {
            if let SessionState::Connected(mut share) =
                std::mem::replace(&mut *state, SessionState::Disconnected)
            {
                share.close();
                tracing::info!(remote_id = %self.descriptor.id, "Remote session closed");
            }
        }
    }

    /// Run an operation against the mounted share.
    ///
    /// Transport failures tear the session down.
    pub(crate) fn with_share<T>(
        &self,
        op: impl FnOnce(&mut dyn SmbShare) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let mut state = self.lock_state()?;
        let result = match &mut *state {
            SessionState::Connected(share) => op(share.as_mut()),
            other => {
                return Err(VfsError::BackendUnavailable(format!(
                    "remote {} is {}",
                    self.descriptor.id,
                    other.label()
                )))
            }
        };

        if let Err(e) = &result {
            if e.is_connection_error() {
                tracing::warn!(
                    remote_id = %self.descriptor.id,
                    error = %e,
                    "Tearing down broken remote session"
                );
                if let SessionState::Connected(mut share) =
                    std::mem::replace(&mut *state, SessionState::Disconnected)
                {
                    share.close();
                }
            }
        }
        result
    }

    /// Share-relative part of a path on this remote.
    pub fn relative(&self, path: &str) -> VfsResult<String> {
        let parsed = RemotePath::parse(path)?;
        if parsed.id != self.descriptor.id {
            return Err(VfsError::InvalidPath(format!(
                "{} does not belong to remote {}",
                path, self.descriptor.id
            )));
        }
        Ok(parsed.relative)
    }

    /// Map a raw record to an entry under `parent_relative`.
    pub(crate) fn to_entry(&self, parent_relative: &str, raw: &SmbDirEntry) -> Entry {
        let relative = if parent_relative.is_empty() {
            raw.name.clone()
        } else {
            join_path(parent_relative, &raw.name)
        };
        let path = self.descriptor.id.path_for(&relative);
        if raw.is_directory() {
            Entry::directory(path, raw.name.clone(), raw.modified_millis)
        } else {
            Entry::file(path, raw.name.clone(), raw.size, raw.modified_millis)
        }
    }

    fn visible(raw: &SmbDirEntry, include_hidden: bool) -> bool {
        raw.name != "." && raw.name != ".." && (include_hidden || !raw.is_hidden())
    }

    /// List a directory on the share.
    pub fn list_dir(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>> {
        let relative = self.relative(path)?;
        let raw = self.with_share(|share| share.list(&relative))?;
        let mut entries: Vec<Entry> = raw
            .iter()
            .filter(|r| Self::visible(r, include_hidden))
            .map(|r| self.to_entry(&relative, r))
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Count the visible children of a directory.
    pub fn child_count(&self, path: &str, include_hidden: bool) -> VfsResult<i64> {
        let relative = self.relative(path)?;
        let raw = self.with_share(|share| share.list(&relative))?;
        Ok(raw.iter().filter(|r| Self::visible(r, include_hidden)).count() as i64)
    }

    /// Attributes of one path.
    pub fn stat(&self, path: &str) -> VfsResult<Entry> {
        let relative = self.relative(path)?;
        let raw = self.with_share(|share| share.stat(&relative))?;
        let parent = relative.rfind('/').map(|i| &relative[..i]).unwrap_or("");
        let mut entry = self.to_entry(parent, &raw);
        if relative.is_empty() {
            entry.name = self.descriptor.name.clone();
            entry.path = self.descriptor.base_path();
        }
        Ok(entry)
    }

    /// Open a file for reading.
    pub fn open_read(&self, path: &str) -> VfsResult<Box<dyn Read + Send>> {
        let relative = self.relative(path)?;
        self.with_share(|share| share.open_read(&relative))
    }

    /// Upload the content of `data` to a path.
    pub fn write_from(&self, path: &str, data: &mut dyn Read) -> VfsResult<u64> {
        let relative = self.relative(path)?;
        self.with_share(|share| share.write(&relative, data))
    }

    /// Create one directory.
    pub fn mkdir(&self, path: &str) -> VfsResult<()> {
        let relative = self.relative(path)?;
        self.with_share(|share| share.mkdir(&relative))
    }

    /// Remove a file or empty directory.
    pub fn remove(&self, path: &str) -> VfsResult<()> {
        let relative = self.relative(path)?;
        self.with_share(|share| share.remove(&relative))
    }

    /// Rename within the share.
    pub fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = self.relative(from)?;
        let to = self.relative(to)?;
        self.with_share(|share| share.rename(&from, &to))
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.close();
    }
}
