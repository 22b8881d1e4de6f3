//! [`FileBackend`] adapter over a remote session.

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use fmcore_common::{BackendKind, Entry, VfsError, VfsResult};

use super::session::RemoteSession;
use crate::backend::{FileBackend, WriteStream};

/// Serves `r@<id>:` paths through a lazily connected session.
pub struct RemoteBackend {
    session: Arc<RemoteSession>,
}

impl RemoteBackend {
    /// Wrap a session.
    pub fn new(session: Arc<RemoteSession>) -> Self {
        Self { session }
    }

    fn connected(&self) -> VfsResult<&RemoteSession> {
        self.session.connect()?;
        Ok(&self.session)
    }
}

/// Stages remote uploads in a local temp file and sends them on finish.
struct RemoteWriteStream {
    session: Arc<RemoteSession>,
    path: String,
    spool: std::fs::File,
}

impl Write for RemoteWriteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.spool.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.spool.flush()
    }
}

impl WriteStream for RemoteWriteStream {
    fn finish(mut self: Box<Self>) -> VfsResult<()> {
        self.spool.flush()?;
        self.spool.rewind()?;
        self.session.connect()?;
        let sent = self.session.write_from(&self.path, &mut self.spool)?;
        tracing::debug!(path = %self.path, bytes = sent, "Remote upload committed");
        Ok(())
    }
}

impl FileBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote {
            id: self.session.descriptor().id.encode(),
        }
    }

    fn list(&self, path: &str, include_hidden: bool) -> VfsResult<Vec<Entry>> {
        self.connected()?.list_dir(path, include_hidden)
    }

    fn stat(&self, path: &str) -> VfsResult<Entry> {
        self.connected()?.stat(path)
    }

    fn open_read(&self, path: &str) -> VfsResult<Box<dyn Read + Send>> {
        self.connected()?.open_read(path)
    }

    fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteStream>> {
        self.session.relative(path)?;
        Ok(Box::new(RemoteWriteStream {
            session: self.session.clone(),
            path: path.to_string(),
            spool: tempfile::tempfile()?,
        }))
    }

    fn mkdir(&self, path: &str) -> VfsResult<()> {
        let session = self.connected()?;
        let relative = session.relative(path)?;
        let base = session.descriptor().base_path();
        let mut current = String::new();
        for part in relative.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            let full = format!("{}{}", base, current);
            match session.stat(&full) {
                Ok(entry) if entry.is_directory => continue,
                Ok(_) => {
                    return Err(VfsError::PermissionDenied(format!("not a directory: {}", full)))
                }
                Err(VfsError::NotFound(_)) => session.mkdir(&full)?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> VfsResult<()> {
        let session = self.connected()?;
        let entry = session.stat(path)?;
        if entry.is_directory {
            for child in session.list_dir(path, true)? {
                self.delete(&child.path)?;
            }
        }
        session.remove(path)
    }

    fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.connected()?.rename(from, to)
    }

    fn child_count(&self, path: &str, include_hidden: bool) -> VfsResult<i64> {
        self.connected()?.child_count(path, include_hidden)
    }

    fn exists(&self, path: &str) -> VfsResult<bool> {
        match self.connected()?.stat(path) {
            Ok(_) => Ok(true),
            Err(VfsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::session::SessionTimeouts;
    use crate::remote::smb::MemoryConnector;
    use fmcore_common::RemoteDescriptor;
    use fmcore_vault::{CredentialVault, KeychainBackend, MemoryKeychain};

    fn backend() -> (RemoteBackend, Arc<MemoryConnector>, RemoteDescriptor) {
        let keychain: Arc<dyn KeychainBackend> = Arc::new(MemoryKeychain::new());
        let vault = Arc::new(CredentialVault::new(keychain));
        let connector = Arc::new(MemoryConnector::new("", ""));
        let desc = RemoteDescriptor::new_smb("NAS", "nas", "media");
        let session = Arc::new(RemoteSession::new(
            desc.clone(),
            connector.clone(),
            vault,
            SessionTimeouts::default(),
        ));
        (RemoteBackend::new(session), connector, desc)
    }

    #[test]
    fn test_lazy_connect_on_first_use() {
        let (backend, connector, desc) = backend();
        assert_eq!(connector.state().lock().unwrap().connects, 0);
        assert!(backend.list(&desc.base_path(), false).unwrap().is_empty());
        assert_eq!(connector.state().lock().unwrap().connects, 1);
    }

    #[test]
    fn test_write_visible_after_finish() {
        let (backend, connector, desc) = backend();
        let path = desc.id.path_for("upload.bin");

        let mut stream = backend.open_write(&path).unwrap();
        stream.write_all(b"abc").unwrap();
        assert!(connector.state().lock().unwrap().file("upload.bin").is_none());
        stream.finish().unwrap();

        assert_eq!(
            connector.state().lock().unwrap().file("upload.bin"),
            Some(b"abc".to_vec())
        );
        let mut content = String::new();
        backend
            .open_read(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "abc");
    }

    #[test]
    fn test_mkdir_parents_and_recursive_delete() {
        let (backend, connector, desc) = backend();
        let deep = desc.id.path_for("a/b/c");
        backend.mkdir(&deep).unwrap();
        backend.mkdir(&deep).unwrap();
        assert!(backend.stat(&deep).unwrap().is_directory);

        let mut stream = backend.open_write(&desc.id.path_for("a/b/c/f.txt")).unwrap();
        stream.write_all(b"x").unwrap();
        stream.finish().unwrap();

        backend.delete(&desc.id.path_for("a")).unwrap();
        assert!(!backend.exists(&desc.id.path_for("a")).unwrap());
        assert!(connector.state().lock().unwrap().file("a/b/c/f.txt").is_none());
    }

    #[test]
    fn test_rename_and_count() {
        let (backend, _, desc) = backend();
        backend.mkdir(&desc.id.path_for("old")).unwrap();
        backend.mkdir(&desc.id.path_for("old/inner")).unwrap();
        backend
            .rename(&desc.id.path_for("old"), &desc.id.path_for("new"))
            .unwrap();
        assert!(backend.exists(&desc.id.path_for("new/inner")).unwrap());
        assert_eq!(backend.child_count(&desc.id.path_for("new"), false).unwrap(), 1);
    }
}
