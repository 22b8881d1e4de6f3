//! SMB client capability.
//!
//! The engine does not speak SMB itself. A host plugs in an [`SmbConnector`]
//! that opens an authenticated, mounted share; sessions drive it through
//! [`SmbShare`]. [`MemoryConnector`] serves shares from memory.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fmcore_common::{VfsError, VfsResult};

/// `FILE_ATTRIBUTE_HIDDEN`.
pub const ATTR_HIDDEN: u32 = 0x02;

/// `FILE_ATTRIBUTE_DIRECTORY`.
pub const ATTR_DIRECTORY: u32 = 0x10;

/// Everything needed to open a share.
#[derive(Clone)]
pub struct SmbConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub share: String,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl std::fmt::Debug for SmbConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("share", &self.share)
            .finish()
    }
}

/// One raw directory record as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbDirEntry {
    pub name: String,
    pub attributes: u32,
    pub size: u64,
    pub modified_millis: i64,
}

impl SmbDirEntry {
    /// Whether the directory attribute bit is set.
    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    /// Whether the hidden attribute bit is set.
    pub fn is_hidden(&self) -> bool {
        self.attributes & ATTR_HIDDEN != 0
    }
}

/// Opens shares.
pub trait SmbConnector: Send + Sync {
    /// Connect, authenticate and mount. Must honour both timeouts.
    fn connect(&self, params: &SmbConnectParams) -> VfsResult<Box<dyn SmbShare>>;
}

/// A mounted share. Paths are share-relative with `/` separators; the
/// empty string is the share root.
///
/// A lost connection must be reported as `VfsError::ConnectionFailed`;
/// every other error leaves the share mounted.
pub trait SmbShare: Send {
    /// Raw directory listing, including `.` and `..` if the server sends them.
    fn list(&mut self, path: &str) -> VfsResult<Vec<SmbDirEntry>>;

    /// Attributes of one path.
    fn stat(&mut self, path: &str) -> VfsResult<SmbDirEntry>;

    /// Open a file for reading.
    fn open_read(&mut self, path: &str) -> VfsResult<Box<dyn Read + Send>>;

    /// Create or replace a file with the content of `data`.
    fn write(&mut self, path: &str, data: &mut dyn Read) -> VfsResult<u64>;

    /// Create one directory.
    fn mkdir(&mut self, path: &str) -> VfsResult<()>;

    /// Remove a file or an empty directory.
    fn remove(&mut self, path: &str) -> VfsResult<()>;

    /// Rename within the share.
    fn rename(&mut self, from: &str, to: &str) -> VfsResult<()>;

    /// Release the connection.
    fn close(&mut self) {}
}

#[derive(Debug, Clone)]
enum MemoryNode {
    Dir { attributes: u32, modified_millis: i64 },
    File { attributes: u32, modified_millis: i64, data: Vec<u8> },
}

/// In-memory share contents, shared between a connector and its shares.
#[derive(Debug, Default)]
pub struct MemoryShareState {
    nodes: BTreeMap<String, MemoryNode>,
    /// Number of successful connects.
    pub connects: usize,
    /// When set, every share operation fails with a connection error.
    pub broken: bool,
}

impl MemoryShareState {
    /// Add a directory (parents are not created implicitly).
    pub fn add_dir(&mut self, path: &str, hidden: bool) {
        let attributes = ATTR_DIRECTORY | if hidden { ATTR_HIDDEN } else { 0 };
        self.nodes.insert(
            path.to_string(),
            MemoryNode::Dir {
                attributes,
                modified_millis: 0,
            },
        );
    }

    /// Add a file.
    pub fn add_file(&mut self, path: &str, data: &[u8], hidden: bool) {
        self.nodes.insert(
            path.to_string(),
            MemoryNode::File {
                attributes: if hidden { ATTR_HIDDEN } else { 0 },
                modified_millis: 1_700_000_000_000,
                data: data.to_vec(),
            },
        );
    }

    /// File content, if present.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.get(path) {
            Some(MemoryNode::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    fn record(name: &str, node: &MemoryNode) -> SmbDirEntry {
        match node {
            MemoryNode::Dir {
                attributes,
                modified_millis,
            } => SmbDirEntry {
                name: name.to_string(),
                attributes: *attributes,
                size: 0,
                modified_millis: *modified_millis,
            },
            MemoryNode::File {
                attributes,
                modified_millis,
                data,
            } => SmbDirEntry {
                name: name.to_string(),
                attributes: *attributes,
                size: data.len() as u64,
                modified_millis: *modified_millis,
            },
        }
    }
}

fn parent_of(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

fn name_of(path: &str) -> &str {
    path.rfind('/').map(|i| &path[i + 1..]).unwrap_or(path)
}

/// Connector serving one in-memory share with fixed credentials.
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryShareState>>,
    username: String,
    password: String,
}

impl MemoryConnector {
    /// Create a connector that accepts exactly these credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryShareState::default())),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Shared handle to the share contents.
    pub fn state(&self) -> Arc<Mutex<MemoryShareState>> {
        self.state.clone()
    }
}

impl SmbConnector for MemoryConnector {
    fn connect(&self, params: &SmbConnectParams) -> VfsResult<Box<dyn SmbShare>> {
        if params.username != self.username || params.password != self.password {
            return Err(VfsError::AuthFailed {
                host: params.host.clone(),
            });
        }
        let mut state = lock_state(&self.state)?;
        if state.broken {
            return Err(VfsError::ConnectionFailed(format!(
                "{}:{} unreachable",
                params.host, params.port
            )));
        }
        state.connects += 1;
        Ok(Box::new(MemoryShare {
            state: self.state.clone(),
        }))
    }
}

fn lock_state(
    state: &Arc<Mutex<MemoryShareState>>,
) -> VfsResult<std::sync::MutexGuard<'_, MemoryShareState>> {
    state
        .lock()
        .map_err(|_| VfsError::ConnectionFailed("share state poisoned".to_string()))
}

struct MemoryShare {
    state: Arc<Mutex<MemoryShareState>>,
}

impl MemoryShare {
    fn with_state<T>(
        &self,
        op: impl FnOnce(&mut MemoryShareState) -> VfsResult<T>,
    ) -> VfsResult<T> {
        let mut state = lock_state(&self.state)?;
        if state.broken {
            return Err(VfsError::ConnectionFailed("connection reset".to_string()));
        }
        op(&mut state)
    }
}

impl SmbShare for MemoryShare {
    fn list(&mut self, path: &str) -> VfsResult<Vec<SmbDirEntry>> {
        self.with_state(|state| {
            if !path.is_empty() && !matches!(state.nodes.get(path), Some(MemoryNode::Dir { .. })) {
                return Err(VfsError::NotFound(path.to_string()));
            }
            let mut out = vec![
                SmbDirEntry {
                    name: ".".to_string(),
                    attributes: ATTR_DIRECTORY,
                    size: 0,
                    modified_millis: 0,
                },
                SmbDirEntry {
                    name: "..".to_string(),
                    attributes: ATTR_DIRECTORY,
                    size: 0,
                    modified_millis: 0,
                },
            ];
            for (key, node) in &state.nodes {
                if parent_of(key) == path && key != path {
                    out.push(MemoryShareState::record(name_of(key), node));
                }
            }
            Ok(out)
        })
    }

    fn stat(&mut self, path: &str) -> VfsResult<SmbDirEntry> {
        self.with_state(|state| {
            if path.is_empty() {
                return Ok(SmbDirEntry {
                    name: String::new(),
                    attributes: ATTR_DIRECTORY,
                    size: 0,
                    modified_millis: 0,
                });
            }
            state
                .nodes
                .get(path)
                .map(|node| MemoryShareState::record(name_of(path), node))
                .ok_or_else(|| VfsError::NotFound(path.to_string()))
        })
    }

    fn open_read(&mut self, path: &str) -> VfsResult<Box<dyn Read + Send>> {
        self.with_state(|state| match state.nodes.get(path) {
            Some(MemoryNode::File { data, .. }) => {
                Ok(Box::new(Cursor::new(data.clone())) as Box<dyn Read + Send>)
            }
            Some(MemoryNode::Dir { .. }) => Err(VfsError::InvalidPath(format!("is a directory: {}", path))),
            None => Err(VfsError::NotFound(path.to_string())),
        })
    }

    fn write(&mut self, path: &str, data: &mut dyn Read) -> VfsResult<u64> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)?;
        self.with_state(|state| {
            let parent = parent_of(path);
            if !parent.is_empty() && !matches!(state.nodes.get(parent), Some(MemoryNode::Dir { .. })) {
                return Err(VfsError::NotFound(parent.to_string()));
            }
            let len = buf.len() as u64;
            state.nodes.insert(
                path.to_string(),
                MemoryNode::File {
                    attributes: 0,
                    modified_millis: 1_700_000_000_000,
                    data: buf,
                },
            );
            Ok(len)
        })
    }

    fn mkdir(&mut self, path: &str) -> VfsResult<()> {
        self.with_state(|state| {
            if state.nodes.contains_key(path) {
                return Err(VfsError::PermissionDenied(format!("exists: {}", path)));
            }
            state.add_dir(path, false);
            Ok(())
        })
    }

    fn remove(&mut self, path: &str) -> VfsResult<()> {
        self.with_state(|state| {
            let prefix = format!("{}/", path);
            if state.nodes.keys().any(|k| k.starts_with(&prefix)) {
                return Err(VfsError::PermissionDenied(format!("directory not empty: {}", path)));
            }
            state
                .nodes
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| VfsError::NotFound(path.to_string()))
        })
    }

    fn rename(&mut self, from: &str, to: &str) -> VfsResult<()> {
        self.with_state(|state| {
            if state.nodes.contains_key(to) {
                return Err(VfsError::PermissionDenied(format!("target exists: {}", to)));
            }
            let node = state
                .nodes
                .remove(from)
                .ok_or_else(|| VfsError::NotFound(from.to_string()))?;
            let prefix = format!("{}/", from);
            let moved: Vec<String> = state
                .nodes
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in moved {
                if let Some(child) = state.nodes.remove(&key) {
                    state.nodes.insert(format!("{}{}", to, &key[from.len()..]), child);
                }
            }
            state.nodes.insert(to.to_string(), node);
            Ok(())
        })
    }
}
