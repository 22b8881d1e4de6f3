//! Remote identifiers and the `r@<id>:<relative>` path encoding.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};

/// Marker that starts every remote path.
pub const REMOTE_PREFIX: &str = "r@";

/// Raw remote id length in bytes.
pub const REMOTE_ID_BYTES: usize = 8;

/// Encoded remote id length (base64url, no padding).
pub const REMOTE_ID_ENCODED_LEN: usize = 11;

/// Length of `r@` + encoded id + `:`.
pub const REMOTE_PREFIX_LEN: usize = REMOTE_PREFIX.len() + REMOTE_ID_ENCODED_LEN + 1;

static ID_COUNTER: AtomicU8 = AtomicU8::new(0);

/// Opaque 8-byte identifier of a configured remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId([u8; REMOTE_ID_BYTES]);

impl RemoteId {
    /// Create a remote id from raw bytes.
    pub fn from_bytes(bytes: [u8; REMOTE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; REMOTE_ID_BYTES] {
        &self.0
    }

    /// Generate a fresh id.
    ///
    /// Layout: two random bytes, the low byte of the current millisecond
    /// clock, a per-process counter byte (wrapping), then the low 32 bits of
    /// the clock in tens of seconds. Unique enough to key stored remotes;
    /// not a security token.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let random: [u8; 2] = rand::random();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tens = ((millis / 10_000) as u32).to_be_bytes();

        Self([
            random[0],
            random[1],
            millis as u8,
            counter,
            tens[0],
            tens[1],
            tens[2],
            tens[3],
        ])
    }

    /// Parse the base64url form.
    pub fn parse(encoded: &str) -> VfsResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| VfsError::InvalidPath(format!("bad remote id {:?}: {}", encoded, e)))?;
        let bytes: [u8; REMOTE_ID_BYTES] = bytes.try_into().map_err(|_| {
            VfsError::InvalidPath(format!("remote id {:?} is not {} bytes", encoded, REMOTE_ID_BYTES))
        })?;
        Ok(Self(bytes))
    }

    /// Base64url form without padding.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Root path of this remote (`r@<id>:`).
    pub fn base_path(&self) -> String {
        format!("{}{}:", REMOTE_PREFIX, self.encode())
    }

    /// Full path of a share-relative location on this remote.
    pub fn path_for(&self, relative: &str) -> String {
        format!("{}{}", self.base_path(), relative.trim_start_matches('/'))
    }
}

/// Shorthand for [`RemoteId::generate`].
pub fn gen_id() -> RemoteId {
    RemoteId::generate()
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl TryFrom<String> for RemoteId {
    type Error = VfsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.encode()
    }
}

/// Whether a path addresses a remote share.
pub fn is_remote_path(path: &str) -> bool {
    path.starts_with(REMOTE_PREFIX)
}

/// A decoded remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    /// The remote the path lives on.
    pub id: RemoteId,
    /// Share-relative path, without a leading slash; empty for the share root.
    pub relative: String,
}

impl RemotePath {
    /// Split `r@<id>:<relative>` into its parts.
    pub fn parse(path: &str) -> VfsResult<Self> {
        if !is_remote_path(path) || path.len() < REMOTE_PREFIX_LEN {
            return Err(VfsError::InvalidPath(format!("not a remote path: {}", path)));
        }
        let (encoded, rest) = match (
            path.get(REMOTE_PREFIX.len()..REMOTE_PREFIX_LEN - 1),
            path.get(REMOTE_PREFIX_LEN - 1..),
        ) {
            (Some(encoded), Some(rest)) if rest.starts_with(':') => (encoded, &rest[1..]),
            _ => {
                return Err(VfsError::InvalidPath(format!(
                    "missing ':' in remote path: {}",
                    path
                )))
            }
        };
        let id = RemoteId::parse(encoded)?;
        let relative = rest
            .trim_start_matches('/')
            .trim_end_matches('/')
            .to_string();
        Ok(Self { id, relative })
    }

    /// Re-encode as a full path.
    pub fn to_path(&self) -> String {
        self.id.path_for(&self.relative)
    }
}
