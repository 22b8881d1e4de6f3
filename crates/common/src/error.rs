//! Error types shared by every fmcore backend.

use thiserror::Error;

/// Virtual filesystem error type covering all backend failure modes.
#[derive(Debug, Clone, Error)]
pub enum VfsError {
    // Routing errors
    /// The backend that owns the path cannot currently serve it.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The path does not exist on its backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The path cannot be used for this operation (synthetic entry, malformed remote path).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    // Archive errors
    /// The archive is encrypted and no password was supplied.
    #[error("archive requires a password")]
    NeedPassword,

    /// The supplied archive password was rejected.
    #[error("wrong archive password")]
    WrongPassword,

    /// The archive could not be parsed.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// An archive entry resolved outside the extraction root.
    #[error("path traversal rejected: {0}")]
    TraversalRejected(String),

    // Vault errors
    /// No vault key exists in the keystore.
    #[error("vault key unavailable")]
    KeyUnavailable,

    /// The secret failed its authentication tag check.
    #[error("secret authentication failed")]
    AuthenticationFailed,

    /// The secret blob could not be decoded.
    #[error("malformed secret: {0}")]
    MalformedSecret(String),

    // Remote errors
    /// The remote transport could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote rejected the credentials.
    #[error("authentication rejected by {host}")]
    AuthFailed {
        /// Host that rejected the login.
        host: String,
    },

    /// The job was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// A rename would cross filesystems; the caller must copy instead.
    #[error("crosses devices: {0}")]
    CrossDevice(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type alias for filesystem operations.
pub type VfsResult<T> = std::result::Result<T, VfsError>;

impl VfsError {
    /// Returns true for failures caused by the transport rather than the request.
    ///
    /// Plain I/O failures are not transport failures: they may come from the
    /// caller's own reader or writer.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            VfsError::ConnectionFailed(_) | VfsError::BackendUnavailable(_)
        )
    }
}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => VfsError::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => VfsError::PermissionDenied(err.to_string()),
            ErrorKind::CrossesDevices => VfsError::CrossDevice(err.to_string()),
            _ => VfsError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for VfsError {
    fn from(err: serde_json::Error) -> Self {
        VfsError::Io(format!("serialization failed: {}", err))
    }
}
