//! # fmcore Engine
//!
//! The file-manager core: one router in front of every storage backend, and
//! an archive engine that works on top of it.
//!
//! ## Overview
//!
//! - **Routing**: paths are classified (internal, SAF, OTG, remote, root)
//!   and dispatched to the matching [`backend::FileBackend`]
//! - **Root shell**: a long-lived `su` process lists, stats and mutates
//!   paths the app cannot reach, remounting read-only partitions on demand
//! - **Remote shares**: SMB sessions keyed by `r@<id>:` paths, with stored
//!   passwords decrypted through the credential vault
//! - **Archives**: zip compression, resumable extraction with password
//!   prompts, and browsing without extraction
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fmcore_engine::{ArchiveEngine, Config, FileBackendRouter};
//! use tokio_util::sync::CancellationToken;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let router = Arc::new(FileBackendRouter::from_config(&config, None)?);
//!
//!     let engine = ArchiveEngine::new(router, config.archive.buffer_size);
//!     let cancel = CancellationToken::new();
//!     engine.compress(&["/sd/docs".to_string()], "/sd/docs.zip", None, &cancel)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`archive`]: Compression, extraction and archive browsing
//! - [`backend`]: Backend trait plus local and volume backends
//! - [`clock`]: Calendar conversions for listings and zip timestamps
//! - [`config`]: Configuration loading and defaults
//! - [`remote`]: Remote store, SMB sessions and the remote backend
//! - [`root`]: Root shell executor and its backend
//! - [`router`]: Path dispatch and cross-backend moves

pub mod archive;
pub mod backend;
pub mod clock;
pub mod config;
pub mod remote;
pub mod root;
pub mod router;

// Re-export shared types for convenience
pub use fmcore_common;
pub use fmcore_vault;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export archive types for convenience
pub use archive::{
    ArchiveEngine, ArchiveIndex, ArchiveSource, CompressReport, ExtractReport, ExtractState,
    Extraction, DEFAULT_ARCHIVE_BUFFER,
};

// Re-export backend types for convenience
pub use backend::{FileBackend, LocalBackend, ReadSeek, VolumeBackend, WriteStream};

// Re-export remote types for convenience
pub use remote::{
    MemoryConnector, RemoteBackend, RemoteSession, RemoteStore, SessionRegistry, SessionTimeouts,
    SharedVault, SmbConnector,
};

// Re-export root types for convenience
pub use root::{PrivilegedShell, RootBackend, RootShellExecutor, SuShell};

// Re-export router types for convenience
pub use router::{FileBackendRouter, ListOptions, SortOrder};
