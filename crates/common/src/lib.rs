//! # fmcore Common Library
//!
//! Shared vocabulary for the fmcore virtual filesystem.
//!
//! ## Overview
//!
//! Every backend (local storage, SAF trees, OTG volumes, the root shell and
//! remote SMB shares) reports and accepts the same types:
//!
//! - **Entries**: one backend-independent record per filesystem object
//! - **Path classification**: pure mapping from a path to its backend family
//! - **Remote paths**: `r@<id>:<relative>` encoding and id generation
//! - **Remote descriptors**: the persisted one-record-per-remote format
//!
//! ## Example Usage
//!
//! ```rust
//! use fmcore_common::{BackendKind, PathClassifier, RemoteId};
//!
//! let classifier = PathClassifier::new("/storage/emulated/0", vec![], vec![]);
//! assert_eq!(classifier.classify("/storage/emulated/0/Download"), BackendKind::Local);
//!
//! let id = RemoteId::generate();
//! let kind = classifier.classify(&id.path_for("movies"));
//! assert!(matches!(kind, BackendKind::Remote { .. }));
//! ```
//!
//! ## Modules
//!
//! - [`entry`]: Directory entries and path helpers
//! - [`classify`]: Backend classification
//! - [`path`]: Remote ids and remote path encoding
//! - [`remote`]: Remote share descriptors
//! - [`error`]: Error types

pub mod classify;
pub mod entry;
pub mod error;
pub mod path;
pub mod remote;

pub use classify::{lexical_normalize, BackendKind, PathClassifier};
pub use entry::{
    base_name, join_path, parent_path, sort_entries, Entry, CHILD_COUNT_UNKNOWABLE,
    CHILD_COUNT_UNKNOWN,
};
pub use error::{VfsError, VfsResult};
pub use path::{gen_id, is_remote_path, RemoteId, RemotePath, REMOTE_PREFIX, REMOTE_PREFIX_LEN};
pub use remote::{parse_host_port, RemoteDescriptor, RemoteType, DEFAULT_SMB_PORT};
