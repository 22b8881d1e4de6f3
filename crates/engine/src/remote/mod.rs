//! Remote SMB shares: persisted descriptors, live sessions and the backend
//! adapter the router uses.

pub mod backend;
pub mod registry;
pub mod session;
pub mod smb;
pub mod store;

use std::sync::Arc;

use fmcore_vault::{CredentialVault, KeychainBackend};

pub use backend::RemoteBackend;
pub use registry::SessionRegistry;
pub use session::{RemoteSession, SessionTimeouts};
pub use smb::{MemoryConnector, SmbConnectParams, SmbConnector, SmbDirEntry, SmbShare};
pub use store::RemoteStore;

/// Vault handle shared by every session.
pub type SharedVault = Arc<CredentialVault<Arc<dyn KeychainBackend>>>;
