//! # fmcore Credential Vault
//!
//! Stores remote share passwords encrypted with AES-256-GCM under a key
//! that only ever lives in the platform keystore.
//!
//! ## Example Usage
//!
//! ```rust
//! use fmcore_vault::{CredentialVault, MemoryKeychain};
//!
//! let vault = CredentialVault::new(MemoryKeychain::new());
//! let blob = vault.encrypt("s3cret").unwrap();
//! assert_eq!(vault.decrypt(&blob).unwrap(), "s3cret");
//! ```
//!
//! ## Modules
//!
//! - [`keychain`]: Keystore backends and key management
//! - [`vault`]: Secret encryption and decryption

pub mod keychain;
pub mod vault;

pub use keychain::{
    KeyStoreError, KeyStoreResult, KeychainBackend, KeychainManager, MemoryKeychain,
    SystemKeychain, VAULT_KEY_LEN,
};
pub use vault::{CredentialVault, VaultError, VaultResult, IV_LEN, TAG_LEN};
