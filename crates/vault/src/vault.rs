//! AES-256-GCM encryption of remote passwords.
//!
//! Secrets are encoded as `base64url(iv(12) || ciphertext || tag(16))`
//! without padding. The key lives only in the keystore and is created on
//! first use.

use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fmcore_common::VfsError;
use thiserror::Error;

use crate::keychain::{KeyStoreError, KeychainBackend, KeychainManager};

/// GCM nonce length.
pub const IV_LEN: usize = 12;

/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Errors produced by the credential vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No key exists in the keystore.
    #[error("vault key unavailable")]
    KeyUnavailable,

    /// The tag check failed: wrong key or tampered secret.
    #[error("secret authentication failed")]
    AuthenticationFailed,

    /// The secret is not valid base64url or is too short.
    #[error("malformed secret: {0}")]
    MalformedSecret(String),

    /// The cipher could not be constructed or sealing failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The keystore failed.
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

impl From<VaultError> for VfsError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::KeyUnavailable => VfsError::KeyUnavailable,
            VaultError::AuthenticationFailed => VfsError::AuthenticationFailed,
            VaultError::MalformedSecret(msg) => VfsError::MalformedSecret(msg),
            VaultError::Encryption(msg) => VfsError::Io(msg),
            VaultError::KeyStore(KeyStoreError::Missing { .. }) => VfsError::KeyUnavailable,
            VaultError::KeyStore(e) => VfsError::BackendUnavailable(e.to_string()),
        }
    }
}

/// Encrypts and decrypts remote passwords with a keystore-held key.
///
/// Safe to share between threads; key creation is serialized so two
/// concurrent first calls cannot race to store different keys.
pub struct CredentialVault<B: KeychainBackend> {
    keychain: KeychainManager<B>,
    create_lock: Mutex<()>,
}

impl<B: KeychainBackend> CredentialVault<B> {
    /// Create a vault over a keychain backend with the default entry names.
    pub fn new(backend: B) -> Self {
        Self::with_manager(KeychainManager::new(backend))
    }

    /// Create a vault over a configured keychain manager.
    pub fn with_manager(keychain: KeychainManager<B>) -> Self {
        Self {
            keychain,
            create_lock: Mutex::new(()),
        }
    }

    /// Encrypt a plaintext secret.
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let key = {
            let _guard = self
                .create_lock
                .lock()
                .map_err(|_| VaultError::Encryption("vault lock poisoned".to_string()))?;
            self.keychain.get_or_create_key()?
        };

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let iv: [u8; IV_LEN] = rand::random();
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption("seal failed".to_string()))?;

        let mut out = Vec::with_capacity(IV_LEN + sealed.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt a secret produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, secret: &str) -> VaultResult<String> {
        let key = match self.keychain.get_key() {
            Ok(key) => key,
            Err(KeyStoreError::Missing { .. }) => return Err(VaultError::KeyUnavailable),
            Err(e) => return Err(e.into()),
        };

        let data = URL_SAFE_NO_PAD
            .decode(secret.trim())
            .map_err(|e| VaultError::MalformedSecret(e.to_string()))?;
        if data.len() < IV_LEN {
            return Err(VaultError::MalformedSecret(format!(
                "secret is {} bytes, shorter than the {}-byte IV",
                data.len(),
                IV_LEN
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&data[..IV_LEN]), &data[IV_LEN..])
            .map_err(|_| VaultError::AuthenticationFailed)?;

        String::from_utf8(plaintext).map_err(|e| VaultError::MalformedSecret(e.to_string()))
    }

    /// Permanently delete the vault key. Every stored secret becomes undecryptable.
    pub fn clear_key(&self) -> VaultResult<()> {
        match self.keychain.delete_key() {
            Ok(()) | Err(KeyStoreError::Missing { .. }) => {
                tracing::warn!("Vault key cleared; stored remote passwords are no longer readable");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a key currently exists.
    pub fn has_key(&self) -> bool {
        self.keychain.has_key()
    }
}
