//! Keystore access for the vault key.
//!
//! The system backend uses the `keyring` crate:
//! - macOS: Keychain
//! - Windows: Credential Manager
//! - Linux: Secret Service (via D-Bus)
//!
//! [`MemoryKeychain`] keeps everything in process memory and is used by tests
//! and by hosts without a keystore.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// The service name used for keychain entries.
const SERVICE_NAME: &str = "fmcore";

/// The entry holding the AES key for remote credentials.
const DEFAULT_KEY_NAME: &str = "remote_credentials_key";

/// Length of the vault key in bytes (AES-256).
pub const VAULT_KEY_LEN: usize = 32;

/// Why the vault key could not be read, stored or created.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No vault key is stored under this entry.
    #[error("no vault key stored under {entry}")]
    Missing { entry: String },

    /// The keystore is locked or refused this process.
    #[error("keystore refused access: {0}")]
    Locked(String),

    /// The keystore service cannot be reached.
    #[error("keystore offline: {0}")]
    Offline(String),

    /// The stored value is not a usable AES-256 key.
    #[error("stored vault key is unusable: {0}")]
    CorruptKey(String),

    /// The system RNG could not produce a key.
    #[error("cannot generate vault key: {0}")]
    Entropy(String),

    /// Any other keystore failure.
    #[error("keystore failure: {0}")]
    Backend(String),
}

impl KeyStoreError {
    fn missing(entry: &str) -> Self {
        KeyStoreError::Missing {
            entry: entry.to_string(),
        }
    }
}

/// Result type for keystore operations.
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// A string store addressed by `(service, key)`. Absent entries are
/// [`KeyStoreError::Missing`].
pub trait KeychainBackend: Send + Sync {
    fn get_secret(&self, service: &str, key: &str) -> KeyStoreResult<String>;

    /// Create or overwrite an entry.
    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeyStoreResult<()>;

    fn delete_secret(&self, service: &str, key: &str) -> KeyStoreResult<()>;
}

impl<B: KeychainBackend + ?Sized> KeychainBackend for Arc<B> {
    fn get_secret(&self, service: &str, key: &str) -> KeyStoreResult<String> {
        (**self).get_secret(service, key)
    }

    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeyStoreResult<()> {
        (**self).set_secret(service, key, value)
    }

    fn delete_secret(&self, service: &str, key: &str) -> KeyStoreResult<()> {
        (**self).delete_secret(service, key)
    }
}

/// Keychain backend using the platform credential store.
pub struct SystemKeychain;

fn entry(service: &str, key: &str) -> KeyStoreResult<keyring::Entry> {
    keyring::Entry::new(service, key).map_err(|e| KeyStoreError::Backend(e.to_string()))
}

fn map_keyring_error(key: &str, e: keyring::Error) -> KeyStoreError {
    match e {
        keyring::Error::NoEntry => KeyStoreError::missing(key),
        keyring::Error::NoStorageAccess(inner) => KeyStoreError::Locked(inner.to_string()),
        keyring::Error::PlatformFailure(inner) => KeyStoreError::Offline(inner.to_string()),
        keyring::Error::BadEncoding(_) => {
            KeyStoreError::CorruptKey("stored value is not UTF-8".to_string())
        }
        keyring::Error::Ambiguous(_) => {
            KeyStoreError::Backend(format!("several keystore entries match {}", key))
        }
        other => KeyStoreError::Backend(other.to_string()),
    }
}

impl KeychainBackend for SystemKeychain {
    fn get_secret(&self, service: &str, key: &str) -> KeyStoreResult<String> {
        entry(service, key)?
            .get_password()
            .map_err(|e| map_keyring_error(key, e))
    }

    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeyStoreResult<()> {
        entry(service, key)?
            .set_password(value)
            .map_err(|e| map_keyring_error(key, e))
    }

    fn delete_secret(&self, service: &str, key: &str) -> KeyStoreResult<()> {
        entry(service, key)?
            .delete_credential()
            .map_err(|e| map_keyring_error(key, e))
    }
}

/// In-process keychain backend.
#[derive(Default)]
pub struct MemoryKeychain {
    storage: Mutex<HashMap<String, String>>,
}

impl MemoryKeychain {
    /// Create an empty in-memory keychain.
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(service: &str, key: &str) -> String {
        format!("{}:{}", service, key)
    }

    fn storage(&self) -> KeyStoreResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.storage
            .lock()
            .map_err(|_| KeyStoreError::Offline("memory keychain poisoned".to_string()))
    }
}

impl KeychainBackend for MemoryKeychain {
    fn get_secret(&self, service: &str, key: &str) -> KeyStoreResult<String> {
        self.storage()?
            .get(&Self::make_key(service, key))
            .cloned()
            .ok_or_else(|| KeyStoreError::missing(key))
    }

    fn set_secret(&self, service: &str, key: &str, value: &str) -> KeyStoreResult<()> {
        self.storage()?
            .insert(Self::make_key(service, key), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, service: &str, key: &str) -> KeyStoreResult<()> {
        match self.storage()?.remove(&Self::make_key(service, key)) {
            Some(_) => Ok(()),
            None => Err(KeyStoreError::missing(key)),
        }
    }
}

/// Keychain manager for the vault key.
pub struct KeychainManager<B: KeychainBackend> {
    backend: B,
    service: String,
    key_name: String,
}

impl<B: KeychainBackend> KeychainManager<B> {
    /// Create a new KeychainManager with the given backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            service: SERVICE_NAME.to_string(),
            key_name: DEFAULT_KEY_NAME.to_string(),
        }
    }

    /// Create a new KeychainManager with custom service and key names.
    pub fn with_names(backend: B, service: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            backend,
            service: service.into(),
            key_name: key_name.into(),
        }
    }

    /// Get the raw vault key.
    pub fn get_key(&self) -> KeyStoreResult<Vec<u8>> {
        let encoded = self.backend.get_secret(&self.service, &self.key_name)?;
        let key = decode_vault_key(&encoded)?;
        if key.len() != VAULT_KEY_LEN {
            return Err(KeyStoreError::CorruptKey(format!(
                "stored key is {} bytes, expected {}",
                key.len(),
                VAULT_KEY_LEN
            )));
        }
        Ok(key)
    }

    /// Store a raw vault key.
    pub fn store_key(&self, key: &[u8]) -> KeyStoreResult<()> {
        self.backend
            .set_secret(&self.service, &self.key_name, &encode_vault_key(key))
    }

    /// Delete the vault key.
    pub fn delete_key(&self) -> KeyStoreResult<()> {
        self.backend.delete_secret(&self.service, &self.key_name)
    }

    /// Get the vault key, or generate and store a new one if not found.
    pub fn get_or_create_key(&self) -> KeyStoreResult<Vec<u8>> {
        match self.get_key() {
            Ok(key) => Ok(key),
            Err(KeyStoreError::Missing { .. }) => {
                let key = generate_vault_key()?;
                self.store_key(&key)?;
                tracing::info!("Created new vault key in keychain service {}", self.service);
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }

    /// Check if a vault key exists.
    pub fn has_key(&self) -> bool {
        self.get_key().is_ok()
    }
}

impl KeychainManager<SystemKeychain> {
    /// Create a new KeychainManager with the system keychain backend.
    pub fn system() -> Self {
        Self::new(SystemKeychain)
    }
}

/// Fresh random 256-bit key.
fn generate_vault_key() -> KeyStoreResult<Vec<u8>> {
    use rand::RngCore;

    let mut key = vec![0u8; VAULT_KEY_LEN];
    rand::thread_rng()
        .try_fill_bytes(&mut key)
        .map_err(|e| KeyStoreError::Entropy(e.to_string()))?;
    Ok(key)
}

/// Decode a stored (standard base64) vault key.
pub fn decode_vault_key(encoded: &str) -> KeyStoreResult<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())
        .map_err(|e| KeyStoreError::CorruptKey(e.to_string()))
}

/// Encode a vault key for storage.
pub fn encode_vault_key(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}
