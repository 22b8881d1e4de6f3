//! Configuration management for fmcore.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/fmcore/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("internal_root must be an absolute path, got {0}")]
    RelativeInternalRoot(String),

    #[error("connect_timeout_secs must be greater than 0")]
    ZeroConnectTimeout,

    #[error("idle_timeout_secs must be greater than 0")]
    ZeroIdleTimeout,

    #[error("archive buffer_size must be between 512 and 16777216 bytes, got {0}")]
    InvalidBufferSize(usize),

    #[error("SAF grant {0} is not under any configured saf_roots entry")]
    OrphanSafGrant(String),

    #[error("su binary not found: {0}")]
    SuBinaryNotFound(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,

    /// Storage volume layout.
    pub storage: StorageConfig,

    /// Root shell settings.
    pub root: RootConfig,

    /// Remote share settings.
    pub remote: RemoteConfig,

    /// Archive engine settings.
    pub archive: ArchiveConfig,
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory for persisted state (remote store).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Storage volume layout used for path classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Internal (primary) storage root.
    pub internal_root: PathBuf,

    /// Mounted OTG volume roots.
    pub otg_roots: Vec<PathBuf>,

    /// Removable volumes that are only reachable through granted trees.
    pub saf_roots: Vec<PathBuf>,

    /// Tree roots the user has granted access to.
    pub saf_grants: Vec<PathBuf>,
}

/// Root shell configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RootConfig {
    /// Use the root shell for paths normal storage APIs cannot reach.
    pub enabled: bool,

    /// Binary that spawns the privileged shell.
    pub su_binary: String,
}

/// Remote share configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Transport connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Socket idle timeout in seconds.
    pub idle_timeout_secs: u64,
}

/// Archive engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Copy buffer size in bytes.
    pub buffer_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            internal_root: PathBuf::from("/storage/emulated/0"),
            otg_roots: Vec::new(),
            saf_roots: Vec::new(),
            saf_grants: Vec::new(),
        }
    }
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            su_binary: "su".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 120,
            idle_timeout_secs: 240,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { buffer_size: 8192 }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fmcore")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fmcore")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - FMCORE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FMCORE_ROOT_ENABLED: Enable or disable the root shell (true/false/1/0)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FMCORE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.general.log_level = level;
            }
        }

        if let Ok(value) = std::env::var("FMCORE_ROOT_ENABLED") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.root.enabled = true,
                "0" | "false" | "no" => self.root.enabled = false,
                "" => {}
                other => tracing::warn!("Ignoring FMCORE_ROOT_ENABLED={:?}", other),
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.general.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.general.log_level.clone()));
        }

        if !self.storage.internal_root.is_absolute() {
            return Err(ConfigError::RelativeInternalRoot(
                self.storage.internal_root.display().to_string(),
            ));
        }

        if self.remote.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        if self.remote.idle_timeout_secs == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }

        if !(512..=16 * 1024 * 1024).contains(&self.archive.buffer_size) {
            return Err(ConfigError::InvalidBufferSize(self.archive.buffer_size));
        }

        for grant in &self.storage.saf_grants {
            if !self.storage.saf_roots.iter().any(|root| grant.starts_with(root)) {
                return Err(ConfigError::OrphanSafGrant(grant.display().to_string()));
            }
        }

        if self.root.enabled {
            let su = Path::new(&self.root.su_binary);
            let found = if su.is_absolute() {
                su.exists()
            } else {
                which::which(&self.root.su_binary).is_ok()
            };
            if !found {
                return Err(ConfigError::SuBinaryNotFound(self.root.su_binary.clone()));
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Path of the remote store file.
    pub fn remotes_path(&self) -> PathBuf {
        self.general.data_dir.join("remotes.json")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.internal_root, PathBuf::from("/storage/emulated/0"));
        assert!(config.storage.otg_roots.is_empty());
        assert!(!config.root.enabled);
        assert_eq!(config.root.su_binary, "su");
        assert_eq!(config.remote.connect_timeout_secs, 120);
        assert_eq!(config.remote.idle_timeout_secs, 240);
        assert_eq!(config.archive.buffer_size, 8192);
    }

    #[test]
    fn test_default_data_dir() {
        let config = GeneralConfig::default();
        assert!(config.data_dir.to_string_lossy().contains("fmcore"));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[general]
log_level = "debug"

[remote]
connect_timeout_secs = 30
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.remote.connect_timeout_secs, 30);
        assert_eq!(config.remote.idle_timeout_secs, 240);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[general]
data_dir = "/custom/data"
log_level = "trace"

[storage]
internal_root = "/sdcard"
otg_roots = ["/mnt/media_rw/usb1"]
saf_roots = ["/storage/1A2B-3C4D"]
saf_grants = ["/storage/1A2B-3C4D/DCIM"]

[root]
enabled = true
su_binary = "/system/xbin/su"

[remote]
connect_timeout_secs = 10
idle_timeout_secs = 20

[archive]
buffer_size = 65536
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.general.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.storage.internal_root, PathBuf::from("/sdcard"));
        assert_eq!(config.storage.otg_roots, vec![PathBuf::from("/mnt/media_rw/usb1")]);
        assert_eq!(
            config.storage.saf_grants,
            vec![PathBuf::from("/storage/1A2B-3C4D/DCIM")]
        );
        assert!(config.root.enabled);
        assert_eq!(config.root.su_binary, "/system/xbin/su");
        assert_eq!(config.remote.idle_timeout_secs, 20);
        assert_eq!(config.archive.buffer_size, 65536);
        assert_eq!(config.remotes_path(), PathBuf::from("/custom/data/remotes.json"));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[general
log_level = "debug"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[archive]
buffer_size = "large"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.general.log_level = "warn".to_string();
        original.storage.saf_roots = vec![PathBuf::from("/storage/ABCD")];
        original.root.enabled = true;

        let loaded = Config::from_toml(&original.to_toml().unwrap()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_creates_directories_and_loads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("config.toml");

        let mut config = Config::default();
        config.archive.buffer_size = 4096;
        config.save(&path).unwrap();

        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "this is not [valid toml").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("fmcore/config.toml"));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.general.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );

        config.general.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_relative_internal_root() {
        let mut config = Config::default();
        config.storage.internal_root = PathBuf::from("sdcard");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RelativeInternalRoot(_))
        ));
    }

    #[test]
    fn test_validate_timeouts() {
        let mut config = Config::default();
        config.remote.connect_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroConnectTimeout));

        config.remote.connect_timeout_secs = 1;
        config.remote.idle_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroIdleTimeout));
    }

    #[test]
    fn test_validate_buffer_size_bounds() {
        let mut config = Config::default();
        config.archive.buffer_size = 511;
        assert_eq!(config.validate(), Err(ConfigError::InvalidBufferSize(511)));

        config.archive.buffer_size = 512;
        assert!(config.validate().is_ok());

        config.archive.buffer_size = 16 * 1024 * 1024 + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_orphan_saf_grant() {
        let mut config = Config::default();
        config.storage.saf_grants = vec![PathBuf::from("/storage/FFFF-0000/Music")];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OrphanSafGrant(_))
        ));

        config.storage.saf_roots = vec![PathBuf::from("/storage/FFFF-0000")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_su_binary() {
        let mut config = Config::default();
        config.root.enabled = true;
        config.root.su_binary = "/nonexistent/bin/su-fmcore".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SuBinaryNotFound(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var("FMCORE_LOG_LEVEL");
        std::env::set_var("FMCORE_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.general.log_level, "debug");

        std::env::remove_var("FMCORE_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("FMCORE_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.general.log_level, "info");

        std::env::remove_var("FMCORE_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_root_enabled() {
        std::env::remove_var("FMCORE_LOG_LEVEL");
        std::env::set_var("FMCORE_ROOT_ENABLED", "true");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert!(config.root.enabled);

        std::env::set_var("FMCORE_ROOT_ENABLED", "0");
        config.apply_env_overrides();
        assert!(!config.root.enabled);

        std::env::set_var("FMCORE_ROOT_ENABLED", "maybe");
        config.apply_env_overrides();
        assert!(!config.root.enabled);

        std::env::remove_var("FMCORE_ROOT_ENABLED");
    }
}
