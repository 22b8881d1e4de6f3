//! Configured remote shares and their persisted record format.

use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};
use crate::path::RemoteId;

/// Default SMB port.
pub const DEFAULT_SMB_PORT: u16 = 445;

/// Kind of remote protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RemoteType {
    /// SMB/CIFS share.
    Smb,
}

impl TryFrom<u8> for RemoteType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RemoteType::Smb),
            other => Err(format!("unknown remote type {}", other)),
        }
    }
}

impl From<RemoteType> for u8 {
    fn from(t: RemoteType) -> Self {
        match t {
            RemoteType::Smb => 1,
        }
    }
}

/// A configured remote share.
///
/// Serialized with one-letter keys, one JSON object per remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    #[serde(rename = "i")]
    pub id: RemoteId,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "t")]
    pub remote_type: RemoteType,
    /// `host` or `host:port`.
    #[serde(rename = "h")]
    pub host: String,
    #[serde(rename = "u", default)]
    pub username: String,
    /// Vault output; empty means no password.
    #[serde(rename = "p", default, skip_serializing_if = "String::is_empty")]
    pub encrypted_password: String,
    #[serde(rename = "s")]
    pub share: String,
    #[serde(rename = "d", default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
}

impl RemoteDescriptor {
    /// Create a new SMB descriptor with a freshly generated id.
    pub fn new_smb(name: impl Into<String>, host: impl Into<String>, share: impl Into<String>) -> Self {
        Self {
            id: RemoteId::generate(),
            name: name.into(),
            remote_type: RemoteType::Smb,
            host: host.into(),
            username: String::new(),
            encrypted_password: String::new(),
            share: share.into(),
            domain: String::new(),
        }
    }

    /// Split `host[:port]`, defaulting the port to 445.
    pub fn host_and_port(&self) -> VfsResult<(String, u16)> {
        parse_host_port(&self.host)
    }

    /// Whether a password is stored.
    pub fn has_password(&self) -> bool {
        !self.encrypted_password.is_empty()
    }

    /// Root path of this remote.
    pub fn base_path(&self) -> String {
        self.id.base_path()
    }

    /// Serialize this record as a standalone JSON object.
    pub fn to_record(&self) -> VfsResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a standalone JSON record.
    pub fn from_record(record: &str) -> VfsResult<Self> {
        serde_json::from_str(record)
            .map_err(|e| VfsError::Config(format!("invalid remote record: {}", e)))
    }
}

/// Parse `host[:port]`.
pub fn parse_host_port(value: &str) -> VfsResult<(String, u16)> {
    let value = value.trim();
    if value.is_empty() {
        return Err(VfsError::ConnectionFailed("empty host".to_string()));
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| VfsError::ConnectionFailed(format!("invalid port in {:?}", value)))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((value.to_string(), DEFAULT_SMB_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RemoteDescriptor {
        RemoteDescriptor {
            id: RemoteId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]),
            name: "NAS".to_string(),
            remote_type: RemoteType::Smb,
            host: "192.168.1.10:1445".to_string(),
            username: "alice".to_string(),
            encrypted_password: "blob".to_string(),
            share: "media".to_string(),
            domain: "WORKGROUP".to_string(),
        }
    }

    #[test]
    fn test_record_uses_short_keys() {
        let json: serde_json::Value =
            serde_json::from_str(&sample().to_record().unwrap()).unwrap();
        let obj = json.as_object().unwrap();
        for key in ["i", "n", "t", "h", "u", "p", "s", "d"] {
            assert!(obj.contains_key(key), "missing key {}", key);
        }
        assert_eq!(obj["t"], 1);
        assert_eq!(obj["i"], "AQIDBAUGBwg");
    }

    #[test]
    fn test_record_roundtrip() {
        let original = sample();
        let parsed = RemoteDescriptor::from_record(&original.to_record().unwrap()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let mut desc = sample();
        desc.encrypted_password.clear();
        desc.domain.clear();
        let record = desc.to_record().unwrap();
        assert!(!record.contains("\"p\""));
        assert!(!record.contains("\"d\""));
        assert!(!desc.has_password());
        assert_eq!(RemoteDescriptor::from_record(&record).unwrap(), desc);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let record = r#"{"i":"AQIDBAUGBwg","n":"x","t":7,"h":"h","s":"s"}"#;
        assert!(RemoteDescriptor::from_record(record).is_err());
    }

    #[test]
    fn test_host_port_parsing() {
        assert_eq!(
            parse_host_port("nas.local").unwrap(),
            ("nas.local".to_string(), 445)
        );
        assert_eq!(
            parse_host_port("10.0.0.2:1445").unwrap(),
            ("10.0.0.2".to_string(), 1445)
        );
        assert!(parse_host_port("nas:notaport").is_err());
        assert!(parse_host_port("").is_err());
        assert_eq!(sample().host_and_port().unwrap().1, 1445);
    }
}
