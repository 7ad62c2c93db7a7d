//! Client configuration.
//!
//! Stored as TOML; every field has a default so an empty file is valid:
//!
//! ```toml
//! actor_id = 61401
//! chunk_size = 4194304
//! max_in_flight = 4
//! default_permissions = 0o755
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of concurrent chunk calls per file.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Settings shared by uploads and downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Actor recorded as `changedBy` on uploaded metadata.
    #[serde(default)]
    pub actor_id: i64,

    /// Maximum chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Upper bound on concurrent chunk transport calls for one file.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Permission bits for downloads whose metadata carries none.
    #[serde(default = "default_permissions")]
    pub default_permissions: u32,
}

fn default_chunk_size() -> usize {
    chunkdrive_transfer::DEFAULT_CHUNK_SIZE
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_permissions() -> u32 {
    chunkdrive_transfer::DEFAULT_PERMISSION_BITS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            actor_id: 0,
            chunk_size: default_chunk_size(),
            max_in_flight: default_max_in_flight(),
            default_permissions: default_permissions(),
        }
    }
}

impl ClientConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".into()));
        }
        if self.default_permissions > 0o7777 {
            return Err(ConfigError::Invalid(format!(
                "default_permissions {:o} is not a permission mode",
                self.default_permissions
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.default_permissions, 0o755);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = ClientConfig::from_toml_str("actor_id = 61401\nmax_in_flight = 8\n").unwrap();
        assert_eq!(config.actor_id, 61401);
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.chunk_size, chunkdrive_transfer::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = ClientConfig::from_toml_str("chunk_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_in_flight_rejected() {
        assert!(ClientConfig::from_toml_str("max_in_flight = 0").is_err());
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = ClientConfig::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn toml_roundtrip() {
        let config = ClientConfig {
            actor_id: 7,
            chunk_size: 1024,
            max_in_flight: 2,
            default_permissions: 0o644,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(ClientConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "actor_id = 3\n").unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap().actor_id, 3);
        assert!(matches!(
            ClientConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
