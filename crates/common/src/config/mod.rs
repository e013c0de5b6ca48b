//! Unified configuration management
//!
//! This module is the single source of truth for Rollcall service
//! configuration. All fields, documentation and default values live here.
//! Config files use TOML and load with full type safety.

pub mod verification;

pub use verification::VerificationConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Main configuration for the Rollcall service host
///
/// Contains the host-level settings plus one section per mounted service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RollcallConfig {
    /// Server instance name
    ///
    /// Identifies this instance in a cluster deployment, e.g.
    /// rollcall-01, rollcall-prod-east-1.
    #[serde(default = "default_name")]
    pub name: String,

    /// Runtime environment identifier
    ///
    /// - "dev": development, relaxed checks
    /// - "prod": production, strict checks
    /// - "test": automated testing
    #[serde(default = "default_env")]
    pub env: String,

    /// Directory holding the SQLite database files
    ///
    /// The audit database is stored as `{sqlite_path}/verification_audit.db`.
    #[serde(
        default = "default_sqlite_path",
        serialize_with = "serialize_pathbuf",
        deserialize_with = "deserialize_pathbuf"
    )]
    pub sqlite_path: PathBuf,

    /// HTTP bind configuration
    #[serde(default)]
    pub bind: BindConfig,

    /// Verification coordinator configuration
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Observability configuration (logging)
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP bind configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BindConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Observability configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// Filter level for logging
    ///
    /// Supports EnvFilter syntax (e.g. "info,sqlx=warn"). Default "info".
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    /// Log output configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Log output configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// Log output target
    ///
    /// - "console": stdout only (default)
    /// - "file": write to files under `path`
    #[serde(default = "default_log_output")]
    pub output: String,

    /// Rotate log files daily (only when output = "file")
    #[serde(default)]
    pub rotate: bool,

    /// Log file directory (only when output = "file")
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl RollcallConfig {
    /// Load and validate a configuration file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            source: Box::new(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                field: "name".to_string(),
            });
        }
        match self.env.as_str() {
            "dev" | "prod" | "test" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "env".to_string(),
                    value: other.to_string(),
                });
            }
        }
        self.verification.validate()?;
        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind.host, self.bind.port)
    }
}

impl Default for RollcallConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            env: default_env(),
            sqlite_path: default_sqlite_path(),
            bind: BindConfig::default(),
            verification: VerificationConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_name() -> String {
    "rollcall-default".to_string()
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8470
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("database")
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

fn serialize_pathbuf<S>(path: &Path, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    path.display().to_string().serialize(serializer)
}

fn deserialize_pathbuf<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(PathBuf::from(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RollcallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr(), "0.0.0.0:8470");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = RollcallConfig::from_toml_str("").unwrap();
        assert_eq!(config.name, "rollcall-default");
        assert_eq!(config.env, "dev");
    }

    #[test]
    fn test_parse_full_toml() {
        let content = r#"
            name = "rollcall-prod-east-1"
            env = "prod"
            sqlite_path = "/var/lib/rollcall"

            [bind]
            host = "127.0.0.1"
            port = 9000

            [verification]
            ttl_min_secs = 30
            ttl_max_secs = 3600
            default_threshold = 0.8

            [observability]
            filter_level = "info,sqlx=warn"
        "#;

        let config = RollcallConfig::from_toml_str(content).unwrap();
        assert_eq!(config.name, "rollcall-prod-east-1");
        assert_eq!(config.bind.port, 9000);
        assert_eq!(config.verification.ttl_max_secs, 3600);
        assert_eq!(config.sqlite_path, PathBuf::from("/var/lib/rollcall"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "name = \"rollcall-file-test\"\n").unwrap();

        let config = RollcallConfig::load_from_file(&path).unwrap();
        assert_eq!(config.name, "rollcall-file-test");

        let missing = RollcallConfig::load_from_file(temp_dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_invalid_env_rejected() {
        let result = RollcallConfig::from_toml_str("env = \"staging\"");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field, .. }) if field == "env"
        ));
    }

    #[test]
    fn test_config_round_trip() {
        let config = RollcallConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let back = RollcallConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(back.name, config.name);
        assert_eq!(back.bind.port, config.bind.port);
    }
}
