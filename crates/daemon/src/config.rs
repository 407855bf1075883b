//! Configuration management for the Sharegate daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/sharegate/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use access::confine;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("token_secret must be set")]
    MissingTokenSecret,

    #[error("link_key must be {expected} hex-encoded bytes: {reason}")]
    InvalidLinkKey { expected: usize, reason: String },

    #[error("part_size must be greater than 0")]
    InvalidPartSize,

    #[error("part_size ({part_size}) must not exceed max_upload_size ({max_upload_size})")]
    PartSizeExceedsLimit { part_size: u64, max_upload_size: u64 },

    #[error("default_valid_minutes must be greater than 0, got {0}")]
    InvalidLifetime(i64),

    #[error("temp_root {temp_root} must not be inside public_root {public_root}")]
    TempRootInsidePublicRoot {
        temp_root: String,
        public_root: String,
    },

    #[error("issuer must not be empty")]
    EmptyIssuer,

    #[error("api_path must start with '/', got {0}")]
    InvalidApiPath(String),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Sharegate daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener configuration.
    pub server: ServerConfig,

    /// Filesystem roots and upload limits.
    pub storage: StorageConfig,

    /// Token and link secrets.
    pub auth: AuthConfig,

    /// Log output configuration.
    pub logging: LoggingConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Prefix every API route is mounted under.
    pub api_path: String,
}

/// Filesystem roots and upload limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory every capability is confined to.
    pub public_root: PathBuf,

    /// Scratch directory for upload spooling and batch archives.
    pub temp_root: PathBuf,

    /// Bytes copied per upload part (default: 10MiB).
    pub part_size: u64,

    /// Largest accepted upload in bytes (default: 10GiB).
    pub max_upload_size: u64,
}

/// Token and link secrets.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for capability tokens. Required.
    pub token_secret: String,

    /// Hex-encoded AES-256 key for signed links. Random per process if empty.
    pub link_key: String,

    /// Issuer identity stamped into and required of every token.
    pub issuer: String,

    /// Token lifetime used when none is given.
    pub default_valid_minutes: i64,

    /// Bearer secret for the token issuance endpoint. Empty disables it.
    pub admin_secret: String,

    /// Interval between expired-link sweeps.
    pub sweep_interval_secs: u64,
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Directory for daily rolling log files. Unset logs to stderr only.
    pub directory: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4500,
            api_path: "/api/nas/v0".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_root: PathBuf::from("./public"),
            temp_root: std::env::temp_dir().join("sharegate"),
            part_size: 10 * 1024 * 1024,              // 10MiB
            max_upload_size: 10 * 1024 * 1024 * 1024, // 10GiB
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            link_key: String::new(),
            issuer: "sharegate".to_string(),
            default_valid_minutes: 60,
            admin_secret: String::new(),
            sweep_interval_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(secret: &str) -> &'static str {
            if secret.is_empty() {
                "<unset>"
            } else {
                "[REDACTED]"
            }
        }
        f.debug_struct("AuthConfig")
            .field("token_secret", &redact(&self.token_secret))
            .field("link_key", &redact(&self.link_key))
            .field("issuer", &self.issuer)
            .field("default_valid_minutes", &self.default_valid_minutes)
            .field("admin_secret", &redact(&self.admin_secret))
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sharegate")
        .join("config.toml")
}

impl ServerConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address: {}:{}", self.host, self.port))
    }
}

impl AuthConfig {
    /// Decode the configured link key, if any.
    pub fn link_key_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let key = self.link_key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(key).map_err(|e| ConfigError::InvalidLinkKey {
            expected: access::ticket::KEY_LENGTH,
            reason: e.to_string(),
        })?;
        if bytes.len() != access::ticket::KEY_LENGTH {
            return Err(ConfigError::InvalidLinkKey {
                expected: access::ticket::KEY_LENGTH,
                reason: format!("got {} bytes", bytes.len()),
            });
        }
        Ok(Some(bytes))
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHAREGATE_TOKEN_SECRET: Override the capability token secret
    /// - SHAREGATE_ADMIN_SECRET: Override the admin bearer secret
    /// - SHAREGATE_PUBLIC_ROOT: Override the public root directory
    /// - SHAREGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("SHAREGATE_TOKEN_SECRET") {
            if !secret.is_empty() {
                tracing::info!("Overriding token_secret from environment");
                self.auth.token_secret = secret;
            }
        }

        if let Ok(secret) = std::env::var("SHAREGATE_ADMIN_SECRET") {
            if !secret.is_empty() {
                tracing::info!("Overriding admin_secret from environment");
                self.auth.admin_secret = secret;
            }
        }

        if let Ok(root) = std::env::var("SHAREGATE_PUBLIC_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding public_root from environment: {}", root);
                self.storage.public_root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("SHAREGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.logging.level = level;
            }
        }
    }

    /// Log level to start with, honouring `SHAREGATE_LOG_LEVEL` before
    /// [`apply_env_overrides`](Self::apply_env_overrides) has run.
    ///
    /// The subscriber has to exist before the overrides are applied so that
    /// they are logged.
    pub fn effective_log_level(&self) -> String {
        match std::env::var("SHAREGATE_LOG_LEVEL") {
            Ok(level) if !level.is_empty() => level,
            _ => self.logging.level.clone(),
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is missing or outside the
    /// valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_secret.is_empty() {
            return Err(ConfigError::MissingTokenSecret);
        }

        self.auth.link_key_bytes()?;

        if self.auth.issuer.trim().is_empty() {
            return Err(ConfigError::EmptyIssuer);
        }

        if self.auth.default_valid_minutes <= 0 {
            return Err(ConfigError::InvalidLifetime(self.auth.default_valid_minutes));
        }

        if self.storage.part_size == 0 {
            return Err(ConfigError::InvalidPartSize);
        }

        if self.storage.part_size > self.storage.max_upload_size {
            return Err(ConfigError::PartSizeExceedsLimit {
                part_size: self.storage.part_size,
                max_upload_size: self.storage.max_upload_size,
            });
        }

        // Ephemeral archives must never be reachable through a capability.
        if confine::is_inclusive(&self.storage.public_root, &self.storage.temp_root) {
            return Err(ConfigError::TempRootInsidePublicRoot {
                temp_root: self.storage.temp_root.display().to_string(),
                public_root: self.storage.public_root.display().to_string(),
            });
        }

        if !self.server.api_path.starts_with('/') {
            return Err(ConfigError::InvalidApiPath(self.server.api_path.clone()));
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Create the public and temp roots if they do not exist.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.storage.public_root, &self.storage.temp_root] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
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

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.auth.token_secret = "test-secret".to_string();
        config.storage.public_root = PathBuf::from("/srv/public");
        config.storage.temp_root = PathBuf::from("/var/tmp/sharegate");
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4500);
        assert_eq!(config.server.api_path, "/api/nas/v0");
        assert_eq!(config.storage.part_size, 10 * 1024 * 1024);
        assert_eq!(config.auth.issuer, "sharegate");
        assert_eq!(config.auth.default_valid_minutes, 60);
        assert_eq!(config.auth.sweep_interval_secs, 60);
        assert!(config.auth.token_secret.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_default_temp_root_outside_default_public_root() {
        let config = Config::default();
        assert!(config.storage.temp_root.ends_with("sharegate"));
        assert!(!confine::is_inclusive(
            &config.storage.public_root,
            &config.storage.temp_root
        ));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 8080

[auth]
token_secret = "s3cret"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.token_secret, "s3cret");
        assert_eq!(config.auth.issuer, "sharegate");
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000
api_path = "/files"

[storage]
public_root = "/data/public"
temp_root = "/data/tmp"
part_size = 1048576
max_upload_size = 104857600

[auth]
token_secret = "abc"
link_key = "0000000000000000000000000000000000000000000000000000000000000000"
issuer = "nas"
default_valid_minutes = 15
admin_secret = "admin"
sweep_interval_secs = 5

[logging]
level = "debug"
directory = "/var/log/sharegate"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.api_path, "/files");
        assert_eq!(config.storage.public_root, PathBuf::from("/data/public"));
        assert_eq!(config.storage.part_size, 1024 * 1024);
        assert_eq!(config.auth.default_valid_minutes, 15);
        assert_eq!(config.auth.link_key_bytes().unwrap(), Some(vec![0u8; 32]));
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/sharegate"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nport = 1");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[server]
port = "not a number"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let config = valid_config();
        let toml = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let config = valid_config();
        config.save(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("sharegate"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = valid_config();
        config.storage.public_root = temp_dir.path().join("public");
        config.storage.temp_root = temp_dir.path().join("tmp");

        config.ensure_directories().unwrap();
        assert!(config.storage.public_root.is_dir());
        assert!(config.storage.temp_root.is_dir());
    }

    #[test]
    fn test_bind_addr() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr().unwrap().port(), 4500);

        let bad = ServerConfig {
            host: "not a host".to_string(),
            ..ServerConfig::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = valid_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("test-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_token_secret() {
        let mut config = valid_config();
        config.auth.token_secret.clear();
        assert_eq!(config.validate(), Err(ConfigError::MissingTokenSecret));
    }

    #[test]
    fn test_validate_link_key() {
        let mut config = valid_config();

        config.auth.link_key = "zz".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLinkKey { .. })
        ));

        config.auth.link_key = "00ff".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLinkKey { .. })
        ));

        config.auth.link_key = "ab".repeat(32);
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.link_key_bytes().unwrap().unwrap().len(), 32);
    }

    #[test]
    fn test_validate_part_size() {
        let mut config = valid_config();
        config.storage.part_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPartSize));

        config.storage.part_size = 2048;
        config.storage.max_upload_size = 1024;
        assert_eq!(
            config.validate(),
            Err(ConfigError::PartSizeExceedsLimit {
                part_size: 2048,
                max_upload_size: 1024
            })
        );
    }

    #[test]
    fn test_validate_lifetime() {
        let mut config = valid_config();
        config.auth.default_valid_minutes = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidLifetime(0)));

        config.auth.default_valid_minutes = -5;
        assert_eq!(config.validate(), Err(ConfigError::InvalidLifetime(-5)));
    }

    #[test]
    fn test_validate_temp_root_inside_public_root() {
        let mut config = valid_config();
        config.storage.temp_root = PathBuf::from("/srv/public/.tmp");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TempRootInsidePublicRoot { .. })
        ));

        config.storage.temp_root = PathBuf::from("/srv/public-tmp");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_issuer() {
        let mut config = valid_config();
        config.auth.issuer = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyIssuer));
    }

    #[test]
    fn test_validate_api_path() {
        let mut config = valid_config();
        config.server.api_path = "api".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidApiPath("api".to_string()))
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = valid_config();
        config.logging.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.logging.level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_secrets() {
        std::env::set_var("SHAREGATE_TOKEN_SECRET", "from-env");
        std::env::set_var("SHAREGATE_ADMIN_SECRET", "admin-env");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.auth.token_secret, "from-env");
        assert_eq!(config.auth.admin_secret, "admin-env");

        std::env::remove_var("SHAREGATE_TOKEN_SECRET");
        std::env::remove_var("SHAREGATE_ADMIN_SECRET");
    }

    #[test]
    #[serial]
    fn test_env_override_public_root_and_level() {
        std::env::set_var("SHAREGATE_PUBLIC_ROOT", "/mnt/share");
        std::env::set_var("SHAREGATE_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.storage.public_root, PathBuf::from("/mnt/share"));
        assert_eq!(config.logging.level, "trace");

        std::env::remove_var("SHAREGATE_PUBLIC_ROOT");
        std::env::remove_var("SHAREGATE_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_effective_log_level() {
        let mut config = Config::default();
        config.logging.level = "warn".to_string();
        std::env::remove_var("SHAREGATE_LOG_LEVEL");
        assert_eq!(config.effective_log_level(), "warn");

        std::env::set_var("SHAREGATE_LOG_LEVEL", "");
        assert_eq!(config.effective_log_level(), "warn");

        std::env::set_var("SHAREGATE_LOG_LEVEL", "debug");
        assert_eq!(config.effective_log_level(), "debug");
        // Resolving the level leaves the config itself untouched.
        assert_eq!(config.logging.level, "warn");

        std::env::remove_var("SHAREGATE_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("SHAREGATE_TOKEN_SECRET", "");

        let mut config = valid_config();
        config.apply_env_overrides();

        assert_eq!(config.auth.token_secret, "test-secret");

        std::env::remove_var("SHAREGATE_TOKEN_SECRET");
    }
}
