//! Configuration system for the Ferry CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ferry_relay::{Credentials, TlsOptions, TransferOptions};
use url::Url;

/// Largest accepted chunk size
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Ferry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay configuration
    #[serde(default)]
    pub relay: RelayConfig,
    /// Shared directory configuration
    #[serde(default)]
    pub share: ShareConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay URL (`turns://host[:port]`)
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Relay account name
    #[serde(default)]
    pub username: String,
    /// Relay account secret
    #[serde(default)]
    pub secret: String,
    /// Accept any relay certificate (lab use only)
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Extra PEM CA bundle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
}

/// Shared directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Directory served to peers
    #[serde(default = "default_share_dir")]
    pub dir: PathBuf,
    /// Largest file offered for download (0 = unlimited)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Largest accepted upload (0 = unlimited)
    #[serde(default)]
    pub max_upload_bytes: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per Data frame
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Log every chunk
    #[serde(default)]
    pub debug: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_relay_url() -> String {
    format!("turns://relay.example.com:{}", ferry_relay::DEFAULT_RELAY_PORT)
}

fn default_share_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ferry-share")
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_chunk_size() -> usize {
    ferry_relay::DEFAULT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            username: String::new(),
            secret: String::new(),
            insecure_skip_verify: false,
            ca_file: None,
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            dir: default_share_dir(),
            max_file_bytes: default_max_file_bytes(),
            max_upload_bytes: 0,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            debug: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ferry/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validate configuration
    ///
    /// Credentials are not required here: commands that never dial the relay
    /// work without them, and the relay client rejects empty ones itself.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate relay URL
        let url = Url::parse(&self.relay.url)
            .with_context(|| format!("Invalid relay URL: {}", self.relay.url))?;
        if url.host_str().is_none_or(str::is_empty) {
            anyhow::bail!("Relay URL '{}' has no host", self.relay.url);
        }

        // Validate shared directory
        if self.share.dir.as_os_str().is_empty() {
            anyhow::bail!("Shared directory must not be empty");
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        // Validate chunk size
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        Ok(())
    }

    /// Relay credentials
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.relay.username.clone(), self.relay.secret.clone())
    }

    /// TLS verification settings for the relay
    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            insecure_skip_verify: self.relay.insecure_skip_verify,
            ca_file: self.relay.ca_file.clone(),
        }
    }

    /// Per-session transfer options
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.transfer.chunk_size,
            debug: self.transfer.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.url, "turns://relay.example.com:5349");
        assert_eq!(config.share.max_file_bytes, 100 * 1024 * 1024);
        assert_eq!(config.share.max_upload_bytes, 0);
        assert_eq!(config.transfer.chunk_size, 32 * 1024);
        assert!(!config.transfer.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.share.dir = PathBuf::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.relay.url = "turns://".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.relay.url = "not a url".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());
        config.transfer.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());
        config.transfer.chunk_size = MAX_CHUNK_SIZE;
        assert!(config.validate().is_ok());

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [relay]
            url = "turns://relay.internal"
            username = "bot"
            secret = "s3cret"

            [transfer]
            debug = true
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.username, "bot");
        assert!(config.transfer.debug);
        assert_eq!(config.transfer.chunk_size, 32 * 1024);
        assert_eq!(config.share.max_file_bytes, 100 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.transfer_options().chunk_size, 32 * 1024);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.relay.username = "bot".to_string();
        config.share.max_upload_bytes = 4096;
        config.relay.ca_file = Some(PathBuf::from("/etc/ferry/ca.pem"));
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.relay.username, "bot");
        assert_eq!(loaded.share.max_upload_bytes, 4096);
        assert_eq!(loaded.tls_options().ca_file, Some(PathBuf::from("/etc/ferry/ca.pem")));
    }
}
