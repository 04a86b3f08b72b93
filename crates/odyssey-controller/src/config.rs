//! Configuration management for odyssey-controller
//!
//! This module handles loading, saving, and validating configuration for the
//! Odyssey controller CLI. Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Unix: `~/.config/odyssey/controller.toml`
//! - Windows: `%APPDATA%\odyssey\controller.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use odyssey_core::authz::AuthzConfig;
use odyssey_core::http_backend::{HttpBackendConfig, DEFAULT_BASE_URL};
use odyssey_core::poller::{PollPolicy, DEFAULT_MAX_ATTEMPTS};
use odyssey_core::rpc_ledger::RpcLedgerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Controller configuration
///
/// # Example TOML
///
/// ```toml
/// [backend]
/// base_url = "http://localhost:3001"
/// timeout_seconds = 30
///
/// [polling]
/// interval_seconds = 5
/// max_attempts = 60
///
/// [ledger]
/// network = "devnet"  # "devnet" | "testnet" | "mainnet-beta"
/// # rpc_url = "https://api.devnet.solana.com"
///
/// [storage]
/// # path = ""  # Empty = default location
///
/// [output]
/// format = "table"  # "table" | "json" | "quiet"
/// verbose = false
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Approval backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the approval backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Approval polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Wait before each status check
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Status checks before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_interval() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Cluster name: "devnet", "testnet", "mainnet-beta"
    #[serde(default = "default_network")]
    pub network: String,

    /// Explicit RPC endpoint (empty = public endpoint of `network`)
    #[serde(default)]
    pub rpc_url: Option<String>,
}

fn default_network() -> String {
    "devnet".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            rpc_url: None,
        }
    }
}

const NETWORKS: [&str; 3] = ["devnet", "testnet", "mainnet-beta"];

impl LedgerConfig {
    /// RPC endpoint to use: the explicit URL, else the cluster's public one.
    pub fn effective_rpc_url(&self) -> String {
        match &self.rpc_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("https://api.{}.solana.com", self.network),
        }
    }
}

/// Secure store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the secure store file (empty = default location)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format: "table", "json", "quiet"
    #[serde(default = "default_format")]
    pub format: String,

    /// Verbose output
    #[serde(default)]
    pub verbose: bool,
}

fn default_format() -> String {
    "table".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            verbose: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("xyz", "odyssey", "odyssey")
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("Invalid {field} '{value}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "Invalid {field} '{value}': must use http:// or https://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            Self::load(path)
        } else {
            Self::load_default()
        }
    }

    /// Get default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("controller.toml"))
    }

    /// Get the data directory path (for the secure store)
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Secure store location, falling back to the working directory when
    /// no platform data directory is known.
    pub fn storage_path(&self) -> PathBuf {
        match &self.storage.path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => Self::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("secure_store.json"),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        if let Some(path) = Self::default_path() {
            if !path.exists() {
                Self::default().save(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("backend base_url", &self.backend.base_url)?;
        if let Some(url) = self.ledger.rpc_url.as_deref().filter(|u| !u.is_empty()) {
            check_url("ledger rpc_url", url)?;
        }

        if !NETWORKS.contains(&self.ledger.network.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid network '{}'. Valid values: {:?}",
                self.ledger.network, NETWORKS
            )));
        }

        if self.backend.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.polling.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.polling.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        let valid_formats = ["table", "json", "quiet"];
        if !valid_formats.contains(&self.output.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid output format '{}'. Valid values: {:?}",
                self.output.format, valid_formats
            )));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }

    pub fn authz_config(&self) -> AuthzConfig {
        AuthzConfig {
            poll: PollPolicy::new(
                Duration::from_secs(self.polling.interval_seconds),
                self.polling.max_attempts,
            ),
            ..AuthzConfig::default()
        }
    }

    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.backend.base_url.clone(),
            timeout: Duration::from_secs(self.backend.timeout_seconds),
        }
    }

    /// Revocations go through the approval backend.
    pub fn ledger_config(&self) -> RpcLedgerConfig {
        RpcLedgerConfig {
            rpc_url: self.ledger.effective_rpc_url(),
            authority_url: self.backend.base_url.clone(),
            timeout: Duration::from_secs(self.backend.timeout_seconds),
        }
    }

    /// Generate a sample configuration file content
    pub fn sample_toml() -> &'static str {
        r#"# Odyssey Controller Configuration

[backend]
# Base URL of the approval backend
base_url = "http://localhost:3001"
# Per-request timeout in seconds
timeout_seconds = 30

[polling]
# Wait before each approval status check, in seconds
interval_seconds = 5
# Status checks before giving up
max_attempts = 60

[ledger]
# Cluster: "devnet", "testnet", "mainnet-beta"
network = "devnet"
# Explicit RPC endpoint (empty = public endpoint of the cluster)
# rpc_url = "https://api.devnet.solana.com"

[storage]
# Path to the secure store file (empty = default location)
# path = ""

[output]
# Output format: "table", "json", "quiet"
format = "table"
# Enable verbose output
verbose = false

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "warn"
"#
    }
}

/// CLI configuration overrides
///
/// Command-line arguments take precedence over config file values.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub output_format: Option<String>,
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
    pub api_url: Option<String>,
}

impl Config {
    /// Apply CLI overrides to configuration
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(ref format) = overrides.output_format {
            self.output.format = format.clone();
        }
        if let Some(verbose) = overrides.verbose {
            self.output.verbose = verbose;
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        }
        if let Some(ref url) = overrides.api_url {
            if !url.is_empty() {
                self.backend.base_url = url.clone();
            }
        }
        self
    }
}
