//! Configuration management
//!
//! This module handles loading, validation, and management of the Gantry configuration.
//! Configuration is stored in TOML format at ~/.gantry/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Plugins directory, data directory, log level, public URL
//! - **host**: Version and edition advertised to plugins, enterprise license
//! - **plugins**: Extra roots, trust overrides, disabled ids, per-plugin settings
//! - **runtime**: Backend process start/stop behavior
//! - **angular**: Legacy framework detection policy
//! - **tracing**: Exporter settings forwarded to backend plugins
//! - **repository**: Remote plugin repository
//! - **signing**: Public keys trusted for `MANIFEST.json` signatures
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Creates the plugins directory if it doesn't exist
//! - Canonicalizes the plugins directory so uninstall checks compare real paths
//!
//! # Examples
//!
//! ```no_run
//! use gantry_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Plugins: {:?}", config.core.plugins_dir);
//! println!("Host version: {}", config.host.version);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
///
/// Only `[core]` is required; every other section falls back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core host settings
    pub core: CoreConfig,

    /// Host identity advertised to plugins
    #[serde(default)]
    pub host: HostConfig,

    /// Plugin sources and policy
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Backend process settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Angular detection policy
    #[serde(default)]
    pub angular: AngularConfig,

    /// Tracing exporter settings forwarded to backends
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Remote plugin repository
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Signature verification keys
    #[serde(default)]
    pub signing: SigningConfig,
}

/// Core host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory external plugins are installed into (supports ~ expansion)
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Public URL of this host; private signatures must list it in `rootUrls`
    #[serde(default = "default_app_url")]
    pub app_url: String,
}

/// Host identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Version checked against `dependencies.grafanaVersion`
    #[serde(default = "default_host_version")]
    pub version: String,

    /// Edition passed to backends as `GF_EDITION`
    #[serde(default = "default_edition")]
    pub edition: String,

    /// Enterprise license file, when licensed
    #[serde(default)]
    pub license_path: Option<PathBuf>,

    /// Enterprise license text, when licensed
    #[serde(default)]
    pub license_text: Option<String>,
}

/// Plugin sources and policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Root of plugins shipped with the host
    #[serde(default)]
    pub core_dir: Option<PathBuf>,

    /// Root of plugins bundled alongside the host
    #[serde(default)]
    pub bundled_dir: Option<PathBuf>,

    /// Additional external roots or explicit `plugin.json` paths
    #[serde(default)]
    pub extra_paths: Vec<PathBuf>,

    /// Plugin ids allowed to load without a trusted signature
    #[serde(default)]
    pub allow_unsigned: Vec<String>,

    /// Plugin ids that are never loaded
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Skip the host version compatibility check
    #[serde(default)]
    pub skip_host_version_check: bool,

    /// Walk only `dist/` when a plugin root contains one
    #[serde(default = "default_true")]
    pub follow_dist_folder: bool,

    /// Custom settings per plugin id, passed as `GF_PLUGIN_<NAME>`
    #[serde(default)]
    pub settings: HashMap<String, HashMap<String, String>>,
}

/// Backend process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Start backend processes during load
    #[serde(default = "default_true")]
    pub start_backends: bool,

    /// Handshake deadline in seconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Cooperative shutdown grace period in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl RuntimeConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Angular detection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngularConfig {
    /// Load plugins that use the deprecated angular framework
    #[serde(default)]
    pub support_enabled: bool,

    /// Consult the remote pattern list before the built-in one
    #[serde(default)]
    pub remote_patterns_enabled: bool,

    /// URL of the remote pattern list
    #[serde(default = "default_patterns_url")]
    pub remote_patterns_url: String,

    /// How long fetched patterns (or a failed fetch) are cached
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// Tracing exporter settings forwarded to backend plugins
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracingConfig {
    /// OTLP collector address
    #[serde(default)]
    pub otlp_address: Option<String>,

    /// Propagation format (w3c, jaeger)
    #[serde(default)]
    pub propagation: Option<String>,
}

/// Remote repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_repository_url")]
    pub base_url: String,
}

/// Trusted signing keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Key id -> hex-encoded Ed25519 public key
    #[serde(default)]
    pub public_keys: HashMap<String, String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("~/.gantry/plugins")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.gantry")
}

fn default_app_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_host_version() -> String {
    "11.0.0".to_string()
}

fn default_edition() -> String {
    "oss".to_string()
}

fn default_startup_timeout() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_patterns_url() -> String {
    "https://grafana.com/api/plugins/angular_patterns".to_string()
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_repository_url() -> String {
    "https://grafana.com/api".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            app_url: default_app_url(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: default_host_version(),
            edition: default_edition(),
            license_path: None,
            license_text: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            start_backends: true,
            startup_timeout_secs: default_startup_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for AngularConfig {
    fn default() -> Self {
        Self {
            support_enabled: false,
            remote_patterns_enabled: false,
            remote_patterns_url: default_patterns_url(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_repository_url(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            host: HostConfig::default(),
            plugins: PluginsConfig {
                follow_dist_folder: true,
                ..PluginsConfig::default()
            },
            runtime: RuntimeConfig::default(),
            angular: AngularConfig::default(),
            tracing: TracingConfig::default(),
            repository: RepositoryConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.gantry/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid paths, log level, keys)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        // Validate and process configuration
        config.validate_and_process()?;

        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();
        config.validate_and_process()?;

        fs::write(path, config.to_toml()?)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.gantry/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".gantry").join("config.toml"))
    }

    /// Custom settings for one plugin
    pub fn plugin_settings(&self, plugin_id: &str) -> Option<&HashMap<String, String>> {
        self.plugins.settings.get(plugin_id)
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level, timeouts and signing keys
    /// - Expands ~ in every configured path
    /// - Creates and canonicalizes the plugins directory
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.host.edition.trim().is_empty() {
            return Err(EngineError::Config("host.edition must not be empty".to_string()));
        }

        if self.runtime.startup_timeout_secs == 0 {
            return Err(EngineError::Config(
                "runtime.startup_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.angular.remote_patterns_enabled && self.angular.remote_patterns_url.trim().is_empty()
        {
            return Err(EngineError::Config(
                "angular.remote_patterns_url is required when remote patterns are enabled"
                    .to_string(),
            ));
        }

        if let Some(propagation) = &self.tracing.propagation {
            let valid = ["w3c", "jaeger", "w3c,jaeger"];
            if !valid.contains(&propagation.as_str()) {
                return Err(EngineError::Config(format!(
                    "Invalid tracing propagation '{}'. Must be one of: {}",
                    propagation,
                    valid.join(", ")
                )));
            }
        }

        for (key_id, key) in &self.signing.public_keys {
            let valid = hex::decode(key).map(|b| b.len() == 32).unwrap_or(false);
            if !valid {
                return Err(EngineError::Config(format!(
                    "signing.public_keys.{} must be a 32-byte hex Ed25519 key",
                    key_id
                )));
            }
        }

        // Expand paths
        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.core.plugins_dir = expand_path(&self.core.plugins_dir)?;
        self.core.plugins_dir = canonicalize_or_create(&self.core.plugins_dir)?;

        if let Some(dir) = &self.plugins.core_dir {
            self.plugins.core_dir = Some(expand_path(dir)?);
        }
        if let Some(dir) = &self.plugins.bundled_dir {
            self.plugins.bundled_dir = Some(expand_path(dir)?);
        }
        self.plugins.extra_paths = self
            .plugins
            .extra_paths
            .iter()
            .map(|p| expand_path(p))
            .collect::<Result<_, _>>()?;
        if let Some(path) = &self.host.license_path {
            self.host.license_path = Some(expand_path(path)?);
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    let canonical = path.canonicalize().map_err(|e| {
        EngineError::Config(format!("Failed to canonicalize {:?}: {}", path, e))
    })?;

    if !canonical.is_dir() {
        return Err(EngineError::Config(format!(
            "Plugins path is not a directory: {:?}",
            canonical
        )));
    }

    Ok(canonical)
}
