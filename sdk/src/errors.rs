//! Error types and handling
//!
//! This module provides the error types used throughout the Gantry plugin host.
//! All errors implement the `GantryErrorExt` trait which provides user-friendly
//! hints, recoverability information and an HTTP status the API layer can map to.
//!
//! # Security
//!
//! User hints never include file paths, key material or plugin-provided text.
//! The `Display` output may contain paths and is intended for operator logs only.

use crate::types::SignatureStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Trait for Gantry error extensions
pub trait GantryErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is a static string, safe to display to end users.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around (e.g. by fixing the
    /// configuration). Non-recoverable errors need operator intervention.
    fn is_recoverable(&self) -> bool;

    /// HTTP status code an API layer should answer with
    fn http_status(&self) -> u16;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Discovery / Manifest**: Filesystem walks and `plugin.json` parsing
/// - **Trust / Validation**: Signature, compatibility and policy rejections
/// - **Installer**: Duplicate installs, core-plugin policy, path safety
/// - **Backend**: Subprocess start, handshake and RPC failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, GantryErrorExt};
///
/// let error = EngineError::PluginNotInstalled("panel-x".to_string());
/// assert_eq!(error.http_status(), 404);
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::UninstallCorePlugin("graph".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Discovery and manifest errors
    #[error("Discovery error at {path:?}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    #[error("Invalid plugin manifest {path:?}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Path escapes plugin directory: {0:?}")]
    PathOutsidePlugin(PathBuf),

    // Trust and validation errors
    #[error("Plugin '{plugin_id}' rejected: signature is {status}")]
    Signature {
        plugin_id: String,
        status: SignatureStatus,
    },

    #[error("Plugin '{plugin_id}' failed validation: {reason}")]
    Validation { plugin_id: String, reason: String },

    #[error("Plugin '{plugin_id}' requires host version {required}, running {host}")]
    HostVersionIncompatible {
        plugin_id: String,
        required: String,
        host: String,
    },

    #[error("Plugin '{0}' uses the deprecated angular framework")]
    AngularNotSupported(String),

    // Registry and installer errors
    #[error("Plugin '{plugin_id}' version {version} is already installed")]
    Duplicate { plugin_id: String, version: String },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin not installed: {0}")]
    PluginNotInstalled(String),

    #[error("Cannot install or upgrade core plugin: {0}")]
    InstallCorePlugin(String),

    #[error("Cannot uninstall core plugin: {0}")]
    UninstallCorePlugin(String),

    #[error("Cannot uninstall plugin outside of the plugins directory: {0:?}")]
    UninstallOutsideOfPluginDir(PathBuf),

    #[error("Plugin '{plugin_id}' failed to load: {reason}")]
    LoadFailed { plugin_id: String, reason: String },

    // Backend errors
    #[error("Handshake with plugin '{plugin_id}' failed: {reason}")]
    Handshake { plugin_id: String, reason: String },

    #[error("Plugin '{0}' did not complete the handshake in time")]
    StartupTimeout(String),

    #[error("Plugin '{plugin_id}' does not support {capability}")]
    CapabilityNotSupported {
        plugin_id: String,
        capability: String,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Plugin process exited: {0}")]
    PluginExited(String),

    // Remote repository errors
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Gantry is already running (PID {0})")]
    DaemonAlreadyRunning(u32),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error only excludes a single plugin from a batch.
    ///
    /// Discovery, manifest and validation failures are isolated per plugin;
    /// everything else aborts the operation that produced it.
    pub fn is_per_plugin(&self) -> bool {
        matches!(
            self,
            Self::Discovery { .. }
                | Self::InvalidManifest { .. }
                | Self::Signature { .. }
                | Self::Validation { .. }
                | Self::HostVersionIncompatible { .. }
                | Self::AngularNotSupported(_)
                | Self::Handshake { .. }
                | Self::StartupTimeout(_)
        )
    }
}

impl GantryErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Discovery { .. } => "A plugin directory could not be scanned",
            Self::InvalidManifest { .. } => "The plugin.json file is missing fields or malformed",
            Self::PathOutsidePlugin(_) => "Plugin files must stay inside the plugin directory",

            Self::Signature { .. } => {
                "Plugin signature could not be trusted. Add it to allow_unsigned to override"
            }
            Self::Validation { .. } => "Plugin did not pass validation",
            Self::HostVersionIncompatible { .. } => {
                "Plugin is not compatible with this host version"
            }
            Self::AngularNotSupported(_) => "Plugin relies on the deprecated angular framework",

            Self::Duplicate { .. } => "This plugin version is already installed",
            Self::NotFound(_) => "The requested plugin is not available",
            Self::PluginNotInstalled(_) => "The plugin is not installed",
            Self::InstallCorePlugin(_) => "Core plugins ship with the host and cannot be installed",
            Self::UninstallCorePlugin(_) => "Core plugins ship with the host and cannot be removed",
            Self::UninstallOutsideOfPluginDir(_) => {
                "Only plugins inside the plugins directory can be removed"
            }
            Self::LoadFailed { .. } => "Plugin was installed but could not be loaded",

            Self::Handshake { .. } => "Plugin backend failed to start. Check plugin logs",
            Self::StartupTimeout(_) => "Plugin backend took too long to start",
            Self::CapabilityNotSupported { .. } => "The plugin does not support this operation",
            Self::Backend(_) => "Plugin backend returned an error",
            Self::PluginExited(_) => "Plugin backend is not running",

            Self::Repository(_) => "Plugin repository unavailable. Check your network",
            Self::Archive(_) => "Plugin archive is corrupted",

            Self::Cancelled => "Operation was cancelled",
            Self::DaemonAlreadyRunning(_) => "Stop the running instance with `gantry stop` first",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::InstallCorePlugin(_)
            | Self::UninstallCorePlugin(_)
            | Self::UninstallOutsideOfPluginDir(_)
            | Self::PathOutsidePlugin(_)
            | Self::Signature { .. }
            | Self::Archive(_) => false,

            _ => true,
        }
    }

    fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::PluginNotInstalled(_) => 404,
            Self::Duplicate { .. } => 409,
            Self::InstallCorePlugin(_)
            | Self::UninstallCorePlugin(_)
            | Self::UninstallOutsideOfPluginDir(_)
            | Self::PathOutsidePlugin(_) => 403,
            Self::InvalidManifest { .. }
            | Self::Signature { .. }
            | Self::Validation { .. }
            | Self::HostVersionIncompatible { .. }
            | Self::AngularNotSupported(_) => 422,
            Self::CapabilityNotSupported { .. } => 501,
            Self::Repository(_) | Self::Backend(_) | Self::PluginExited(_) => 502,
            Self::StartupTimeout(_) => 504,
            Self::Cancelled => 499,
            Self::DaemonAlreadyRunning(_) => 409,
            _ => 500,
        }
    }
}
