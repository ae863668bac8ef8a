//! Repository error type

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Plugin '{0}' not found in repository")]
    NotFound(String),

    #[error("Plugin '{plugin_id}' has no version {version} compatible with host {host}")]
    NoCompatibleVersion {
        plugin_id: String,
        version: String,
        host: String,
    },

    #[error("Plugin '{plugin_id}' {version} has no package for {platform}")]
    NoPackage {
        plugin_id: String,
        version: String,
        platform: String,
    },

    #[error("Invalid repository metadata: {0}")]
    InvalidMetadata(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// Whether the failure is about the archive contents rather than the repository
    pub fn is_archive(&self) -> bool {
        matches!(self, Self::HashMismatch { .. } | Self::Archive(_))
    }
}
