//! Gantry plugin repository client
//!
//! Resolves plugin versions against a remote repository, downloads archives into
//! memory, verifies their SHA-256 checksum and extracts them safely. The engine's
//! installer is the only consumer.

pub mod archive;
pub mod error;
pub mod repository;
pub mod verifier;

pub use error::RepoError;
pub use repository::{PluginRepository, RepositoryClient, ResolvedPlugin};
