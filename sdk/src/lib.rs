//! Gantry SDK
//!
//! Shared vocabulary for the Gantry plugin host and the plugin binaries it runs.
//! The engine uses it to parse manifests and talk to backends; plugin authors use
//! [`serve`] to answer the host over stdio.

/// Error types and handling
pub mod errors;

/// Plugin enums and backend payloads
pub mod types;

/// `plugin.json` model
pub mod manifest;

/// Startup handshake
pub mod handshake;

/// Post-handshake frame codec
pub mod wire;

/// Plugin-side serving loop
pub mod serve;

// Re-export commonly used types
pub use errors::{EngineError, GantryErrorExt};
pub use manifest::{PluginJson, PLUGIN_JSON};
pub use serve::{serve, serve_io, BackendHandler};
pub use types::{Capability, PluginClass, PluginType, SignatureStatus, SignatureType};
