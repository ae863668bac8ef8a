//! Gantry Engine Library
//!
//! This library provides the plugin lifecycle of the Gantry host: discovery,
//! bootstrap, trust validation, backend start-up, registration, install and
//! removal. It is used by both the `gantry` binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Plugin model and scoped filesystem
pub mod plugin;

/// Backend process launch, handshake and RPC clients
pub mod backend;

/// Plugin sources per class
pub mod sources;

/// Filesystem discovery of plugin manifests
pub mod discovery;

/// Signature manifest verification
pub mod signature;

/// Manifest to plugin conversion
pub mod bootstrap;

/// Trust and compatibility policy
pub mod validation;

/// Backend start-up
pub mod initializer;

/// Active plugin registry
pub mod registry;

/// Backend shutdown
pub mod terminator;

/// Load/unload orchestration
pub mod loader;

/// Install and remove external plugins
pub mod installer;

/// Public plugin facade
pub mod store;

/// Composition root
pub mod host;

/// Daemon lifecycle management module
pub mod daemon;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
