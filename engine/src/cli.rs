//! CLI interface for Gantry
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for controlling the plugin host.

use clap::{Parser, Subcommand};
use sdk::types::PluginType;
use std::path::PathBuf;

/// Gantry plugin host
///
/// Discovers, verifies and runs plugins, and installs new ones from a plugin
/// repository.
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load all plugins and run until interrupted
    Serve,

    /// Stop a running `gantry serve`
    Stop,

    /// Show whether `gantry serve` is running
    Status,

    /// Manage plugins
    Plugins {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Plugin management actions
#[derive(Subcommand, Debug)]
pub enum PluginAction {
    /// List loadable plugins
    List {
        /// Only show plugins of this type (repeatable)
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<PluginType>,

        /// Also show plugins that failed to load
        #[arg(long)]
        errors: bool,
    },

    /// Install or upgrade a plugin from the repository
    Install {
        /// Plugin id
        id: String,

        /// Exact version (defaults to the newest compatible one)
        #[arg(long)]
        version: Option<String>,

        /// Skip installing plugin dependencies
        #[arg(long)]
        no_deps: bool,
    },

    /// Uninstall an external plugin
    Remove {
        /// Plugin id
        id: String,
    },

    /// Show everything known about one plugin
    Inspect {
        /// Plugin id
        id: String,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
}
