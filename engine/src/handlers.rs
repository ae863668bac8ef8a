//! Command handlers for CLI operations
//!
//! One-shot commands build their own [`Host`] that loads plugins without starting
//! backends:
//! - plugins list: List loaded plugins, optionally with load failures
//! - plugins install / remove: Manage external plugins through the store
//! - plugins inspect: Show one plugin or why it failed to load
//! - config show: Print the effective configuration

use anyhow::{bail, Context, Result};
use gantry_repo::RepositoryClient;
use sdk::errors::{EngineError, GantryErrorExt};
use sdk::types::PluginType;
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::daemon::DaemonManager;
use crate::host::Host;
use crate::installer::AddOpts;
use crate::plugin::{LoadError, PluginView};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Host for one-shot commands: everything is loaded, no backend is started
async fn offline_host(config: &Config) -> Result<Host> {
    let repository = RepositoryClient::new(config.repository.base_url.clone())
        .context("Failed to build repository client")?;
    let host = Host::new(config.clone(), None, Arc::new(repository))?;
    host.load_all().await.context("Failed to load plugins")?;
    Ok(host)
}

pub async fn handle_plugins_list(
    config: &Config,
    types: &[PluginType],
    show_errors: bool,
    format: OutputFormat,
) -> Result<()> {
    let host = offline_host(config).await?;
    let plugins = host.store().plugins(types).await;
    let errors = if show_errors {
        host.load_errors().await
    } else {
        Vec::new()
    };

    match format {
        OutputFormat::Text => {
            if plugins.is_empty() {
                println!("No plugins loaded.");
            } else {
                println!(
                    "{:<32} {:<15} {:<9} {:<10} {}",
                    "ID", "TYPE", "CLASS", "VERSION", "SIGNATURE"
                );
                for plugin in &plugins {
                    println!(
                        "{:<32} {:<15} {:<9} {:<10} {}",
                        plugin.id,
                        plugin.plugin_type,
                        plugin.class,
                        plugin.version,
                        plugin.signature.status
                    );
                }
            }

            if !errors.is_empty() {
                println!();
                println!("Failed to load:");
                for error in &errors {
                    print_load_error(error);
                }
            }
        }
        OutputFormat::Json => {
            let mut output = json!({ "plugins": plugins });
            if show_errors {
                output["errors"] = json!(errors);
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    host.shutdown().await;
    Ok(())
}

pub async fn handle_plugins_install(
    config: &Config,
    id: &str,
    version: Option<&str>,
    install_dependencies: bool,
    format: OutputFormat,
) -> Result<()> {
    let host = offline_host(config).await?;
    let opts = AddOpts {
        install_dependencies,
    };
    let result = host.store().add(id, version, &opts).await;
    host.shutdown().await;

    let plugin = result.map_err(with_hint)?;
    match format {
        OutputFormat::Text => {
            println!("Installed {} {}", plugin.id, plugin.version);
            println!("  Path:      {}", plugin.dir.display());
            println!("  Signature: {}", plugin.signature.status);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&plugin)?);
        }
    }
    Ok(())
}

pub async fn handle_plugins_remove(config: &Config, id: &str, format: OutputFormat) -> Result<()> {
    let host = offline_host(config).await?;
    let result = host.store().remove(id).await;
    host.shutdown().await;
    result.map_err(with_hint)?;

    match format {
        OutputFormat::Text => println!("Removed {}", id),
        OutputFormat::Json => println!("{}", json!({ "removed": id })),
    }
    Ok(())
}

pub async fn handle_plugins_inspect(config: &Config, id: &str, format: OutputFormat) -> Result<()> {
    let host = offline_host(config).await?;
    let plugin = host.store().plugin(id).await;
    let error = host.loader().error_for(id).await;
    host.shutdown().await;

    match (plugin, error) {
        (Some(plugin), _) => match format {
            OutputFormat::Text => print_plugin(&plugin),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plugin)?),
        },
        (None, Some(error)) => match format {
            OutputFormat::Text => {
                println!("Plugin {} failed to load:", id);
                print_load_error(&error);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&json!({ "error": error }))?)
            }
        },
        (None, None) => return Err(with_hint(EngineError::NotFound(id.to_string()))),
    }
    Ok(())
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", config.to_toml()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

pub fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let status = DaemonManager::status(config);
    match format {
        OutputFormat::Text => match status.pid {
            Some(pid) => println!("Gantry is running (PID {})", pid),
            None => println!("Gantry is not running."),
        },
        OutputFormat::Json => println!(
            "{}",
            json!({
                "running": status.is_running,
                "pid": status.pid,
                "pid_file": status.pid_file,
            })
        ),
    }
    Ok(())
}

/// Validate a `--log` override
pub fn parse_log_level(level: &str) -> Result<&str> {
    match level {
        "error" | "warn" | "info" | "debug" | "trace" => Ok(level),
        other => bail!(
            "Invalid log level '{}'. Must be one of: error, warn, info, debug, trace",
            other
        ),
    }
}

fn with_hint(error: EngineError) -> anyhow::Error {
    let hint = error.user_hint().to_string();
    anyhow::Error::new(error).context(hint)
}

fn print_plugin(plugin: &PluginView) {
    println!("{} ({})", plugin.name, plugin.id);
    println!("  Type:       {}", plugin.plugin_type);
    println!("  Class:      {}", plugin.class);
    println!("  Version:    {}", plugin.version);
    println!("  Signature:  {}", plugin.signature.status);
    if let Some(org) = &plugin.signature.org {
        println!("  Signed by:  {}", org);
    }
    println!("  Directory:  {}", plugin.dir.display());
    println!("  Module:     {}", plugin.module);
    println!("  Base URL:   {}", plugin.base_url);
    if plugin.backend {
        println!("  Backend:    yes");
    }
    if plugin.angular_detected {
        println!("  Angular:    detected");
    }
    if let Some(parent) = &plugin.parent_id {
        println!("  Parent:     {}", parent);
    }
    if !plugin.children.is_empty() {
        println!("  Children:   {}", plugin.children.join(", "));
    }
    if !plugin.includes.is_empty() {
        println!("  Includes:");
        for include in &plugin.includes {
            println!("    - {} ({})", include.name, include.include_type);
        }
    }
}

fn print_load_error(error: &LoadError) {
    println!(
        "  {} [{}] {}",
        error.plugin_id.as_deref().unwrap_or("<unknown>"),
        error.stage,
        error.message
    );
    println!("    {}", error.hint);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), "debug");
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_hint_wraps_engine_error() {
        let err = with_hint(EngineError::UninstallCorePlugin("graph".into()));
        assert_eq!(
            err.to_string(),
            "Core plugins ship with the host and cannot be removed"
        );
        assert!(err.downcast_ref::<EngineError>().is_some());
    }
}
