// Gantry plugin host
// Main entry point for the gantry binary

use clap::Parser;
use gantry_engine::cli::{Cli, Command, ConfigAction, PluginAction};
use gantry_engine::config::Config;
use gantry_engine::daemon::{install_signal_handler, DaemonManager};
use gantry_engine::handlers::{
    handle_config_show, handle_plugins_inspect, handle_plugins_install, handle_plugins_list,
    handle_plugins_remove, handle_status, parse_log_level, OutputFormat,
};
use gantry_engine::host::Host;
use gantry_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = match &cli.log {
        Some(level) => parse_log_level(level)?,
        None => config.core.log_level.as_str(),
    };
    init_telemetry_with_level(log_level);

    tracing::debug!(
        "Gantry v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Serve => {
            let manager = DaemonManager::new(&config);
            let host = Host::from_config(config)?;
            manager.run(&host, install_signal_handler()).await?;
            Ok(())
        }

        Command::Stop => {
            DaemonManager::stop(&config).await?;
            println!("Gantry stopped.");
            Ok(())
        }

        Command::Status => handle_status(&config, format),

        Command::Plugins { action } => {
            tracing::debug!("Plugin management: {:?}", action);
            match action {
                PluginAction::List { types, errors } => {
                    handle_plugins_list(&config, &types, errors, format).await
                }
                PluginAction::Install {
                    id,
                    version,
                    no_deps,
                } => handle_plugins_install(&config, &id, version.as_deref(), !no_deps, format).await,
                PluginAction::Remove { id } => handle_plugins_remove(&config, &id, format).await,
                PluginAction::Inspect { id } => handle_plugins_inspect(&config, &id, format).await,
            }
        }

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
        },
    }
}
