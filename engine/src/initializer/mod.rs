//! Starting backend runtimes
//!
//! Plugins without a backend are ready as soon as they are validated. Backend
//! plugins are started concurrently; a plugin whose process fails to start or
//! negotiate is dropped from the batch and the rest carry on.

use crate::backend::env::plugin_env;
use crate::backend::launcher::resolve_executable;
use crate::backend::{start_backend, LaunchSpec, Launcher};
use crate::config::Config;
use crate::plugin::{LoadError, LoadStage, Plugin};
use futures::future::join_all;
use sdk::errors::EngineError;
use sdk::handshake::SUPPORTED_PROTOCOL_VERSIONS;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one initialization pass
#[derive(Debug, Default)]
pub struct Initialized {
    pub plugins: Vec<Plugin>,
    pub errors: Vec<LoadError>,
}

pub struct Initializer {
    config: Arc<Config>,
    /// `None` leaves backends unstarted
    launcher: Option<Arc<dyn Launcher>>,
    startup_timeout: Duration,
}

impl std::fmt::Debug for Initializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initializer")
            .field("backends", &self.launcher.is_some())
            .field("startup_timeout", &self.startup_timeout)
            .finish()
    }
}

impl Initializer {
    pub fn new(config: Arc<Config>, launcher: Option<Arc<dyn Launcher>>) -> Self {
        let startup_timeout = config.runtime.startup_timeout();
        Self {
            config,
            launcher,
            startup_timeout,
        }
    }

    /// Start every backend plugin in `plugins`
    ///
    /// Per-plugin failures, including cancellation of an in-flight handshake, land
    /// in [`Initialized::errors`].
    pub async fn initialize(&self, plugins: Vec<Plugin>, cancel: &CancellationToken) -> Initialized {
        let results = join_all(
            plugins
                .into_iter()
                .map(|plugin| self.initialize_one(plugin, cancel)),
        )
        .await;

        let mut out = Initialized::default();
        for result in results {
            match result {
                Ok(plugin) => out.plugins.push(plugin),
                Err((plugin, e)) => {
                    warn!(plugin_id = %plugin.id(), error = %e, "Failed to initialize plugin");
                    out.errors
                        .push(LoadError::for_plugin(&plugin, LoadStage::Initialization, &e));
                }
            }
        }
        out
    }

    async fn initialize_one(
        &self,
        mut plugin: Plugin,
        cancel: &CancellationToken,
    ) -> Result<Plugin, (Plugin, EngineError)> {
        let Some(launcher) = self.launcher.as_ref().filter(|_| plugin.is_backend()) else {
            return Ok(plugin);
        };

        let executable = match resolve_executable(&plugin.fs, &plugin.json.executable) {
            Ok(path) => path,
            Err(e) => return Err((plugin, e)),
        };

        let spec = LaunchSpec {
            plugin_id: plugin.id().to_string(),
            executable,
            working_dir: plugin.fs.base().to_path_buf(),
            env: plugin_env(&self.config, plugin.id()),
            offered_versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        };

        match start_backend(
            launcher.as_ref(),
            &spec,
            plugin.plugin_type(),
            self.startup_timeout,
            cancel,
        )
        .await
        {
            Ok(client) => {
                info!(
                    plugin_id = %plugin.id(),
                    protocol = client.protocol_version(),
                    "Plugin backend ready"
                );
                plugin.attach_client(client);
                Ok(plugin)
            }
            Err(e) => Err((plugin, e)),
        }
    }
}
