//! Composition root
//!
//! [`Host`] builds one registry and wires every lifecycle component to it. Nothing
//! in the engine keeps process-wide state; everything hangs off a `Host`.

use crate::backend::{Launcher, SubprocessLauncher};
use crate::bootstrap::Bootstrapper;
use crate::config::Config;
use crate::discovery::{Discoverer, DiscoveryOptions};
use crate::initializer::Initializer;
use crate::installer::Installer;
use crate::loader::Loader;
use crate::plugin::{LoadError, Plugin};
use crate::registry::Registry;
use crate::signature::SignatureVerifier;
use crate::sources::sources_from_config;
use crate::store::Store;
use crate::terminator::Terminator;
use crate::validation::Validator;
use futures::future::join_all;
use gantry_repo::{PluginRepository, RepositoryClient};
use sdk::errors::EngineError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Host {
    config: Arc<Config>,
    registry: Arc<Registry>,
    loader: Arc<Loader>,
    store: Store,
    cancel: CancellationToken,
}

impl Host {
    /// Wire a host from explicit parts
    ///
    /// A `launcher` of `None` loads backend plugins without starting them.
    pub fn new(
        config: Config,
        launcher: Option<Arc<dyn Launcher>>,
        repository: Arc<dyn PluginRepository>,
    ) -> Result<Self, EngineError> {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let cancel = CancellationToken::new();

        let verifier = Arc::new(SignatureVerifier::new(
            &config.signing.public_keys,
            &config.core.app_url,
        )?);
        let discoverer = Discoverer::new(DiscoveryOptions {
            follow_dist: config.plugins.follow_dist_folder,
            ..DiscoveryOptions::default()
        });
        let terminator = Arc::new(Terminator::new(
            Arc::clone(&registry),
            config.runtime.shutdown_grace(),
        ));
        let loader = Arc::new(Loader::new(
            discoverer,
            Bootstrapper::new(verifier),
            Validator::from_config(&config)?,
            Initializer::new(Arc::clone(&config), launcher),
            Arc::clone(&registry),
            terminator,
        ));
        let installer = Arc::new(Installer::new(
            Arc::clone(&loader),
            repository,
            config.core.plugins_dir.clone(),
            &config.host.version,
        ));
        let store = Store::new(Arc::clone(&registry), installer, cancel.clone());

        Ok(Self {
            config,
            registry,
            loader,
            store,
            cancel,
        })
    }

    /// Wire a host with subprocess backends and the configured HTTP repository
    pub fn from_config(config: Config) -> Result<Self, EngineError> {
        let launcher: Option<Arc<dyn Launcher>> = if config.runtime.start_backends {
            Some(Arc::new(SubprocessLauncher))
        } else {
            None
        };
        let repository = RepositoryClient::new(config.repository.base_url.clone())
            .map_err(|e| EngineError::Config(format!("Failed to build repository client: {}", e)))?;
        Self::new(config, launcher, Arc::new(repository))
    }

    /// Load every configured source: core, bundled, then external
    ///
    /// Per-plugin failures end up in [`Host::load_errors`].
    pub async fn load_all(&self) -> Result<Vec<Arc<Plugin>>, EngineError> {
        let mut loaded = Vec::new();
        for source in sources_from_config(&self.config) {
            loaded.extend(self.loader.load(&source, &self.cancel).await?);
        }
        loaded.sort_by(|a, b| a.id().cmp(b.id()));
        info!(plugins = loaded.len(), "Plugins loaded");
        Ok(loaded)
    }

    /// Cancel in-flight work and stop every running backend
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let entries = self.registry.entries().await;
        let terminator = self.loader.terminator();
        let results = join_all(entries.iter().map(|p| terminator.stop(p))).await;
        for (plugin, result) in entries.iter().zip(results) {
            if let Err(e) = result {
                warn!(plugin_id = %plugin.id(), error = %e, "Failed to stop plugin backend");
            }
        }
        info!(plugins = entries.len(), "Host shut down");
    }

    pub async fn load_errors(&self) -> Vec<LoadError> {
        self.loader.errors().await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Host lifetime token
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
