//! Load pipeline: discover, bootstrap, validate, initialize, publish
//!
//! A load pass only fails as a whole on cancellation or on filesystem errors
//! during discovery. Every per-plugin failure is logged, kept for
//! [`Loader::errors`], and excluded from the result. A cancelled pass stops any
//! backends it already started and publishes nothing.

use crate::bootstrap::Bootstrapper;
use crate::discovery::Discoverer;
use crate::initializer::Initializer;
use crate::plugin::{LoadError, LoadStage, Plugin};
use crate::registry::Registry;
use crate::sources::PluginSource;
use crate::terminator::Terminator;
use crate::validation::Validator;
use sdk::errors::EngineError;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Loader {
    discoverer: Discoverer,
    bootstrapper: Bootstrapper,
    validator: Validator,
    initializer: Initializer,
    registry: Arc<Registry>,
    terminator: Arc<Terminator>,
    /// Most recent failure per plugin id (or path when the id is unknown)
    errors: Mutex<BTreeMap<String, LoadError>>,
}

impl Loader {
    pub fn new(
        discoverer: Discoverer,
        bootstrapper: Bootstrapper,
        validator: Validator,
        initializer: Initializer,
        registry: Arc<Registry>,
        terminator: Arc<Terminator>,
    ) -> Self {
        Self {
            discoverer,
            bootstrapper,
            validator,
            initializer,
            registry,
            terminator,
            errors: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load every plugin in `source` that is not registered yet
    ///
    /// Returns the newly published plugins sorted by id.
    pub async fn load(
        &self,
        source: &PluginSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Plugin>>, EngineError> {
        let bundles = self.discoverer.discover(source, cancel).await?;

        let bootstrapper = self.bootstrapper.clone();
        let owned_source = source.clone();
        let token = cancel.clone();
        let boot = tokio::task::spawn_blocking(move || {
            bootstrapper.bootstrap(&owned_source, bundles, &token)
        })
        .await
        .map_err(|e| EngineError::LoadFailed {
            plugin_id: String::new(),
            reason: format!("bootstrap task failed: {}", e),
        })??;
        let mut errors = boot.errors;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for plugin in boot.plugins {
            if self.registry.plugin(plugin.id()).await.is_some() || !seen.insert(plugin.id().to_string()) {
                warn!(plugin_id = %plugin.id(), path = %plugin.fs.base().display(), "Skipping duplicate plugin");
                continue;
            }
            candidates.push(plugin);
        }

        // Children follow their primary, so a rejected parent is known first
        let mut failed = HashSet::new();
        let mut valid = Vec::new();
        for mut plugin in candidates {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Some(parent) = plugin.parent_id.as_deref().filter(|p| failed.contains(*p)) {
                let e = EngineError::Validation {
                    plugin_id: plugin.id().to_string(),
                    reason: format!("parent plugin '{}' was rejected", parent),
                };
                errors.push(LoadError::for_plugin(&plugin, LoadStage::Validation, &e));
                failed.insert(plugin.id().to_string());
                continue;
            }
            match self.validator.validate(&mut plugin).await {
                Ok(()) => valid.push(plugin),
                Err(e) => {
                    warn!(plugin_id = %plugin.id(), error = %e, "Plugin rejected");
                    errors.push(LoadError::for_plugin(&plugin, LoadStage::Validation, &e));
                    failed.insert(plugin.id().to_string());
                }
            }
        }

        let initialized = self.initializer.initialize(valid, cancel).await;
        failed.extend(
            initialized
                .errors
                .iter()
                .filter_map(|e| e.plugin_id.clone()),
        );
        errors.extend(initialized.errors);

        if cancel.is_cancelled() {
            for plugin in &initialized.plugins {
                let _ = self.terminator.stop(plugin).await;
            }
            return Err(EngineError::Cancelled);
        }

        // Parents precede their children here too, so a parent that failed to
        // start or register takes its children down with it
        let mut loaded = Vec::new();
        for mut plugin in initialized.plugins {
            if let Some(parent) = plugin.parent_id.clone().filter(|p| failed.contains(p)) {
                let e = EngineError::LoadFailed {
                    plugin_id: plugin.id().to_string(),
                    reason: format!("parent plugin '{}' failed to load", parent),
                };
                warn!(plugin_id = %plugin.id(), parent = %parent, "Dropping child of failed plugin");
                let _ = self.terminator.stop(&plugin).await;
                errors.push(LoadError::for_plugin(&plugin, LoadStage::Registration, &e));
                failed.insert(plugin.id().to_string());
                continue;
            }
            plugin.children.retain(|c| !failed.contains(c));
            let plugin = Arc::new(plugin);
            match self.registry.add(Arc::clone(&plugin)).await {
                Ok(()) => loaded.push(plugin),
                Err(e) => {
                    warn!(plugin_id = %plugin.id(), error = %e, "Failed to register plugin");
                    let _ = self.terminator.stop(&plugin).await;
                    errors.push(LoadError::for_plugin(&plugin, LoadStage::Registration, &e));
                    failed.insert(plugin.id().to_string());
                }
            }
        }

        info!(
            class = %source.class,
            loaded = loaded.len(),
            failed = errors.len(),
            "Load pass finished"
        );
        self.record(&loaded, errors).await;

        loaded.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(loaded)
    }

    /// Decommission, stop and unregister a plugin
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` if `id` is not registered.
    pub async fn unload(&self, id: &str) -> Result<(), EngineError> {
        let plugin = self
            .registry
            .entry(id)
            .await
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        plugin.decommission();
        self.terminator.terminate(id).await?;
        self.registry.remove(id).await;
        debug!(plugin_id = %id, "Plugin unloaded");
        Ok(())
    }

    /// Failures from recent load passes, one per plugin
    pub async fn errors(&self) -> Vec<LoadError> {
        self.errors.lock().await.values().cloned().collect()
    }

    /// Failure recorded for one plugin id
    pub async fn error_for(&self, id: &str) -> Option<LoadError> {
        self.errors.lock().await.get(id).cloned()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn terminator(&self) -> &Arc<Terminator> {
        &self.terminator
    }

    async fn record(&self, loaded: &[Arc<Plugin>], errors: Vec<LoadError>) {
        let mut recorded = self.errors.lock().await;
        for plugin in loaded {
            recorded.remove(plugin.id());
        }
        for error in errors {
            let key = error
                .plugin_id
                .clone()
                .unwrap_or_else(|| error.path.display().to_string());
            recorded.insert(key, error);
        }
    }
}
