//! Installing, upgrading and removing external plugins
//!
//! Operations on the same plugin id are serialized through a per-id lock;
//! different ids proceed in parallel. The lock is released before dependencies
//! are installed, so no install ever holds two locks.
//!
//! # Upgrade order
//!
//! The installed version is removed before the new archive is extracted and
//! loaded. If loading the new version fails, the plugin stays uninstalled; there
//! is no rollback to the previous version. Dependencies are installed after the
//! plugin itself is loaded; a failed dependency install leaves the plugin in place.

use crate::loader::Loader;
use crate::plugin::Plugin;
use crate::registry::Registry;
use crate::sources::PluginSource;
use futures::future::BoxFuture;
use gantry_repo::{PluginRepository, RepoError};
use sdk::errors::EngineError;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options for [`Installer::add`]
#[derive(Debug, Clone)]
pub struct AddOpts {
    /// Also install missing plugins listed in `dependencies.plugins`
    pub install_dependencies: bool,
}

impl Default for AddOpts {
    fn default() -> Self {
        Self {
            install_dependencies: true,
        }
    }
}

pub struct Installer {
    loader: Arc<Loader>,
    registry: Arc<Registry>,
    repository: Arc<dyn PluginRepository>,
    plugins_dir: PathBuf,
    host_version: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("plugins_dir", &self.plugins_dir)
            .field("host_version", &self.host_version)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// `plugins_dir` should already be canonical
    pub fn new(
        loader: Arc<Loader>,
        repository: Arc<dyn PluginRepository>,
        plugins_dir: PathBuf,
        host_version: &str,
    ) -> Self {
        let registry = Arc::clone(loader.registry());
        Self {
            loader,
            registry,
            repository,
            plugins_dir,
            host_version: host_version.to_string(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Install or upgrade `id`
    ///
    /// `version` of `None` picks the newest version compatible with the host.
    ///
    /// # Errors
    ///
    /// - `EngineError::Duplicate` if that version is already installed
    /// - `EngineError::InstallCorePlugin` if `id` is a core or bundled plugin
    /// - `EngineError::NotFound` / `EngineError::Repository` / `EngineError::Archive`
    ///   for resolve, download and extraction failures
    /// - `EngineError::LoadFailed` if the extracted plugin does not load
    /// - `EngineError::Validation` if `id` is not a plain directory name, or its
    ///   directory belongs to another registered plugin
    pub async fn add(
        &self,
        id: &str,
        version: Option<&str>,
        opts: &AddOpts,
        cancel: &CancellationToken,
    ) -> Result<Arc<Plugin>, EngineError> {
        let mut visiting = HashSet::new();
        self.add_inner(id, version, opts, cancel, &mut visiting).await
    }

    /// Install `id` under its lock, then its dependencies with no lock held
    ///
    /// Boxed because dependency installs recurse back into this method.
    fn add_inner<'a>(
        &'a self,
        id: &'a str,
        version: Option<&'a str>,
        opts: &'a AddOpts,
        cancel: &'a CancellationToken,
        visiting: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<Arc<Plugin>, EngineError>> {
        Box::pin(async move {
            visiting.insert(id.to_string());
            let plugin = self.install_locked(id, version, cancel).await?;
            if opts.install_dependencies {
                self.install_dependencies(&plugin, opts, cancel, visiting)
                    .await?;
            }
            Ok(plugin)
        })
    }

    async fn install_locked(
        &self,
        id: &str,
        version: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Plugin>, EngineError> {
        let dest = self.install_dir(id)?;
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let existing = self.registry.plugin(id).await;
        if let Some(existing) = &existing {
            if !existing.class.is_removable() {
                return Err(EngineError::InstallCorePlugin(id.to_string()));
            }
            if version.is_some_and(|v| same_version(v, existing.version())) {
                return Err(duplicate(existing));
            }
        }

        let resolved = self
            .repository
            .resolve(id, version, &self.host_version)
            .await
            .map_err(repo_error)?;
        if let Some(existing) = &existing {
            if same_version(&resolved.version, existing.version()) {
                return Err(duplicate(existing));
            }
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let archive = self
            .repository
            .download(&resolved)
            .await
            .map_err(repo_error)?;

        if let Some(existing) = existing {
            info!(
                plugin_id = %id,
                from = %existing.version(),
                to = %resolved.version,
                "Removing installed version before upgrade"
            );
            self.remove_plugin(&existing).await?;
        }
        self.clear_stale_dir(id, &dest).await?;

        gantry_repo::archive::extract(archive, dest.clone())
            .await
            .map_err(repo_error)?;
        info!(plugin_id = %id, version = %resolved.version, path = %dest.display(), "Plugin extracted");

        let loaded = self
            .loader
            .load(&PluginSource::external_dir(dest), cancel)
            .await?;
        match loaded.into_iter().find(|p| p.id() == id) {
            Some(plugin) => {
                info!(plugin_id = %id, version = %plugin.version(), "Plugin installed");
                Ok(plugin)
            }
            None => {
                let reason = self
                    .loader
                    .error_for(id)
                    .await
                    .map(|e| e.message)
                    .unwrap_or_else(|| "plugin was not found in the downloaded archive".to_string());
                warn!(plugin_id = %id, reason = %reason, "Installed plugin failed to load");
                Err(EngineError::LoadFailed {
                    plugin_id: id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Dependencies already registered, or being installed by another caller, are skipped
    async fn install_dependencies(
        &self,
        plugin: &Plugin,
        opts: &AddOpts,
        cancel: &CancellationToken,
        visiting: &mut HashSet<String>,
    ) -> Result<(), EngineError> {
        for dep in &plugin.json.dependencies.plugins {
            if visiting.contains(&dep.id) || self.registry.plugin(&dep.id).await.is_some() {
                continue;
            }
            debug!(plugin_id = %plugin.id(), dependency = %dep.id, "Installing dependency");
            match self.add_inner(&dep.id, None, opts, cancel, visiting).await {
                Ok(_) | Err(EngineError::Duplicate { .. }) => {}
                Err(e) => {
                    warn!(
                        plugin_id = %plugin.id(),
                        dependency = %dep.id,
                        error = %e,
                        "Dependency install failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Uninstall `id`
    ///
    /// # Errors
    ///
    /// - `EngineError::PluginNotInstalled` if `id` is not registered
    /// - `EngineError::UninstallCorePlugin` for core and bundled plugins
    /// - `EngineError::UninstallOutsideOfPluginDir` if the plugin directory is not
    ///   strictly inside the plugins directory
    pub async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let plugin = self
            .registry
            .plugin(id)
            .await
            .ok_or_else(|| EngineError::PluginNotInstalled(id.to_string()))?;
        self.remove_plugin(&plugin).await?;
        info!(plugin_id = %id, "Plugin removed");
        Ok(())
    }

    async fn remove_plugin(&self, plugin: &Plugin) -> Result<(), EngineError> {
        if !plugin.class.is_removable() {
            return Err(EngineError::UninstallCorePlugin(plugin.id().to_string()));
        }
        if let Some(parent) = &plugin.parent_id {
            return Err(EngineError::Validation {
                plugin_id: plugin.id().to_string(),
                reason: format!("nested in '{}'; remove that plugin instead", parent),
            });
        }

        let dir = self.removable_dir(&plugin.root)?;

        for child in &plugin.children {
            if self.registry.entry(child).await.is_some() {
                self.loader.unload(child).await?;
            }
        }
        self.loader.unload(plugin.id()).await?;

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Canonical plugin directory, checked to be strictly inside the plugins directory
    fn removable_dir(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        let canonical = dir
            .canonicalize()
            .map_err(|_| EngineError::UninstallOutsideOfPluginDir(dir.to_path_buf()))?;
        let root = self
            .plugins_dir
            .canonicalize()
            .unwrap_or_else(|_| self.plugins_dir.clone());

        if canonical == root || !canonical.starts_with(&root) {
            warn!(
                path = %canonical.display(),
                plugins_dir = %root.display(),
                "Refusing to delete plugin outside the plugins directory"
            );
            return Err(EngineError::UninstallOutsideOfPluginDir(canonical));
        }
        Ok(canonical)
    }

    /// `<plugins_dir>/<id>`, refusing ids that are not a single path component
    fn install_dir(&self, id: &str) -> Result<PathBuf, EngineError> {
        let mut components = Path::new(id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if !id.starts_with('.') => {
                Ok(self.plugins_dir.join(name))
            }
            _ => Err(EngineError::Validation {
                plugin_id: id.to_string(),
                reason: "plugin id is not a valid directory name".to_string(),
            }),
        }
    }

    /// Remove files left in `dest` by an earlier failed install
    async fn clear_stale_dir(&self, id: &str, dest: &Path) -> Result<(), EngineError> {
        if tokio::fs::symlink_metadata(dest).await.is_err() {
            return Ok(());
        }
        let dir = self.removable_dir(dest)?;
        for plugin in self.registry.entries().await {
            if plugin.root.canonicalize().is_ok_and(|root| root == dir) {
                return Err(EngineError::Validation {
                    plugin_id: id.to_string(),
                    reason: format!("{} belongs to plugin '{}'", dir.display(), plugin.id()),
                });
            }
        }
        warn!(plugin_id = %id, path = %dir.display(), "Removing leftover plugin directory");
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id.to_string()).or_default())
    }
}

fn same_version(a: &str, b: &str) -> bool {
    a.trim_start_matches('v') == b.trim_start_matches('v')
}

fn duplicate(plugin: &Plugin) -> EngineError {
    EngineError::Duplicate {
        plugin_id: plugin.id().to_string(),
        version: plugin.version().to_string(),
    }
}

fn repo_error(e: RepoError) -> EngineError {
    match e {
        RepoError::NotFound(id) => EngineError::NotFound(id),
        RepoError::Io(e) => EngineError::Io(e),
        e if e.is_archive() => EngineError::Archive(e.to_string()),
        e => EngineError::Repository(e.to_string()),
    }
}
