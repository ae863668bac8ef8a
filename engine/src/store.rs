//! Read/install facade consumed by the API and CLI layers
//!
//! Callers only ever see [`PluginView`] projections; the live [`Plugin`](crate::plugin::Plugin)
//! objects stay inside the engine.

use crate::installer::{AddOpts, Installer};
use crate::plugin::PluginView;
use crate::registry::Registry;
use futures::future::join_all;
use sdk::errors::EngineError;
use sdk::types::PluginType;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Store {
    registry: Arc<Registry>,
    installer: Arc<Installer>,
    cancel: CancellationToken,
}

impl Store {
    /// `cancel` is the host lifetime token; installs abort when it fires
    pub fn new(registry: Arc<Registry>, installer: Arc<Installer>, cancel: CancellationToken) -> Self {
        Self {
            registry,
            installer,
            cancel,
        }
    }

    /// Active plugin by id
    pub async fn plugin(&self, id: &str) -> Option<PluginView> {
        match self.registry.plugin(id).await {
            Some(plugin) => Some(plugin.view().await),
            None => None,
        }
    }

    /// Active plugins of any of `types`, all of them when empty, sorted by id
    pub async fn plugins(&self, types: &[PluginType]) -> Vec<PluginView> {
        let plugins = self.registry.plugins(types).await;
        join_all(plugins.iter().map(|p| p.view())).await
    }

    /// Install or upgrade a plugin from the repository
    pub async fn add(
        &self,
        id: &str,
        version: Option<&str>,
        opts: &AddOpts,
    ) -> Result<PluginView, EngineError> {
        let plugin = self.installer.add(id, version, opts, &self.cancel).await?;
        Ok(plugin.view().await)
    }

    pub async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.installer.remove(id).await
    }
}
