//! Registry of active plugins
//!
//! One registry is built at startup and shared by reference. Plugins are inserted
//! fully built (publish-once), so readers never see a half-constructed entry.
//! Reads share a read lock; writes are serialized against everything else.

use crate::plugin::Plugin;
use sdk::errors::EngineError;
use sdk::types::PluginType;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Registry {
    plugins: RwLock<HashMap<String, Arc<Plugin>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active plugin by id; decommissioned entries are hidden
    pub async fn plugin(&self, id: &str) -> Option<Arc<Plugin>> {
        self.plugins
            .read()
            .await
            .get(id)
            .filter(|p| !p.is_decommissioned())
            .cloned()
    }

    /// Entry by id, decommissioned or not
    pub async fn entry(&self, id: &str) -> Option<Arc<Plugin>> {
        self.plugins.read().await.get(id).cloned()
    }

    /// Active plugins of any of `types` (all when empty), sorted by id
    pub async fn plugins(&self, types: &[PluginType]) -> Vec<Arc<Plugin>> {
        let mut out: Vec<Arc<Plugin>> = self
            .plugins
            .read()
            .await
            .values()
            .filter(|p| !p.is_decommissioned())
            .filter(|p| types.is_empty() || types.contains(&p.plugin_type()))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    /// Every entry, including decommissioned ones
    pub async fn entries(&self) -> Vec<Arc<Plugin>> {
        self.plugins.read().await.values().cloned().collect()
    }

    /// Publish a plugin
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Duplicate` if the id is already taken.
    pub async fn add(&self, plugin: Arc<Plugin>) -> Result<(), EngineError> {
        let mut plugins = self.plugins.write().await;
        if let Some(existing) = plugins.get(plugin.id()) {
            return Err(EngineError::Duplicate {
                plugin_id: existing.id().to_string(),
                version: existing.version().to_string(),
            });
        }
        debug!(plugin_id = %plugin.id(), version = %plugin.version(), "Plugin registered");
        plugins.insert(plugin.id().to_string(), plugin);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Plugin>> {
        let removed = self.plugins.write().await.remove(id);
        if removed.is_some() {
            debug!(plugin_id = %id, "Plugin unregistered");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::tests::plugin_at;
    use sdk::types::PluginClass;

    fn arc(dir: &std::path::Path, id: &str, kind: &str) -> Arc<Plugin> {
        Arc::new(plugin_at(dir, id, kind, PluginClass::External))
    }

    #[tokio::test]
    async fn test_listing_is_sorted_and_filtered() {
        let temp = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        registry.add(arc(temp.path(), "zeta", "panel")).await.unwrap();
        registry.add(arc(temp.path(), "alpha", "datasource")).await.unwrap();
        registry.add(arc(temp.path(), "mid", "panel")).await.unwrap();

        let all: Vec<_> = registry
            .plugins(&[])
            .await
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(all, vec!["alpha", "mid", "zeta"]);

        let panels = registry.plugins(&[PluginType::Panel]).await;
        assert_eq!(panels.len(), 2);
        assert!(registry.plugins(&[PluginType::App]).await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        registry.add(arc(temp.path(), "a", "panel")).await.unwrap();
        assert!(matches!(
            registry.add(arc(temp.path(), "a", "panel")).await,
            Err(EngineError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_decommissioned_entries_are_hidden() {
        let temp = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        registry.add(arc(temp.path(), "a", "panel")).await.unwrap();
        registry.plugin("a").await.unwrap().decommission();

        assert!(registry.plugin("a").await.is_none());
        assert!(registry.plugins(&[]).await.is_empty());
        assert!(registry.entry("a").await.is_some());

        assert!(registry.remove("a").await.is_some());
        assert!(registry.entry("a").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writers() {
        let temp = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        for i in 0..20 {
            let registry = Arc::clone(&registry);
            let plugin = arc(temp.path(), &format!("p{:02}", i), "panel");
            tasks.push(tokio::spawn(async move {
                registry.add(plugin).await.unwrap();
                registry.plugins(&[]).await.len()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap() >= 1);
        }
        assert_eq!(registry.plugins(&[]).await.len(), 20);
    }
}
