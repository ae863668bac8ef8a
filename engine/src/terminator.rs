//! Stopping backend runtimes

use crate::plugin::Plugin;
use crate::registry::Registry;
use sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Terminator {
    registry: Arc<Registry>,
    grace: Duration,
}

impl Terminator {
    pub fn new(registry: Arc<Registry>, grace: Duration) -> Self {
        Self { registry, grace }
    }

    /// Stop the backend of a registered plugin
    ///
    /// The client is detached before the process is stopped, so readers never get
    /// a client that is shutting down. Plugins without a client are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotFound` if no entry exists for `id`.
    pub async fn terminate(&self, id: &str) -> Result<(), EngineError> {
        let plugin = self
            .registry
            .entry(id)
            .await
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        self.stop(&plugin).await
    }

    /// Stop the backend of a plugin held directly
    pub async fn stop(&self, plugin: &Plugin) -> Result<(), EngineError> {
        let Some(client) = plugin.take_client().await else {
            debug!(plugin_id = %plugin.id(), "No backend to stop");
            return Ok(());
        };

        if let Err(e) = client.shutdown(self.grace).await {
            warn!(plugin_id = %plugin.id(), error = %e, "Graceful stop failed, killing backend");
            client.kill().await?;
        }
        info!(plugin_id = %plugin.id(), "Plugin backend stopped");
        Ok(())
    }
}
