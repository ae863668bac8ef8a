//! Trust and compatibility policy
//!
//! Each plugin is checked on its own, in this order:
//!
//! 1. not listed in `plugins.disabled`
//! 2. signature trusted, or the id is listed in `plugins.allow_unsigned`
//! 3. `dependencies.grafanaVersion` accepts the host version
//! 4. no angular usage in the entry module, unless angular support is enabled

pub mod angular;

use crate::config::Config;
use crate::plugin::Plugin;
use angular::AngularDetector;
use sdk::errors::EngineError;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Entry module checked for angular usage
const MODULE_FILE: &str = "module.js";

#[derive(Debug)]
pub struct Validator {
    allow_unsigned: HashSet<String>,
    disabled: HashSet<String>,
    host_version: String,
    skip_host_version_check: bool,
    angular_support: bool,
    angular: AngularDetector,
}

impl Validator {
    pub fn new(config: &Config, angular: AngularDetector) -> Self {
        Self {
            allow_unsigned: config.plugins.allow_unsigned.iter().cloned().collect(),
            disabled: config.plugins.disabled.iter().cloned().collect(),
            host_version: config.host.version.clone(),
            skip_host_version_check: config.plugins.skip_host_version_check,
            angular_support: config.angular.support_enabled,
            angular,
        }
    }

    /// Build the detector the config asks for
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let detector = if config.angular.remote_patterns_enabled {
            AngularDetector::with_remote(
                &config.angular.remote_patterns_url,
                std::time::Duration::from_secs(config.angular.cache_ttl_secs),
            )
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?
        } else {
            AngularDetector::new()
        };
        Ok(Self::new(config, detector))
    }

    /// Accept or reject one plugin
    ///
    /// Sets `angular_detected` on plugins that pass with angular support enabled.
    pub async fn validate(&self, plugin: &mut Plugin) -> Result<(), EngineError> {
        let id = plugin.id().to_string();

        if self.disabled.contains(&id) {
            return Err(EngineError::Validation {
                plugin_id: id,
                reason: "disabled by configuration".to_string(),
            });
        }

        let status = plugin.signature.status;
        if !status.is_trusted() {
            if self.allow_unsigned.contains(&id) {
                warn!(plugin_id = %id, signature = %status, "Loading plugin with untrusted signature");
            } else {
                return Err(EngineError::Signature {
                    plugin_id: id,
                    status,
                });
            }
        }

        let required = plugin.json.dependencies.host_version_range();
        if !self.skip_host_version_check
            && !gantry_repo::repository::is_compatible(required, &self.host_version)
        {
            return Err(EngineError::HostVersionIncompatible {
                plugin_id: id,
                required: required.to_string(),
                host: self.host_version.clone(),
            });
        }

        if !plugin.is_core() {
            if let Some(module) = plugin.fs.read_optional(MODULE_FILE)? {
                if self.angular.detect(&module).await {
                    if !self.angular_support {
                        return Err(EngineError::AngularNotSupported(id));
                    }
                    plugin.angular_detected = true;
                    warn!(plugin_id = %id, "Plugin uses the deprecated angular framework");
                }
            }
        }

        debug!(plugin_id = %id, "Plugin passed validation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::tests::plugin_at;
    use crate::plugin::PluginSignature;
    use sdk::types::{PluginClass, SignatureStatus};
    use std::fs;

    fn validator(edit: impl FnOnce(&mut Config)) -> Validator {
        let mut config = Config::default();
        edit(&mut config);
        Validator::new(&config, AngularDetector::new())
    }

    #[tokio::test]
    async fn test_unsigned_rejected_unless_allowed() {
        let temp = tempfile::tempdir().unwrap();
        let mut plugin = plugin_at(temp.path(), "acme-panel", "panel", PluginClass::External);

        let err = validator(|_| {}).validate(&mut plugin).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Signature { status: SignatureStatus::Unsigned, .. }
        ));

        let allowing = validator(|c| c.plugins.allow_unsigned = vec!["acme-panel".into()]);
        assert!(allowing.validate(&mut plugin).await.is_ok());

        plugin.signature = PluginSignature::with_status(SignatureStatus::Modified);
        assert!(allowing.validate(&mut plugin).await.is_ok());
        assert!(validator(|_| {}).validate(&mut plugin).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_plugin_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let mut plugin = plugin_at(temp.path(), "graph", "panel", PluginClass::Core);
        let v = validator(|c| c.plugins.disabled = vec!["graph".into()]);
        assert!(matches!(
            v.validate(&mut plugin).await,
            Err(EngineError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_host_version_range() {
        let temp = tempfile::tempdir().unwrap();
        let mut plugin = plugin_at(temp.path(), "graph", "panel", PluginClass::Core);
        plugin.json.dependencies.grafana_version = ">=12.0.0".into();

        assert!(matches!(
            validator(|_| {}).validate(&mut plugin).await,
            Err(EngineError::HostVersionIncompatible { .. })
        ));
        let skipping = validator(|c| c.plugins.skip_host_version_check = true);
        assert!(skipping.validate(&mut plugin).await.is_ok());
    }

    #[tokio::test]
    async fn test_angular_policy() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("module.js"), "class C extends PanelCtrl {}").unwrap();
        let mut plugin = plugin_at(temp.path(), "old-panel", "panel", PluginClass::External);
        plugin.signature = PluginSignature::with_status(SignatureStatus::Valid);

        assert!(matches!(
            validator(|_| {}).validate(&mut plugin).await,
            Err(EngineError::AngularNotSupported(_))
        ));

        let supporting = validator(|c| c.angular.support_enabled = true);
        supporting.validate(&mut plugin).await.unwrap();
        assert!(plugin.angular_detected);
    }
}
