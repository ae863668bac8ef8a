//! Turning discovered manifests into plugin objects
//!
//! Each bundle yields its primary followed by its children. A manifest that fails
//! to parse excludes only its own plugin; when the primary fails, its children go
//! with it. Children take the class and signature of their primary.

pub mod assets;

use crate::discovery::{FoundBundle, FoundPlugin};
use crate::plugin::fs::PluginFs;
use crate::plugin::{LoadError, LoadStage, Plugin, PluginSignature};
use crate::signature::SignatureVerifier;
use crate::sources::PluginSource;
use sdk::errors::EngineError;
use sdk::manifest::{PluginJson, PLUGIN_JSON};
use sdk::types::PluginClass;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Plugins built from a batch of bundles plus the ones that failed
#[derive(Debug, Default)]
pub struct Bootstrapped {
    pub plugins: Vec<Plugin>,
    pub errors: Vec<LoadError>,
}

#[derive(Debug, Clone)]
pub struct Bootstrapper {
    verifier: Arc<SignatureVerifier>,
}

impl Bootstrapper {
    pub fn new(verifier: Arc<SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Build plugins for every bundle
    ///
    /// # Errors
    ///
    /// Only cancellation fails the batch; per-plugin failures are reported in
    /// [`Bootstrapped::errors`].
    pub fn bootstrap(
        &self,
        source: &PluginSource,
        bundles: Vec<FoundBundle>,
        cancel: &CancellationToken,
    ) -> Result<Bootstrapped, EngineError> {
        let mut out = Bootstrapped::default();

        for bundle in bundles {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let mut primary = match self.build_primary(&bundle.primary, source.class) {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        path = %bundle.primary.dir.display(),
                        error = %e,
                        children = bundle.children.len(),
                        "Skipping plugin bundle"
                    );
                    out.errors
                        .push(LoadError::new(None, &bundle.primary.dir, LoadStage::Bootstrap, &e));
                    continue;
                }
            };

            let mut children = Vec::new();
            for found in &bundle.children {
                match self.build_child(found, &primary, &bundle.primary) {
                    Ok(child) => children.push(child),
                    Err(e) => {
                        warn!(path = %found.dir.display(), error = %e, "Skipping nested plugin");
                        out.errors
                            .push(LoadError::new(None, &found.dir, LoadStage::Bootstrap, &e));
                    }
                }
            }

            primary.children = children.iter().map(|c| c.id().to_string()).collect();
            debug!(
                plugin_id = %primary.id(),
                class = %primary.class,
                signature = %primary.signature.status,
                children = primary.children.len(),
                "Bootstrapped plugin"
            );
            out.plugins.push(primary);
            out.plugins.extend(children);
        }

        Ok(out)
    }

    fn build_primary(&self, found: &FoundPlugin, class: PluginClass) -> Result<Plugin, EngineError> {
        let (json, fs) = parse(found)?;
        let signature = match class {
            PluginClass::Core => PluginSignature::internal(),
            PluginClass::Bundled | PluginClass::External => self.verifier.verify(&json, &fs)?,
        };

        let mut plugin = Plugin::new(json, class, fs, found.root.clone(), signature);
        plugin.base_url = assets::base_url(class, &plugin.json, None);
        finish(&mut plugin);
        Ok(plugin)
    }

    fn build_child(
        &self,
        found: &FoundPlugin,
        parent: &Plugin,
        parent_found: &FoundPlugin,
    ) -> Result<Plugin, EngineError> {
        let (json, fs) = parse(found)?;
        let mut child = Plugin::new(
            json,
            parent.class,
            fs,
            found.dir.clone(),
            parent.signature.clone(),
        );

        let relative = found
            .dir
            .strip_prefix(&parent_found.dir)
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_else(|_| child.id().to_string());

        child.base_url = assets::base_url(
            parent.class,
            &child.json,
            Some((parent.base_url.as_str(), relative.as_str())),
        );
        child.parent_id = Some(parent.id().to_string());
        finish(&mut child);
        Ok(child)
    }
}

fn parse(found: &FoundPlugin) -> Result<(PluginJson, PluginFs), EngineError> {
    let json = PluginJson::from_slice(&found.manifest).map_err(|reason| {
        EngineError::InvalidManifest {
            path: found.dir.join(PLUGIN_JSON),
            reason,
        }
    })?;
    let fs = PluginFs::new(&found.dir)?;
    Ok((json, fs))
}

fn finish(plugin: &mut Plugin) {
    // Children of core plugins are still served from the parent's tree
    plugin.module = if plugin.is_child() {
        assets::module(PluginClass::External, &plugin.json, &plugin.base_url)
    } else {
        assets::module(plugin.class, &plugin.json, &plugin.base_url)
    };
    let base_url = plugin.base_url.clone();
    assets::resolve_info(&mut plugin.json, &base_url);
    assets::apply_include_defaults(&mut plugin.json);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Discoverer;
    use crate::signature::tests::test_verifier;
    use sdk::types::SignatureStatus;
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(PLUGIN_JSON), body).unwrap();
    }

    fn run(root: &Path, class: PluginClass) -> Bootstrapped {
        let source = PluginSource::new(class, vec![root.to_path_buf()]);
        let cancel = CancellationToken::new();
        let bundles = Discoverer::default()
            .discover_blocking(&source, &cancel)
            .unwrap();
        Bootstrapper::new(Arc::new(test_verifier()))
            .bootstrap(&source, bundles, &cancel)
            .unwrap()
    }

    #[test]
    fn test_children_inherit_class_and_signature() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("acme-app"),
            r#"{"id":"acme-app","type":"app","info":{"version":"1.0.0"}}"#,
        );
        write(
            &temp.path().join("acme-app/datasources/ds"),
            r#"{"id":"acme-ds","type":"datasource","info":{"version":"1.0.0"}}"#,
        );

        let out = run(temp.path(), PluginClass::Bundled);
        assert!(out.errors.is_empty());
        assert_eq!(out.plugins.len(), 2);

        let app = &out.plugins[0];
        let ds = &out.plugins[1];
        assert_eq!(app.children, vec!["acme-ds".to_string()]);
        assert_eq!(ds.parent_id.as_deref(), Some("acme-app"));
        assert_eq!(ds.class, PluginClass::Bundled);
        assert_eq!(ds.signature, app.signature);
        assert_eq!(ds.base_url, "public/plugins/acme-app/datasources/ds");
        assert_eq!(ds.module, "public/plugins/acme-app/datasources/ds/module.js");
    }

    #[test]
    fn test_core_plugins_are_internal() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("graph"),
            r#"{"id":"graph","type":"panel","info":{"version":"1.0.0"}}"#,
        );
        let out = run(temp.path(), PluginClass::Core);
        assert_eq!(out.plugins[0].signature.status, SignatureStatus::Internal);
        assert_eq!(out.plugins[0].module, "core:plugin/graph");
    }

    #[test]
    fn test_bad_manifest_fails_alone() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("good"),
            r#"{"id":"good","type":"panel","info":{"version":"1.0.0"}}"#,
        );
        write(&temp.path().join("bad"), r#"{"id":"bad","type":"panel"}"#);
        write(&temp.path().join("worse"), "{ not json");

        let out = run(temp.path(), PluginClass::External);
        let ids: Vec<_> = out.plugins.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["good"]);
        assert_eq!(out.errors.len(), 2);
        assert_eq!(out.plugins[0].signature.status, SignatureStatus::Unsigned);
    }

    #[test]
    fn test_failed_primary_drops_children() {
        let temp = tempfile::tempdir().unwrap();
        write(&temp.path().join("app"), r#"{"id":"app","type":"app"}"#);
        write(
            &temp.path().join("app/ds"),
            r#"{"id":"ds","type":"datasource","info":{"version":"1.0.0"}}"#,
        );
        let out = run(temp.path(), PluginClass::External);
        assert!(out.plugins.is_empty());
        assert_eq!(out.errors.len(), 1);
    }
}
