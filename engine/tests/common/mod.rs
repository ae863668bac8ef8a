//! Fixtures shared by the engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use flate2::write::GzEncoder;
use flate2::Compression;
use gantry_engine::config::Config;
use gantry_engine::host::Host;
use gantry_engine::plugin::fs::PluginFs;
use gantry_engine::signature::{digest_tree, ManifestBody, MANIFEST_FILE};
use gantry_repo::{PluginRepository, RepoError, ResolvedPlugin};
use sdk::types::SignatureType;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const KEY_ID: &str = "integration-key";

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

/// Config rooted in `temp` that trusts [`signing_key`]
pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.core.data_dir = temp.path().join("data");
    config.core.plugins_dir = temp.path().join("plugins");
    fs::create_dir_all(&config.core.plugins_dir).unwrap();
    config.core.plugins_dir = config.core.plugins_dir.canonicalize().unwrap();
    config.signing.public_keys.insert(
        KEY_ID.to_string(),
        hex::encode(signing_key().verifying_key().to_bytes()),
    );
    config
}

/// Write a minimal frontend plugin
pub fn write_plugin(dir: &Path, id: &str, plugin_type: &str, version: &str) {
    fs::create_dir_all(dir).unwrap();
    let manifest = format!(
        r#"{{
  "id": "{id}",
  "type": "{plugin_type}",
  "name": "{id}",
  "info": {{ "version": "{version}", "logos": {{ "small": "img/logo.svg", "large": "img/logo.svg" }} }},
  "dependencies": {{ "grafanaDependency": ">=10.0.0", "plugins": [] }}
}}"#
    );
    fs::write(dir.join("plugin.json"), manifest).unwrap();
    fs::write(dir.join("module.js"), format!("export const plugin = '{}';", id)).unwrap();
}

/// Write a plugin whose manifest lists plugin dependencies
pub fn write_plugin_with_deps(dir: &Path, id: &str, version: &str, deps: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    let deps: Vec<String> = deps
        .iter()
        .map(|d| format!(r#"{{ "id": "{d}", "type": "panel", "name": "{d}", "version": "*" }}"#))
        .collect();
    let manifest = format!(
        r#"{{
  "id": "{id}",
  "type": "app",
  "name": "{id}",
  "info": {{ "version": "{version}" }},
  "dependencies": {{ "grafanaDependency": ">=10.0.0", "plugins": [{}] }}
}}"#,
        deps.join(",")
    );
    fs::write(dir.join("plugin.json"), manifest).unwrap();
    fs::write(dir.join("module.js"), "export const plugin = 'app';").unwrap();
}

/// Add a community `MANIFEST.json` covering every file in `dir`
pub fn sign_plugin(dir: &Path, id: &str, version: &str) {
    let body = ManifestBody {
        manifest_version: "2.0.0".into(),
        signature_type: SignatureType::Community,
        signed_by_org: "acme".into(),
        signed_by_org_name: "Acme Corp".into(),
        root_urls: vec![],
        plugin: id.into(),
        version: version.into(),
        time: 1_700_000_000_000,
        key_id: KEY_ID.into(),
        files: digest_tree(&PluginFs::new(dir).unwrap()).unwrap(),
    };
    fs::write(dir.join(MANIFEST_FILE), body.sign(&signing_key()).unwrap()).unwrap();
}

/// Gzipped tarball of `dir` with every entry under `prefix/`
pub fn tar_dir(dir: &Path, prefix: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.append_dir_all(prefix, dir).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Signed plugin archive for the mock repository
pub fn signed_archive(id: &str, version: &str) -> Vec<u8> {
    let staging = TempDir::new().unwrap();
    let dir = staging.path().join(id);
    write_plugin(&dir, id, "panel", version);
    sign_plugin(&dir, id, version);
    tar_dir(&dir, id)
}

/// In-memory repository keyed by id, versions in publish order
#[derive(Default)]
pub struct MockRepository {
    archives: Mutex<HashMap<String, Vec<(String, Vec<u8>)>>>,
    downloads: Mutex<Vec<String>>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, id: &str, version: &str, archive: Vec<u8>) {
        self.archives
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push((version.to_string(), archive));
    }

    /// `id@version` for every download so far
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl PluginRepository for MockRepository {
    async fn resolve(
        &self,
        id: &str,
        version: Option<&str>,
        host_version: &str,
    ) -> Result<ResolvedPlugin, RepoError> {
        let archives = self.archives.lock().unwrap();
        let versions = archives
            .get(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        let found = match version {
            Some(v) => versions.iter().find(|(candidate, _)| candidate == v),
            None => versions.last(),
        };
        let (version, _) = found.ok_or_else(|| RepoError::NoCompatibleVersion {
            plugin_id: id.to_string(),
            version: version.unwrap_or("latest").to_string(),
            host: host_version.to_string(),
        })?;
        Ok(ResolvedPlugin {
            id: id.to_string(),
            version: version.clone(),
            download_url: format!("mock://{}/{}", id, version),
            sha256: String::new(),
        })
    }

    async fn download(&self, plugin: &ResolvedPlugin) -> Result<Vec<u8>, RepoError> {
        self.downloads
            .lock()
            .unwrap()
            .push(format!("{}@{}", plugin.id, plugin.version));
        let archives = self.archives.lock().unwrap();
        archives
            .get(&plugin.id)
            .and_then(|versions| versions.iter().find(|(v, _)| *v == plugin.version))
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| RepoError::NotFound(plugin.id.clone()))
    }
}

/// Host without backends, wired to `repo`
pub fn host_with(config: Config, repo: Arc<MockRepository>) -> Host {
    Host::new(config, None, repo).unwrap()
}

pub fn plugins_dir(config: &Config) -> PathBuf {
    config.core.plugins_dir.clone()
}
