//! In-memory plugin model
//!
//! A [`Plugin`] is built completely by the bootstrap, validation and
//! initialization stages before it is wrapped in an `Arc` and published to the
//! registry. After publication only two things change: the backend client slot
//! and the decommissioned flag.

pub mod fs;

use crate::backend::BackendClient;
use fs::PluginFs;
use sdk::errors::{EngineError, GantryErrorExt};
use sdk::manifest::{Dependencies, Include, Info, PluginJson};
use sdk::types::{PluginClass, PluginType, SignatureStatus, SignatureType};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trust facts about a plugin package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSignature {
    pub status: SignatureStatus,
    pub signature_type: Option<SignatureType>,
    /// Signing organization
    pub org: Option<String>,
}

impl PluginSignature {
    pub fn internal() -> Self {
        Self {
            status: SignatureStatus::Internal,
            signature_type: None,
            org: None,
        }
    }

    pub fn unsigned() -> Self {
        Self::with_status(SignatureStatus::Unsigned)
    }

    pub fn with_status(status: SignatureStatus) -> Self {
        Self {
            status,
            signature_type: None,
            org: None,
        }
    }
}

#[derive(Debug)]
pub struct Plugin {
    /// Manifest with asset paths and include defaults resolved
    pub json: PluginJson,
    pub class: PluginClass,
    pub fs: PluginFs,
    /// Directory removed on uninstall; differs from `fs.base()` for `dist/` builds
    pub root: PathBuf,
    pub signature: PluginSignature,
    /// Front-end entry module
    pub module: String,
    pub base_url: String,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub angular_detected: bool,
    client: RwLock<Option<Arc<dyn BackendClient>>>,
    decommissioned: AtomicBool,
}

impl Plugin {
    pub fn new(
        json: PluginJson,
        class: PluginClass,
        fs: PluginFs,
        root: PathBuf,
        signature: PluginSignature,
    ) -> Self {
        Self {
            json,
            class,
            fs,
            root,
            signature,
            module: String::new(),
            base_url: String::new(),
            parent_id: None,
            children: Vec::new(),
            angular_detected: false,
            client: RwLock::new(None),
            decommissioned: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.json.id
    }

    pub fn plugin_type(&self) -> PluginType {
        self.json.plugin_type
    }

    pub fn version(&self) -> &str {
        &self.json.info.version
    }

    pub fn is_backend(&self) -> bool {
        self.json.backend
    }

    pub fn is_app(&self) -> bool {
        self.json.plugin_type == PluginType::App
    }

    pub fn is_renderer(&self) -> bool {
        self.json.plugin_type == PluginType::Renderer
    }

    pub fn is_secrets_manager(&self) -> bool {
        self.json.plugin_type == PluginType::SecretsManager
    }

    pub fn is_core(&self) -> bool {
        self.class == PluginClass::Core
    }

    pub fn is_external(&self) -> bool {
        self.class == PluginClass::External
    }

    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_decommissioned(&self) -> bool {
        self.decommissioned.load(Ordering::SeqCst)
    }

    pub fn decommission(&self) {
        self.decommissioned.store(true, Ordering::SeqCst);
    }

    /// Attach a client before the plugin is shared
    pub fn attach_client(&mut self, client: Arc<dyn BackendClient>) {
        *self.client.get_mut() = Some(client);
    }

    pub async fn client(&self) -> Option<Arc<dyn BackendClient>> {
        self.client.read().await.clone()
    }

    /// Detach the client; later reads see no client
    pub async fn take_client(&self) -> Option<Arc<dyn BackendClient>> {
        self.client.write().await.take()
    }

    /// Detach the client of an unshared plugin
    pub fn take_client_mut(&mut self) -> Option<Arc<dyn BackendClient>> {
        self.client.get_mut().take()
    }

    pub async fn view(&self) -> PluginView {
        let running = self
            .client
            .read()
            .await
            .as_ref()
            .is_some_and(|c| !c.is_exited());

        PluginView {
            id: self.json.id.clone(),
            name: self.json.name.clone(),
            plugin_type: self.json.plugin_type,
            class: self.class,
            version: self.json.info.version.clone(),
            info: self.json.info.clone(),
            dependencies: self.json.dependencies.clone(),
            includes: self.json.includes.clone(),
            signature: self.signature.clone(),
            module: self.module.clone(),
            base_url: self.base_url.clone(),
            backend: self.json.backend,
            running,
            angular_detected: self.angular_detected,
            parent_id: self.parent_id.clone(),
            children: self.children.clone(),
            dir: self.fs.base().to_path_buf(),
        }
    }
}

/// Public projection of a registered plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub class: PluginClass,
    pub version: String,
    pub info: Info,
    pub dependencies: Dependencies,
    pub includes: Vec<Include>,
    pub signature: PluginSignature,
    pub module: String,
    pub base_url: String,
    pub backend: bool,
    /// A backend client is attached and its process is alive
    pub running: bool,
    pub angular_detected: bool,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub dir: PathBuf,
}

/// Pipeline stage a plugin failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStage {
    Bootstrap,
    Validation,
    Initialization,
    Registration,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadStage::Bootstrap => "bootstrap",
            LoadStage::Validation => "validation",
            LoadStage::Initialization => "initialization",
            LoadStage::Registration => "registration",
        };
        f.write_str(s)
    }
}

/// A plugin excluded from a load pass
#[derive(Debug, Clone, Serialize)]
pub struct LoadError {
    /// Unknown when the manifest could not be parsed
    pub plugin_id: Option<String>,
    pub path: PathBuf,
    pub stage: LoadStage,
    pub message: String,
    pub hint: String,
}

impl LoadError {
    pub fn new(plugin_id: Option<&str>, path: &Path, stage: LoadStage, error: &EngineError) -> Self {
        Self {
            plugin_id: plugin_id.map(str::to_string),
            path: path.to_path_buf(),
            stage,
            message: error.to_string(),
            hint: error.user_hint().to_string(),
        }
    }

    pub fn for_plugin(plugin: &Plugin, stage: LoadStage, error: &EngineError) -> Self {
        Self::new(Some(plugin.id()), plugin.fs.base(), stage, error)
    }
}
