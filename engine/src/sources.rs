//! Plugin sources: a class plus the roots that hold plugins of that class

use crate::config::Config;
use sdk::types::PluginClass;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSource {
    pub class: PluginClass,
    /// Directories to walk or explicit `plugin.json` paths
    pub paths: Vec<PathBuf>,
}

impl PluginSource {
    pub fn new(class: PluginClass, paths: Vec<PathBuf>) -> Self {
        Self { class, paths }
    }

    /// Single external plugin directory, as loaded after an install
    pub fn external_dir(dir: PathBuf) -> Self {
        Self::new(PluginClass::External, vec![dir])
    }
}

/// Sources in load order: core, bundled, then external
pub fn sources_from_config(config: &Config) -> Vec<PluginSource> {
    let mut sources = Vec::new();

    if let Some(dir) = &config.plugins.core_dir {
        sources.push(PluginSource::new(PluginClass::Core, vec![dir.clone()]));
    }
    if let Some(dir) = &config.plugins.bundled_dir {
        sources.push(PluginSource::new(PluginClass::Bundled, vec![dir.clone()]));
    }

    let mut external = vec![config.core.plugins_dir.clone()];
    external.extend(config.plugins.extra_paths.iter().cloned());
    sources.push(PluginSource::new(PluginClass::External, external));

    sources
}
