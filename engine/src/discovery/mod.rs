//! Plugin discovery
//!
//! Walks the roots of a [`PluginSource`] looking for `plugin.json` files and groups
//! them into bundles: the shallowest manifest under a directory is the primary,
//! every manifest below it is a child.
//!
//! # Walk rules
//!
//! - Symlinks are followed; a directory is entered at most once per source (by
//!   canonical path), which also breaks symlink cycles
//! - `node_modules` and hidden directories are skipped
//! - With `follow_dist`, a plugin directory at the top of a root that contains
//!   `dist/plugin.json` is walked through `dist/` only
//! - Deeper `dist` directories are skipped unless `nested_dist` is set
//! - Missing roots and unreadable directories contribute nothing; other
//!   filesystem errors abort the walk

use crate::sources::PluginSource;
use sdk::errors::EngineError;
use sdk::manifest::PLUGIN_JSON;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DIST_DIR: &str = "dist";

/// A manifest found on disk, not yet parsed
#[derive(Debug, Clone)]
pub struct FoundPlugin {
    /// Canonical directory holding `plugin.json`
    pub dir: PathBuf,
    /// Directory the plugin was installed as; the parent of `dir` for `dist/` builds
    pub root: PathBuf,
    /// Raw `plugin.json` bytes
    pub manifest: Vec<u8>,
}

/// A primary manifest plus the manifests nested below it
#[derive(Debug, Clone)]
pub struct FoundBundle {
    pub primary: FoundPlugin,
    pub children: Vec<FoundPlugin>,
}

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOptions {
    pub follow_dist: bool,
    pub nested_dist: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            follow_dist: true,
            nested_dist: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Discoverer {
    options: DiscoveryOptions,
}

impl Discoverer {
    pub fn new(options: DiscoveryOptions) -> Self {
        Self { options }
    }

    /// Discover bundles on a blocking worker
    pub async fn discover(
        &self,
        source: &PluginSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<FoundBundle>, EngineError> {
        let this = self.clone();
        let source = source.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || this.discover_blocking(&source, &cancel))
            .await
            .map_err(|e| EngineError::Discovery {
                path: PathBuf::new(),
                reason: format!("discovery task failed: {}", e),
            })?
    }

    pub fn discover_blocking(
        &self,
        source: &PluginSource,
        cancel: &CancellationToken,
    ) -> Result<Vec<FoundBundle>, EngineError> {
        let mut visited = HashSet::new();
        let mut bundles = Vec::new();

        for path in &source.paths {
            let found = self.scan_root(path, &mut visited, cancel)?;
            bundles.extend(group(found));
        }

        info!(
            class = %source.class,
            roots = source.paths.len(),
            bundles = bundles.len(),
            "Discovery finished"
        );
        Ok(bundles)
    }

    fn scan_root(
        &self,
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FoundPlugin>, EngineError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if is_skippable(&e) => {
                debug!(path = %path.display(), error = %e, "Skipping plugin root");
                return Ok(Vec::new());
            }
            Err(e) => return Err(discovery_error(path, e)),
        };

        // Explicit manifest paths walk the directory holding them
        let root = if meta.is_file() {
            if path.file_name().and_then(|n| n.to_str()) != Some(PLUGIN_JSON) {
                warn!(path = %path.display(), "Plugin path is neither a directory nor a plugin.json");
                return Ok(Vec::new());
            }
            match path.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return Ok(Vec::new()),
            }
        } else {
            path.to_path_buf()
        };

        let mut found = Vec::new();
        self.walk(&root, 0, None, visited, &mut found, cancel)?;
        Ok(found)
    }

    fn walk(
        &self,
        dir: &Path,
        depth: usize,
        install_root: Option<&Path>,
        visited: &mut HashSet<PathBuf>,
        found: &mut Vec<FoundPlugin>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let canonical = match dir.canonicalize() {
            Ok(p) => p,
            Err(e) if is_skippable(&e) => return Ok(()),
            Err(e) => return Err(discovery_error(dir, e)),
        };
        if !visited.insert(canonical.clone()) {
            debug!(path = %dir.display(), "Directory already visited, skipping");
            return Ok(());
        }

        if self.options.follow_dist && depth <= 1 && install_root.is_none() {
            let dist = canonical.join(DIST_DIR);
            if dist.join(PLUGIN_JSON).is_file() {
                debug!(path = %dist.display(), "Following dist folder");
                return self.walk(&dist, depth + 1, Some(&canonical), visited, found, cancel);
            }
        }

        let manifest_path = canonical.join(PLUGIN_JSON);
        if manifest_path.is_file() {
            match fs::read(&manifest_path) {
                Ok(manifest) => found.push(FoundPlugin {
                    root: install_root.map_or_else(|| canonical.clone(), Path::to_path_buf),
                    dir: canonical.clone(),
                    manifest,
                }),
                Err(e) if is_skippable(&e) => {
                    warn!(path = %manifest_path.display(), error = %e, "Cannot read plugin.json");
                }
                Err(e) => return Err(discovery_error(&manifest_path, e)),
            }
        }

        let entries = match fs::read_dir(&canonical) {
            Ok(entries) => entries,
            Err(e) if is_skippable(&e) => {
                warn!(path = %canonical.display(), error = %e, "Skipping unreadable directory");
                return Ok(());
            }
            Err(e) => return Err(discovery_error(&canonical, e)),
        };

        let mut subdirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| discovery_error(&canonical, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "node_modules" || name.starts_with('.') {
                continue;
            }
            if name == DIST_DIR && !self.options.nested_dist {
                continue;
            }
            let path = entry.path();
            match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => subdirs.push(path),
                Ok(_) => {}
                Err(e) if is_skippable(&e) => {
                    debug!(path = %path.display(), error = %e, "Skipping entry");
                }
                Err(e) => return Err(discovery_error(&path, e)),
            }
        }
        subdirs.sort();

        for sub in subdirs {
            self.walk(&sub, depth + 1, None, visited, found, cancel)?;
        }
        Ok(())
    }
}

/// Shallowest manifests become primaries; deeper ones attach to the primary above them
fn group(mut found: Vec<FoundPlugin>) -> Vec<FoundBundle> {
    found.sort_by(|a, b| {
        a.dir
            .components()
            .count()
            .cmp(&b.dir.components().count())
            .then_with(|| a.dir.cmp(&b.dir))
    });

    let mut bundles: Vec<FoundBundle> = Vec::new();
    for plugin in found {
        match bundles
            .iter_mut()
            .find(|b| plugin.dir.starts_with(&b.primary.root))
        {
            Some(bundle) => bundle.children.push(plugin),
            None => bundles.push(FoundBundle {
                primary: plugin,
                children: Vec::new(),
            }),
        }
    }

    bundles.sort_by(|a, b| a.primary.dir.cmp(&b.primary.dir));
    bundles
}

fn is_skippable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

fn discovery_error(path: &Path, e: io::Error) -> EngineError {
    EngineError::Discovery {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
