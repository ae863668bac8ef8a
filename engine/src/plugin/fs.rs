//! Read-only file tree scoped to one plugin directory
//!
//! Every lookup is canonicalized and must stay under the canonical plugin root,
//! so neither `..` nor a symlink pointing elsewhere can reach outside it.
//!
//! # Security Model
//!
//! 1. Reject absolute paths and `..` components before touching the disk
//! 2. Canonicalize to resolve symlinks
//! 3. Verify the canonical path is within the plugin root

use sdk::errors::EngineError;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFs {
    base: PathBuf,
}

impl PluginFs {
    /// Scope a view to `base`, which must exist
    pub fn new(base: &Path) -> Result<Self, EngineError> {
        let base = base.canonicalize()?;
        Ok(Self { base })
    }

    /// Canonical plugin root
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a plugin-relative path to a canonical path inside the root
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathOutsidePlugin` for absolute paths, `..` components
    /// or symlinks resolving outside the root, and `EngineError::Io` when the path
    /// does not exist.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, EngineError> {
        let rel = Path::new(relative);

        // Gate 1: lexical checks
        if rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        }) {
            return Err(EngineError::PathOutsidePlugin(rel.to_path_buf()));
        }

        // Gate 2: canonicalize to resolve symlinks
        let canonical = self.base.join(rel).canonicalize()?;

        // Gate 3: verify within plugin root
        if !canonical.starts_with(&self.base) {
            return Err(EngineError::PathOutsidePlugin(canonical));
        }

        Ok(canonical)
    }

    /// Read a file; missing files are an error
    pub fn read(&self, relative: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.resolve(relative)?;
        Ok(fs::read(path)?)
    }

    /// Read a file, treating "not found" as `None`
    pub fn read_optional(&self, relative: &str) -> Result<Option<Vec<u8>>, EngineError> {
        match self.read(relative) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(EngineError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(relative).is_ok()
    }

    /// All regular files in the tree as sorted `/`-separated relative paths
    ///
    /// Symlinks are followed while they stay inside the root; links that escape
    /// it are skipped, as are directory cycles.
    pub fn files(&self) -> Result<Vec<String>, EngineError> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(self.base.clone());
        self.collect(&self.base, "", &mut visited, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn collect(
        &self,
        dir: &Path,
        prefix: &str,
        visited: &mut HashSet<PathBuf>,
        out: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let logical = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            let path = entry.path();
            let canonical = match path.canonicalize() {
                Ok(p) => p,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Skipping dangling symlink");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !canonical.starts_with(&self.base) {
                debug!(path = %path.display(), "Skipping symlink outside plugin root");
                continue;
            }

            let meta = fs::metadata(&canonical)?;
            if meta.is_dir() {
                if visited.insert(canonical.clone()) {
                    self.collect(&canonical, &logical, visited, out)?;
                }
            } else if meta.is_file() {
                out.push(logical);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> (TempDir, PluginFs) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("plugin");
        fs::create_dir_all(root.join("img")).unwrap();
        fs::write(root.join("plugin.json"), "{}").unwrap();
        fs::write(root.join("img/logo.svg"), "<svg/>").unwrap();
        fs::write(temp.path().join("secret.txt"), "nope").unwrap();
        let view = PluginFs::new(&root).unwrap();
        (temp, view)
    }

    #[test]
    fn test_reads_inside_root() {
        let (_temp, view) = tree();
        assert_eq!(view.read("img/logo.svg").unwrap(), b"<svg/>");
        assert!(view.exists("plugin.json"));
        assert_eq!(view.read_optional("missing.js").unwrap(), None);
    }

    #[test]
    fn test_traversal_is_rejected() {
        let (_temp, view) = tree();
        assert!(matches!(
            view.read("../secret.txt"),
            Err(EngineError::PathOutsidePlugin(_))
        ));
        assert!(matches!(
            view.resolve("/etc/passwd"),
            Err(EngineError::PathOutsidePlugin(_))
        ));
    }

    #[test]
    fn test_files_lists_relative_paths() {
        let (_temp, view) = tree();
        assert_eq!(view.files().unwrap(), vec!["img/logo.svg", "plugin.json"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected_and_skipped() {
        let (temp, view) = tree();
        std::os::unix::fs::symlink(temp.path().join("secret.txt"), view.base().join("leak"))
            .unwrap();
        assert!(matches!(
            view.read("leak"),
            Err(EngineError::PathOutsidePlugin(_))
        ));
        assert!(!view.files().unwrap().contains(&"leak".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let (_temp, view) = tree();
        std::os::unix::fs::symlink(view.base(), view.base().join("img/loop")).unwrap();
        let files = view.files().unwrap();
        assert_eq!(files, vec!["img/logo.svg", "plugin.json"]);
    }
}
