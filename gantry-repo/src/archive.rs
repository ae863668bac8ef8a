//! Plugin archive extraction
//!
//! Archives are gzip-compressed tarballs. When every entry lives under one
//! top-level directory (`panel-x/plugin.json`, `panel-x/module.js`, ...) that
//! directory is stripped so the plugin lands directly in the destination.
//! Absolute paths and `..` components fail the extraction; links are skipped.

use crate::error::RepoError;
use flate2::read::GzDecoder;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Extract `bytes` into `dest` on the blocking pool
pub async fn extract(bytes: Vec<u8>, dest: PathBuf) -> Result<(), RepoError> {
    tokio::task::spawn_blocking(move || extract_tar_gz(&bytes, &dest))
        .await
        .map_err(|e| RepoError::Archive(format!("extraction task failed: {}", e)))?
}

/// Extract a `.tar.gz` archive held in memory into `dest`
pub fn extract_tar_gz(bytes: &[u8], dest: &Path) -> Result<(), RepoError> {
    let prefix = common_prefix(bytes)?;
    fs::create_dir_all(dest)?;

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut written = 0usize;

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let raw = entry.path().map_err(archive_err)?.into_owned();
        let relative = safe_relative(&raw)?;

        let relative = match &prefix {
            Some(prefix) => match relative.strip_prefix(prefix) {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => relative,
            },
            None => relative,
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(&relative);
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&target)?;
            io::copy(&mut entry, &mut file)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = entry.header().mode().unwrap_or(0o644) & 0o755;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode | 0o600))?;
            }
            written += 1;
        } else {
            warn!(path = %raw.display(), "Skipping non-regular archive entry");
        }
    }

    if written == 0 {
        return Err(RepoError::Archive("archive contains no files".to_string()));
    }

    debug!(files = written, dest = %dest.display(), "Archive extracted");
    Ok(())
}

/// The single top-level directory shared by every entry, if there is one
fn common_prefix(bytes: &[u8]) -> Result<Option<PathBuf>, RepoError> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut roots = BTreeSet::new();
    let mut top_level_file = false;

    for entry in archive.entries().map_err(archive_err)? {
        let entry = entry.map_err(archive_err)?;
        let path = safe_relative(&entry.path().map_err(archive_err)?)?;
        let mut components = path.components();
        if let Some(first) = components.next() {
            roots.insert(PathBuf::from(first.as_os_str()));
            if components.next().is_none() && !entry.header().entry_type().is_dir() {
                top_level_file = true;
            }
        }
    }

    if roots.len() == 1 && !top_level_file {
        Ok(roots.into_iter().next())
    } else {
        Ok(None)
    }
}

/// Normalize an entry path, rejecting anything that could escape the destination
fn safe_relative(path: &Path) -> Result<PathBuf, RepoError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RepoError::Archive(format!(
                    "entry escapes destination: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(out)
}

fn archive_err(e: io::Error) -> RepoError {
    RepoError::Archive(e.to_string())
}
