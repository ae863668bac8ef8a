//! Remote plugin repository: version metadata and package downloads
//!
//! The repository exposes `GET {base}/plugins/{id}/versions`:
//!
//! ```json
//! { "items": [
//!     { "version": "2.0.0",
//!       "grafanaDependency": ">=9.0.0",
//!       "packages": {
//!         "linux-amd64": { "sha256": "…", "downloadUrl": "https://…/linux.tar.gz" },
//!         "any":         { "sha256": "…", "downloadUrl": "https://…/any.tar.gz" } } } ] }
//! ```

use crate::error::RepoError;
use crate::verifier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("gantry-repo/", env!("CARGO_PKG_VERSION"));

/// Package key used when a plugin ships a single platform-independent archive
pub const ANY_PLATFORM: &str = "any";

/// Version list returned by the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsResponse {
    #[serde(default)]
    pub items: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: String,
    /// Host version range; empty means any host
    #[serde(default)]
    pub grafana_dependency: String,
    #[serde(default)]
    pub packages: HashMap<String, Package>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub sha256: String,
    pub download_url: String,
}

/// Everything needed to download one archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlugin {
    pub id: String,
    pub version: String,
    pub download_url: String,
    pub sha256: String,
}

/// Source of installable plugin archives
#[async_trait]
pub trait PluginRepository: Send + Sync {
    /// Pick the archive for `id`
    ///
    /// With `version = None` the newest version compatible with `host_version` wins.
    async fn resolve(
        &self,
        id: &str,
        version: Option<&str>,
        host_version: &str,
    ) -> Result<ResolvedPlugin, RepoError>;

    /// Download the archive and verify its checksum before returning it
    async fn download(&self, plugin: &ResolvedPlugin) -> Result<Vec<u8>, RepoError>;
}

/// HTTP client for a plugin repository
#[derive(Debug, Clone)]
pub struct RepositoryClient {
    base_url: String,
    http: reqwest::Client,
    platform: String,
}

impl RepositoryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RepoError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            platform: current_platform(),
        })
    }

    /// Override the platform key used for package selection
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the published versions of a plugin
    pub async fn versions(&self, id: &str) -> Result<Vec<VersionEntry>, RepoError> {
        let url = format!("{}/plugins/{}/versions", self.base_url, id);
        debug!(url = %url, "Fetching plugin versions");

        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RepoError::NotFound(id.to_string()));
        }

        let body: VersionsResponse = response.error_for_status()?.json().await?;
        Ok(body.items)
    }
}

#[async_trait]
impl PluginRepository for RepositoryClient {
    async fn resolve(
        &self,
        id: &str,
        version: Option<&str>,
        host_version: &str,
    ) -> Result<ResolvedPlugin, RepoError> {
        let versions = self.versions(id).await?;
        if versions.is_empty() {
            return Err(RepoError::NotFound(id.to_string()));
        }

        let entry = select_version(id, &versions, version, host_version)?;
        let package = entry
            .packages
            .get(&self.platform)
            .or_else(|| entry.packages.get(ANY_PLATFORM))
            .ok_or_else(|| RepoError::NoPackage {
                plugin_id: id.to_string(),
                version: entry.version.clone(),
                platform: self.platform.clone(),
            })?;

        Ok(ResolvedPlugin {
            id: id.to_string(),
            version: entry.version.clone(),
            download_url: package.download_url.clone(),
            sha256: package.sha256.clone(),
        })
    }

    async fn download(&self, plugin: &ResolvedPlugin) -> Result<Vec<u8>, RepoError> {
        info!(plugin_id = %plugin.id, version = %plugin.version, "Downloading plugin");

        // Download into memory first (never to disk before verification)
        let bytes = self
            .http
            .get(&plugin.download_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        verifier::verify_hash(&bytes, &plugin.sha256)?;
        debug!(plugin_id = %plugin.id, sha256 = %plugin.sha256, "Hash verified");

        Ok(bytes.to_vec())
    }
}

/// Choose the requested version, or the newest one compatible with the host
pub fn select_version<'a>(
    id: &str,
    versions: &'a [VersionEntry],
    requested: Option<&str>,
    host_version: &str,
) -> Result<&'a VersionEntry, RepoError> {
    let incompatible = |version: &str| RepoError::NoCompatibleVersion {
        plugin_id: id.to_string(),
        version: version.to_string(),
        host: host_version.to_string(),
    };

    if let Some(requested) = requested {
        let wanted = requested.trim_start_matches('v');
        let entry = versions
            .iter()
            .find(|v| v.version.trim_start_matches('v') == wanted)
            .ok_or_else(|| incompatible(requested))?;
        if !is_compatible(&entry.grafana_dependency, host_version) {
            return Err(incompatible(requested));
        }
        return Ok(entry);
    }

    versions
        .iter()
        .filter(|v| is_compatible(&v.grafana_dependency, host_version))
        .filter_map(|v| {
            semver::Version::parse(v.version.trim_start_matches('v'))
                .ok()
                .map(|parsed| (parsed, v))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, v)| v)
        .ok_or_else(|| incompatible("latest"))
}

/// A missing range or an unparsable host version never blocks an install
///
/// Ranges use the npm form: `||` separates alternatives, whitespace or commas
/// separate comparators that must all hold, and `a - b` is an inclusive span.
/// A range that does not parse is incompatible.
pub fn is_compatible(range: &str, host_version: &str) -> bool {
    let range = range.trim();
    if range.is_empty() || range == "*" {
        return true;
    }
    let Ok(host) = semver::Version::parse(host_version.trim_start_matches('v')) else {
        return true;
    };
    range
        .split("||")
        .any(|branch| parse_branch(branch).is_some_and(|req| req.matches(&host)))
}

fn parse_branch(branch: &str) -> Option<semver::VersionReq> {
    let mut comparators: Vec<String> = Vec::new();
    for token in branch
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        // `>= 10.0.0` keeps the operator apart from its version
        match comparators.last_mut() {
            Some(last) if is_operator(last) => last.push_str(token),
            _ => comparators.push(token.to_string()),
        }
    }

    let joined = match comparators.as_slice() {
        [] => return None,
        [low, dash, high] if dash == "-" => format!(">={}, <={}", low, high),
        all => all.join(", "),
    };
    semver::VersionReq::parse(&joined).ok()
}

fn is_operator(token: &str) -> bool {
    matches!(token, ">" | ">=" | "<" | "<=" | "=" | "~" | "^")
}

/// Package key for the running platform, e.g. `linux-amd64`
pub fn current_platform() -> String {
    format!("{}-{}", os_name(), arch_name())
}

/// OS name as used in package keys and executable suffixes
pub fn os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Architecture name as used in package keys and executable suffixes
pub fn arch_name() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}
