//! Detection of the deprecated angular front-end framework
//!
//! The entry module is matched against a built-in pattern list. When remote
//! patterns are enabled, a list fetched over HTTP is consulted first. The fetched
//! list (or the empty list a failed fetch degrades to) is cached for the TTL.

use regex::bytes::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One pattern record as served by the remote endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PatternRecord {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern: String,
}

/// A compiled pattern
#[derive(Debug, Clone)]
pub enum Detector {
    Contains(Vec<u8>),
    Regex(Regex),
}

impl Detector {
    pub fn matches(&self, module: &[u8]) -> bool {
        match self {
            Detector::Contains(needle) => {
                !needle.is_empty() && module.windows(needle.len()).any(|w| w == needle.as_slice())
            }
            Detector::Regex(re) => re.is_match(module),
        }
    }
}

/// Compile records, ignoring unknown kinds and bad expressions
pub fn compile(records: &[PatternRecord]) -> Vec<Detector> {
    records
        .iter()
        .filter_map(|record| match record.kind.as_str() {
            "contains" => Some(Detector::Contains(record.pattern.as_bytes().to_vec())),
            "regex" => match Regex::new(&record.pattern) {
                Ok(re) => Some(Detector::Regex(re)),
                Err(e) => {
                    warn!(name = %record.name, error = %e, "Ignoring invalid angular pattern");
                    None
                }
            },
            other => {
                debug!(name = %record.name, kind = %other, "Ignoring unknown angular pattern kind");
                None
            }
        })
        .collect()
}

/// Patterns shipped with the host
pub fn static_detectors() -> Vec<Detector> {
    let contains = [
        "PanelCtrl",
        "ConfigCtrl",
        "QueryCtrl",
        "app/plugins/sdk",
        "angular.isNumber(",
        "editor.html",
        "ctrl.annotation",
        "getLegacyAngularInjector",
    ];
    let regexes = [
        r#"["']QueryCtrl["']"#,
        r#"["']app/core/(utils/promiseToDigest|core_module)["']"#,
        r#"from\s+["']grafana/app/"#,
        r"System\.register\(",
    ];

    let mut out: Vec<Detector> = contains
        .iter()
        .map(|s| Detector::Contains(s.as_bytes().to_vec()))
        .collect();
    out.extend(regexes.iter().filter_map(|r| Regex::new(r).ok().map(Detector::Regex)));
    out
}

#[derive(Debug)]
struct Cached {
    fetched_at: Instant,
    detectors: Arc<Vec<Detector>>,
}

#[derive(Debug)]
struct RemotePatterns {
    client: reqwest::Client,
    url: String,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

impl RemotePatterns {
    async fn detectors(&self) -> Arc<Vec<Detector>> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Arc::clone(&cached.detectors);
            }
        }

        let detectors = Arc::new(match self.fetch().await {
            Ok(records) => {
                debug!(count = records.len(), "Fetched angular patterns");
                compile(&records)
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Failed to fetch angular patterns");
                Vec::new()
            }
        });
        *cache = Some(Cached {
            fetched_at: Instant::now(),
            detectors: Arc::clone(&detectors),
        });
        detectors
    }

    async fn fetch(&self) -> Result<Vec<PatternRecord>, reqwest::Error> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[derive(Debug)]
pub struct AngularDetector {
    static_detectors: Vec<Detector>,
    remote: Option<RemotePatterns>,
}

impl AngularDetector {
    /// Built-in patterns only
    pub fn new() -> Self {
        Self {
            static_detectors: static_detectors(),
            remote: None,
        }
    }

    /// Consult `url` before the built-in patterns
    pub fn with_remote(url: &str, ttl: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            static_detectors: static_detectors(),
            remote: Some(RemotePatterns {
                client,
                url: url.to_string(),
                ttl,
                cache: Mutex::new(None),
            }),
        })
    }

    pub async fn detect(&self, module: &[u8]) -> bool {
        if let Some(remote) = &self.remote {
            if remote.detectors().await.iter().any(|d| d.matches(module)) {
                return true;
            }
        }
        self.static_detectors.iter().any(|d| d.matches(module))
    }
}

impl Default for AngularDetector {
    fn default() -> Self {
        Self::new()
    }
}
