//! Plugin classification enums and backend request/response payloads

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kind of plugin declared by `plugin.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    #[serde(rename = "datasource")]
    DataSource,
    Panel,
    App,
    Renderer,
    #[serde(rename = "secretsmanager")]
    SecretsManager,
}

impl PluginType {
    pub const ALL: [PluginType; 5] = [
        PluginType::DataSource,
        PluginType::Panel,
        PluginType::App,
        PluginType::Renderer,
        PluginType::SecretsManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::DataSource => "datasource",
            PluginType::Panel => "panel",
            PluginType::App => "app",
            PluginType::Renderer => "renderer",
            PluginType::SecretsManager => "secretsmanager",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown plugin type '{}'. Expected one of: datasource, panel, app, renderer, secretsmanager",
                    s
                )
            })
    }
}

/// Where a plugin comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginClass {
    /// Shipped with the host
    Core,
    /// Shipped alongside the host but independently versioned
    Bundled,
    /// Installed by a user or operator
    External,
}

impl PluginClass {
    /// Only external plugins may be installed, upgraded or removed
    pub fn is_removable(&self) -> bool {
        matches!(self, PluginClass::External)
    }
}

impl fmt::Display for PluginClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginClass::Core => write!(f, "core"),
            PluginClass::Bundled => write!(f, "bundled"),
            PluginClass::External => write!(f, "external"),
        }
    }
}

/// Trust classification of a plugin package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    /// Core plugin, trusted by construction
    Internal,
    Valid,
    Invalid,
    /// Signed, but files on disk differ from the signed manifest
    Modified,
    Unsigned,
}

impl SignatureStatus {
    pub fn is_trusted(&self) -> bool {
        matches!(self, SignatureStatus::Internal | SignatureStatus::Valid)
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignatureStatus::Internal => "internal",
            SignatureStatus::Valid => "valid",
            SignatureStatus::Invalid => "invalid",
            SignatureStatus::Modified => "modified",
            SignatureStatus::Unsigned => "unsigned",
        };
        f.write_str(s)
    }
}

/// Who signed a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureType {
    Grafana,
    Commercial,
    Community,
    Private,
    PrivateGlob,
}

impl SignatureType {
    /// Private signatures are only valid for specific root URLs
    pub fn is_private(&self) -> bool {
        matches!(self, SignatureType::Private | SignatureType::PrivateGlob)
    }
}

/// Backend capabilities a plugin process can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    QueryData,
    CheckHealth,
    CallResource,
    CollectMetrics,
    Stream,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::QueryData,
        Capability::CheckHealth,
        Capability::CallResource,
        Capability::CollectMetrics,
        Capability::Stream,
    ];

    /// Capabilities the host is willing to use for a plugin of the given kind
    pub fn for_plugin_type(plugin_type: PluginType) -> &'static [Capability] {
        match plugin_type {
            PluginType::DataSource => &Self::ALL,
            PluginType::App => &[
                Capability::CheckHealth,
                Capability::CallResource,
                Capability::CollectMetrics,
                Capability::Stream,
            ],
            PluginType::Renderer | PluginType::SecretsManager => {
                &[Capability::CallResource, Capability::CollectMetrics]
            }
            PluginType::Panel => &[],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::QueryData => "query_data",
            Capability::CheckHealth => "check_health",
            Capability::CallResource => "call_resource",
            Capability::CollectMetrics => "collect_metrics",
            Capability::Stream => "stream",
        };
        f.write_str(s)
    }
}

/// Request-scoped information handed to every backend call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginContext {
    pub org_id: i64,
    pub plugin_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Time range in unix milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataQuery {
    pub ref_id: String,
    #[serde(default)]
    pub query_type: String,
    #[serde(default)]
    pub max_data_points: i64,
    #[serde(default)]
    pub interval_ms: i64,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default)]
    pub json: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDataRequest {
    pub plugin_context: PluginContext,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub queries: Vec<DataQuery>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataResponse {
    #[serde(default)]
    pub frames: Vec<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Responses keyed by query `ref_id`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDataResponse {
    pub responses: HashMap<String, DataResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckHealthRequest {
    pub plugin_context: PluginContext,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Ok,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub json_details: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallResourceRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallResourceResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectMetricsRequest {
    pub plugin_context: PluginContext,
}

/// Metrics in Prometheus text exposition format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectMetricsResult {
    #[serde(default)]
    pub prometheus_metrics: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStreamRequest {
    pub plugin_context: PluginContext,
    pub path: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamPacket {
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&PluginType::DataSource).unwrap(),
            "\"datasource\""
        );
        assert_eq!(
            serde_json::from_str::<PluginType>("\"secretsmanager\"").unwrap(),
            PluginType::SecretsManager
        );
        assert_eq!("app".parse::<PluginType>().unwrap(), PluginType::App);
        assert!("widget".parse::<PluginType>().is_err());
    }

    #[test]
    fn test_signature_type_private_glob_name() {
        assert_eq!(
            serde_json::from_str::<SignatureType>("\"private-glob\"").unwrap(),
            SignatureType::PrivateGlob
        );
        assert!(SignatureType::PrivateGlob.is_private());
        assert!(!SignatureType::Community.is_private());
    }

    #[test]
    fn test_capabilities_per_kind() {
        assert_eq!(Capability::for_plugin_type(PluginType::DataSource).len(), 5);
        assert!(!Capability::for_plugin_type(PluginType::App).contains(&Capability::QueryData));
        assert!(Capability::for_plugin_type(PluginType::Panel).is_empty());
    }

    #[test]
    fn test_only_external_class_is_removable() {
        assert!(PluginClass::External.is_removable());
        assert!(!PluginClass::Bundled.is_removable());
        assert!(!PluginClass::Core.is_removable());
    }
}
