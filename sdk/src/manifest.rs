//! `plugin.json` manifest model
//!
//! Every plugin directory carries a `plugin.json` describing its identity,
//! dependencies, contributed pages and backend executable. Parsing is strict about
//! the fields the host relies on (`id`, `type`, `info.version`, `executable` for
//! backend plugins) and lenient about everything else so newer manifests still load.

use crate::types::PluginType;
use serde::{Deserialize, Serialize};

/// File name of the manifest inside a plugin directory
pub const PLUGIN_JSON: &str = "plugin.json";

/// Parsed `plugin.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginJson {
    pub id: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub name: String,
    pub info: Info,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub includes: Vec<Include>,
    #[serde(default)]
    pub backend: bool,
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub alerting: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub metrics: bool,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub hide_from_list: bool,
    #[serde(default)]
    pub preload: bool,
    #[serde(default)]
    pub auto_enabled: bool,
    #[serde(default)]
    pub skip_data_query: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    #[serde(default)]
    pub author: InfoLink,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub links: Vec<InfoLink>,
    #[serde(default)]
    pub logos: Logos,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    pub version: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub build: Option<BuildInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoLink {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logos {
    #[serde(default)]
    pub small: String,
    #[serde(default)]
    pub large: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependencies {
    /// Required host version range, e.g. `>=9.0.0`
    #[serde(default = "any_version")]
    pub grafana_version: String,
    /// Newer spelling of `grafanaVersion`; wins when both are set
    #[serde(default)]
    pub grafana_dependency: String,
    #[serde(default)]
    pub plugins: Vec<PluginDependency>,
}

impl Default for Dependencies {
    fn default() -> Self {
        Self {
            grafana_version: any_version(),
            grafana_dependency: String::new(),
            plugins: Vec::new(),
        }
    }
}

impl Dependencies {
    /// The host version range this plugin declares
    pub fn host_version_range(&self) -> &str {
        if self.grafana_dependency.trim().is_empty() {
            self.grafana_version.trim()
        } else {
            self.grafana_dependency.trim()
        }
    }
}

fn any_version() -> String {
    "*".to_string()
}

/// A sibling plugin this plugin requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    pub id: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// A dashboard, page or panel contributed by the plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Include {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub include_type: String,
    #[serde(default)]
    pub component: String,
    /// Minimum org role, e.g. `Viewer`
    #[serde(default)]
    pub role: String,
    /// RBAC action gating access
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub add_to_nav: bool,
    #[serde(default)]
    pub default_nav: bool,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub uid: String,
}

impl PluginJson {
    /// Parse and validate a manifest from raw bytes
    ///
    /// Returns a human-readable reason on failure; callers attach the path.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let json: PluginJson = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        json.validate()?;
        Ok(json)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("id must not be empty".to_string());
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || self.id.starts_with('.')
        {
            return Err(format!("id '{}' contains invalid characters", self.id));
        }
        if self.info.version.trim().is_empty() {
            return Err("info.version must not be empty".to_string());
        }
        if self.backend && self.executable.trim().is_empty() {
            return Err("executable is required for backend plugins".to_string());
        }
        for dep in &self.dependencies.plugins {
            if dep.id.is_empty() {
                return Err("dependencies.plugins entries need an id".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "id": "acme-weather-datasource",
        "type": "datasource",
        "name": "Weather",
        "backend": true,
        "executable": "gpx_weather",
        "info": {
            "version": "1.2.0",
            "author": { "name": "Acme" },
            "logos": { "small": "img/logo.svg", "large": "img/logo.svg" }
        },
        "dependencies": {
            "grafanaVersion": ">=9.0.0",
            "plugins": [{ "id": "acme-panel", "type": "panel", "name": "Acme", "version": "1.x" }]
        },
        "includes": [{ "name": "Overview", "path": "dashboards/overview.json", "type": "dashboard" }]
    }"#;

    #[test]
    fn test_parse_valid_manifest() {
        let json = PluginJson::from_slice(VALID.as_bytes()).unwrap();
        assert_eq!(json.id, "acme-weather-datasource");
        assert_eq!(json.plugin_type, PluginType::DataSource);
        assert_eq!(json.info.version, "1.2.0");
        assert_eq!(json.dependencies.host_version_range(), ">=9.0.0");
        assert_eq!(json.dependencies.plugins[0].plugin_type, PluginType::Panel);
        assert_eq!(json.includes[0].include_type, "dashboard");
        assert!(json.backend);
    }

    #[test]
    fn test_missing_version_is_rejected() {
        let err = PluginJson::from_slice(br#"{"id":"a","type":"panel","info":{}}"#).unwrap_err();
        assert!(err.contains("version"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(PluginJson::from_slice(
            br#"{"id":"a","type":"widget","info":{"version":"1.0.0"}}"#
        )
        .is_err());
    }

    #[test]
    fn test_backend_requires_executable() {
        let err = PluginJson::from_slice(
            br#"{"id":"a","type":"datasource","backend":true,"info":{"version":"1.0.0"}}"#,
        )
        .unwrap_err();
        assert!(err.contains("executable"));
    }

    #[test]
    fn test_path_like_ids_are_rejected() {
        assert!(PluginJson::from_slice(
            br#"{"id":"../evil","type":"panel","info":{"version":"1.0.0"}}"#
        )
        .is_err());
    }

    #[test]
    fn test_unknown_fields_are_ignored_and_defaults_apply() {
        let json = PluginJson::from_slice(
            br#"{"id":"a","type":"panel","info":{"version":"1.0.0"},"futureField":{"x":1}}"#,
        )
        .unwrap();
        assert_eq!(json.dependencies.host_version_range(), "*");
        assert!(!json.backend);
        assert!(json.includes.is_empty());
    }

    #[test]
    fn test_grafana_dependency_wins_over_grafana_version() {
        let json = PluginJson::from_slice(
            br#"{"id":"a","type":"panel","info":{"version":"1.0.0"},
                 "dependencies":{"grafanaVersion":"7.x","grafanaDependency":">=10.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(json.dependencies.host_version_range(), ">=10.0.0");
    }
}
