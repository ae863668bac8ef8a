//! Front-end asset locations and include defaults

use sdk::manifest::{Include, PluginJson};
use sdk::types::{PluginClass, PluginType};

/// Role required for includes that do not declare one
pub const DEFAULT_INCLUDE_ROLE: &str = "Viewer";

/// Action gating app pages that do not declare one
pub const APP_ACCESS_ACTION: &str = "plugins.app:access";

/// Base URL the plugin's static files are served from
///
/// Children are addressed through their parent: `parent_base/<relative dir>`.
pub fn base_url(class: PluginClass, json: &PluginJson, parent: Option<(&str, &str)>) -> String {
    if let Some((parent_base, relative)) = parent {
        return join(parent_base, relative);
    }
    match class {
        PluginClass::Core => format!("public/app/plugins/{}/{}", json.plugin_type, json.id),
        PluginClass::Bundled | PluginClass::External => format!("public/plugins/{}", json.id),
    }
}

/// Entry module of the front end
pub fn module(class: PluginClass, json: &PluginJson, base_url: &str) -> String {
    match class {
        PluginClass::Core => format!("core:plugin/{}", json.id),
        PluginClass::Bundled | PluginClass::External => join(base_url, "module.js"),
    }
}

/// Rewrite logo and screenshot paths relative to `base_url`
pub fn resolve_info(json: &mut PluginJson, base_url: &str) {
    let logos = &mut json.info.logos;
    logos.small = resolve_asset(&logos.small, base_url, json.plugin_type);
    logos.large = resolve_asset(&logos.large, base_url, json.plugin_type);

    for shot in &mut json.info.screenshots {
        if !shot.path.is_empty() {
            shot.path = resolve_path(&shot.path, base_url);
        }
    }
}

/// Fill in role, action and slug defaults
pub fn apply_include_defaults(json: &mut PluginJson) {
    let is_app = json.plugin_type == PluginType::App;
    for include in &mut json.includes {
        default_include(include, is_app);
    }
}

fn default_include(include: &mut Include, is_app: bool) {
    if include.role.is_empty() {
        include.role = DEFAULT_INCLUDE_ROLE.to_string();
    }
    if is_app && include.include_type == "page" && include.action.is_empty() {
        include.action = APP_ACCESS_ACTION.to_string();
    }
    if include.slug.is_empty() && !include.name.is_empty() {
        include.slug = slugify(&include.name);
    }
}

fn resolve_asset(path: &str, base_url: &str, plugin_type: PluginType) -> String {
    if path.is_empty() {
        return default_logo(plugin_type).to_string();
    }
    resolve_path(path, base_url)
}

fn resolve_path(path: &str, base_url: &str) -> String {
    if is_absolute_url(path) {
        path.to_string()
    } else {
        join(base_url, path)
    }
}

fn default_logo(plugin_type: PluginType) -> &'static str {
    match plugin_type {
        PluginType::DataSource => "public/img/icn-datasource.svg",
        PluginType::Panel => "public/img/icn-panel.svg",
        PluginType::App => "public/img/icn-app.svg",
        PluginType::Renderer | PluginType::SecretsManager => "public/img/icn-plugin.svg",
    }
}

fn is_absolute_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://") || path.starts_with('/')
}

fn join(base: &str, rest: &str) -> String {
    let rest = rest.trim_start_matches("./").trim_start_matches('/');
    if rest.is_empty() {
        return base.trim_end_matches('/').to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rest)
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
