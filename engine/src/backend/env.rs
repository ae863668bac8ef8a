//! Environment handed to backend processes

use crate::config::Config;
use sdk::handshake::{
    format_versions, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSIONS_ENV,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Build the environment for one plugin process
///
/// Host identity, license and tracing settings come from the config; per-plugin
/// settings are exported as `GF_PLUGIN_<NAME>` with the name upper-cased and
/// anything outside `[A-Z0-9]` replaced by `_`. Settings are sorted so the
/// environment is stable across restarts.
pub fn plugin_env(config: &Config, plugin_id: &str) -> Vec<(String, String)> {
    let mut env = vec![
        (MAGIC_COOKIE_KEY.to_string(), MAGIC_COOKIE_VALUE.to_string()),
        (
            PROTOCOL_VERSIONS_ENV.to_string(),
            format_versions(&SUPPORTED_PROTOCOL_VERSIONS),
        ),
        ("GF_VERSION".to_string(), config.host.version.clone()),
        ("GF_EDITION".to_string(), config.host.edition.clone()),
        ("GF_APP_URL".to_string(), config.core.app_url.clone()),
    ];

    if let Some(path) = &config.host.license_path {
        env.push((
            "GF_ENTERPRISE_LICENSE_PATH".to_string(),
            path.display().to_string(),
        ));
    }
    if let Some(text) = &config.host.license_text {
        env.push(("GF_ENTERPRISE_LICENSE_TEXT".to_string(), text.clone()));
    }

    if let Some(address) = &config.tracing.otlp_address {
        env.push((
            "GF_TRACING_OPENTELEMETRY_OTLP_ADDRESS".to_string(),
            address.clone(),
        ));
        let propagation = config.tracing.propagation.as_deref().unwrap_or("w3c");
        env.push((
            "GF_TRACING_OPENTELEMETRY_OTLP_PROPAGATION".to_string(),
            propagation.to_string(),
        ));
    }

    if let Some(settings) = config.plugin_settings(plugin_id) {
        let mut custom: Vec<(String, String)> = settings
            .iter()
            .map(|(k, v)| (format!("GF_PLUGIN_{}", env_name(k)), v.clone()))
            .collect();
        custom.sort();
        env.extend(custom);
    }

    env
}

fn env_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_base_environment() {
        let config = Config::default();
        let env = plugin_env(&config, "acme-datasource");

        assert_eq!(lookup(&env, MAGIC_COOKIE_KEY), Some(MAGIC_COOKIE_VALUE));
        assert_eq!(lookup(&env, PROTOCOL_VERSIONS_ENV), Some("1,2"));
        assert_eq!(lookup(&env, "GF_VERSION"), Some("11.0.0"));
        assert_eq!(lookup(&env, "GF_EDITION"), Some("oss"));
        assert!(lookup(&env, "GF_ENTERPRISE_LICENSE_TEXT").is_none());
        assert!(lookup(&env, "GF_TRACING_OPENTELEMETRY_OTLP_ADDRESS").is_none());
    }

    #[test]
    fn test_tracing_and_license() {
        let mut config = Config::default();
        config.tracing.otlp_address = Some("localhost:4317".into());
        config.host.license_text = Some("LICENSE".into());
        let env = plugin_env(&config, "x");

        assert_eq!(
            lookup(&env, "GF_TRACING_OPENTELEMETRY_OTLP_ADDRESS"),
            Some("localhost:4317")
        );
        assert_eq!(lookup(&env, "GF_TRACING_OPENTELEMETRY_OTLP_PROPAGATION"), Some("w3c"));
        assert_eq!(lookup(&env, "GF_ENTERPRISE_LICENSE_TEXT"), Some("LICENSE"));
    }

    #[test]
    fn test_custom_settings_are_sanitized_and_sorted() {
        let mut config = Config::default();
        let mut settings = HashMap::new();
        settings.insert("zone".to_string(), "eu".to_string());
        settings.insert("api-key.v2".to_string(), "secret".to_string());
        config.plugins.settings.insert("acme".to_string(), settings);

        let env = plugin_env(&config, "acme");
        let custom: Vec<_> = env
            .iter()
            .filter(|(k, _)| k.starts_with("GF_PLUGIN_"))
            .cloned()
            .collect();
        assert_eq!(
            custom,
            vec![
                ("GF_PLUGIN_API_KEY_V2".to_string(), "secret".to_string()),
                ("GF_PLUGIN_ZONE".to_string(), "eu".to_string()),
            ]
        );
        assert!(plugin_env(&config, "other")
            .iter()
            .all(|(k, _)| !k.starts_with("GF_PLUGIN_")));
    }
}
