//! Integration tests for configuration management
//!
//! These tests load real files from disk and check validation, defaults and
//! path processing.

use gantry_engine::config::Config;
use sdk::errors::EngineError;
use std::fs;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[core]
log_level = "debug"
app_url = "https://grafana.example.com/"

[host]
version = "10.4.2"
edition = "enterprise"

[plugins]
allow_unsigned = ["acme-panel"]
disabled = ["old-panel"]
skip_host_version_check = true
follow_dist_folder = false

[plugins.settings.acme-datasource]
region = "eu-west-1"

[runtime]
start_backends = false
startup_timeout_secs = 12
shutdown_grace_secs = 3

[angular]
support_enabled = true
remote_patterns_enabled = true
cache_ttl_secs = 60

[tracing]
otlp_address = "collector:4317"
propagation = "jaeger"

[repository]
base_url = "https://plugins.example.com/api"

[signing.public_keys]
release = "0000000000000000000000000000000000000000000000000000000000000000"
"#;

fn write_config(temp: &TempDir, body: &str) -> std::path::PathBuf {
    let plugins = temp.path().join("plugins");
    let data = temp.path().join("data");
    let text = body.replacen(
        "[core]",
        &format!(
            "[core]\nplugins_dir = {:?}\ndata_dir = {:?}",
            plugins.display().to_string(),
            data.display().to_string()
        ),
        1,
    );
    let path = temp.path().join("config.toml");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_load_full_config_from_file() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, FULL_CONFIG);

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.host.version, "10.4.2");
    assert_eq!(config.host.edition, "enterprise");
    assert_eq!(config.plugins.allow_unsigned, vec!["acme-panel"]);
    assert_eq!(config.plugins.disabled, vec!["old-panel"]);
    assert!(config.plugins.skip_host_version_check);
    assert!(!config.plugins.follow_dist_folder);
    assert_eq!(
        config
            .plugin_settings("acme-datasource")
            .and_then(|s| s.get("region"))
            .map(String::as_str),
        Some("eu-west-1")
    );
    assert!(!config.runtime.start_backends);
    assert_eq!(config.runtime.startup_timeout().as_secs(), 12);
    assert_eq!(config.runtime.shutdown_grace().as_secs(), 3);
    assert!(config.angular.support_enabled);
    assert_eq!(config.angular.cache_ttl_secs, 60);
    assert_eq!(config.tracing.propagation.as_deref(), Some("jaeger"));
    assert_eq!(config.repository.base_url, "https://plugins.example.com/api");
    assert!(config.signing.public_keys.contains_key("release"));
}

#[test]
fn test_plugins_dir_is_created_and_canonical() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[core]\n");

    let config = Config::load_from_path(&path).unwrap();

    assert!(config.core.plugins_dir.is_dir());
    assert!(config.core.plugins_dir.is_absolute());
    assert_eq!(
        config.core.plugins_dir,
        temp.path().join("plugins").canonicalize().unwrap()
    );
}

#[test]
fn test_saved_config_loads_back() {
    let temp = TempDir::new().unwrap();
    let original = Config::load_from_path(&write_config(&temp, FULL_CONFIG)).unwrap();

    let saved = temp.path().join("saved.toml");
    fs::write(&saved, original.to_toml().unwrap()).unwrap();
    let reloaded = Config::load_from_path(&saved).unwrap();

    assert_eq!(reloaded.core.plugins_dir, original.core.plugins_dir);
    assert_eq!(reloaded.host.version, original.host.version);
    assert_eq!(reloaded.plugins.disabled, original.plugins.disabled);
    assert_eq!(reloaded.plugins.settings, original.plugins.settings);
    assert_eq!(
        reloaded.runtime.startup_timeout_secs,
        original.runtime.startup_timeout_secs
    );
    assert_eq!(reloaded.signing.public_keys, original.signing.public_keys);
}

#[test]
fn test_missing_file_is_config_error() {
    let temp = TempDir::new().unwrap();
    let result = Config::load_from_path(&temp.path().join("absent.toml"));
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn test_invalid_files_are_rejected() {
    let cases = [
        ("[core]\nlog_level = \"loud\"\n", "log level"),
        ("[core]\n[runtime]\nstartup_timeout_secs = 0\n", "startup_timeout_secs"),
        ("[core]\n[tracing]\npropagation = \"zipkin\"\n", "propagation"),
        ("[core]\n[signing.public_keys]\nbad = \"abcd\"\n", "signing.public_keys.bad"),
        ("[core\n", "parse"),
    ];

    for (body, needle) in cases {
        let temp = TempDir::new().unwrap();
        let err = Config::load_from_path(&write_config(&temp, body)).unwrap_err();
        match err {
            EngineError::Config(message) => {
                assert!(message.contains(needle), "{} not in {}", needle, message)
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
