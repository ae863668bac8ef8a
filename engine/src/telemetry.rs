//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The level comes from
//! `RUST_LOG`, then the `--log` flag or `core.log_level`, then "info".
//! Debug builds print pretty terminal output; release builds emit JSON lines.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter used when `RUST_LOG` is unset
fn default_filter(log_level: &str) -> String {
    format!(
        "{lvl},gantry_engine={lvl},gantry_repo={lvl},sdk={lvl}",
        lvl = log_level
    )
}

/// Initialize the tracing subscriber with the given log level.
///
/// Only the first call installs a subscriber; later calls are ignored.
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        let filter = default_filter("debug");
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("gantry_engine=debug"));
        assert!(filter.contains("gantry_repo=debug"));
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_telemetry_with_level("warn");
        init_telemetry_with_level("info");
    }
}
