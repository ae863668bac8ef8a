//! Host/plugin startup handshake
//!
//! The host starts a plugin process with the magic cookie and the list of protocol
//! versions it speaks in the environment. The plugin refuses to run without the
//! cookie, picks the highest version both sides support and announces itself with a
//! single JSON line on stdout that echoes the cookie:
//!
//! ```text
//! {"magic_cookie_key":"grafana_plugin_type","magic_cookie_value":"datasource","protocol_version":2,"capabilities":["query_data","check_health"]}
//! ```
//!
//! Version 1 is the legacy protocol with a single combined query capability.
//! Version 2 multiplexes the capabilities listed in the handshake.

use crate::types::Capability;
use serde::{Deserialize, Serialize};

/// Environment key proving the process was spawned by the host
pub const MAGIC_COOKIE_KEY: &str = "grafana_plugin_type";

/// Expected value for [`MAGIC_COOKIE_KEY`]
pub const MAGIC_COOKIE_VALUE: &str = "datasource";

/// Environment variable carrying the comma-separated versions the host offers
pub const PROTOCOL_VERSIONS_ENV: &str = "PLUGIN_PROTOCOL_VERSIONS";

pub const LEGACY_PROTOCOL_VERSION: u32 = 1;
pub const CURRENT_PROTOCOL_VERSION: u32 = 2;

/// Versions this host implementation understands
pub const SUPPORTED_PROTOCOL_VERSIONS: [u32; 2] = [LEGACY_PROTOCOL_VERSION, CURRENT_PROTOCOL_VERSION];

/// Message printed to users who launch a plugin binary by hand
pub const NOT_A_STANDALONE_BINARY: &str = "This binary is a plugin. These are not meant to be \
executed directly. Please execute the program that consumes these plugins, which will load \
any plugins automatically";

/// First line a plugin writes on stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
    pub protocol_version: u32,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl HandshakeMessage {
    /// Build the handshake a well-behaved plugin sends
    pub fn new(protocol_version: u32, capabilities: Vec<Capability>) -> Self {
        Self {
            magic_cookie_key: MAGIC_COOKIE_KEY.to_string(),
            magic_cookie_value: MAGIC_COOKIE_VALUE.to_string(),
            protocol_version,
            capabilities,
        }
    }

    /// Encode as a single newline-terminated line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse a handshake line
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Err("plugin closed stdout before sending a handshake".to_string());
        }
        serde_json::from_str(line).map_err(|e| format!("malformed handshake line: {}", e))
    }

    /// Check the cookie and that the announced version was offered by the host
    pub fn verify(&self, offered: &[u32]) -> Result<u32, String> {
        if self.magic_cookie_key != MAGIC_COOKIE_KEY || self.magic_cookie_value != MAGIC_COOKIE_VALUE
        {
            return Err("magic cookie mismatch".to_string());
        }
        if !offered.contains(&self.protocol_version) {
            return Err(format!(
                "plugin selected protocol version {} but the host offered {}",
                self.protocol_version,
                format_versions(offered)
            ));
        }
        Ok(self.protocol_version)
    }
}

/// Highest version present in both lists
pub fn negotiate(offered: &[u32], supported: &[u32]) -> Option<u32> {
    offered
        .iter()
        .copied()
        .filter(|v| supported.contains(v))
        .max()
}

/// Render versions the way [`PROTOCOL_VERSIONS_ENV`] carries them
pub fn format_versions(versions: &[u32]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the value of [`PROTOCOL_VERSIONS_ENV`]; garbage entries are dropped
pub fn parse_versions(value: &str) -> Vec<u32> {
    value
        .split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_line_roundtrip() {
        let msg = HandshakeMessage::new(2, vec![Capability::QueryData, Capability::Stream]);
        let line = msg.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(HandshakeMessage::parse(&line).unwrap(), msg);
    }

    #[test]
    fn test_verify_rejects_wrong_cookie() {
        let mut msg = HandshakeMessage::new(2, vec![]);
        msg.magic_cookie_value = "panel".to_string();
        assert!(msg.verify(&SUPPORTED_PROTOCOL_VERSIONS).is_err());
    }

    #[test]
    fn test_verify_rejects_unoffered_version() {
        let msg = HandshakeMessage::new(3, vec![]);
        let err = msg.verify(&SUPPORTED_PROTOCOL_VERSIONS).unwrap_err();
        assert!(err.contains("1,2"));
    }

    #[test]
    fn test_negotiate_picks_highest_common() {
        assert_eq!(negotiate(&[1, 2], &[1, 2]), Some(2));
        assert_eq!(negotiate(&[1, 2], &[1]), Some(1));
        assert_eq!(negotiate(&[2], &[1]), None);
    }

    #[test]
    fn test_parse_versions_skips_garbage() {
        assert_eq!(parse_versions("1, 2,x"), vec![1, 2]);
        assert!(parse_versions("").is_empty());
    }

    #[test]
    fn test_empty_line_means_no_handshake() {
        assert!(HandshakeMessage::parse("  \n").is_err());
    }
}
