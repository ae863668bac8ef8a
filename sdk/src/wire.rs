//! Newline-delimited JSON frames exchanged after the handshake
//!
//! Requests carry a host-assigned id; every response frame echoes it. Unary calls
//! produce exactly one response with `done = true`. Streams produce any number of
//! `done = false` frames followed by a terminating `done = true` frame.

use crate::types::Capability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    QueryData,
    CheckHealth,
    CallResource,
    CollectMetrics,
    RunStream,
    /// Protocol version 1 single combined call
    LegacyQuery,
    /// Cooperative stop request
    Shutdown,
}

impl Method {
    /// Capability a method belongs to; `None` for control methods
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Method::QueryData => Some(Capability::QueryData),
            Method::CheckHealth => Some(Capability::CheckHealth),
            Method::CallResource => Some(Capability::CallResource),
            Method::CollectMetrics => Some(Capability::CollectMetrics),
            Method::RunStream => Some(Capability::Stream),
            Method::LegacyQuery | Method::Shutdown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: Method,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub done: bool,
}

impl ResponseFrame {
    pub fn ok(id: u64, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            error: None,
            done: true,
        }
    }

    pub fn error(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            payload: serde_json::Value::Null,
            error: Some(error.into()),
            done: true,
        }
    }

    /// Intermediate stream packet
    pub fn packet(id: u64, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            error: None,
            done: false,
        }
    }
}

/// Encode a frame as one line including the trailing newline
pub fn encode<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_request(line: &str) -> Result<RequestFrame, serde_json::Error> {
    serde_json::from_str(line.trim())
}

pub fn decode_response(line: &str) -> Result<ResponseFrame, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_wire_names() {
        let frame = RequestFrame {
            id: 7,
            method: Method::CallResource,
            payload: json!({"path": "/health"}),
        };
        let line = encode(&frame).unwrap();
        assert!(line.contains("\"call_resource\""));
        assert_eq!(decode_request(&line).unwrap(), frame);
    }

    #[test]
    fn test_ok_response_omits_error() {
        let line = encode(&ResponseFrame::ok(1, json!(true))).unwrap();
        assert!(!line.contains("error"));
        let decoded = decode_response(&line).unwrap();
        assert!(decoded.done);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let frame = decode_response(r#"{"id":3}"#).unwrap();
        assert_eq!(frame.payload, serde_json::Value::Null);
        assert!(!frame.done);
        assert!(frame.error.is_none());
    }

    #[test]
    fn test_control_methods_have_no_capability() {
        assert_eq!(Method::Shutdown.capability(), None);
        assert_eq!(Method::LegacyQuery.capability(), None);
        assert_eq!(Method::RunStream.capability(), Some(Capability::Stream));
    }
}
