use proptest::prelude::*;
use sdk::errors::{EngineError, GantryErrorExt};
use sdk::types::SignatureStatus;
use sdk::wire::{self, Method, RequestFrame, ResponseFrame};
use std::path::PathBuf;

fn all_errors(s: &str) -> Vec<EngineError> {
    vec![
        EngineError::Config(s.to_string()),
        EngineError::Discovery {
            path: PathBuf::from(s),
            reason: s.to_string(),
        },
        EngineError::InvalidManifest {
            path: PathBuf::from(s),
            reason: s.to_string(),
        },
        EngineError::PathOutsidePlugin(PathBuf::from(s)),
        EngineError::Signature {
            plugin_id: s.to_string(),
            status: SignatureStatus::Invalid,
        },
        EngineError::Validation {
            plugin_id: s.to_string(),
            reason: s.to_string(),
        },
        EngineError::HostVersionIncompatible {
            plugin_id: s.to_string(),
            required: s.to_string(),
            host: s.to_string(),
        },
        EngineError::AngularNotSupported(s.to_string()),
        EngineError::Duplicate {
            plugin_id: s.to_string(),
            version: s.to_string(),
        },
        EngineError::NotFound(s.to_string()),
        EngineError::PluginNotInstalled(s.to_string()),
        EngineError::InstallCorePlugin(s.to_string()),
        EngineError::UninstallCorePlugin(s.to_string()),
        EngineError::UninstallOutsideOfPluginDir(PathBuf::from(s)),
        EngineError::LoadFailed {
            plugin_id: s.to_string(),
            reason: s.to_string(),
        },
        EngineError::Handshake {
            plugin_id: s.to_string(),
            reason: s.to_string(),
        },
        EngineError::StartupTimeout(s.to_string()),
        EngineError::CapabilityNotSupported {
            plugin_id: s.to_string(),
            capability: s.to_string(),
        },
        EngineError::Backend(s.to_string()),
        EngineError::PluginExited(s.to_string()),
        EngineError::Repository(s.to_string()),
        EngineError::Archive(s.to_string()),
        EngineError::Cancelled,
        EngineError::Io(std::io::Error::other(s.to_string())),
    ]
}

// User hints are static text: never empty and never echo caller-provided data
proptest! {
    #[test]
    fn test_error_user_hint_completeness(input in "[a-z0-9/._-]{12,40}") {
        for err in all_errors(&input) {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&input));
            prop_assert!((400..600).contains(&err.http_status()));
        }
    }
}

fn method_strategy() -> impl Strategy<Value = Method> {
    prop_oneof![
        Just(Method::QueryData),
        Just(Method::CheckHealth),
        Just(Method::CallResource),
        Just(Method::CollectMetrics),
        Just(Method::RunStream),
        Just(Method::LegacyQuery),
        Just(Method::Shutdown),
    ]
}

// Encoded frames are always exactly one line, whatever the payload contains
proptest! {
    #[test]
    fn test_frames_stay_on_one_line(
        id in any::<u64>(),
        method in method_strategy(),
        text in "\\PC*",
        done in any::<bool>(),
    ) {
        let request = RequestFrame { id, method, payload: serde_json::json!({ "text": text.clone() }) };
        let line = wire::encode(&request).unwrap();
        prop_assert_eq!(line.matches('\n').count(), 1);
        prop_assert_eq!(wire::decode_request(&line).unwrap(), request);

        let response = ResponseFrame {
            id,
            payload: serde_json::json!([text]),
            error: None,
            done,
        };
        let line = wire::encode(&response).unwrap();
        prop_assert_eq!(line.matches('\n').count(), 1);
        prop_assert_eq!(wire::decode_response(&line).unwrap(), response);
    }
}
