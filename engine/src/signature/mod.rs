//! Plugin signature verification
//!
//! Non-core plugins may ship a `MANIFEST.json` in their root:
//!
//! ```json
//! {
//!   "manifestVersion": "2.0.0",
//!   "signatureType": "community",
//!   "signedByOrg": "acme",
//!   "signedByOrgName": "Acme Corp",
//!   "rootUrls": [],
//!   "plugin": "acme-panel",
//!   "version": "1.0.0",
//!   "time": 1700000000000,
//!   "keyId": "7e4d0c6a8e9a4c51",
//!   "files": { "module.js": "<sha256 hex>", "plugin.json": "<sha256 hex>" },
//!   "signature": "ed25519:<hex>"
//! }
//! ```
//!
//! The signature covers the compact JSON encoding of every field except
//! `signature`, in the order shown, with `files` sorted by path.
//!
//! # Classification
//!
//! - No manifest: unsigned
//! - Unparsable manifest, unknown key, bad signature, id or version mismatch, or a
//!   private signature whose `rootUrls` do not cover the host URL: invalid
//! - A listed file missing or changed, or a file on disk that is not listed: modified
//! - Otherwise: valid

use crate::plugin::fs::PluginFs;
use crate::plugin::PluginSignature;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use regex::Regex;
use sdk::errors::EngineError;
use sdk::manifest::PluginJson;
use sdk::types::{SignatureStatus, SignatureType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// File name of the signed manifest
pub const MANIFEST_FILE: &str = "MANIFEST.json";

const SIGNATURE_PREFIX: &str = "ed25519:";

/// Signed part of `MANIFEST.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestBody {
    pub manifest_version: String,
    pub signature_type: SignatureType,
    pub signed_by_org: String,
    #[serde(default)]
    pub signed_by_org_name: String,
    #[serde(default)]
    pub root_urls: Vec<String>,
    pub plugin: String,
    pub version: String,
    #[serde(default)]
    pub time: i64,
    pub key_id: String,
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SignedManifest {
    #[serde(flatten)]
    body: ManifestBody,
    signature: String,
}

#[derive(Serialize)]
struct SignedManifestRef<'a> {
    #[serde(flatten)]
    body: &'a ManifestBody,
    signature: String,
}

impl ManifestBody {
    /// Bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self)
            .map_err(|e| EngineError::Config(format!("Failed to encode manifest: {}", e)))
    }

    /// Sign and render a complete `MANIFEST.json`
    pub fn sign(&self, key: &SigningKey) -> Result<String, EngineError> {
        let signature = key.sign(&self.signing_bytes()?);
        let signed = SignedManifestRef {
            body: self,
            signature: format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature.to_bytes())),
        };
        serde_json::to_string_pretty(&signed)
            .map_err(|e| EngineError::Config(format!("Failed to encode manifest: {}", e)))
    }
}

/// Hex SHA-256 of a file's contents
pub fn file_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash every file in `fs` except the manifest itself
pub fn digest_tree(fs: &PluginFs) -> Result<BTreeMap<String, String>, EngineError> {
    let mut files = BTreeMap::new();
    for path in fs.files()? {
        if path == MANIFEST_FILE {
            continue;
        }
        let data = fs.read(&path)?;
        files.insert(path, file_digest(&data));
    }
    Ok(files)
}

/// Verifies `MANIFEST.json` files against the configured keys
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    keys: HashMap<String, VerifyingKey>,
    app_url: String,
}

impl SignatureVerifier {
    /// Build from key id -> hex public key pairs
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if a key is not 32 bytes of hex or is not a
    /// valid Ed25519 point.
    pub fn new(public_keys: &HashMap<String, String>, app_url: &str) -> Result<Self, EngineError> {
        let mut keys = HashMap::new();
        for (key_id, key_hex) in public_keys {
            let bytes: [u8; 32] = hex::decode(key_hex)
                .ok()
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| {
                    EngineError::Config(format!("Signing key '{}' is not 32 bytes of hex", key_id))
                })?;
            let key = VerifyingKey::from_bytes(&bytes).map_err(|e| {
                EngineError::Config(format!("Signing key '{}' is invalid: {}", key_id, e))
            })?;
            keys.insert(key_id.clone(), key);
        }
        Ok(Self {
            keys,
            app_url: app_url.to_string(),
        })
    }

    /// Classify the package in `fs` for the manifest `json`
    ///
    /// Filesystem errors while hashing propagate; everything else becomes a status.
    pub fn verify(&self, json: &PluginJson, fs: &PluginFs) -> Result<PluginSignature, EngineError> {
        let Some(raw) = fs.read_optional(MANIFEST_FILE)? else {
            debug!(plugin_id = %json.id, "No MANIFEST.json, plugin is unsigned");
            return Ok(PluginSignature::unsigned());
        };

        let manifest: SignedManifest = match serde_json::from_slice(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(plugin_id = %json.id, error = %e, "Unparsable MANIFEST.json");
                return Ok(PluginSignature::with_status(SignatureStatus::Invalid));
            }
        };
        let body = &manifest.body;

        if let Err(reason) = self.check_signature(body, &manifest.signature) {
            warn!(plugin_id = %json.id, reason = %reason, "Invalid plugin signature");
            return Ok(PluginSignature::with_status(SignatureStatus::Invalid));
        }

        if body.plugin != json.id || body.version != json.info.version {
            warn!(
                plugin_id = %json.id,
                signed_id = %body.plugin,
                signed_version = %body.version,
                "Signature was issued for a different plugin or version"
            );
            return Ok(PluginSignature::with_status(SignatureStatus::Invalid));
        }

        if body.signature_type.is_private() && !self.root_url_allowed(body) {
            warn!(
                plugin_id = %json.id,
                app_url = %self.app_url,
                "Private signature does not cover this host URL"
            );
            return Ok(PluginSignature::with_status(SignatureStatus::Invalid));
        }

        let on_disk = digest_tree(fs)?;
        if on_disk != body.files {
            let changed: Vec<&String> = body
                .files
                .iter()
                .filter(|(path, hash)| on_disk.get(*path) != Some(*hash))
                .map(|(path, _)| path)
                .chain(on_disk.keys().filter(|p| !body.files.contains_key(*p)))
                .collect();
            warn!(plugin_id = %json.id, files = ?changed, "Plugin files differ from signed manifest");
            return Ok(PluginSignature {
                status: SignatureStatus::Modified,
                signature_type: Some(body.signature_type),
                org: Some(body.signed_by_org_name.clone()),
            });
        }

        debug!(plugin_id = %json.id, org = %body.signed_by_org, "Plugin signature valid");
        Ok(PluginSignature {
            status: SignatureStatus::Valid,
            signature_type: Some(body.signature_type),
            org: Some(body.signed_by_org_name.clone()),
        })
    }

    fn check_signature(&self, body: &ManifestBody, signature: &str) -> Result<(), String> {
        let key = self
            .keys
            .get(&body.key_id)
            .ok_or_else(|| format!("unknown signing key '{}'", body.key_id))?;

        let hex_sig = signature
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or_else(|| "signature must start with 'ed25519:'".to_string())?;
        let bytes: [u8; SIGNATURE_LENGTH] = hex::decode(hex_sig)
            .map_err(|e| format!("signature is not hex: {}", e))?
            .try_into()
            .map_err(|_| "signature has the wrong length".to_string())?;
        let signature = Signature::from_bytes(&bytes);

        let message = body.signing_bytes().map_err(|e| e.to_string())?;
        key.verify(&message, &signature)
            .map_err(|e| format!("signature mismatch: {}", e))
    }

    fn root_url_allowed(&self, body: &ManifestBody) -> bool {
        let app_url = normalize_url(&self.app_url);
        body.root_urls.iter().any(|root| match body.signature_type {
            SignatureType::PrivateGlob => glob_matches(&normalize_url(root), &app_url),
            _ => normalize_url(root) == app_url,
        })
    }
}

fn normalize_url(url: &str) -> String {
    let mut url = url.trim().to_ascii_lowercase();
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

/// `*` matches any run of characters
fn glob_matches(pattern: &str, value: &str) -> bool {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let expr = format!("^{}$", escaped.join(".*"));
    Regex::new(&expr).is_ok_and(|re| re.is_match(value))
}
