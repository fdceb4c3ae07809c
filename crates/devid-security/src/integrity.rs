// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device hash: SHA-256 over canonical, timestamped key metadata, encoded as
// standard base64.  This is the public device identifier; it cannot be
// reversed without the stored payload and a re-derived key.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use devid_core::error::{DevIdError, ServiceError};
use devid_core::types::{DeviceFingerprint, now_millis};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Metadata folded into the device hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata<'a> {
    pub device_info: &'a DeviceFingerprint,
    pub salt: &'a [u8],
    pub iv: &'a [u8],
    pub version: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Timestamped<'a> {
    #[serde(flatten)]
    metadata: &'a DeviceMetadata<'a>,
    timestamp: i64,
}

/// SHA-256 of `data`, base64-encoded.
pub fn digest_base64(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}

/// Device hash for `metadata` at the current instant.
///
/// The timestamp is taken here rather than reused from the encryption, so
/// two hashes over identical metadata taken at different instants differ.
pub fn unique_hash(metadata: &DeviceMetadata<'_>) -> Result<String, DevIdError> {
    unique_hash_at(metadata, now_millis())
}

/// Device hash for `metadata` at an explicit timestamp.
pub fn unique_hash_at(metadata: &DeviceMetadata<'_>, timestamp: i64) -> Result<String, DevIdError> {
    let canonical = serde_json::to_vec(&Timestamped {
        metadata,
        timestamp,
    })?;
    let hash = digest_base64(&canonical);
    if hash.is_empty() {
        return Err(ServiceError::HashGenerationFailed.into());
    }
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte slice, base64.
    const EMPTY_SHA256_B64: &str = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=";

    fn fingerprint() -> DeviceFingerprint {
        DeviceFingerprint {
            platform: "Win32".into(),
            user_agent: "UA".into(),
            language: "en-US".into(),
            screen_resolution: "1920x1080".into(),
            color_depth: Some(24),
            pixel_ratio: Some(1.0),
            hardware_concurrency: Some(8),
            ..Default::default()
        }
    }

    #[test]
    fn digest_of_empty_input() {
        assert_eq!(digest_base64(b""), EMPTY_SHA256_B64);
    }

    #[test]
    fn canonical_form_field_order() {
        let fp = fingerprint();
        let meta = DeviceMetadata {
            device_info: &fp,
            salt: &[1],
            iv: &[2],
            version: "1.0",
        };
        let json = serde_json::to_string(&Timestamped {
            metadata: &meta,
            timestamp: 9,
        })
        .unwrap();
        assert!(json.starts_with(r#"{"deviceInfo":{"platform":"Win32""#));
        assert!(json.ends_with(r#""salt":[1],"iv":[2],"version":"1.0","timestamp":9}"#));
    }

    #[test]
    fn hash_is_deterministic_per_instant() {
        let fp = fingerprint();
        let meta = DeviceMetadata {
            device_info: &fp,
            salt: &[0; 16],
            iv: &[1; 16],
            version: "1.0",
        };
        let a = unique_hash_at(&meta, 1_000).unwrap();
        let b = unique_hash_at(&meta, 1_000).unwrap();
        let c = unique_hash_at(&meta, 1_001).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // 32-byte digest → 44 base64 characters with padding.
        assert_eq!(a.len(), 44);
        assert!(STANDARD.decode(&a).is_ok());
    }
}
