// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the devid identity store.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Salt length in bytes for every key derivation.
pub const SALT_LENGTH: usize = 16;
/// AES-CBC initialisation vector length in bytes.
pub const IV_LENGTH: usize = 16;
/// Digest used by both PBKDF2 and the device hash.
pub const DIGEST: &str = "SHA-256";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Snapshot of environment signals identifying a device.
///
/// Never persisted raw.  Its canonical JSON form (camelCase keys, absent
/// optionals omitted) is the plaintext that gets encrypted and hashed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    pub platform: String,
    pub user_agent: String,
    pub language: String,
    pub screen_resolution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch_points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_concurrency: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl DeviceFingerprint {
    /// Canonical serialization used as encryption plaintext.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Everything needed to reproduce a symmetric key from a fingerprint.
///
/// Generated fresh per encryption and owned by that call until embedded into
/// a [`HashRecord`] or a [`KeyMetadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub salt: [u8; SALT_LENGTH],
    pub iv: [u8; IV_LENGTH],
    pub iterations: u32,
    pub digest: &'static str,
    pub version: String,
}

/// Output of one encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LENGTH],
    pub salt: [u8; SALT_LENGTH],
    pub version: String,
    /// Milliseconds since the epoch; for own-device payloads this is also
    /// the timestamp folded into the key-derivation seed.
    pub timestamp: i64,
}

impl EncryptedPayload {
    /// `IV ‖ ciphertext`, the form persisted and transported.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LENGTH + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ciphertext.is_empty() {
            return Err(ValidationError::InvalidEncryptedData(
                "ciphertext is empty".into(),
            ));
        }
        if self.version.is_empty() {
            return Err(ValidationError::InvalidEncryptedData(
                "version is empty".into(),
            ));
        }
        Ok(())
    }
}

/// A persisted row of the local store.
///
/// Two shapes share the table: the "latest" pointer record (id = the store's
/// sentinel name, no payload) and the payload record (id = hash, with
/// `data`/`salt`/`iv`/`version` set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub id: String,
    pub hash: String,
    pub timestamp: i64,
    pub data: Option<Vec<u8>>,
    pub salt: Option<Vec<u8>>,
    pub iv: Option<Vec<u8>>,
    pub version: Option<String>,
}

impl HashRecord {
    /// Pointer record marking `hash` as the current device hash.
    pub fn pointer(sentinel: &str, hash: &str, timestamp: i64) -> Self {
        Self {
            id: sentinel.to_owned(),
            hash: hash.to_owned(),
            timestamp,
            data: None,
            salt: None,
            iv: None,
            version: None,
        }
    }

    /// Payload record keyed by `hash`.  The record timestamp is the payload's
    /// own timestamp so the key seed can be rebuilt from the row alone.
    pub fn with_payload(hash: &str, payload: &EncryptedPayload) -> Self {
        Self {
            id: hash.to_owned(),
            hash: hash.to_owned(),
            timestamp: payload.timestamp,
            data: Some(payload.combined()),
            salt: Some(payload.salt.to_vec()),
            iv: Some(payload.iv.to_vec()),
            version: Some(payload.version.clone()),
        }
    }

    /// Reconstruct the encrypted payload, checking the record's shape.
    pub fn payload(&self) -> Result<EncryptedPayload, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidEncryptedData(reason.to_owned());

        let data = self.data.as_deref().ok_or_else(|| invalid("no data"))?;
        let salt: [u8; SALT_LENGTH] = self
            .salt
            .as_deref()
            .ok_or_else(|| invalid("no salt"))?
            .try_into()
            .map_err(|_| invalid("salt must be 16 bytes"))?;
        let iv: [u8; IV_LENGTH] = self
            .iv
            .as_deref()
            .ok_or_else(|| invalid("no iv"))?
            .try_into()
            .map_err(|_| invalid("iv must be 16 bytes"))?;

        if data.len() <= IV_LENGTH {
            return Err(invalid("data shorter than iv"));
        }
        if data[..IV_LENGTH] != iv {
            return Err(invalid("data prefix does not match iv"));
        }

        let payload = EncryptedPayload {
            ciphertext: data[IV_LENGTH..].to_vec(),
            iv,
            salt,
            version: self.version.clone().unwrap_or_default(),
            timestamp: self.timestamp,
        };
        payload.validate()?;
        Ok(payload)
    }
}

/// Key metadata shipped out of band next to a cross-device ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    pub version: String,
    pub timestamp: i64,
}

impl KeyMetadata {
    /// Shape check; a zero timestamp counts as missing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.salt.len() != SALT_LENGTH {
            return Err(ValidationError::InvalidMetadata(format!(
                "salt must be {SALT_LENGTH} bytes, got {}",
                self.salt.len()
            )));
        }
        if self.iv.len() != IV_LENGTH {
            return Err(ValidationError::InvalidMetadata(format!(
                "iv must be {IV_LENGTH} bytes, got {}",
                self.iv.len()
            )));
        }
        if self.version.is_empty() {
            return Err(ValidationError::InvalidMetadata("version is empty".into()));
        }
        if self.timestamp == 0 {
            return Err(ValidationError::InvalidMetadata("timestamp is missing".into()));
        }
        Ok(())
    }
}
