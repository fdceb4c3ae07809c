// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Crypto engine: PBKDF2-HMAC-SHA256 key derivation over a canonical JSON
// seed, AES-256-CBC (PKCS#7) encryption with a random IV, and the base64
// transport encoding for `IV ‖ ciphertext` blobs.
//
// The engine is stateless apart from its parameters, so one instance can be
// shared across tasks.

use std::fmt;
use std::num::NonZeroU32;

use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use devid_core::config::IdentityConfig;
use devid_core::error::CryptoError;
use devid_core::types::{
    DeviceFingerprint, EncryptedPayload, KeyMaterial, DIGEST, IV_LENGTH, SALT_LENGTH, now_millis,
};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// A derived 256-bit AES key, zeroised on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Seed the key is derived from, serialized to JSON before PBKDF2.
///
/// `OwnDevice` binds the key to the moment of encryption.  `CrossDevice`
/// leaves the timestamp out and pins the recorded salt and IV instead, so a
/// second reader holding only the key metadata can rebuild the same key from
/// its own read of the fingerprint.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum KeySeed<'a> {
    #[serde(rename_all = "camelCase")]
    OwnDevice {
        device_info: &'a DeviceFingerprint,
        salt: &'a [u8],
        timestamp: i64,
        version: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    CrossDevice {
        device_info: &'a DeviceFingerprint,
        original_salt: &'a [u8],
        original_iv: &'a [u8],
        version: &'a str,
    },
}

/// Stateless key-derivation and cipher engine.
pub struct CryptoEngine {
    iterations: NonZeroU32,
    version: String,
    rng: SystemRandom,
}

impl CryptoEngine {
    /// Engine with an explicit iteration count and version tag.
    pub fn new(iterations: u32, version: impl Into<String>) -> Result<Self, CryptoError> {
        let iterations = NonZeroU32::new(iterations).ok_or_else(|| {
            CryptoError::EncryptionFailed("PBKDF2 iteration count must be non-zero".into())
        })?;
        Ok(Self {
            iterations,
            version: version.into(),
            rng: SystemRandom::new(),
        })
    }

    pub fn from_config(config: &IdentityConfig) -> Result<Self, CryptoError> {
        Self::new(config.pbkdf2_iterations, config.key_version.clone())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Fill a fresh 16-byte buffer from the OS CSPRNG.
    pub fn random_block(&self) -> Result<[u8; SALT_LENGTH], CryptoError> {
        let mut block = [0u8; SALT_LENGTH];
        self.rng
            .fill(&mut block)
            .map_err(|_| CryptoError::EncryptionFailed("system RNG unavailable".into()))?;
        Ok(block)
    }

    /// Fresh salt and IV, pinned to this engine's parameters.
    pub fn generate_key_material(&self) -> Result<KeyMaterial, CryptoError> {
        Ok(KeyMaterial {
            salt: self.random_block()?,
            iv: self.random_block()?,
            iterations: self.iterations.get(),
            digest: DIGEST,
            version: self.version.clone(),
        })
    }

    /// Derive an AES-256 key from `seed` and `salt`.
    #[instrument(skip_all, fields(iterations = self.iterations.get()))]
    pub fn derive_key(
        &self,
        seed: &KeySeed<'_>,
        salt: &[u8; SALT_LENGTH],
    ) -> Result<SymmetricKey, CryptoError> {
        let mut secret = serde_json::to_vec(seed)
            .map_err(|e| CryptoError::EncryptionFailed(format!("seed serialization: {e}")))?;

        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            &secret,
            &mut key,
        );
        secret.zeroize();

        debug!("key derived");
        Ok(SymmetricKey(key))
    }

    /// Encrypt `plaintext` under `key` with a freshly generated IV.
    ///
    /// A caller-supplied `salt` is recorded in the payload and must be
    /// exactly 16 bytes; without one a random salt is generated.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        salt: Option<&[u8]>,
    ) -> Result<EncryptedPayload, CryptoError> {
        let salt: [u8; SALT_LENGTH] = match salt {
            Some(s) => s.try_into().map_err(|_| {
                CryptoError::EncryptionFailed(format!(
                    "salt must be {SALT_LENGTH} bytes, got {}",
                    s.len()
                ))
            })?,
            None => self.random_block()?,
        };
        let iv = self.random_block()?;
        self.encrypt_with_iv(plaintext, key, salt, iv)
    }

    /// Encrypt with the salt and IV of pre-generated key material.  Used when
    /// the IV has to be known before the key is derived (cross-device seed).
    pub fn encrypt_with_material(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        material: &KeyMaterial,
    ) -> Result<EncryptedPayload, CryptoError> {
        self.encrypt_with_iv(plaintext, key, material.salt, material.iv)
    }

    fn encrypt_with_iv(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        salt: [u8; SALT_LENGTH],
        iv: [u8; IV_LENGTH],
    ) -> Result<EncryptedPayload, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::EncryptionFailed("plaintext is required".into()));
        }

        let ciphertext = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        debug!(ciphertext_len = ciphertext.len(), "encryption complete");
        Ok(EncryptedPayload {
            ciphertext,
            iv,
            salt,
            version: self.version.clone(),
            timestamp: now_millis(),
        })
    }

    /// Decrypt an `IV ‖ ciphertext` blob.
    #[instrument(skip_all, fields(combined_len = combined.len()))]
    pub fn decrypt(&self, combined: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
        if combined.len() <= IV_LENGTH || (combined.len() - IV_LENGTH) % IV_LENGTH != 0 {
            return Err(CryptoError::DecryptionFailed(format!(
                "malformed input length {}",
                combined.len()
            )));
        }
        let (iv, ciphertext) = combined.split_at(IV_LENGTH);

        let plaintext = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed("bad padding or wrong key".into()))?;

        debug!(plaintext_len = plaintext.len(), "decryption complete");
        Ok(plaintext)
    }
}

/// Encode bytes for transport (standard base64 with padding).
pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a transport blob produced by [`encode_transport`].
pub fn decode_transport(text: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| CryptoError::UnsupportedDataType(format!("not valid base64: {e}")))
}
