// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error taxonomy for devid.  One enum per component, unified under
// `DevIdError` so the identity service can propagate any of them untouched.

use std::fmt;

use thiserror::Error;

/// Store operation an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Init,
    Connect,
    Save,
    Get,
    Clean,
    Close,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connect => "connect",
            Self::Save => "save",
            Self::Get => "get",
            Self::Clean => "clean",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fingerprint or key-metadata shape failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid device info: missing required fields {missing:?}")]
    InvalidDeviceInfo { missing: Vec<&'static str> },

    #[error("invalid key metadata: {0}")]
    InvalidMetadata(String),

    #[error("encrypted hash must not be empty")]
    EmptyHash,

    #[error("invalid or corrupted encrypted data: {0}")]
    InvalidEncryptedData(String),
}

/// Key derivation, cipher, and encoding failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("decryption produced an empty result")]
    EmptyDecryption,

    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),
}

/// Local store failures.  Every variant that wraps a backend failure carries
/// the operation it came from.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store initialization failed: {0}")]
    InitializationFailed(String),

    #[error("store connection failed during {op}: {reason}")]
    ConnectionFailed { op: StoreOp, reason: String },

    #[error("store save failed during {op}: {reason}")]
    SaveFailed { op: StoreOp, reason: String },

    #[error("store read failed during {op}: {reason}")]
    GetFailed { op: StoreOp, reason: String },

    #[error("store transaction failed during {op}: {reason}")]
    TransactionFailed { op: StoreOp, reason: String },

    #[error("record {id:?} has an invalid shape: {reason}")]
    InvalidRecordType { id: String, reason: String },

    #[error("no record found for id {0:?}")]
    NotFound(String),
}

impl StoreError {
    /// The operation this error was raised from, when known.
    pub fn op(&self) -> Option<StoreOp> {
        match self {
            Self::InitializationFailed(_) => Some(StoreOp::Init),
            Self::ConnectionFailed { op, .. }
            | Self::SaveFailed { op, .. }
            | Self::GetFailed { op, .. }
            | Self::TransactionFailed { op, .. } => Some(*op),
            Self::InvalidRecordType { .. } | Self::NotFound(_) => Some(StoreOp::Get),
        }
    }
}

/// Identity-service orchestration failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("hash generation produced an empty digest")]
    HashGenerationFailed,

    #[error("database service not initialized: {0}")]
    DatabaseNotInitialized(String),

    #[error("database not connected")]
    DatabaseNotConnected,

    #[error("device fingerprint unavailable: {0}")]
    FingerprintUnavailable(String),
}

/// Top-level error type for all devid operations.
#[derive(Debug, Error)]
pub enum DevIdError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DevIdError {
    /// Stable machine-readable code, reported alongside domain events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => match e {
                ValidationError::InvalidDeviceInfo { .. } => "INVALID_DEVICE_INFO",
                ValidationError::InvalidMetadata(_) => "INVALID_METADATA",
                ValidationError::EmptyHash => "EMPTY_HASH",
                ValidationError::InvalidEncryptedData(_) => "INVALID_ENCRYPTED_DATA",
            },
            Self::Crypto(e) => match e {
                CryptoError::EncryptionFailed(_) => "HASH_ENCRYPTION_FAILED",
                CryptoError::DecryptionFailed(_) => "HASH_DECRYPTION_FAILED",
                CryptoError::EmptyDecryption => "EMPTY_DECRYPTION",
                CryptoError::UnsupportedDataType(_) => "UNSUPPORTED_DATA_TYPE",
            },
            Self::Store(e) => match e {
                StoreError::InitializationFailed(_) => "DB_INIT_FAILED",
                StoreError::ConnectionFailed { .. } => "DB_CONNECTION_FAILED",
                StoreError::SaveFailed { .. } => "DB_SAVE_FAILED",
                StoreError::GetFailed { .. } => "DB_GET_FAILED",
                StoreError::TransactionFailed { .. } => "DB_TRANSACTION_FAILED",
                StoreError::InvalidRecordType { .. } => "DB_INVALID_DATA",
                StoreError::NotFound(_) => "DB_NOT_FOUND",
            },
            Self::Service(e) => match e {
                ServiceError::HashGenerationFailed => "HASH_GENERATION_FAILED",
                ServiceError::DatabaseNotInitialized(_) => "DB_NOT_INIT",
                ServiceError::DatabaseNotConnected => "DB_NOT_CONNECTED",
                ServiceError::FingerprintUnavailable(_) => "FINGERPRINT_UNAVAILABLE",
            },
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// The store operation behind this error, if it came from the store.
    pub fn store_op(&self) -> Option<StoreOp> {
        match self {
            Self::Store(e) => e.op(),
            _ => None,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DevIdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_carry_their_operation() {
        let err = StoreError::SaveFailed {
            op: StoreOp::Save,
            reason: "disk full".into(),
        };
        assert_eq!(err.op(), Some(StoreOp::Save));
        assert_eq!(err.to_string(), "store save failed during save: disk full");
    }

    #[test]
    fn codes_follow_component() {
        let err: DevIdError = ValidationError::EmptyHash.into();
        assert_eq!(err.code(), "EMPTY_HASH");

        let err: DevIdError = StoreError::NotFound("abc".into()).into();
        assert_eq!(err.code(), "DB_NOT_FOUND");

        let err: DevIdError = ServiceError::HashGenerationFailed.into();
        assert_eq!(err.code(), "HASH_GENERATION_FAILED");
    }

    #[test]
    fn store_op_is_reachable_through_the_top_level_error() {
        let err: DevIdError = StoreError::ConnectionFailed {
            op: StoreOp::Connect,
            reason: "lock poisoned".into(),
        }
        .into();
        assert_eq!(err.store_op(), Some(StoreOp::Connect));

        let err: DevIdError = ValidationError::EmptyHash.into();
        assert_eq!(err.store_op(), None);
    }

    #[test]
    fn transparent_wrapping_keeps_message() {
        let err: DevIdError = CryptoError::EmptyDecryption.into();
        assert_eq!(err.to_string(), "decryption produced an empty result");
    }
}
