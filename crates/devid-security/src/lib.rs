// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! devid-security: cryptographic and storage foundation for device identity.
//!
//! Provides PBKDF2 key derivation and AES-256-CBC encryption of device
//! fingerprints, the SHA-256 device hash, the lazily-opened SQLite record
//! store, and an append-only audit trail.

pub mod audit;
pub mod crypto;
pub mod integrity;
pub mod store;

// PUBLIC API: Re-export core security primitives
pub use audit::{AuditEntry, AuditLog, AuditRecord};
pub use crypto::{CryptoEngine, KeySeed, SymmetricKey, decode_transport, encode_transport};
pub use integrity::{DeviceMetadata, digest_base64, unique_hash, unique_hash_at};
pub use store::{LocalStore, StoreLocation};
