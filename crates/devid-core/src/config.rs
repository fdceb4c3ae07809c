// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Identity store configuration.

use serde::{Deserialize, Serialize};

/// Seven days in milliseconds.
pub const DEFAULT_MAX_AGE_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Persistent settings for the identity store and crypto engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// File name of the SQLite database inside the data directory.
    pub database_name: String,
    /// Logical store (table) name.  Also the reserved id of the "latest"
    /// pointer record, which is why a stored hash equal to it is ignored.
    pub store_name: String,
    /// Primary-key column.
    pub key_path: String,
    /// Schema version written to `PRAGMA user_version`.
    pub schema_version: u32,
    /// Records older than this are removed by an eviction sweep.
    pub max_age_ms: i64,
    /// Version tag pinned into every key derivation.
    pub key_version: String,
    /// PBKDF2-HMAC-SHA256 iteration count.
    pub pbkdf2_iterations: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            database_name: "deviceIdDB.sqlite3".into(),
            store_name: "deviceId".into(),
            key_path: "id".into(),
            schema_version: 1,
            max_age_ms: DEFAULT_MAX_AGE_MS,
            key_version: "1.0".into(),
            pbkdf2_iterations: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: IdentityConfig = serde_json::from_str(r#"{"max_age_ms": 1000}"#).unwrap();
        assert_eq!(cfg.max_age_ms, 1000);
        assert_eq!(cfg.store_name, "deviceId");
        assert_eq!(cfg.pbkdf2_iterations, 100_000);
    }
}
