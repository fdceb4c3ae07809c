// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail: append-only SQLite log of identity events.
//
// Schema:
//   identity_audit(
//     id        INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp TEXT    NOT NULL,   -- RFC 3339
//     event     TEXT    NOT NULL,   -- e.g. "hash_set", "hash_decrypt"
//     operation TEXT    NOT NULL,   -- e.g. "generate", "decrypt"
//     hash      TEXT,               -- device hash involved, if any
//     success   INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     details   TEXT                -- optional free-form context
//   )

use std::path::Path;

use chrono::Utc;
use devid_core::error::{StoreError, StoreOp};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS identity_audit (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT    NOT NULL,
    event     TEXT    NOT NULL,
    operation TEXT    NOT NULL,
    hash      TEXT,
    success   INTEGER NOT NULL,
    details   TEXT
);";

fn init_err(e: rusqlite::Error) -> StoreError {
    StoreError::InitializationFailed(format!("audit log: {e}"))
}

fn save_err(e: rusqlite::Error) -> StoreError {
    StoreError::SaveFailed {
        op: StoreOp::Save,
        reason: format!("audit log: {e}"),
    }
}

fn get_err(e: rusqlite::Error) -> StoreError {
    StoreError::GetFailed {
        op: StoreOp::Get,
        reason: format!("audit log: {e}"),
    }
}

/// A single entry in the audit log, used for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub event: String,
    pub operation: String,
    pub hash: Option<String>,
    pub success: bool,
    pub details: Option<String>,
}

/// One row to append.
#[derive(Debug, Clone, Copy)]
pub struct AuditRecord<'a> {
    pub event: &'a str,
    pub operation: &'a str,
    pub hash: Option<&'a str>,
    pub success: bool,
    pub details: Option<&'a str>,
}

/// Append-only audit log backed by a SQLite database.
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(init_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(init_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(init_err)?;

        debug!("audit log opened");
        Ok(Self { conn })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(init_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(init_err)?;

        debug!("in-memory audit log opened");
        Ok(Self { conn })
    }

    /// Append one entry, stamped with the current time.
    #[instrument(skip_all, fields(event = record.event, success = record.success))]
    pub fn record(&self, record: AuditRecord<'_>) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO identity_audit (timestamp, event, operation, hash, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Utc::now().to_rfc3339(),
                    record.event,
                    record.operation,
                    record.hash,
                    record.success,
                    record.details,
                ],
            )
            .map_err(save_err)?;

        debug!("audit entry recorded");
        Ok(())
    }

    /// All entries for a device hash, oldest first.
    pub fn entries_for_hash(&self, hash: &str) -> Result<Vec<AuditEntry>, StoreError> {
        self.query(
            "SELECT id, timestamp, event, operation, hash, success, details
             FROM identity_audit WHERE hash = ?1 ORDER BY id ASC",
            params![hash],
        )
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, StoreError> {
        self.query(
            "SELECT id, timestamp, event, operation, hash, success, details
             FROM identity_audit ORDER BY id DESC LIMIT ?1",
            params![limit],
        )
    }

    /// Total number of entries.
    pub fn count(&self) -> Result<u64, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM identity_audit", [], |row| row.get(0))
            .map_err(get_err)
    }

    fn query(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(get_err)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    event: row.get(2)?,
                    operation: row.get(3)?,
                    hash: row.get(4)?,
                    success: row.get(5)?,
                    details: row.get(6)?,
                })
            })
            .map_err(get_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(get_err)
    }
}
