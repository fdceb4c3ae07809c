// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local store: single-table SQLite database holding device-hash records.
//
// Schema (table name = `IdentityConfig::store_name`):
//   deviceId(
//     id        TEXT    PRIMARY KEY,   -- hash, or the store-name sentinel
//     hash      TEXT    NOT NULL,
//     timestamp INTEGER NOT NULL,      -- ms since the Unix epoch (REAL read back truncated)
//     data      BLOB,                  -- IV ‖ ciphertext
//     salt      BLOB,
//     iv        BLOB,
//     version   TEXT
//   )
//   INDEX deviceId_timestamp ON deviceId(timestamp)
//
// The connection is opened lazily behind a one-shot async gate: concurrent
// callers all await the same open, and `close` swaps in a fresh gate so the
// next operation re-opens transparently.  `rusqlite` is synchronous, so every
// operation runs on the blocking pool.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use devid_core::config::IdentityConfig;
use devid_core::error::{StoreError, StoreOp};
use devid_core::types::HashRecord;
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreLocation {
    File(PathBuf),
    /// Private in-memory database; contents are lost on `close`.
    Memory,
}

/// SQL text bound to the configured table and key column.
struct Queries {
    upsert: String,
    select_all: String,
    select_by_id: String,
    delete_older: String,
    count: String,
}

impl Queries {
    fn new(table: &str, key: &str) -> Self {
        let cols = format!("{key}, hash, timestamp, data, salt, iv, version");
        Self {
            upsert: format!(
                "INSERT INTO {table} ({cols}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT({key}) DO UPDATE SET
                    hash = excluded.hash,
                    timestamp = excluded.timestamp,
                    data = excluded.data,
                    salt = excluded.salt,
                    iv = excluded.iv,
                    version = excluded.version"
            ),
            select_all: format!("SELECT {cols} FROM {table}"),
            select_by_id: format!("SELECT {cols} FROM {table} WHERE {key} = ?1"),
            delete_older: format!("DELETE FROM {table} WHERE timestamp < ?1"),
            count: format!("SELECT COUNT(*) FROM {table}"),
        }
    }
}

/// A live connection plus its bound SQL.
struct Handle {
    conn: Mutex<Connection>,
    queries: Queries,
}

/// Lazily-opened SQLite store for [`HashRecord`]s.
pub struct LocalStore {
    location: StoreLocation,
    config: IdentityConfig,
    gate: Mutex<Arc<OnceCell<Arc<Handle>>>>,
}

static SHARED: OnceLock<Mutex<HashMap<StoreLocation, Arc<LocalStore>>>> = OnceLock::new();

impl LocalStore {
    /// Create an unopened store.  Nothing touches disk until the first
    /// operation or an explicit [`init`](Self::init).
    pub fn new(location: StoreLocation, config: IdentityConfig) -> Self {
        Self {
            location,
            config,
            gate: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    /// Process-wide handle for the database file at `path`.  Every caller
    /// asking for the same path gets the same store, so at most one open is
    /// ever in flight for it.  The first caller's configuration wins.
    pub fn shared(path: impl AsRef<Path>, config: IdentityConfig) -> Arc<Self> {
        let path = path.as_ref();
        let registry = SHARED.get_or_init(|| Mutex::new(HashMap::new()));
        let mut stores = registry.lock().unwrap_or_else(PoisonError::into_inner);
        match stores.entry(StoreLocation::File(path.to_path_buf())) {
            Entry::Occupied(existing) => {
                if existing.get().config != config {
                    warn!(
                        path = %path.display(),
                        "store already open with a different configuration, keeping the first"
                    );
                }
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                let store = Arc::new(Self::new(slot.key().clone(), config));
                Arc::clone(slot.insert(store))
            }
        }
    }

    /// Unshared in-memory store (useful for tests).
    pub fn in_memory(config: IdentityConfig) -> Self {
        Self::new(StoreLocation::Memory, config)
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn current_gate(&self) -> Arc<OnceCell<Arc<Handle>>> {
        Arc::clone(&self.gate.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Whether a live connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.current_gate().initialized()
    }

    /// Open the database if needed and ensure the schema exists.  Idempotent.
    pub async fn init(&self) -> Result<(), StoreError> {
        self.handle().await.map(|_| ())
    }

    async fn handle(&self) -> Result<Arc<Handle>, StoreError> {
        let gate = self.current_gate();
        let handle = gate
            .get_or_try_init(|| {
                let location = self.location.clone();
                let config = self.config.clone();
                async move {
                    tokio::task::spawn_blocking(move || open_handle(&location, &config))
                        .await
                        .map_err(|e| {
                            StoreError::InitializationFailed(format!("open task failed: {e}"))
                        })?
                        .map(Arc::new)
                }
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: StoreOp, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Queries) -> Result<T, StoreError> + Send + 'static,
    {
        let handle = self.handle().await?;
        tokio::task::spawn_blocking(move || {
            let mut conn = handle.conn.lock().map_err(|e| StoreError::ConnectionFailed {
                op: StoreOp::Connect,
                reason: format!("connection lock poisoned during {op}: {e}"),
            })?;
            f(&mut conn, &handle.queries)
        })
        .await
        .map_err(|e| StoreError::TransactionFailed {
            op,
            reason: format!("blocking task failed: {e}"),
        })?
    }

    /// Insert or replace the record with the same id.  Resolves only once
    /// the enclosing transaction has committed.
    ///
    /// A record carrying `data` must also carry a 16-byte salt, a 16-byte IV
    /// matching the data prefix, and a non-empty version; anything else is
    /// rejected with `InvalidRecordType` before the database is touched.
    #[instrument(skip_all, fields(id = %record.id))]
    pub async fn put(&self, record: HashRecord) -> Result<(), StoreError> {
        let op = StoreOp::Save;
        if record.data.is_some() {
            record.payload().map_err(|e| StoreError::InvalidRecordType {
                id: record.id.clone(),
                reason: e.to_string(),
            })?;
        }
        self.run(op, move |conn, q| {
            let tx = conn.transaction().map_err(|e| tx_err(op, e))?;
            tx.execute(
                &q.upsert,
                params![
                    record.id,
                    record.hash,
                    record.timestamp,
                    record.data,
                    record.salt,
                    record.iv,
                    record.version,
                ],
            )
            .map_err(|e| StoreError::SaveFailed {
                op,
                reason: e.to_string(),
            })?;
            tx.commit().map_err(|e| tx_err(op, e))?;

            debug!(id = %record.id, "record committed");
            Ok(())
        })
        .await
    }

    /// The record with the greatest timestamp, or `None` for an empty store.
    ///
    /// Every row must carry a numeric timestamp (REAL values are truncated to
    /// whole milliseconds); a single malformed row fails the whole read with
    /// `InvalidRecordType`.
    #[instrument(skip_all)]
    pub async fn get_latest(&self) -> Result<Option<HashRecord>, StoreError> {
        let op = StoreOp::Get;
        self.run(op, move |conn, q| {
            let mut stmt = conn.prepare(&q.select_all).map_err(|e| get_err(op, e))?;
            let mut rows = stmt.query([]).map_err(|e| get_err(op, e))?;

            let mut records = Vec::new();
            while let Some(row) = rows.next().map_err(|e| get_err(op, e))? {
                let ts_type = row.get_ref(2).map_err(|e| get_err(op, e))?.data_type();
                if !matches!(ts_type, Type::Integer | Type::Real) {
                    let id: String = row.get(0).unwrap_or_default();
                    return Err(StoreError::InvalidRecordType {
                        id,
                        reason: format!("timestamp is {ts_type}, expected a number"),
                    });
                }
                records.push(row_to_record(row).map_err(|e| get_err(op, e))?);
            }

            let latest = records.into_iter().reduce(|latest, current| {
                if current.timestamp > latest.timestamp {
                    current
                } else {
                    latest
                }
            });
            debug!(found = latest.is_some(), "latest record read");
            Ok(latest)
        })
        .await
    }

    /// Point lookup.  A missing id is `Ok(None)`, not an error.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: &str) -> Result<Option<HashRecord>, StoreError> {
        let op = StoreOp::Get;
        let id = id.to_owned();
        self.run(op, move |conn, q| {
            conn.query_row(&q.select_by_id, params![id], row_to_record)
                .optional()
                .map_err(|e| get_err(op, e))
        })
        .await
    }

    /// Delete every record with `timestamp < now - max_age_ms` in a single
    /// transaction.  Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn evict_older_than(&self, max_age_ms: i64, now: i64) -> Result<usize, StoreError> {
        let op = StoreOp::Clean;
        let cutoff = now.saturating_sub(max_age_ms);
        self.run(op, move |conn, q| {
            let tx = conn.transaction().map_err(|e| tx_err(op, e))?;
            let deleted = tx
                .execute(&q.delete_older, params![cutoff])
                .map_err(|e| tx_err(op, e))?;
            tx.commit().map_err(|e| tx_err(op, e))?;

            if deleted > 0 {
                info!(deleted, cutoff, "evicted stale records");
            }
            Ok(deleted)
        })
        .await
    }

    /// Number of records in the store.
    pub async fn count(&self) -> Result<u64, StoreError> {
        let op = StoreOp::Get;
        self.run(op, move |conn, q| {
            conn.query_row(&q.count, [], |row| row.get(0))
                .map_err(|e| get_err(op, e))
        })
        .await
    }

    /// Release the connection.  The next operation re-opens it.
    pub fn close(&self) {
        let previous = {
            let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *gate, Arc::new(OnceCell::new()))
        };
        if previous.initialized() {
            // In-flight operations keep their own `Arc<Handle>`; the
            // connection closes when the last of them finishes.
            info!(op = %StoreOp::Close, "store handle released");
        }
    }
}

// ---------------------------------------------------------------------------
// Opening
// ---------------------------------------------------------------------------

fn open_handle(location: &StoreLocation, config: &IdentityConfig) -> Result<Handle, StoreError> {
    let init = |what: &str, e: rusqlite::Error| StoreError::InitializationFailed(format!("{what}: {e}"));

    let table = sql_identifier(&config.store_name)?;
    let key = sql_identifier(&config.key_path)?;

    let conn = match location {
        StoreLocation::File(path) => {
            let conn = Connection::open(path).map_err(|e| init("open", e))?;
            // WAL survives unclean shutdowns more gracefully.
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| init("WAL pragma", e))?;
            conn
        }
        StoreLocation::Memory => Connection::open_in_memory().map_err(|e| init("open in-memory", e))?,
    };

    let version: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| init("read user_version", e))?;

    // The table name is configurable, so a database at the current version
    // may still lack this particular table.
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            {key}     TEXT    PRIMARY KEY,
            hash      TEXT    NOT NULL,
            timestamp INTEGER NOT NULL,
            data      BLOB,
            salt      BLOB,
            iv        BLOB,
            version   TEXT
        );
        CREATE INDEX IF NOT EXISTS {table}_timestamp ON {table}(timestamp);"
    ))
    .map_err(|e| init("create schema", e))?;

    if version < config.schema_version {
        conn.pragma_update(None, "user_version", config.schema_version)
            .map_err(|e| init("write user_version", e))?;
        info!(from = version, to = config.schema_version, "store schema upgraded");
    } else if version > config.schema_version {
        warn!(
            found = version,
            expected = config.schema_version,
            "store schema is newer than this build"
        );
    }

    info!(?location, "store opened");
    Ok(Handle {
        conn: Mutex::new(conn),
        queries: Queries::new(table, key),
    })
}

/// Table and column names come from configuration and are spliced into SQL,
/// so they are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
fn sql_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InitializationFailed(format!(
            "invalid SQL identifier {name:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Row mapping and error helpers
// ---------------------------------------------------------------------------

/// Column order must match `Queries`.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HashRecord> {
    Ok(HashRecord {
        id: row.get(0)?,
        hash: row.get(1)?,
        timestamp: timestamp_column(row, 2)?,
        data: row.get(3)?,
        salt: row.get(4)?,
        iv: row.get(5)?,
        version: row.get(6)?,
    })
}

fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    match row.get_ref(idx)? {
        ValueRef::Real(ms) => Ok(ms as i64),
        _ => row.get(idx),
    }
}

fn tx_err(op: StoreOp, e: rusqlite::Error) -> StoreError {
    StoreError::TransactionFailed {
        op,
        reason: e.to_string(),
    }
}

fn get_err(op: StoreOp, e: rusqlite::Error) -> StoreError {
    StoreError::GetFailed {
        op,
        reason: e.to_string(),
    }
}
