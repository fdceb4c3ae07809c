// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Domain events emitted by the identity service, and the sinks that receive
// them.  Sinks are injected; there is no global event bus.

use std::sync::{Arc, Mutex, PoisonError};

use devid_core::error::Result;
use devid_security::audit::{AuditLog, AuditRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Steps of a hash acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Start,
    CheckStoreConnection,
    CheckExistingHash,
    ValidateFingerprint,
    GenerateAndEncrypt,
    Persist,
    Return,
    Error,
}

/// Public operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetOrCreate,
    DecryptOwn,
    DecryptCrossDevice,
    ExportForTransfer,
    EvictStale,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetOrCreate => "get_or_create",
            Self::DecryptOwn => "decrypt_own",
            Self::DecryptCrossDevice => "decrypt_cross_device",
            Self::ExportForTransfer => "export_for_transfer",
            Self::EvictStale => "evict_stale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IdentityEvent {
    /// The acquisition state machine moved to `stage`.
    #[serde(rename = "hash_stage")]
    Transition { operation: Operation, stage: Stage },
    /// An existing hash was found and returned.
    HashAssign { hash: String },
    /// A fresh fingerprint was checked.
    HashValidate {
        operation: Operation,
        is_valid: bool,
        missing: Vec<&'static str>,
    },
    /// A new hash was generated and persisted.
    HashSet { hash: String, timestamp: i64 },
    /// A payload was decrypted.
    HashDecrypt {
        operation: Operation,
        hash: Option<String>,
    },
    /// A key bundle was produced for another device.
    HashExport { hash: String },
    /// Stale records were removed.
    HashEvict { removed: usize },
    /// An operation failed.  The original error is still returned.
    HashError {
        operation: Operation,
        code: &'static str,
        message: String,
        timestamp: i64,
    },
}

impl IdentityEvent {
    /// Wire name, e.g. `hash_set`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transition { .. } => "hash_stage",
            Self::HashAssign { .. } => "hash_assign",
            Self::HashValidate { .. } => "hash_validate",
            Self::HashSet { .. } => "hash_set",
            Self::HashDecrypt { .. } => "hash_decrypt",
            Self::HashExport { .. } => "hash_export",
            Self::HashEvict { .. } => "hash_evict",
            Self::HashError { .. } => "hash_error",
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Transition { operation, .. }
            | Self::HashValidate { operation, .. }
            | Self::HashDecrypt { operation, .. }
            | Self::HashError { operation, .. } => *operation,
            Self::HashAssign { .. } | Self::HashSet { .. } => Operation::GetOrCreate,
            Self::HashExport { .. } => Operation::ExportForTransfer,
            Self::HashEvict { .. } => Operation::EvictStale,
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::HashAssign { hash } | Self::HashSet { hash, .. } | Self::HashExport { hash } => {
                Some(hash)
            }
            Self::HashDecrypt { hash, .. } => hash.as_deref(),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::HashError { .. })
    }
}

/// Receiver of identity events.
///
/// A returned error is logged by the service and otherwise ignored; it never
/// replaces the result of the operation that emitted the event.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &IdentityEvent) -> Result<()>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &IdentityEvent) -> Result<()> {
        Ok(())
    }
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &IdentityEvent) -> Result<()> {
        let op = event.operation().as_str();
        match event {
            IdentityEvent::Transition { stage, .. } => debug!(op, ?stage, "identity transition"),
            IdentityEvent::HashError { code, message, .. } => {
                warn!(op, code, error = %message, "identity operation failed")
            }
            other => info!(op, event = other.name(), hash = other.hash(), "identity event"),
        }
        Ok(())
    }
}

/// Appends outcome events to the SQLite audit log.  Stage transitions are
/// not recorded.
pub struct AuditSink {
    log: Mutex<AuditLog>,
}

impl AuditSink {
    pub fn new(log: AuditLog) -> Self {
        Self {
            log: Mutex::new(log),
        }
    }
}

impl EventSink for AuditSink {
    fn emit(&self, event: &IdentityEvent) -> Result<()> {
        if matches!(event, IdentityEvent::Transition { .. }) {
            return Ok(());
        }
        let details = serde_json::to_string(event)?;
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.record(AuditRecord {
            event: event.name(),
            operation: event.operation().as_str(),
            hash: event.hash(),
            success: !event.is_failure(),
            details: Some(&details),
        })?;
        Ok(())
    }
}

/// Forwards every event to each inner sink.  All sinks are tried; the first
/// error, if any, is returned.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &IdentityEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serialized_tag() {
        let events = [
            IdentityEvent::Transition {
                operation: Operation::GetOrCreate,
                stage: Stage::CheckStoreConnection,
            },
            IdentityEvent::HashSet {
                hash: "h".into(),
                timestamp: 1,
            },
            IdentityEvent::HashError {
                operation: Operation::DecryptOwn,
                code: "EMPTY_HASH",
                message: "m".into(),
                timestamp: 2,
            },
        ];
        for event in &events {
            let json = serde_json::to_value(event).unwrap();
            assert_eq!(json["event"], event.name());
        }
        let stage = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(stage["stage"], "CHECK_STORE_CONNECTION");
        assert_eq!(stage["operation"], "get_or_create");
    }

    #[test]
    fn audit_sink_records_outcomes_only() {
        let sink = AuditSink::new(AuditLog::open_in_memory().unwrap());
        sink.emit(&IdentityEvent::Transition {
            operation: Operation::GetOrCreate,
            stage: Stage::Start,
        })
        .unwrap();
        sink.emit(&IdentityEvent::HashSet {
            hash: "abc".into(),
            timestamp: 5,
        })
        .unwrap();
        sink.emit(&IdentityEvent::HashError {
            operation: Operation::DecryptOwn,
            code: "DB_NOT_FOUND",
            message: "missing".into(),
            timestamp: 6,
        })
        .unwrap();

        let log = sink.log.lock().unwrap();
        assert_eq!(log.count().unwrap(), 2);
        let entries = log.recent_entries(10).unwrap();
        assert_eq!(entries[0].event, "hash_error");
        assert!(!entries[0].success);
        assert_eq!(entries[0].operation, "decrypt_own");
        assert_eq!(entries[1].hash.as_deref(), Some("abc"));
        assert!(entries[1].details.as_deref().unwrap().contains(r#""timestamp":5"#));
    }

    struct Failing;

    impl EventSink for Failing {
        fn emit(&self, _event: &IdentityEvent) -> Result<()> {
            Err(devid_core::error::ServiceError::DatabaseNotConnected.into())
        }
    }

    #[test]
    fn fanout_tries_every_sink() {
        let audit = Arc::new(AuditSink::new(AuditLog::open_in_memory().unwrap()));
        let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(Failing), audit.clone()];
        let fanout = FanoutSink::new(sinks);
        let result = fanout.emit(&IdentityEvent::HashEvict { removed: 3 });
        assert!(result.is_err());
        assert_eq!(audit.log.lock().unwrap().count().unwrap(), 1);
    }
}
