// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer for the CLI: loads configuration, opens the audit log, and
// wires the identity service to the host fingerprint and event sinks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use devid_bridge::FingerprintSupplier;
use devid_core::config::IdentityConfig;
use devid_core::error::Result;
use devid_security::audit::{AuditEntry, AuditLog};
use devid_service::{AuditSink, EventSink, FanoutSink, IdentityService, TracingSink};
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "config.json";
pub const AUDIT_DB: &str = "audit.db";

pub struct AppServices {
    identity: IdentityService,
    data_dir: PathBuf,
    config: IdentityConfig,
}

impl AppServices {
    /// Build the services over `data_dir`.  An audit log that cannot be
    /// opened is skipped; events still reach the tracing sink.
    pub fn init(
        data_dir: PathBuf,
        config: IdentityConfig,
        supplier: Arc<dyn FingerprintSupplier>,
    ) -> Result<Self> {
        info!(path = %data_dir.display(), supplier = supplier.name(), "initialising services");

        let mut sink = FanoutSink::default();
        sink.push(Arc::new(TracingSink));
        match AuditLog::open(data_dir.join(AUDIT_DB)) {
            Ok(log) => sink.push(Arc::new(AuditSink::new(log))),
            Err(e) => warn!(error = %e, "audit log unavailable, events are logged only"),
        }
        let sink: Arc<dyn EventSink> = Arc::new(sink);

        let identity = IdentityService::open(&data_dir, config.clone(), supplier, sink)?;
        Ok(Self {
            identity,
            data_dir,
            config,
        })
    }

    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The most recent `limit` audit entries, newest first.
    pub fn recent_audit(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        let log = AuditLog::open(self.data_dir.join(AUDIT_DB))?;
        Ok(log.recent_entries(limit)?)
    }
}

/// Read `config.json` from `data_dir`, falling back to defaults when it is
/// missing or unreadable.
pub fn load_config(data_dir: &Path) -> IdentityConfig {
    let path = data_dir.join(CONFIG_FILE);
    let Ok(data) = std::fs::read_to_string(&path) else {
        return IdentityConfig::default();
    };
    serde_json::from_str(&data).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring malformed config");
        IdentityConfig::default()
    })
}

pub fn persist_config(data_dir: &Path, config: &IdentityConfig) -> Result<()> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}
