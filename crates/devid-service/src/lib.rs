// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! devid-service: the single entry point for device identity.
//!
//! [`IdentityService`] combines a fingerprint supplier, the crypto engine and
//! the local store into three operations: get-or-create the device hash,
//! decrypt this device's own hash, and decrypt a hash produced elsewhere from
//! its key metadata.  Every state transition is reported to an
//! [`EventSink`] supplied by the caller.

pub mod events;
pub mod identity;

pub use events::{
    AuditSink, EventSink, FanoutSink, IdentityEvent, NullSink, Operation, Stage, TracingSink,
};
pub use identity::{IdentityService, TransferBundle};
