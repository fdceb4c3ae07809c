// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! devid-bridge: sources of device fingerprints.
//!
//! The identity service never reads the environment itself; it asks a
//! [`traits::FingerprintSupplier`] for a fresh snapshot on every call.

pub mod host;
pub mod traits;

pub use host::{HostFingerprint, StaticFingerprint};
pub use traits::FingerprintSupplier;
