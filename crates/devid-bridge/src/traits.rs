// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic fingerprint source.

use devid_core::error::Result;
use devid_core::types::DeviceFingerprint;

/// Produces a fresh [`DeviceFingerprint`] on demand.
///
/// Called once per identity operation; implementations must not cache a
/// snapshot across calls unless the signals they read are genuinely fixed.
/// Failures surface as `ServiceError::FingerprintUnavailable`.
pub trait FingerprintSupplier: Send + Sync {
    fn fingerprint(&self) -> Result<DeviceFingerprint>;

    /// Short label for logs (e.g. "host", "static").
    fn name(&self) -> &str;
}
