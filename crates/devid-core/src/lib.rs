// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// devid: Core types, fingerprint validation, and error definitions shared
// across all crates.

pub mod config;
pub mod error;
pub mod types;
pub mod validation;

pub use config::IdentityConfig;
pub use error::{CryptoError, DevIdError, ServiceError, StoreError, StoreOp, ValidationError};
pub use types::*;
pub use validation::{validate, FingerprintField, ValidationReport};
