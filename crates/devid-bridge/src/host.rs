// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Host and fixed fingerprint suppliers.
//
// `HostFingerprint` reads stable process and OS signals.  Absent display
// signals fall back to the same defaults a browser collector uses: colour
// depth 24, pixel ratio 1, zero touch points, one logical CPU, memory "0".

use std::thread;

use devid_core::error::{Result, ServiceError};
use devid_core::types::DeviceFingerprint;
use tracing::{debug, warn};

use crate::traits::FingerprintSupplier;

const DEFAULT_COLOR_DEPTH: u32 = 24;
const DEFAULT_PIXEL_RATIO: f64 = 1.0;
const DEFAULT_TOUCH_POINTS: u32 = 0;
const DEFAULT_HARDWARE_CONCURRENCY: u32 = 1;
const DEFAULT_MEMORY: &str = "0";
const UNKNOWN_RESOLUTION: &str = "0x0";

/// Environment variable consulted for the screen resolution when none is
/// configured (`<width>x<height>`).
pub const SCREEN_RESOLUTION_VAR: &str = "DEVID_SCREEN_RESOLUTION";

/// Locale variables in POSIX precedence order.
const LOCALE_VARS: [&str; 3] = ["LC_ALL", "LC_MESSAGES", "LANG"];

/// Fingerprint of the machine this process runs on.
#[derive(Debug, Clone, Default)]
pub struct HostFingerprint {
    screen_resolution: Option<String>,
    color_depth: Option<u32>,
    pixel_ratio: Option<f64>,
}

impl HostFingerprint {
    pub fn with_screen_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.screen_resolution = Some(resolution.into());
        self
    }

    pub fn with_color_depth(mut self, depth: u32) -> Self {
        self.color_depth = Some(depth);
        self
    }

    pub fn with_pixel_ratio(mut self, ratio: f64) -> Self {
        self.pixel_ratio = Some(ratio);
        self
    }

    /// Collect a fingerprint, reading variables through `lookup`.
    pub fn collect_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<DeviceFingerprint> {
        let platform = platform();
        if platform.is_empty() {
            return Err(ServiceError::FingerprintUnavailable("platform unknown".into()).into());
        }

        let language = LOCALE_VARS
            .iter()
            .filter_map(|var| lookup(*var))
            .find_map(|raw| language_tag(&raw))
            .ok_or_else(|| {
                ServiceError::FingerprintUnavailable(format!(
                    "no language in any of {}",
                    LOCALE_VARS.join(", ")
                ))
            })?;

        let screen_resolution = self
            .screen_resolution
            .clone()
            .or_else(|| lookup(SCREEN_RESOLUTION_VAR))
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| UNKNOWN_RESOLUTION.into());

        let hardware_concurrency = thread::available_parallelism()
            .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
            .unwrap_or_else(|e| {
                warn!(error = %e, "available_parallelism unavailable, defaulting");
                DEFAULT_HARDWARE_CONCURRENCY
            });

        let fp = DeviceFingerprint {
            user_agent: user_agent(&platform),
            platform,
            language,
            screen_resolution,
            color_depth: Some(self.color_depth.filter(|d| *d != 0).unwrap_or(DEFAULT_COLOR_DEPTH)),
            pixel_ratio: Some(
                self.pixel_ratio
                    .filter(|r| *r != 0.0 && r.is_finite())
                    .unwrap_or(DEFAULT_PIXEL_RATIO),
            ),
            touch_points: Some(DEFAULT_TOUCH_POINTS),
            hardware_concurrency: Some(hardware_concurrency),
            memory: Some(DEFAULT_MEMORY.into()),
            timezone: lookup("TZ").filter(|tz| !tz.is_empty()),
        };

        debug!(platform = %fp.platform, language = %fp.language, "host fingerprint collected");
        Ok(fp)
    }
}

impl FingerprintSupplier for HostFingerprint {
    fn fingerprint(&self) -> Result<DeviceFingerprint> {
        self.collect_with(|var| std::env::var(var).ok())
    }

    fn name(&self) -> &str {
        "host"
    }
}

fn platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

fn user_agent(platform: &str) -> String {
    format!("devid/{} ({platform})", env!("CARGO_PKG_VERSION"))
}

/// `en_US.UTF-8@euro` → `en-US`.  Empty values yield `None`.
fn language_tag(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next().unwrap_or_default().trim();
    if base.is_empty() {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// A fixed snapshot.
#[derive(Debug, Clone)]
pub struct StaticFingerprint(DeviceFingerprint);

impl StaticFingerprint {
    pub fn new(fingerprint: DeviceFingerprint) -> Self {
        Self(fingerprint)
    }
}

impl FingerprintSupplier for StaticFingerprint {
    fn fingerprint(&self) -> Result<DeviceFingerprint> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
