// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fingerprint validation.
//
// A field is "present" when it is set AND not its falsy default: an empty
// string or a zero number counts as absent.  `hardware_concurrency: Some(0)`
// therefore fails validation even though the field is defined.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ValidationError;
use crate::types::DeviceFingerprint;

/// Every field of a [`DeviceFingerprint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FingerprintField {
    Platform,
    UserAgent,
    Language,
    Timezone,
    ScreenResolution,
    ColorDepth,
    PixelRatio,
    TouchPoints,
    HardwareConcurrency,
    Memory,
}

impl FingerprintField {
    pub const ALL: [FingerprintField; 10] = [
        Self::Platform,
        Self::UserAgent,
        Self::Language,
        Self::Timezone,
        Self::ScreenResolution,
        Self::ColorDepth,
        Self::PixelRatio,
        Self::TouchPoints,
        Self::HardwareConcurrency,
        Self::Memory,
    ];

    pub fn is_required(&self) -> bool {
        !matches!(self, Self::Timezone | Self::TouchPoints | Self::Memory)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::UserAgent => "userAgent",
            Self::Language => "language",
            Self::Timezone => "timezone",
            Self::ScreenResolution => "screenResolution",
            Self::ColorDepth => "colorDepth",
            Self::PixelRatio => "pixelRatio",
            Self::TouchPoints => "touchPoints",
            Self::HardwareConcurrency => "hardwareConcurrency",
            Self::Memory => "memory",
        }
    }

    fn is_present_in(&self, fp: &DeviceFingerprint) -> bool {
        match self {
            Self::Platform => fp.platform.is_present(),
            Self::UserAgent => fp.user_agent.is_present(),
            Self::Language => fp.language.is_present(),
            Self::Timezone => fp.timezone.is_present(),
            Self::ScreenResolution => fp.screen_resolution.is_present(),
            Self::ColorDepth => fp.color_depth.is_present(),
            Self::PixelRatio => fp.pixel_ratio.is_present(),
            Self::TouchPoints => fp.touch_points.is_present(),
            Self::HardwareConcurrency => fp.hardware_concurrency.is_present(),
            Self::Memory => fp.memory.is_present(),
        }
    }
}

/// Truthiness, as opposed to definedness.
trait Present {
    fn is_present(&self) -> bool;
}

impl Present for String {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Present for u32 {
    fn is_present(&self) -> bool {
        *self != 0
    }
}

impl Present for f64 {
    fn is_present(&self) -> bool {
        *self != 0.0 && !self.is_nan()
    }
}

impl<T: Present> Present for Option<T> {
    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(Present::is_present)
    }
}

/// Field-by-field validity plus the overall verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub fields: BTreeMap<FingerprintField, bool>,
    pub is_valid: bool,
}

impl ValidationReport {
    /// Required fields that were absent.
    pub fn missing_required(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|(field, ok)| field.is_required() && !**ok)
            .map(|(field, _)| field.name())
            .collect()
    }

    /// Convert a failing report into `InvalidDeviceInfo`.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(ValidationError::InvalidDeviceInfo {
                missing: self.missing_required(),
            })
        }
    }
}

/// Validate a fingerprint.  Optional fields are reported but never affect
/// `is_valid`.
pub fn validate(fp: &DeviceFingerprint) -> ValidationReport {
    let fields: BTreeMap<_, _> = FingerprintField::ALL
        .iter()
        .map(|f| (*f, f.is_present_in(fp)))
        .collect();

    let is_valid = fields
        .iter()
        .filter(|(field, _)| field.is_required())
        .all(|(_, ok)| *ok);

    ValidationReport { fields, is_valid }
}
