// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use std::time::Duration;

/// Default length of a bounded scan started through [`ScanController::scan`](crate::ScanController::scan).
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Options for a [`ScanController`](crate::ScanController).
///
/// With the `serde` feature enabled this can be read from any serde format, e.g. a
/// `[scan]` table in a TOML file:
///
/// ```toml
/// default_duration = { secs = 5, nanos = 0 }
/// ```
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", default)
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanConfig {
    /// Duration used by bounded scans that don't name one.
    pub default_duration: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            default_duration: DEFAULT_SCAN_DURATION,
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }
}
