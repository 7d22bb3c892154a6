// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! blescout finds Bluetooth Low Energy devices by listening to their advertisements.
//!
//! A [`ScanController`] owns one radio stack (anything implementing [`api::Radio`]). It tracks
//! the adapter state, runs at most one scan session at a time, keeps the latest sighting of
//! every device in a registry and fans discovery and state events out to any number of
//! subscribers.
//!
//! Two ways of scanning are offered:
//!
//! - a bounded scan, [`ScanController::scan_for`], which runs for a fixed time and returns the
//!   devices seen, strongest signal first;
//! - a live scan, [`ScanController::start`] plus [`ScanController::subscribe_discoveries`],
//!   which streams every sighting until [`ScanController::stop`] is called.
//!
//! ```no_run
//! use blescout::{mock::MockRadio, ScanConfig, ScanController};
//! use std::time::Duration;
//!
//! # async fn run() -> blescout::Result<()> {
//! let controller = ScanController::new(MockRadio::powered_on(), ScanConfig::default()).await?;
//! for device in controller.scan_for(Duration::from_secs(5)).await? {
//!     println!("{} ({} dBm)", device.display_name(), device.rssi);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
mod common;
mod config;
mod controller;
pub mod mock;

pub use api::{AdapterState, DeviceId, DeviceRecord, EventKinds, ScanEvent, StopReason};
pub use common::broadcaster::Subscription;
pub use config::ScanConfig;
pub use controller::{ScanController, ScanPhase, SessionInfo};
pub use tokio_util::sync::CancellationToken;

use static_assertions::assert_impl_all;
use std::result;

/// The main error type returned by most methods in blescout.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Bluetooth adapter unavailable ({reason}); wait for it to power on and start again")]
    AdapterUnavailable { reason: AdapterState },

    #[error("A scan session is already running; stop it before starting another")]
    SessionAlreadyActive,

    #[error("Scan was cancelled before its deadline")]
    ScanCancelled,

    #[error("Radio stack failure: {0}")]
    CollaboratorFailure(String),
}

impl Error {
    /// Whether starting again later may succeed without the caller changing anything but
    /// waiting for the adapter.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AdapterUnavailable { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::ScanCancelled)
    }
}

/// Convenience type for a result using the blescout [`Error`] type.
pub type Result<T> = result::Result<T, Error>;

// Ensure that the exported types implement all the expected traits.
assert_impl_all!(ScanController<mock::MockRadio>: Clone, Send, Sync);
assert_impl_all!(Subscription: Send, Unpin);
assert_impl_all!(Error: Clone, Send, Sync);
assert_impl_all!(DeviceRecord: Clone, Send, Sync);
assert_impl_all!(
    DeviceId: Clone,
    std::fmt::Debug,
    std::fmt::Display,
    std::hash::Hash,
    Eq,
    Ord,
    Send,
    Sync
);
