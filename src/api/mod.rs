// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `api` module contains the types shared by the scan session core and the radio stacks
//! it drives.
//!
//! A radio stack is anything implementing [`Radio`]: it reports the adapter state, turns
//! scanning on and off, and produces a stream of [`RadioEvent`]s. Everything above that seam
//! ([`ScanController`](crate::ScanController) and friends) is platform independent.

pub mod device;

use std::fmt::{self, Debug, Display, Formatter};
use std::pin::Pin;

use async_trait::async_trait;
use bitflags::bitflags;
use futures::stream::Stream;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;

pub use self::device::{
    AdvertisementData, AdvertisementValue, DeviceId, DeviceRecord, SignalQuality,
};
use crate::Result;

/// Power and permission state of the local Bluetooth adapter.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Maps a raw platform state code, numbered as CoreBluetooth's `CBManagerState`. Codes this
    /// crate doesn't know about become `Unknown`.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => AdapterState::Resetting,
            2 => AdapterState::Unsupported,
            3 => AdapterState::Unauthorized,
            4 => AdapterState::PoweredOff,
            5 => AdapterState::PoweredOn,
            _ => AdapterState::Unknown,
        }
    }

    pub fn is_powered_on(&self) -> bool {
        *self == AdapterState::PoweredOn
    }
}

impl Display for AdapterState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            AdapterState::Unknown => "Bluetooth state is unknown",
            AdapterState::Resetting => "Bluetooth is resetting",
            AdapterState::Unsupported => "Bluetooth is not supported on this device",
            AdapterState::Unauthorized => "Bluetooth usage is not authorized",
            AdapterState::PoweredOff => "Bluetooth is powered off",
            AdapterState::PoweredOn => "Bluetooth is powered on",
        };
        f.write_str(s)
    }
}

/// A single advertisement as observed by the radio stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    pub data: AdvertisementData,
}

/// Notifications produced by a radio stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    /// The adapter changed state. Platforms that replay a restored state on startup report it
    /// through this same variant.
    AdapterStateChanged(AdapterState),
    /// An advertisement was received. The same device may be reported any number of times.
    AdvertisementObserved(Advertisement),
}

/// The radio stack a [`ScanController`](crate::ScanController) drives.
///
/// Implementations may deliver events from any thread and at any rate. The controller is the
/// only caller of `begin_scanning`/`end_scanning`.
#[async_trait]
pub trait Radio: Send + Sync + Debug {
    /// Returns the state the adapter is in right now.
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Retrieve a stream of `RadioEvent`s. The stream stays open for the lifetime of the radio.
    async fn events(&self) -> Result<Pin<Box<dyn Stream<Item = RadioEvent> + Send>>>;

    /// Starts delivering advertisements. With `allow_duplicates` every received advertisement
    /// is reported, not just the first one per device.
    async fn begin_scanning(&self, allow_duplicates: bool) -> Result<()>;

    /// Stops delivering advertisements. Stopping a radio that isn't scanning is not an error.
    async fn end_scanning(&self) -> Result<()>;
}

/// Why a scan session ended.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The session reached its deadline.
    Timeout,
    /// A bounded scan was cancelled by its caller.
    Cancelled,
    /// The adapter left the powered on state; carries the state it moved to.
    AdapterLost(AdapterState),
}

/// Events delivered to subscribers of a [`ScanController`](crate::ScanController).
#[derive(Clone, Debug)]
pub enum ScanEvent {
    /// First sighting of a device in the current session.
    DeviceDiscovered(DeviceRecord),
    /// A device already seen in this session was seen again.
    DeviceUpdated(DeviceRecord),
    AdapterStateChanged(AdapterState),
    ScanStarted {
        generation: u64,
    },
    ScanStopped {
        generation: u64,
        reason: StopReason,
    },
}

impl ScanEvent {
    pub fn kind(&self) -> EventKinds {
        match self {
            ScanEvent::DeviceDiscovered(_) | ScanEvent::DeviceUpdated(_) => EventKinds::DISCOVERY,
            ScanEvent::AdapterStateChanged(_)
            | ScanEvent::ScanStarted { .. }
            | ScanEvent::ScanStopped { .. } => EventKinds::STATE,
        }
    }

    /// The record carried by discovery events.
    pub fn record(&self) -> Option<&DeviceRecord> {
        match self {
            ScanEvent::DeviceDiscovered(record) | ScanEvent::DeviceUpdated(record) => Some(record),
            _ => None,
        }
    }
}

bitflags! {
    /// Which kinds of [`ScanEvent`] a subscription receives.
    #[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
    pub struct EventKinds: u8 {
        const DISCOVERY = 0x01;
        const STATE = 0x02;
    }
}
