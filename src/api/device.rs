// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Snapshots of advertising devices.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use uuid::Uuid;

use super::Advertisement;

/// Well-known advertisement payload keys, as reported by CoreBluetooth.
pub mod keys {
    pub const LOCAL_NAME: &str = "kCBAdvDataLocalName";
    pub const SERVICE_UUIDS: &str = "kCBAdvDataServiceUUIDs";
    pub const MANUFACTURER_DATA: &str = "kCBAdvDataManufacturerData";
    pub const TX_POWER_LEVEL: &str = "kCBAdvDataTxPowerLevel";
    pub const IS_CONNECTABLE: &str = "kCBAdvDataIsConnectable";
}

/// Name used when a device advertises no name at all.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Session scoped identifier the radio stack assigns to a physical device.
///
/// Identifiers are only unique within a single discovery session. Nothing may assume the same
/// device keeps its identifier across sessions.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        DeviceId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        DeviceId(uuid)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An opaque value out of an advertisement payload.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdvertisementValue {
    Bytes(#[cfg_attr(feature = "serde", serde(with = "serde_bytes"))] Vec<u8>),
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
    List(Vec<AdvertisementValue>),
}

/// Raw advertisement payload keyed by the platform's advertisement data keys.
pub type AdvertisementData = BTreeMap<String, AdvertisementValue>;

/// Coarse classification of a signal strength reading.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SignalQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl SignalQuality {
    pub fn from_rssi(rssi: i16) -> Self {
        match rssi {
            r if r >= -50 => SignalQuality::Excellent,
            r if r >= -65 => SignalQuality::Good,
            r if r >= -80 => SignalQuality::Fair,
            _ => SignalQuality::Poor,
        }
    }
}

impl Display for SignalQuality {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            SignalQuality::Excellent => "Excellent",
            SignalQuality::Good => "Good",
            SignalQuality::Fair => "Fair",
            SignalQuality::Poor => "Poor",
        };
        f.write_str(s)
    }
}

/// The most recent sighting of a device.
///
/// A record is never modified after creation. When the device is seen again the registry swaps
/// in a new record, so a record handed out earlier keeps describing the sighting it was made
/// from.
///
/// Two records are equal when they describe the same device, regardless of signal strength,
/// timestamp or payload.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Clone, Debug)]
pub struct DeviceRecord {
    pub id: DeviceId,
    /// Name reported by the radio stack, which may differ from the advertised local name.
    pub name: Option<String>,
    /// Received signal strength in dBm.
    pub rssi: i16,
    pub last_seen: SystemTime,
    pub advertisement_data: AdvertisementData,
}

impl DeviceRecord {
    pub fn new(
        id: DeviceId,
        name: Option<String>,
        rssi: i16,
        advertisement_data: AdvertisementData,
    ) -> Self {
        Self::seen_at(id, name, rssi, advertisement_data, SystemTime::now())
    }

    pub fn seen_at(
        id: DeviceId,
        name: Option<String>,
        rssi: i16,
        advertisement_data: AdvertisementData,
        last_seen: SystemTime,
    ) -> Self {
        DeviceRecord {
            id,
            name,
            rssi,
            last_seen,
            advertisement_data,
        }
    }

    pub(crate) fn from_advertisement(advertisement: Advertisement) -> Self {
        Self::new(
            advertisement.id,
            advertisement.name,
            advertisement.rssi,
            advertisement.data,
        )
    }

    /// The local name carried in the advertisement itself.
    pub fn local_name(&self) -> Option<&str> {
        match self.advertisement_data.get(keys::LOCAL_NAME) {
            Some(AdvertisementValue::Text(name)) => Some(name),
            _ => None,
        }
    }

    /// Advertised local name, then the reported name, then a fixed fallback.
    pub fn display_name(&self) -> &str {
        self.local_name()
            .or(self.name.as_deref())
            .unwrap_or(UNKNOWN_DEVICE_NAME)
    }

    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.rssi)
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        match self.advertisement_data.get(keys::SERVICE_UUIDS) {
            Some(AdvertisementValue::List(values)) => values
                .iter()
                .filter_map(|value| match value {
                    AdvertisementValue::Uuid(uuid) => Some(*uuid),
                    _ => None,
                })
                .collect(),
            Some(AdvertisementValue::Uuid(uuid)) => vec![*uuid],
            _ => vec![],
        }
    }

    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        match self.advertisement_data.get(keys::MANUFACTURER_DATA) {
            Some(AdvertisementValue::Bytes(data)) => Some(data),
            _ => None,
        }
    }

    pub fn tx_power_level(&self) -> Option<i64> {
        match self.advertisement_data.get(keys::TX_POWER_LEVEL) {
            Some(AdvertisementValue::Int(level)) => Some(*level),
            _ => None,
        }
    }

    /// Whether the advertisement flagged the device as connectable. A missing flag means no.
    pub fn is_connectable(&self) -> bool {
        match self.advertisement_data.get(keys::IS_CONNECTABLE) {
            Some(AdvertisementValue::Bool(connectable)) => *connectable,
            Some(AdvertisementValue::Int(connectable)) => *connectable != 0,
            _ => false,
        }
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeviceRecord {}

impl Hash for DeviceRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rssi: i16, data: AdvertisementData) -> DeviceRecord {
        DeviceRecord::new(DeviceId::from_uuid(Uuid::nil()), None, rssi, data)
    }

    #[test]
    fn signal_quality_thresholds() {
        assert_eq!(SignalQuality::from_rssi(-30), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-50), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-51), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-65), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-66), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-80), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-81), SignalQuality::Poor);
        assert_eq!(SignalQuality::from_rssi(i16::MIN), SignalQuality::Poor);
    }

    #[test]
    fn display_name_prefers_local_name() {
        let mut data = AdvertisementData::new();
        data.insert(
            keys::LOCAL_NAME.to_string(),
            AdvertisementValue::Text("Thermometer".to_string()),
        );
        let mut device = record(-60, data);
        device.name = Some("Peripheral".to_string());
        assert_eq!(device.display_name(), "Thermometer");

        device.advertisement_data.clear();
        assert_eq!(device.display_name(), "Peripheral");

        device.name = None;
        assert_eq!(device.display_name(), UNKNOWN_DEVICE_NAME);
    }

    #[test]
    fn local_name_ignores_non_text_values() {
        let mut data = AdvertisementData::new();
        data.insert(
            keys::LOCAL_NAME.to_string(),
            AdvertisementValue::Bytes(b"raw".to_vec()),
        );
        assert_eq!(record(-60, data).local_name(), None);
    }

    #[test]
    fn well_known_payload_fields() {
        let service = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
        let mut data = AdvertisementData::new();
        data.insert(
            keys::SERVICE_UUIDS.to_string(),
            AdvertisementValue::List(vec![
                AdvertisementValue::Uuid(service),
                AdvertisementValue::Bool(true),
            ]),
        );
        data.insert(
            keys::MANUFACTURER_DATA.to_string(),
            AdvertisementValue::Bytes(vec![0x4c, 0x00, 0x02]),
        );
        data.insert(keys::TX_POWER_LEVEL.to_string(), AdvertisementValue::Int(-8));
        data.insert(keys::IS_CONNECTABLE.to_string(), AdvertisementValue::Int(1));

        let device = record(-70, data);
        assert_eq!(device.service_uuids(), vec![service]);
        assert_eq!(device.manufacturer_data(), Some(&[0x4c, 0x00, 0x02][..]));
        assert_eq!(device.tx_power_level(), Some(-8));
        assert!(device.is_connectable());
        assert!(!record(-70, AdvertisementData::new()).is_connectable());
    }

    #[test]
    fn equality_is_by_identity() {
        let a = record(-40, AdvertisementData::new());
        let mut b = record(-90, AdvertisementData::new());
        b.name = Some("Other".to_string());
        assert_eq!(a, b);

        let c = DeviceRecord::new(
            DeviceId::from_uuid(Uuid::from_u128(1)),
            None,
            -40,
            AdvertisementData::new(),
        );
        assert_ne!(a, c);
    }
}
