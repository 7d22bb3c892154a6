// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::api::{DeviceId, DeviceRecord};
use dashmap::DashMap;
use std::cmp::Reverse;

/// Latest sighting of every device seen in the current session.
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    devices: DashMap<DeviceId, DeviceRecord>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record`, replacing any previous record for the same device. Returns `true` if
    /// the device had not been seen before.
    pub fn upsert(&self, record: DeviceRecord) -> bool {
        self.devices.insert(record.id, record).is_none()
    }

    /// All records, strongest signal first. Equal signals are ordered by identifier.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self
            .devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| (Reverse(record.rssi), record.id));
        records
    }

    pub fn get(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.devices.get(id).map(|entry| entry.value().clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AdvertisementData, AdvertisementValue};
    use rand::Rng;
    use std::sync::Arc;
    use uuid::Uuid;

    fn id(n: u128) -> DeviceId {
        DeviceId::from_uuid(Uuid::from_u128(n))
    }

    fn record(n: u128, rssi: i16) -> DeviceRecord {
        DeviceRecord::new(id(n), None, rssi, AdvertisementData::new())
    }

    #[test]
    fn upsert_reports_new_identities() {
        let registry = DiscoveryRegistry::new();
        assert!(registry.upsert(record(1, -40)));
        assert!(!registry.upsert(record(1, -70)));
        assert!(registry.upsert(record(2, -70)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn last_write_wins() {
        let registry = DiscoveryRegistry::new();
        let mut rng = rand::rng();
        let mut last = None;
        for _ in 0..100 {
            let rssi = rng.random_range(-100..=-20);
            let mut data = AdvertisementData::new();
            data.insert("seq".to_string(), AdvertisementValue::Int(i64::from(rssi)));
            let rec = DeviceRecord::new(id(9), None, rssi, data);
            registry.upsert(rec.clone());
            last = Some(rec);
        }
        let last = last.unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].rssi, last.rssi);
        assert_eq!(snapshot[0].advertisement_data, last.advertisement_data);
        assert_eq!(snapshot[0].last_seen, last.last_seen);
    }

    #[test]
    fn snapshot_is_strongest_first_with_id_tie_break() {
        let registry = DiscoveryRegistry::new();
        registry.upsert(record(3, -60));
        registry.upsert(record(1, -60));
        registry.upsert(record(2, -40));
        registry.upsert(record(4, -90));

        let order: Vec<_> = registry.snapshot().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![id(2), id(1), id(3), id(4)]);
    }

    #[test]
    fn snapshot_ordering_holds_for_random_input() {
        let registry = DiscoveryRegistry::new();
        let mut rng = rand::rng();
        for n in 0..200 {
            registry.upsert(record(rng.random_range(0..50), rng.random_range(-100..=-30)));
            if n % 7 == 0 {
                registry.upsert(record(n, -55));
            }
        }
        let snapshot = registry.snapshot();
        for pair in snapshot.windows(2) {
            assert!(
                pair[0].rssi > pair[1].rssi
                    || (pair[0].rssi == pair[1].rssi && pair[0].id < pair[1].id)
            );
        }
    }

    #[test]
    fn snapshots_are_not_affected_by_later_updates() {
        let registry = DiscoveryRegistry::new();
        registry.upsert(record(1, -40));
        let before = registry.snapshot();
        registry.upsert(record(1, -70));
        assert_eq!(before[0].rssi, -40);
        assert_eq!(registry.get(&id(1)).unwrap().rssi, -70);
    }

    #[test]
    fn clear_then_reinsert() {
        let registry = DiscoveryRegistry::new();
        registry.upsert(record(1, -40));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.upsert(record(1, -45)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_upserts_keep_one_record_per_device() {
        let registry = Arc::new(DiscoveryRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..100u128 {
                        registry.upsert(record(n % 10, -(thread as i16) - 40));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 10);
    }
}
