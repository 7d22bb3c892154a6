// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use super::broadcaster::{EventBroadcaster, Subscription};
use crate::api::{AdapterState, EventKinds, ScanEvent};
use log::debug;
use std::sync::{Arc, RwLock};

/// Remembers the last adapter state reported by the radio and announces transitions.
#[derive(Debug)]
pub struct AdapterStateTracker {
    state: RwLock<AdapterState>,
    events: Arc<EventBroadcaster>,
}

impl AdapterStateTracker {
    pub fn new(events: Arc<EventBroadcaster>) -> Self {
        AdapterStateTracker {
            state: RwLock::new(AdapterState::Unknown),
            events,
        }
    }

    pub fn current(&self) -> AdapterState {
        *self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records an observation from the radio. Returns `true` and publishes an
    /// `AdapterStateChanged` event when it differs from the previous state.
    pub fn record(&self, state: AdapterState) -> bool {
        let previous = {
            let mut current = self
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, state)
        };
        if previous == state {
            return false;
        }
        debug!("Adapter state {:?} -> {:?}", previous, state);
        self.events
            .publish_state_change(ScanEvent::AdapterStateChanged(state));
        true
    }

    /// Subscribes to state events, starting with the current state if it is known.
    ///
    /// The current state is read after the subscriber is registered, so a transition racing
    /// this call may be seen twice but is never missed.
    pub fn subscribe(&self, kinds: EventKinds) -> Subscription {
        self.events.subscribe_with(kinds, |kinds| {
            let current = self.current();
            if kinds.contains(EventKinds::STATE) && current != AdapterState::Unknown {
                Some(ScanEvent::AdapterStateChanged(current))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn starts_unknown() {
        let tracker = AdapterStateTracker::new(Arc::new(EventBroadcaster::new()));
        assert_eq!(tracker.current(), AdapterState::Unknown);
    }

    #[tokio::test]
    async fn publishes_only_transitions() {
        let events = Arc::new(EventBroadcaster::new());
        let tracker = AdapterStateTracker::new(events.clone());
        let mut sub = events.subscribe(EventKinds::STATE);

        assert!(tracker.record(AdapterState::PoweredOn));
        assert!(!tracker.record(AdapterState::PoweredOn));
        assert!(tracker.record(AdapterState::PoweredOff));
        assert_eq!(tracker.current(), AdapterState::PoweredOff);
        sub.release();

        let states: Vec<_> = sub
            .filter_map(|event| async move {
                match event {
                    ScanEvent::AdapterStateChanged(state) => Some(state),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(
            states,
            vec![AdapterState::PoweredOn, AdapterState::PoweredOff]
        );
    }

    #[tokio::test]
    async fn subscription_replays_known_state() {
        let events = Arc::new(EventBroadcaster::new());
        let tracker = AdapterStateTracker::new(events);

        let mut unknown = tracker.subscribe(EventKinds::STATE);
        tracker.record(AdapterState::Resetting);
        let mut known = tracker.subscribe(EventKinds::STATE);
        tracker.record(AdapterState::PoweredOn);

        assert!(matches!(
            unknown.next().await,
            Some(ScanEvent::AdapterStateChanged(AdapterState::Resetting))
        ));
        assert!(matches!(
            known.next().await,
            Some(ScanEvent::AdapterStateChanged(AdapterState::Resetting))
        ));
        assert!(matches!(
            known.next().await,
            Some(ScanEvent::AdapterStateChanged(AdapterState::PoweredOn))
        ));
    }
}
