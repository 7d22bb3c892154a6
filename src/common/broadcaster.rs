// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::api::{DeviceRecord, EventKinds, ScanEvent};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::stream::Stream;
use log::trace;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

#[derive(Debug)]
struct Subscriber {
    kinds: EventKinds,
    sender: UnboundedSender<ScanEvent>,
}

/// Fans scan events out to any number of subscribers.
///
/// Each subscriber gets its own unbounded queue, so publishing never waits on a reader.
#[derive(Debug, Default)]
pub struct EventBroadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        // A panic while publishing can't leave the list half updated.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, event: ScanEvent) {
        let kind = event.kind();
        let mut subscribers = self.lock();
        let mut delivered = 0;
        // Remove subscribers whose receiving end has been released.
        subscribers.retain(|subscriber| {
            if !subscriber.kinds.intersects(kind) {
                return !subscriber.sender.is_closed();
            }
            let sent = subscriber.sender.unbounded_send(event.clone()).is_ok();
            delivered += usize::from(sent);
            sent
        });
        if delivered == 0 {
            trace!("Lost scan event, while nothing subscribed: {:?}", event);
        }
    }

    pub fn publish_discovery(&self, record: DeviceRecord, new: bool) {
        self.publish(if new {
            ScanEvent::DeviceDiscovered(record)
        } else {
            ScanEvent::DeviceUpdated(record)
        });
    }

    pub fn publish_state_change(&self, event: ScanEvent) {
        debug_assert!(event.kind() == EventKinds::STATE);
        self.publish(event);
    }

    #[cfg(test)]
    pub fn subscribe(&self, kinds: EventKinds) -> Subscription {
        self.subscribe_with(kinds, |_| None)
    }

    /// Registers a subscriber and queues `initial` ahead of anything published afterwards.
    ///
    /// `initial` runs while the subscriber list is locked, so no published event can slip in
    /// between the replayed event and the live ones.
    pub fn subscribe_with<F>(&self, kinds: EventKinds, initial: F) -> Subscription
    where
        F: FnOnce(EventKinds) -> Option<ScanEvent>,
    {
        let (sender, receiver) = mpsc::unbounded();
        let mut subscribers = self.lock();
        if let Some(event) = initial(kinds) {
            // The receiver is alive on this line; sending can't fail.
            let _ = sender.unbounded_send(event);
        }
        subscribers.push(Subscriber { kinds, sender });
        Subscription {
            kinds,
            receiver,
            released: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|subscriber| !subscriber.sender.is_closed())
            .count()
    }
}

/// A handle on a stream of [`ScanEvent`]s.
///
/// The stream never ends on its own; it ends once the handle is released, either by calling
/// [`release`](Subscription::release) or by dropping it. Events queued before the release can
/// still be drained.
#[derive(Debug)]
pub struct Subscription {
    kinds: EventKinds,
    receiver: UnboundedReceiver<ScanEvent>,
    released: bool,
}

impl Subscription {
    pub fn kinds(&self) -> EventKinds {
        self.kinds
    }

    /// Stops delivery to this subscription. Calling it more than once does nothing.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.receiver.close();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Stream for Subscription {
    type Item = ScanEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ScanEvent>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
