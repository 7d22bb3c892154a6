// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! An in-memory [`Radio`] for tests and demos.
//!
//! `MockRadio` behaves like a well-mannered radio stack: it reports whatever adapter state it
//! was last given, delivers injected advertisements to every event stream, and counts how
//! often scanning was started and stopped. Failures of either call can be injected.

use crate::api::{AdapterState, Advertisement, Radio, RadioEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::Stream;
use log::trace;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<AdapterState>,
    senders: Mutex<Vec<UnboundedSender<RadioEvent>>>,
    scanning: AtomicBool,
    allow_duplicates: AtomicBool,
    begin_calls: AtomicUsize,
    end_calls: AtomicUsize,
    begin_failure: Mutex<Option<String>>,
    end_failure: Mutex<Option<String>>,
    begin_delay: Mutex<Option<Duration>>,
}

/// Cloneable handle on a simulated radio; clones control the same radio.
#[derive(Clone, Debug, Default)]
pub struct MockRadio {
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockRadio {
    pub fn new(state: AdapterState) -> Self {
        let radio = MockRadio::default();
        *lock(&radio.shared.state) = state;
        radio
    }

    pub fn powered_on() -> Self {
        Self::new(AdapterState::PoweredOn)
    }

    fn send(&self, event: RadioEvent) {
        let mut senders = lock(&self.shared.senders);
        // Remove sender from the list if the other end of the channel has been dropped.
        senders.retain(|sender| sender.unbounded_send(event.clone()).is_ok());
    }

    /// Changes the adapter state and notifies every event stream, even if the state is
    /// unchanged, as platforms do when they restore state.
    pub fn set_adapter_state(&self, state: AdapterState) {
        *lock(&self.shared.state) = state;
        if !state.is_powered_on() {
            self.shared.scanning.store(false, Ordering::SeqCst);
        }
        self.send(RadioEvent::AdapterStateChanged(state));
    }

    /// Delivers an advertisement, whether or not the radio is scanning. Real stacks can deliver
    /// a few stragglers after scanning was stopped.
    pub fn advertise(&self, advertisement: Advertisement) {
        trace!("Mock advertisement from {}", advertisement.id);
        self.send(RadioEvent::AdvertisementObserved(advertisement));
    }

    /// Makes the next `begin_scanning` call fail with a collaborator failure.
    pub fn fail_next_begin(&self, message: &str) {
        *lock(&self.shared.begin_failure) = Some(message.to_string());
    }

    /// Makes the next `end_scanning` call fail with a collaborator failure. The radio still
    /// stops scanning, as a stack reporting a late error would.
    pub fn fail_next_end(&self, message: &str) {
        *lock(&self.shared.end_failure) = Some(message.to_string());
    }

    /// Makes `begin_scanning` take `delay` before it confirms.
    pub fn set_begin_delay(&self, delay: Option<Duration>) {
        *lock(&self.shared.begin_delay) = delay;
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    /// The `allow_duplicates` flag passed to the last `begin_scanning` call.
    pub fn allows_duplicates(&self) -> bool {
        self.shared.allow_duplicates.load(Ordering::SeqCst)
    }

    pub fn begin_calls(&self) -> usize {
        self.shared.begin_calls.load(Ordering::SeqCst)
    }

    pub fn end_calls(&self) -> usize {
        self.shared.end_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(*lock(&self.shared.state))
    }

    async fn events(&self) -> Result<Pin<Box<dyn Stream<Item = RadioEvent> + Send>>> {
        let (sender, receiver) = mpsc::unbounded();
        lock(&self.shared.senders).push(sender);
        Ok(Box::pin(receiver))
    }

    async fn begin_scanning(&self, allow_duplicates: bool) -> Result<()> {
        self.shared.begin_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.shared.begin_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = lock(&self.shared.begin_failure).take() {
            return Err(Error::CollaboratorFailure(message));
        }
        self.shared
            .allow_duplicates
            .store(allow_duplicates, Ordering::SeqCst);
        self.shared.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn end_scanning(&self) -> Result<()> {
        self.shared.end_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.scanning.store(false, Ordering::SeqCst);
        match lock(&self.shared.end_failure).take() {
            Some(message) => Err(Error::CollaboratorFailure(message)),
            None => Ok(()),
        }
    }
}
