// blescout Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The scan session state machine.
//!
//! A session moves `Idle -> Starting -> Active -> Stopping -> Idle`. Every transition is made
//! while holding the session lock, and every call into the radio is made while holding the
//! radio lock, so a start racing a stop or a power loss always settles on one outcome.

use crate::api::{
    AdapterState, Advertisement, DeviceId, DeviceRecord, EventKinds, Radio, RadioEvent,
    ScanEvent, StopReason,
};
use crate::common::{
    adapter_state::AdapterStateTracker,
    broadcaster::{EventBroadcaster, Subscription},
    registry::DiscoveryRegistry,
};
use crate::config::ScanConfig;
use crate::{Error, Result};
use futures::channel::oneshot;
use futures::stream::{Stream, StreamExt};
use log::{debug, error, info, trace, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Where the controller's scan session currently is.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ScanPhase {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// A point in time view of the scan session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionInfo {
    pub phase: ScanPhase,
    /// Number of sessions started so far; identifies the current or most recent one.
    pub generation: u64,
    /// When the current bounded session times out, on the tokio clock.
    pub deadline: Option<Instant>,
}

/// What a bounded scan waiting on its session gets told when the session ends.
#[derive(Debug)]
struct SessionEnd {
    reason: StopReason,
    devices: Vec<DeviceRecord>,
}

#[derive(Debug)]
struct Session {
    phase: ScanPhase,
    generation: u64,
    deadline: Option<Instant>,
    timeout: Option<JoinHandle<()>>,
    // Set when a stop arrives for a session that hasn't reached the radio yet.
    abort: Option<StopReason>,
    waiters: Vec<oneshot::Sender<SessionEnd>>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            phase: ScanPhase::Idle,
            generation: 0,
            deadline: None,
            timeout: None,
            abort: None,
            waiters: vec![],
        }
    }
}

#[derive(Debug)]
struct ControllerInner<R: Radio> {
    radio: R,
    config: ScanConfig,
    session: Mutex<Session>,
    // Held across every begin_scanning/end_scanning call.
    radio_calls: tokio::sync::Mutex<()>,
    registry: DiscoveryRegistry,
    events: Arc<EventBroadcaster>,
    adapter: AdapterStateTracker,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Runs scan sessions against a [`Radio`].
///
/// The controller is a cheap handle; clones share the same session, registry and subscribers.
/// It must be created inside a tokio runtime, which it uses for the radio event pump and for
/// session timeouts.
#[derive(Debug)]
pub struct ScanController<R: Radio> {
    inner: Arc<ControllerInner<R>>,
}

impl<R: Radio> Clone for ScanController<R> {
    fn clone(&self) -> Self {
        ScanController {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Radio + 'static> ScanController<R> {
    /// Takes ownership of `radio`, reads its current adapter state and starts listening to its
    /// events.
    pub async fn new(radio: R, config: ScanConfig) -> Result<Self> {
        // Subscribe before reading the state so a transition in between isn't lost.
        let radio_events = radio.events().await?;
        let initial = radio.adapter_state().await?;

        let events = Arc::new(EventBroadcaster::new());
        let inner = Arc::new(ControllerInner {
            radio,
            config,
            session: Mutex::new(Session::default()),
            radio_calls: tokio::sync::Mutex::new(()),
            registry: DiscoveryRegistry::new(),
            adapter: AdapterStateTracker::new(events.clone()),
            events,
            pump: Mutex::new(None),
        });
        inner.adapter.record(initial);
        debug!("Scan controller created, adapter {:?}", initial);

        let pump = tokio::spawn(pump_radio_events(Arc::downgrade(&inner), radio_events));
        *inner.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(pump);

        Ok(ScanController { inner })
    }

    /// Starts a scan session, returning its generation.
    ///
    /// With a `duration` the session stops by itself once it elapses; without one it runs until
    /// [`stop`](Self::stop) is called or the adapter powers off. Fails with
    /// [`Error::SessionAlreadyActive`] if a session is starting or running, and with
    /// [`Error::AdapterUnavailable`] if the adapter isn't powered on.
    pub async fn start(&self, duration: Option<Duration>) -> Result<u64> {
        let inner = self.inner.clone();
        run_detached(async move { inner.start_session(duration).await })
            .await
            .map(|(generation, _)| generation)
    }

    /// Stops the running session. Does nothing if no session is running.
    pub async fn stop(&self) -> Result<()> {
        let inner = self.inner.clone();
        run_detached(async move { inner.finish(StopReason::Requested, None).await })
            .await
            .map(|_| ())
    }

    /// Scans for the configured default duration. See [`scan_for`](Self::scan_for).
    pub async fn scan(&self) -> Result<Vec<DeviceRecord>> {
        self.scan_for(self.inner.config.default_duration).await
    }

    /// Scans for `duration` and returns every device seen, strongest signal first.
    ///
    /// Returns [`Error::ScanCancelled`] if the session is stopped before the duration elapses
    /// and [`Error::AdapterUnavailable`] if the adapter powers off during the scan.
    pub async fn scan_for(&self, duration: Duration) -> Result<Vec<DeviceRecord>> {
        self.scan_for_with_cancel(duration, &CancellationToken::new())
            .await
    }

    /// Like [`scan_for`](Self::scan_for), but gives up as soon as `cancel` is triggered. The
    /// radio has stopped scanning by the time this returns.
    ///
    /// Dropping the returned future doesn't stop the session; it runs on until its deadline.
    pub async fn scan_for_with_cancel(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<DeviceRecord>> {
        let inner = self.inner.clone();
        let (generation, finished) =
            run_detached(async move { inner.start_session(Some(duration)).await }).await?;

        tokio::select! {
            biased;
            end = finished => match end {
                Ok(SessionEnd { reason: StopReason::Timeout, devices }) => Ok(devices),
                Ok(SessionEnd { reason: StopReason::AdapterLost(state), .. }) => {
                    Err(Error::AdapterUnavailable { reason: state })
                }
                Ok(_) | Err(oneshot::Canceled) => Err(Error::ScanCancelled),
            },
            _ = cancel.cancelled() => {
                debug!("Bounded scan {} cancelled by caller", generation);
                let inner = self.inner.clone();
                run_detached(async move {
                    inner.finish(StopReason::Cancelled, Some(generation)).await
                })
                .await?;
                Err(Error::ScanCancelled)
            }
        }
    }

    /// Forgets every device seen so far. Devices seen afterwards are reported as new.
    pub fn clear(&self) {
        self.inner.registry.clear();
    }

    /// Every device seen in the current or last session, strongest signal first.
    pub fn current_devices(&self) -> Vec<DeviceRecord> {
        self.inner.registry.snapshot()
    }

    pub fn device(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.inner.registry.get(id)
    }

    /// Stream of `DeviceDiscovered`/`DeviceUpdated` events.
    pub fn subscribe_discoveries(&self) -> Subscription {
        self.subscribe(EventKinds::DISCOVERY)
    }

    /// Stream of adapter state changes and session start/stop events. Begins with the current
    /// adapter state when it is known.
    pub fn subscribe_adapter_state(&self) -> Subscription {
        self.subscribe(EventKinds::STATE)
    }

    pub fn subscribe(&self, kinds: EventKinds) -> Subscription {
        self.inner.adapter.subscribe(kinds)
    }

    /// Number of subscriptions that haven't been released yet.
    pub fn subscriber_count(&self) -> usize {
        self.inner.events.subscriber_count()
    }

    pub fn current_adapter_state(&self) -> AdapterState {
        self.inner.adapter.current()
    }

    pub fn session(&self) -> SessionInfo {
        let session = self.inner.lock_session();
        SessionInfo {
            phase: session.phase,
            generation: session.generation,
            deadline: session.deadline,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.lock_session().phase == ScanPhase::Active
    }

    pub fn config(&self) -> &ScanConfig {
        &self.inner.config
    }
}

/// Runs `future` on its own task so it completes even if the caller stops polling. A session
/// must never be left half way through a transition.
async fn run_detached<F, T>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(future)
        .await
        .map_err(|e| Error::CollaboratorFailure(format!("scan task failed: {}", e)))?
}

fn abort_error(reason: StopReason) -> Error {
    match reason {
        StopReason::AdapterLost(state) => Error::AdapterUnavailable { reason: state },
        _ => Error::ScanCancelled,
    }
}

async fn pump_radio_events<R: Radio + 'static>(
    controller: Weak<ControllerInner<R>>,
    mut events: Pin<Box<dyn Stream<Item = RadioEvent> + Send>>,
) {
    while let Some(event) = events.next().await {
        let Some(inner) = controller.upgrade() else {
            return;
        };
        match event {
            RadioEvent::AdapterStateChanged(state) => inner.on_adapter_state(state).await,
            RadioEvent::AdvertisementObserved(advertisement) => {
                inner.on_advertisement(advertisement)
            }
        }
    }
    error!("Radio event stream ended; adapter state and advertisements will no longer update");
}

impl<R: Radio + 'static> ControllerInner<R> {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn start_session(
        self: Arc<Self>,
        duration: Option<Duration>,
    ) -> Result<(u64, oneshot::Receiver<SessionEnd>)> {
        {
            let mut session = self.lock_session();
            if session.phase != ScanPhase::Idle {
                debug!("Rejecting start, session is {:?}", session.phase);
                return Err(Error::SessionAlreadyActive);
            }
            let state = self.adapter.current();
            if !state.is_powered_on() {
                return Err(Error::AdapterUnavailable { reason: state });
            }
            session.phase = ScanPhase::Starting;
            session.abort = None;
        }

        let _calls = self.radio_calls.lock().await;
        if let Some(reason) = self.take_abort() {
            debug!("Start aborted before reaching the radio: {:?}", reason);
            return Err(abort_error(reason));
        }

        // Live signal strength needs every advertisement, not just the first per device.
        if let Err(err) = self.radio.begin_scanning(true).await {
            warn!("Radio failed to start scanning: {}", err);
            self.lock_session().phase = ScanPhase::Idle;
            return Err(err);
        }

        if self.lock_session().abort.is_some() {
            debug!("Start aborted while the radio was starting, stopping it again");
            let stopped = self.radio.end_scanning().await;
            let reason = self.take_abort().unwrap_or(StopReason::Requested);
            stopped?;
            return Err(abort_error(reason));
        }

        let deadline = duration.and_then(|duration| Instant::now().checked_add(duration));
        if duration.is_some() && deadline.is_none() {
            debug!("Scan duration {:?} is past the end of time, running unbounded", duration);
        }
        let (sender, receiver) = oneshot::channel();
        let mut session = self.lock_session();
        session.generation += 1;
        let generation = session.generation;
        session.phase = ScanPhase::Active;
        session.deadline = deadline;
        session.waiters.push(sender);
        session.timeout = deadline.map(|deadline| self.arm_timeout(generation, deadline));
        self.registry.clear();
        self.events
            .publish_state_change(ScanEvent::ScanStarted { generation });
        match duration {
            Some(duration) => info!("Scan session {} started for {:?}", generation, duration),
            None => info!("Scan session {} started", generation),
        }
        Ok((generation, receiver))
    }

    /// Consumes a pending abort of a starting session, returning the session to idle.
    fn take_abort(&self) -> Option<StopReason> {
        let mut session = self.lock_session();
        let reason = session.abort.take()?;
        session.phase = ScanPhase::Idle;
        Some(reason)
    }

    fn arm_timeout(self: &Arc<Self>, generation: u64, deadline: Instant) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = controller.upgrade() {
                if let Err(err) = inner.finish(StopReason::Timeout, Some(generation)).await {
                    warn!("Scan session {} timed out but did not stop cleanly: {}", generation, err);
                }
            }
        })
    }

    /// Ends the active session for `reason`. With `expected` set, only ends it if it is still
    /// that generation. Returns whether a session was ended.
    async fn finish(&self, reason: StopReason, expected: Option<u64>) -> Result<bool> {
        // A start in flight holds the radio lock; flag it so it unwinds instead of going active.
        {
            let mut session = self.lock_session();
            if session.phase == ScanPhase::Starting && expected.is_none() {
                session.abort = Some(reason);
            }
        }
        let _calls = self.radio_calls.lock().await;
        let generation = {
            let mut session = self.lock_session();
            match session.phase {
                ScanPhase::Active => {}
                ScanPhase::Starting if expected.is_none() => {
                    debug!("Stop requested while starting: {:?}", reason);
                    session.abort = Some(reason);
                    return Ok(false);
                }
                _ => return Ok(false),
            }
            if let Some(expected) = expected {
                if expected != session.generation {
                    debug!(
                        "Ignoring {:?} for session {}, current session is {}",
                        reason, expected, session.generation
                    );
                    return Ok(false);
                }
            }
            session.phase = ScanPhase::Stopping;
            session.deadline = None;
            if let Some(timeout) = session.timeout.take() {
                // The timeout task runs this very function; aborting it would cut it short.
                if reason != StopReason::Timeout {
                    timeout.abort();
                }
            }
            session.generation
        };

        info!("Stopping scan session {} ({:?})", generation, reason);
        let result = self.radio.end_scanning().await;
        if let Err(ref err) = result {
            warn!("Radio failed to stop scanning: {}", err);
        }

        let (waiters, devices) = {
            let mut session = self.lock_session();
            session.phase = ScanPhase::Idle;
            self.events
                .publish_state_change(ScanEvent::ScanStopped { generation, reason });
            let waiters = std::mem::take(&mut session.waiters);
            let devices = if waiters.is_empty() {
                vec![]
            } else {
                self.registry.snapshot()
            };
            (waiters, devices)
        };
        for waiter in waiters {
            let _ = waiter.send(SessionEnd {
                reason,
                devices: devices.clone(),
            });
        }
        result.map(|()| true)
    }

    async fn on_adapter_state(&self, state: AdapterState) {
        self.adapter.record(state);
        if !state.is_powered_on() {
            if let Err(err) = self.finish(StopReason::AdapterLost(state), None).await {
                warn!("Scan stopped after adapter loss with an error: {}", err);
            }
        }
    }

    fn on_advertisement(&self, advertisement: Advertisement) {
        // Held while updating so no sighting lands after the session's stop event.
        let session = self.lock_session();
        if session.phase != ScanPhase::Active {
            trace!(
                "Ignoring advertisement from {} outside of a scan session",
                advertisement.id
            );
            return;
        }
        let record = DeviceRecord::from_advertisement(advertisement);
        trace!(
            "Advertisement from {} ({}) at {} dBm",
            record.id,
            record.display_name(),
            record.rssi
        );
        let new = self.registry.upsert(record.clone());
        self.events.publish_discovery(record, new);
        drop(session);
    }
}

impl<R: Radio> Drop for ControllerInner<R> {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(|e| e.into_inner());
        if session.phase != ScanPhase::Idle {
            warn!(
                "Scan controller dropped while session {} is {:?}; the radio may still be scanning",
                session.generation, session.phase
            );
        }
        if let Some(timeout) = session.timeout.take() {
            timeout.abort();
        }
        if let Some(pump) = self
            .pump
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pump.abort();
        }
    }
}
