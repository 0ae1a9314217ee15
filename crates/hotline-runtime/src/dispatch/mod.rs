//! Swap dispatcher
//!
//! Routes inbound events to the active listener set while a reload builds
//! the next one on the side. Two independently swappable slots:
//!
//! - the *delivery* slot, read once per dispatched event
//! - the *registration* slot, read once per registration
//!
//! ```text
//!            queue_staging()               promote_staging()
//! NoStaging ─────────────────▶ StagingQueued ─────────────────▶ NoStaging
//!     ▲                              │        (staging becomes active,
//!     └──────────────────────────────┘         old active detached)
//!            unqueue_staging()
//!            (staging detached)
//! ```
//!
//! Both slots are [`ArcSwap`]s, so readers never take a lock and never see
//! a half-updated slot. Transitions are serialized by a mutex that only the
//! staging protocol touches.

mod error;
mod set;


pub use error::DispatchError;

use arc_swap::ArcSwap;
use futures::FutureExt;
use hotline_kernel::{EventEnvelope, EventListener, ListenerId, ListenerRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use set::ListenerSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Observable dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    NoStaging,
    StagingQueued,
}

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeliveryReport {
    pub sequence: u64,
    /// Generation of the listener set the event was delivered to.
    pub generation: u64,
    pub delivered: usize,
    pub failed: usize,
    pub panicked: usize,
}

/// Result of a successful promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Promotion {
    /// Generation that is now active.
    pub generation: u64,
    /// Generation that was retired.
    pub retired_generation: u64,
    /// Listeners detached from the retired set.
    pub detached: usize,
}

/// Cumulative delivery counters.
#[derive(Debug, Default)]
struct DeliveryCounters {
    events: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of [`DeliveryCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeliveryStats {
    pub events: u64,
    pub delivered: u64,
    pub failed: u64,
    pub panicked: u64,
}

/// Event router with an atomically promotable staging listener set.
pub struct SwapDispatcher {
    delivering: ArcSwap<ListenerSet>,
    registering: ArcSwap<ListenerSet>,
    /// `Some` iff a staging cycle is queued. Held only by protocol calls.
    staging: Mutex<Option<Arc<ListenerSet>>>,
    next_generation: AtomicU64,
    counters: DeliveryCounters,
}

impl SwapDispatcher {
    pub fn new() -> Self {
        let initial = Arc::new(ListenerSet::new(0));
        Self {
            delivering: ArcSwap::new(initial.clone()),
            registering: ArcSwap::new(initial),
            staging: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            counters: DeliveryCounters::default(),
        }
    }

    pub fn state(&self) -> DispatcherState {
        if self.staging.lock().is_some() {
            DispatcherState::StagingQueued
        } else {
            DispatcherState::NoStaging
        }
    }

    pub fn active_generation(&self) -> u64 {
        self.delivering.load().generation()
    }

    /// Ids in the active set, in registration order.
    pub fn active_listeners(&self) -> Vec<ListenerId> {
        self.delivering.load().ids()
    }

    /// Ids in the staging set, `None` when nothing is queued.
    pub fn staging_listeners(&self) -> Option<Vec<ListenerId>> {
        self.staging.lock().as_ref().map(|set| set.ids())
    }

    pub fn active_len(&self) -> usize {
        self.delivering.load().len()
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            events: self.counters.events.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Add a listener to the current registration target: the active set,
    /// or the staging set while a cycle is queued.
    pub fn register(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId::next();
        let mut listener = listener;
        loop {
            let target = self.registering.load_full();
            match target.insert(id, listener) {
                Ok(()) => {
                    debug!(
                        listener = %id,
                        generation = target.generation(),
                        "Listener registered"
                    );
                    return id;
                }
                // The target was retired between the load and the insert.
                // Retirement always swaps the slot first, so the next load
                // sees the replacement.
                Err(back) => listener = back,
            }
        }
    }

    /// Remove a listener from the active or staging set and detach it.
    pub fn unregister(&self, id: ListenerId) -> bool {
        // Transitions swap the delivery slot under the staging lock, so both
        // sets are checked against one consistent state.
        let removed = {
            let staging = self.staging.lock();
            self.delivering
                .load()
                .remove(id)
                .or_else(|| staging.as_ref().and_then(|set| set.remove(id)))
        };
        match removed {
            Some(listener) => {
                listener.on_detach();
                debug!(listener = %id, "Listener unregistered");
                true
            }
            None => false,
        }
    }

    /// Open a staging cycle: future registrations go to a new, empty set;
    /// deliveries keep using the active set. Returns the staging generation.
    pub fn queue_staging(&self) -> Result<u64, DispatchError> {
        let mut staging = self.staging.lock();
        if staging.is_some() {
            return Err(DispatchError::AlreadyQueued);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let set = Arc::new(ListenerSet::new(generation));
        self.registering.store(set.clone());
        *staging = Some(set);

        info!(generation, "Staging listener set queued");
        Ok(generation)
    }

    /// Make the staging set active for deliveries and registrations, then
    /// detach every listener of the previous active set.
    pub fn promote_staging(&self) -> Result<Promotion, DispatchError> {
        let retired = {
            let mut staging = self.staging.lock();
            let next = staging.take().ok_or(DispatchError::NotQueued)?;
            // Registrations already target `next`; deliveries switch here.
            let previous = self.delivering.swap(next.clone());
            self.registering.store(next);
            previous
        };

        let generation = self.active_generation();
        let detached = Self::detach_all(&retired);
        info!(
            generation,
            retired_generation = retired.generation(),
            detached,
            "Staging listener set promoted"
        );
        Ok(Promotion {
            generation,
            retired_generation: retired.generation(),
            detached,
        })
    }

    /// Abandon the staging cycle: detach everything registered into the
    /// staging set and point registrations back at the active set. The
    /// active set is not touched. Returns the number of detached listeners.
    pub fn unqueue_staging(&self) -> Result<usize, DispatchError> {
        let discarded = {
            let mut staging = self.staging.lock();
            let discarded = staging.take().ok_or(DispatchError::NotQueued)?;
            self.registering.store(self.delivering.load_full());
            discarded
        };

        let detached = Self::detach_all(&discarded);
        info!(
            generation = discarded.generation(),
            detached,
            "Staging listener set discarded"
        );
        Ok(detached)
    }

    /// Detach every listener in every set and start over with an empty
    /// active set. Used at host shutdown and after a failed first boot.
    pub fn detach_everything(&self) -> usize {
        let (staged, active) = {
            let mut staging = self.staging.lock();
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let fresh = Arc::new(ListenerSet::new(generation));
            let active = self.delivering.swap(fresh.clone());
            self.registering.store(fresh);
            (staging.take(), active)
        };

        let mut detached = staged.map(|set| Self::detach_all(&set)).unwrap_or(0);
        detached += Self::detach_all(&active);
        detached
    }

    fn detach_all(set: &ListenerSet) -> usize {
        let drained = set.retire();
        let count = drained.len();
        for (id, listener) in drained {
            listener.on_detach();
            debug!(listener = %id, name = listener.name(), "Listener detached");
        }
        count
    }

    /// Deliver an event to every listener of the set that is active now.
    ///
    /// Listener errors and panics are contained here: they are logged and
    /// counted, never retried, never propagated.
    pub async fn dispatch(&self, envelope: Arc<EventEnvelope>) -> DeliveryReport {
        let (generation, listeners) = {
            let set = self.delivering.load();
            (set.generation(), set.snapshot())
        };

        let deliveries = listeners.into_iter().map(|(id, listener)| {
            let envelope = envelope.clone();
            async move {
                let outcome = AssertUnwindSafe(listener.on_event(&envelope))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => Delivery::Ok,
                    Ok(Err(e)) => {
                        warn!(
                            listener = %id,
                            name = listener.name(),
                            sequence = envelope.sequence,
                            error = %e,
                            "Listener failed to handle event"
                        );
                        Delivery::Failed
                    }
                    Err(_) => {
                        error!(
                            listener = %id,
                            name = listener.name(),
                            sequence = envelope.sequence,
                            "Listener panicked while handling event"
                        );
                        Delivery::Panicked
                    }
                }
            }
        });

        let mut report = DeliveryReport {
            sequence: envelope.sequence,
            generation,
            ..DeliveryReport::default()
        };
        for outcome in futures::future::join_all(deliveries).await {
            match outcome {
                Delivery::Ok => report.delivered += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Panicked => report.panicked += 1,
            }
        }

        self.counters.events.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.counters
            .panicked
            .fetch_add(report.panicked as u64, Ordering::Relaxed);
        report
    }
}

enum Delivery {
    Ok,
    Failed,
    Panicked,
}

impl Default for SwapDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SwapDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapDispatcher")
            .field("state", &self.state())
            .field("active_generation", &self.active_generation())
            .field("active_len", &self.active_len())
            .finish()
    }
}

impl ListenerRegistry for SwapDispatcher {
    fn register(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        SwapDispatcher::register(self, listener)
    }

    fn unregister(&self, id: ListenerId) -> bool {
        SwapDispatcher::unregister(self, id)
    }
}
