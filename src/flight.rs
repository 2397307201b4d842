//! Singleflight coordination: one producer per key across concurrent
//! misses.
//!
//! A miss either claims the key's flight (becoming the leader, holding a
//! [`FlightPermit`]) or attaches to the existing one (receiving a
//! [`FlightWaiter`]). The leader stores its value and completes the
//! permit; waiters are then released and re-read the cache. A failed
//! leader releases its waiters without handing them the error, so the
//! next caller simply elects itself and retries the production.
//!
//! Sync and async callers share one state machine and differ only in how
//! they park: sync waiters block on a condvar, async waiters await a
//! notify. Dropping a waiter detaches it without touching the leader;
//! dropping an unfinished permit releases the waiters as a failure so a
//! panicking producer cannot strand them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::trace;

use crate::error::{CacheError, Result};

/// How a flight ended, from a waiter's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightOutcome {
    /// The leader stored a value; a fresh read will hit.
    Stored,
    /// The leader failed without storing. Waiters do not inherit the
    /// error and are free to retry as leaders themselves.
    LeaderFailed,
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    InFlight,
    Done(FlightOutcome),
}

struct FlightSlot {
    state: Mutex<SlotState>,
    cvar: Condvar,
    notify: Notify,
}

impl FlightSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::InFlight),
            cvar: Condvar::new(),
            notify: Notify::new(),
        }
    }
}

pub(crate) enum FlightRole {
    Leader(FlightPermit),
    Waiter(FlightWaiter),
}

/// Held by the elected leader until it reports how the flight ended.
pub struct FlightPermit {
    key: String,
    slot: Arc<FlightSlot>,
    slots: Arc<DashMap<String, Arc<FlightSlot>>>,
    finished: bool,
}

impl FlightPermit {
    /// Release waiters after the value has been stored.
    pub fn complete(mut self) {
        self.finish(FlightOutcome::Stored);
    }

    /// Release waiters without a value.
    pub fn fail(mut self) {
        self.finish(FlightOutcome::LeaderFailed);
    }

    fn finish(&mut self, outcome: FlightOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        trace!(key = %self.key, ?outcome, "flight finished");
        // Remove the slot first: a caller arriving after this point must
        // elect a fresh leader (or hit the cache), not attach to a flight
        // that already ended.
        self.slots.remove(&self.key);
        *self.slot.state.lock() = SlotState::Done(outcome);
        self.slot.cvar.notify_all();
        self.slot.notify.notify_waiters();
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.finish(FlightOutcome::LeaderFailed);
    }
}

/// Held by callers attached to another caller's flight.
pub struct FlightWaiter {
    slot: Arc<FlightSlot>,
}

impl FlightWaiter {
    /// Block the current thread until the flight ends. Must not be called
    /// from an async context; async callers use [`FlightWaiter::wait`].
    pub fn wait_sync(&self, timeout: Duration) -> Result<FlightOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        loop {
            if let SlotState::Done(outcome) = *state {
                return Ok(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CacheError::LeaderTimeout(timeout));
            }
            self.slot.cvar.wait_for(&mut state, deadline - now);
        }
    }

    /// Await the end of the flight. Cancelling this future detaches the
    /// waiter; the leader is unaffected.
    pub async fn wait(&self, timeout: Duration) -> Result<FlightOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.slot.notify.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking state, so a completion
            // landing in between is not missed.
            notified.as_mut().enable();
            if let SlotState::Done(outcome) = *self.slot.state.lock() {
                return Ok(outcome);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if let SlotState::Done(outcome) = *self.slot.state.lock() {
                    return Ok(outcome);
                }
                return Err(CacheError::LeaderTimeout(timeout));
            }
        }
    }
}

pub(crate) struct FlightTable {
    slots: Arc<DashMap<String, Arc<FlightSlot>>>,
}

impl FlightTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Atomically claim or join the flight for `key`.
    pub(crate) fn begin(&self, key: &str) -> FlightRole {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(occupied) => FlightRole::Waiter(FlightWaiter {
                slot: occupied.get().clone(),
            }),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(FlightSlot::new());
                vacant.insert(slot.clone());
                trace!(key, "flight leader elected");
                FlightRole::Leader(FlightPermit {
                    key: key.to_string(),
                    slot,
                    slots: self.slots.clone(),
                    finished: false,
                })
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.slots.len()
    }
}
