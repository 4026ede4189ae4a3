//! Per-actor keyed timers.
//!
//! One scheduler per actor, owned by its context and disposed with it. Each
//! key maps to at most one underlying timer; starting a key that is already
//! active cancels the prior entry first. Cancellation is watertight: fire
//! callbacks re-validate their entry generation under the same lock that
//! `cancel`/`dispose` take, so no message from a cancelled timer ever reaches
//! the actor.

use crate::actor::ActorRef;
use crate::Envelope;
use hypha_protocol::message::erase;
use hypha_protocol::{Message, Payload};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TimerMode {
    /// Deliver once, then drop the entry.
    Single,
    /// Re-arm after each delivery; the gap between deliveries is at least
    /// the configured delay.
    FixedDelay,
    /// Periodic tick at the target rate; late fires catch up.
    FixedRate,
}

struct TimerEntry {
    generation: u64,
    repeating: bool,
    fixed_rate: bool,
    handle: JoinHandle<()>,
}

struct TimerInner {
    owner: ActorRef,
    entries: Mutex<HashMap<String, TimerEntry>>,
    disposed: AtomicBool,
    generation: AtomicU64,
}

/// Keyed timer scheduler bound to one actor.
pub struct TimerScheduler {
    inner: Arc<TimerInner>,
}

impl TimerScheduler {
    pub(crate) fn new(owner: ActorRef) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                owner,
                entries: Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Deliver `message` to the owning actor once, after `delay`.
    pub fn start_single<M: Message>(&self, key: impl Into<String>, message: M, delay: Duration) {
        self.start(key.into(), message, delay, TimerMode::Single);
    }

    /// Deliver `message` repeatedly with at least `delay` between deliveries,
    /// independent of handler runtime.
    pub fn start_fixed_delay<M: Message>(
        &self,
        key: impl Into<String>,
        message: M,
        delay: Duration,
    ) {
        self.start(key.into(), message, delay, TimerMode::FixedDelay);
    }

    /// Deliver `message` at a target rate of one per `interval`. Fires may
    /// coalesce or catch up when deliveries fall behind.
    pub fn start_fixed_rate<M: Message>(
        &self,
        key: impl Into<String>,
        message: M,
        interval: Duration,
    ) {
        self.start(key.into(), message, interval, TimerMode::FixedRate);
    }

    fn start<M: Message>(&self, key: String, message: M, period: Duration, mode: TimerMode) {
        if self.inner.disposed.load(Ordering::Acquire) {
            return;
        }
        let (payload, payload_type) = erase(message);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            match mode {
                TimerMode::Single => {
                    tokio::time::sleep(period).await;
                    inner.fire(&task_key, generation, &payload, payload_type, true);
                }
                TimerMode::FixedDelay => loop {
                    tokio::time::sleep(period).await;
                    if !inner.fire(&task_key, generation, &payload, payload_type, false) {
                        break;
                    }
                },
                TimerMode::FixedRate => {
                    let mut ticker = tokio::time::interval(period);
                    // The first tick of an interval resolves immediately.
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        if !inner.fire(&task_key, generation, &payload, payload_type, false) {
                            break;
                        }
                    }
                }
            }
        });

        let mut entries = self.inner.lock_entries();
        if self.inner.disposed.load(Ordering::Acquire) {
            handle.abort();
            return;
        }
        let entry = TimerEntry {
            generation,
            repeating: mode != TimerMode::Single,
            fixed_rate: mode == TimerMode::FixedRate,
            handle,
        };
        if let Some(prior) = entries.insert(key, entry) {
            prior.handle.abort();
        }
    }

    /// Cancel the timer for `key`; no further deliveries for it.
    pub fn cancel(&self, key: &str) {
        if let Some(entry) = self.inner.lock_entries().remove(key) {
            entry.handle.abort();
        }
    }

    /// Cancel every timer.
    pub fn cancel_all(&self) {
        let mut entries = self.inner.lock_entries();
        for (_, entry) in entries.drain() {
            entry.handle.abort();
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        !self.inner.disposed.load(Ordering::Acquire)
            && self.inner.lock_entries().contains_key(key)
    }

    /// Whether the timer for `key` repeats at a fixed rate (as opposed to a
    /// fixed delay between deliveries).
    pub fn is_fixed_rate(&self, key: &str) -> bool {
        self.inner
            .lock_entries()
            .get(key)
            .map(|entry| entry.repeating && entry.fixed_rate)
            .unwrap_or(false)
    }

    /// Keys of the currently active timers.
    pub fn active_timers(&self) -> Vec<String> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Vec::new();
        }
        self.inner.lock_entries().keys().cloned().collect()
    }

    /// Cancel everything and refuse further starts. Called by the system
    /// while stopping or restarting the owning actor.
    pub(crate) fn dispose(&self) {
        let mut entries = self.inner.lock_entries();
        self.inner.disposed.store(true, Ordering::Release);
        for (_, entry) in entries.drain() {
            entry.handle.abort();
        }
    }
}

impl TimerInner {
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, TimerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver one timer message if the entry is still current. Delivery
    /// happens under the entries lock so a concurrent cancel or dispose can
    /// never be followed by a late delivery. Returns whether the timer chain
    /// should keep running.
    fn fire(
        &self,
        key: &str,
        generation: u64,
        payload: &Payload,
        payload_type: &'static str,
        one_shot: bool,
    ) -> bool {
        let mut entries = self.lock_entries();
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        match entries.get(key) {
            Some(entry) if entry.generation == generation => {}
            _ => return false,
        }
        if one_shot {
            entries.remove(key);
        }
        self.owner
            .tell_envelope(Envelope::from_shared(Arc::clone(payload), payload_type));
        !one_shot
    }
}

impl std::fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("owner", self.inner.owner.path())
            .field("active", &self.active_timers().len())
            .finish()
    }
}
