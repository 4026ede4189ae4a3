//! The message pump: cooperative, single-threaded scheduling of mailboxes.
//!
//! One logical pump services every actor in the system. Handlers are never
//! awaited inline; each dispatch is detached onto its own task so an actor
//! can `ask` and await inside a handler while the pump keeps servicing other
//! mailboxes. Per-actor sequential execution is enforced by the in-flight
//! set: a mailbox cannot re-enter the ready queue while its previous handler
//! is still running.

use crate::dead_letter::DeadLetter;
use crate::error::HandlerError;
use crate::mailbox::Mailbox;
use crate::system::SystemShared;
use futures::FutureExt;
use hypha_protocol::ActorPath;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::Notify;

#[derive(Default)]
struct PumpState {
    /// Ready mailboxes in FIFO order.
    ready: VecDeque<Arc<Mailbox>>,
    /// Membership mirror of `ready`.
    queued: HashSet<ActorPath>,
    /// Actors whose handler has started but not yet resolved.
    in_flight: HashSet<ActorPath>,
}

pub(crate) struct Dispatcher {
    state: Mutex<PumpState>,
    wake: Notify,
    shutdown: AtomicBool,
}

impl Dispatcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PumpState::default()),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Enqueue a mailbox for service, unless it is already queued or its
    /// owner is in flight.
    pub(crate) fn schedule(&self, mailbox: &Arc<Mailbox>) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let path = mailbox.path();
            if state.queued.contains(path) || state.in_flight.contains(path) {
                return;
            }
            state.queued.insert(path.clone());
            state.ready.push_back(Arc::clone(mailbox));
        }
        self.wake.notify_one();
    }

    /// Release the wake signal and let the pump exit.
    pub(crate) fn initiate_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn ready_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ready
            .len()
    }

    /// The pump loop. Runs until shutdown, parking on the wake signal when no
    /// mailbox is ready.
    pub(crate) async fn run(self: Arc<Self>, shared: Weak<SystemShared>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let next = self.take_next();
            let Some(mailbox) = next else {
                self.wake.notified().await;
                continue;
            };
            let Some(shared) = shared.upgrade() else {
                break;
            };
            Self::dispatch_one(&self, shared, mailbox);
        }
        tracing::debug!("message pump stopped");
    }

    /// Pop the front ready mailbox and mark its owner in flight, atomically
    /// with respect to `schedule`. Disposed mailboxes are dropped here.
    fn take_next(&self) -> Option<Arc<Mailbox>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let mailbox = state.ready.pop_front()?;
            state.queued.remove(mailbox.path());
            if mailbox.is_disposed() {
                continue;
            }
            state.in_flight.insert(mailbox.path().clone());
            return Some(mailbox);
        }
    }

    fn clear_in_flight(&self, path: &ActorPath) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .remove(path);
    }

    /// Dequeue one envelope and detach its handler. The continuation records
    /// timing, clears the per-invocation sender, releases the in-flight mark,
    /// routes failures to supervision and reschedules the mailbox if it still
    /// has work.
    fn dispatch_one(this: &Arc<Self>, shared: Arc<SystemShared>, mailbox: Arc<Mailbox>) {
        let path = mailbox.path().clone();
        let Some(envelope) = mailbox.dequeue() else {
            this.clear_in_flight(&path);
            return;
        };
        let Some(target) = shared.dispatch_target(&path) else {
            // Stopped between scheduling and dispatch.
            this.clear_in_flight(&path);
            let sender = envelope.sender().cloned();
            shared.dead_letters.publish(DeadLetter {
                envelope,
                sender,
                recipient: Some(path),
            });
            return;
        };

        let started = Instant::now();
        target.context.install_current(envelope.clone());
        shared.ports.trace(
            envelope.correlation_id(),
            "processed",
            &path,
            envelope.payload_type(),
        );

        let payload = envelope.payload().clone();
        let dispatcher = Arc::clone(this);
        tokio::spawn(async move {
            let outcome = {
                let mut behavior = target.behavior.lock().await;
                AssertUnwindSafe(behavior.receive(payload, &target.context))
                    .catch_unwind()
                    .await
            };
            let failure: Option<HandlerError> = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(panic) => Some(panic_message(panic).into()),
            };

            shared
                .ports
                .metrics
                .timing("messages.processing_time", started.elapsed(), &[]);
            shared.ports.metrics.increment("messages.processed", 1, &[]);
            target.context.clear_current();
            dispatcher.clear_in_flight(&path);

            if let Some(reason) = failure {
                shared.handle_failure(&path, reason).await;
            }
            if !mailbox.is_disposed() && !mailbox.is_empty() {
                dispatcher.schedule(&mailbox);
            }
        });
    }
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "handler panicked".to_string()
    }
}
