//! Type-routed event bus.
//!
//! Two inverse indexes — event type to subscribers, and subscriber to event
//! types — kept consistent under one lock. Publishing snapshots the
//! subscribers for the exact event type (no supertype traversal) and tells
//! each a fresh envelope sharing one allocation of the event. The system
//! calls [`EventBus::cleanup`] while stopping any actor, before its mailbox
//! is disposed, so in-flight publishes cannot target a stopped actor through
//! these indexes.

use crate::actor::ActorRef;
use crate::Envelope;
use hypha_protocol::message::erase;
use hypha_protocol::{ActorPath, Message};
use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const MONITOR_EVENT_CAPACITY: usize = 1024;

/// Diagnostic event emitted by bus operations.
///
/// These are kept in a bounded in-memory log for inspection; no subscriber is
/// required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Subscribed {
        event_type: &'static str,
        actor: ActorPath,
    },
    Unsubscribed {
        event_type: &'static str,
        actor: ActorPath,
    },
    Published {
        event_type: &'static str,
        delivered: usize,
    },
    Cleanup {
        actor: ActorPath,
    },
}

#[derive(Default)]
struct Indexes {
    subscribers: HashMap<TypeId, HashMap<ActorPath, ActorRef>>,
    subscriptions: HashMap<ActorPath, HashSet<TypeId>>,
}

pub struct EventBus {
    indexes: Mutex<Indexes>,
    monitor: Mutex<VecDeque<MonitorEvent>>,
    disposed: AtomicBool,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            indexes: Mutex::new(Indexes::default()),
            monitor: Mutex::new(VecDeque::new()),
            disposed: AtomicBool::new(false),
        }
    }

    fn lock_indexes(&self) -> MutexGuard<'_, Indexes> {
        self.indexes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: MonitorEvent) {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.len() == MONITOR_EVENT_CAPACITY {
            monitor.pop_front();
        }
        monitor.push_back(event);
    }

    /// Subscribe `actor` to events of type `E`. Idempotent: re-subscribing
    /// changes nothing and emits no monitor event.
    pub fn subscribe<E: Message>(&self, actor: &ActorRef) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let type_id = TypeId::of::<E>();
        let inserted = {
            let mut indexes = self.lock_indexes();
            let inserted = indexes
                .subscribers
                .entry(type_id)
                .or_default()
                .insert(actor.path().clone(), actor.clone())
                .is_none();
            indexes
                .subscriptions
                .entry(actor.path().clone())
                .or_default()
                .insert(type_id);
            inserted
        };
        if inserted {
            self.record(MonitorEvent::Subscribed {
                event_type: std::any::type_name::<E>(),
                actor: actor.path().clone(),
            });
        }
    }

    /// Remove `actor`'s subscription for `E`; emits a monitor event only when
    /// something was removed. Empty buckets collapse.
    pub fn unsubscribe<E: Message>(&self, actor: &ActorRef) {
        let type_id = TypeId::of::<E>();
        let removed = {
            let mut indexes = self.lock_indexes();
            let removed = match indexes.subscribers.get_mut(&type_id) {
                Some(bucket) => {
                    let removed = bucket.remove(actor.path()).is_some();
                    if bucket.is_empty() {
                        indexes.subscribers.remove(&type_id);
                    }
                    removed
                }
                None => false,
            };
            if let Some(types) = indexes.subscriptions.get_mut(actor.path()) {
                types.remove(&type_id);
                if types.is_empty() {
                    indexes.subscriptions.remove(actor.path());
                }
            }
            removed
        };
        if removed {
            self.record(MonitorEvent::Unsubscribed {
                event_type: std::any::type_name::<E>(),
                actor: actor.path().clone(),
            });
        }
    }

    /// Deliver `event` to every subscriber of exactly `E`. Returns the number
    /// of deliveries.
    pub fn publish<E: Message>(&self, event: E) -> usize {
        if self.disposed.load(Ordering::Acquire) {
            return 0;
        }
        let targets: Vec<ActorRef> = {
            let indexes = self.lock_indexes();
            indexes
                .subscribers
                .get(&TypeId::of::<E>())
                .map(|bucket| bucket.values().cloned().collect())
                .unwrap_or_default()
        };
        let (payload, payload_type) = erase(event);
        for target in &targets {
            target.tell_envelope(Envelope::from_shared(payload.clone(), payload_type));
        }
        self.record(MonitorEvent::Published {
            event_type: payload_type,
            delivered: targets.len(),
        });
        targets.len()
    }

    /// Drop `actor` from every index. Called by the system as part of
    /// stopping any actor.
    pub fn cleanup(&self, actor: &ActorPath) {
        let had_subscriptions = {
            let mut indexes = self.lock_indexes();
            let types = indexes.subscriptions.remove(actor);
            if let Some(types) = &types {
                for type_id in types {
                    if let Some(bucket) = indexes.subscribers.get_mut(type_id) {
                        bucket.remove(actor);
                        if bucket.is_empty() {
                            indexes.subscribers.remove(type_id);
                        }
                    }
                }
            }
            types.is_some()
        };
        if had_subscriptions {
            self.record(MonitorEvent::Cleanup {
                actor: actor.clone(),
            });
        }
    }

    /// Number of distinct subscribing actors.
    pub fn subscriber_count(&self) -> usize {
        self.lock_indexes().subscriptions.len()
    }

    /// Number of (actor, event type) subscription pairs.
    pub fn subscription_count(&self) -> usize {
        self.lock_indexes()
            .subscriptions
            .values()
            .map(HashSet::len)
            .sum()
    }

    /// Whether `actor` is subscribed to `E`.
    pub fn is_subscribed<E: Message>(&self, actor: &ActorPath) -> bool {
        self.lock_indexes()
            .subscriptions
            .get(actor)
            .map(|types| types.contains(&TypeId::of::<E>()))
            .unwrap_or(false)
    }

    /// Snapshot of the monitoring event log, oldest first.
    pub fn monitor_events(&self) -> Vec<MonitorEvent> {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let mut indexes = self.lock_indexes();
        indexes.subscribers.clear();
        indexes.subscriptions.clear();
    }
}
