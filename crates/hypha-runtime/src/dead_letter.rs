//! Bounded dead-letter queue for undeliverable envelopes.

use crate::actor::ActorRef;
use crate::ports::Ports;
use crate::Envelope;
use hypha_protocol::ActorPath;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// An undeliverable envelope together with where it came from and where it
/// was headed.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub sender: Option<ActorRef>,
    pub recipient: Option<ActorPath>,
}

/// Bounded FIFO of dead letters.
///
/// Overflow evicts the oldest entry and bumps `dead_letters.evicted`; every
/// accepted entry bumps `dead_letters`. Disposed at system shutdown, after
/// which publishes are dropped.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    ports: Ports,
    disposed: AtomicBool,
}

impl DeadLetterQueue {
    pub(crate) fn new(capacity: usize, ports: Ports) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            ports,
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn publish(&self, dead_letter: DeadLetter) {
        if self.disposed.load(Ordering::Acquire) {
            tracing::debug!(
                recipient = ?dead_letter.recipient,
                "dead letter dropped after queue disposal"
            );
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(dead_letter);
        while entries.len() > self.capacity {
            entries.pop_front();
            self.ports.metrics.increment("dead_letters.evicted", 1, &[]);
        }
        drop(entries);
        self.ports.metrics.increment("dead_letters", 1, &[]);
    }

    /// Remove and return the oldest entry.
    pub fn pop(&self) -> Option<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryMetrics;
    use std::sync::Arc;

    fn queue(capacity: usize) -> (DeadLetterQueue, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::default());
        let ports = Ports {
            metrics: metrics.clone(),
            ..Ports::default()
        };
        (DeadLetterQueue::new(capacity, ports), metrics)
    }

    fn entry(tag: u64) -> DeadLetter {
        DeadLetter {
            envelope: Envelope::new(tag),
            sender: None,
            recipient: Some(ActorPath::new("missing")),
        }
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let (queue, metrics) = queue(3);
        for tag in 1..=4u64 {
            queue.publish(entry(tag));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(metrics.counter("dead_letters.evicted"), 1);
        assert_eq!(metrics.counter("dead_letters"), 4);

        let first = queue.pop().expect("entry");
        assert_eq!(
            first.envelope.payload_downcast::<u64>().map(|v| *v),
            Some(2)
        );
    }

    #[test]
    fn test_drain_preserves_order() {
        let (queue, _) = queue(10);
        queue.publish(entry(1));
        queue.publish(entry(2));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(
            drained[0].envelope.payload_downcast::<u64>().map(|v| *v),
            Some(1)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_disposed_queue_drops_entries() {
        let (queue, metrics) = queue(10);
        queue.dispose();
        queue.publish(entry(1));
        assert!(queue.is_empty());
        assert_eq!(metrics.counter("dead_letters"), 0);
    }
}
