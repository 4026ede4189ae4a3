//! Per-actor FIFO mailbox.

use crate::dispatcher::Dispatcher;
use crate::ports::Ports;
use crate::Envelope;
use hypha_protocol::ActorPath;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// FIFO queue of envelopes bound to one actor.
///
/// Enqueueing notifies the dispatcher and publishes the queue depth as the
/// `mailbox.size` gauge tagged with the actor id. Enqueue is safe under
/// concurrent callers. After [`Mailbox::dispose`] the queue is cleared and
/// every further enqueue is a no-op; the caller routes the envelope to the
/// dead-letter queue.
pub struct Mailbox {
    path: ActorPath,
    queue: Mutex<VecDeque<Envelope>>,
    disposed: AtomicBool,
    dispatcher: Arc<Dispatcher>,
    ports: Ports,
    /// Non-owning handle to this mailbox, handed to the dispatcher on
    /// enqueue.
    self_weak: Weak<Mailbox>,
}

impl Mailbox {
    pub(crate) fn new(path: ActorPath, dispatcher: Arc<Dispatcher>, ports: Ports) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            path,
            queue: Mutex::new(VecDeque::new()),
            disposed: AtomicBool::new(false),
            dispatcher,
            ports,
            self_weak: self_weak.clone(),
        })
    }

    /// Append an envelope and request scheduling. A disposed mailbox takes no
    /// action and hands the envelope back so the caller can dead-letter it.
    pub(crate) fn enqueue(&self, envelope: Envelope) -> std::result::Result<(), Envelope> {
        let depth = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            // Dispose clears the queue under this lock, so the flag must be
            // re-checked here to keep the cleared queue empty.
            if self.disposed.load(Ordering::Acquire) {
                return Err(envelope);
            }
            queue.push_back(envelope);
            queue.len()
        };
        self.publish_depth(depth);
        if let Some(this) = self.self_weak.upgrade() {
            self.dispatcher.schedule(&this);
        }
        Ok(())
    }

    /// Remove the oldest envelope, strict insertion order.
    pub(crate) fn dequeue(&self) -> Option<Envelope> {
        let (envelope, depth) = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let envelope = queue.pop_front();
            (envelope, queue.len())
        };
        if envelope.is_some() {
            self.publish_depth(depth);
        }
        envelope
    }

    pub(crate) fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn path(&self) -> &ActorPath {
        &self.path
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Clear the queue and stop all further scheduling.
    pub(crate) fn dispose(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        self.disposed.store(true, Ordering::Release);
        queue.clear();
        drop(queue);
        self.publish_depth(0);
    }

    fn publish_depth(&self, depth: usize) {
        self.ports
            .metrics
            .gauge("mailbox.size", depth as f64, &[("actorId", self.path.as_str())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryMetrics;

    fn mailbox() -> (Arc<Mailbox>, Arc<Dispatcher>, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::default());
        let ports = Ports {
            metrics: metrics.clone(),
            ..Ports::default()
        };
        let dispatcher = Dispatcher::new();
        let mailbox = Mailbox::new(ActorPath::new("worker"), dispatcher.clone(), ports);
        (mailbox, dispatcher, metrics)
    }

    #[test]
    fn test_fifo_order() {
        let (mailbox, _, _) = mailbox();
        for tag in 1..=3u64 {
            assert!(mailbox.enqueue(Envelope::new(tag)).is_ok());
        }
        for expected in 1..=3u64 {
            let envelope = mailbox.dequeue().expect("envelope");
            assert_eq!(
                envelope.payload_downcast::<u64>().map(|v| *v),
                Some(expected)
            );
        }
        assert!(mailbox.dequeue().is_none());
    }

    #[test]
    fn test_enqueue_publishes_gauge_and_schedules() {
        let (mailbox, dispatcher, metrics) = mailbox();
        mailbox.enqueue(Envelope::new(1u64)).unwrap();
        mailbox.enqueue(Envelope::new(2u64)).unwrap();
        assert_eq!(
            metrics.gauge_with("mailbox.size", &[("actorId", "worker")]),
            Some(2.0)
        );
        // Second enqueue must not queue the mailbox twice.
        assert_eq!(dispatcher.ready_len(), 1);
    }

    #[test]
    fn test_disposed_enqueue_is_noop() {
        let (mailbox, dispatcher, _) = mailbox();
        let _ = mailbox.enqueue(Envelope::new(1u64));
        mailbox.dispose();
        assert!(mailbox.enqueue(Envelope::new(2u64)).is_err());
        assert!(mailbox.is_empty());
        assert_eq!(dispatcher.ready_len(), 1);
    }
}
