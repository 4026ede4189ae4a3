//! The immutable message envelope.

use crate::message::{erase, Message, Payload};
use crate::routing::CorrelationId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Immutable wrapper carrying a payload plus routing metadata.
///
/// Construction fills the correlation id and timestamp when not supplied.
/// An envelope is never mutated after construction: copying it with a
/// different sender ([`Envelope::forwarded_from`]) yields a new envelope that
/// shares the original payload, correlation id, timestamp, metadata and
/// reply-to. This is how the runtime threads senders through without touching
/// messages.
///
/// The address type `A` is supplied by the runtime (its actor reference);
/// this crate only requires it to be cloneable.
pub struct Envelope<A> {
    payload: Payload,
    payload_type: &'static str,
    correlation_id: CorrelationId,
    timestamp: SystemTime,
    metadata: HashMap<String, String>,
    reply_to: Option<A>,
    sender: Option<A>,
}

impl<A: Clone> Clone for Envelope<A> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            payload_type: self.payload_type,
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
            reply_to: self.reply_to.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Envelope<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("payload_type", &self.payload_type)
            .field("correlation_id", &self.correlation_id)
            .field("timestamp", &self.timestamp)
            .field("has_sender", &self.sender.is_some())
            .field("has_reply_to", &self.reply_to.is_some())
            .finish()
    }
}

impl<A> Envelope<A> {
    /// Wrap a message, generating a fresh correlation id and timestamp.
    pub fn new<M: Message>(message: M) -> Self {
        let (payload, payload_type) = erase(message);
        Self::from_shared(payload, payload_type)
    }

    /// Wrap an already-erased payload.
    ///
    /// Fan-out paths (event bus, repeating timers) erase the value once and
    /// build one envelope per delivery around the shared allocation.
    pub fn from_shared(payload: Payload, payload_type: &'static str) -> Self {
        Self {
            payload,
            payload_type,
            correlation_id: CorrelationId::new(),
            timestamp: SystemTime::now(),
            metadata: HashMap::new(),
            reply_to: None,
            sender: None,
        }
    }

    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn with_sender(mut self, sender: A) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_reply_to(mut self, reply_to: A) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The concrete type name of the payload, captured at erasure time.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Whether the payload is a `T`. The type test for dispatch lives at the
    /// handler boundary, not inside the envelope.
    pub fn payload_is<T: Message>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Downcast the payload, sharing the allocation.
    pub fn payload_downcast<T: Message>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn reply_to(&self) -> Option<&A> {
        self.reply_to.as_ref()
    }

    pub fn sender(&self) -> Option<&A> {
        self.sender.as_ref()
    }
}

impl<A: Clone> Envelope<A> {
    /// Copy this envelope with a different sender.
    ///
    /// The copy shares the payload, correlation id, timestamp, metadata and
    /// reply-to of the original.
    pub fn forwarded_from(&self, sender: Option<A>) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            payload_type: self.payload_type,
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
            reply_to: self.reply_to.clone(),
            sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Order {
        id: u64,
    }

    #[test]
    fn test_correlation_id_stable_across_reads() {
        let env: Envelope<()> = Envelope::new(Order { id: 1 });
        let first = env.correlation_id();
        let second = env.correlation_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_forwarded_copy_shares_identity() {
        let env: Envelope<u8> = Envelope::new(Order { id: 2 }).with_sender(1);
        let forwarded = env.forwarded_from(Some(9));
        assert_eq!(forwarded.correlation_id(), env.correlation_id());
        assert_eq!(forwarded.timestamp(), env.timestamp());
        assert_eq!(forwarded.sender(), Some(&9));
        assert_eq!(env.sender(), Some(&1));
        assert!(Arc::ptr_eq(env.payload(), forwarded.payload()));
    }

    #[test]
    fn test_payload_type_test_and_downcast() {
        let env: Envelope<()> = Envelope::new(Order { id: 3 });
        assert!(env.payload_is::<Order>());
        assert!(!env.payload_is::<String>());
        assert_eq!(env.payload_downcast::<Order>().unwrap().id, 3);
        assert!(env.payload_downcast::<String>().is_none());
    }

    #[test]
    fn test_metadata_builder() {
        let env: Envelope<()> = Envelope::new(Order { id: 4 }).with_metadata("origin", "test");
        assert_eq!(env.metadata().get("origin").map(String::as_str), Some("test"));
    }
}
