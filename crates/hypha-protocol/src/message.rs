//! Message marker trait and the erased payload carrier.

use std::any::Any;
use std::sync::Arc;

/// Marker bound satisfied by every message payload.
///
/// Payloads are type-erased at the envelope boundary and recovered with a
/// downcast at the handler boundary, so the only requirements are the ones
/// erasure itself imposes. The blanket impl means user code never implements
/// this by hand.
pub trait Message: Any + Send + Sync {}

impl<T> Message for T where T: Any + Send + Sync {}

/// A type-erased message payload.
///
/// Every copy of an envelope shares the same allocation; fan-out (the event
/// bus, repeating timers) wraps the value once and clones the `Arc`.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Erase a message into a [`Payload`], capturing its type name for
/// diagnostics.
///
/// The name is taken at erasure time because it cannot be recovered from the
/// trait object afterwards; trace events and mismatch errors lean on it.
pub fn erase<M: Message>(message: M) -> (Payload, &'static str) {
    (Arc::new(message), std::any::type_name::<M>())
}
