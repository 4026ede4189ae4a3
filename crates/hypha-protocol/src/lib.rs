//! Message identity and envelope types for the hypha actor runtime.
//!
//! This crate is the leaf of the workspace: it knows nothing about mailboxes,
//! dispatchers or the actor system. It defines:
//! - [`Message`]: the marker bound every payload satisfies
//! - [`Envelope`]: the immutable wrapper that carries a payload plus routing
//!   metadata through the runtime
//! - [`ActorPath`] / [`CorrelationId`]: the identity types messages are
//!   routed and traced by
//!
//! The envelope is generic over the address type so the runtime crate can
//! instantiate it with its own actor reference without a dependency cycle.

pub mod envelope;
pub mod message;
pub mod routing;

pub use envelope::Envelope;
pub use message::{Message, Payload};
pub use routing::{ActorPath, CorrelationId};
