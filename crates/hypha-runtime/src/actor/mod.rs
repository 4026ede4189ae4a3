//! Actor abstractions: behavior trait, references and the per-actor context.
//!
//! - An [`Actor`] owns private state and processes at most one message at a
//!   time; it is invoked by the dispatcher with the erased payload.
//! - An [`ActorRef`] is the stable, lightweight handle other code holds:
//!   `tell` / `ask` / `watch`. References never own the actor.
//! - The [`ActorContext`] is owned by the actor and carries its own
//!   reference, a non-owning system handle, the current message's sender and
//!   a timer scheduler bound to the actor's lifetime.

mod context;
mod handle;
pub mod supervisor;

pub use context::{ActorContext, ActorRef, Terminated};
pub use handle::{Actor, ActorFactory};
pub use supervisor::{
    AllForOneStrategy, OneForOneStrategy, SupervisionDecision, SupervisionStrategy, Supervisor,
};
