//! The behavior trait implemented by user actors.

use super::context::ActorContext;
use crate::error::HandlerResult;
use async_trait::async_trait;
use hypha_protocol::Payload;
use std::sync::Arc;

/// A unit of isolated state driven by messages.
///
/// The dispatcher guarantees at most one `receive` invocation per actor is in
/// progress at any time, and that envelopes arrive in the order they were
/// enqueued. Payloads are type-erased; the handler boundary is where the
/// concrete type is recovered:
///
/// ```rust,ignore
/// #[async_trait::async_trait]
/// impl Actor for Counter {
///     async fn receive(&mut self, msg: Payload, ctx: &ActorContext) -> HandlerResult {
///         if let Some(cmd) = msg.downcast_ref::<Command>() {
///             self.apply(cmd, ctx);
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// Returning an error (or panicking) routes the failure to the parent
/// supervisor; an unsupervised actor is stopped.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Called once after the actor is wired into the system and before any
    /// message is delivered. The context is fully usable: the actor may tell
    /// itself, start timers or subscribe here.
    async fn pre_start(&mut self, ctx: &ActorContext) -> HandlerResult {
        let _ = ctx;
        Ok(())
    }

    /// Handle one message.
    async fn receive(&mut self, message: Payload, ctx: &ActorContext) -> HandlerResult;

    /// Called once while the actor is being stopped, after its timers are
    /// disposed. Failures are logged and counted but do not abort the stop.
    async fn post_stop(&mut self, ctx: &ActorContext) -> HandlerResult {
        let _ = ctx;
        Ok(())
    }
}

/// Factory re-invoked on every (re)start of an actor.
pub type ActorFactory = Arc<dyn Fn() -> Box<dyn Actor> + Send + Sync>;
