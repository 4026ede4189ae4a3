//! Single-process, in-memory actor runtime.
//!
//! Application code models concurrent state as isolated actors that
//! communicate exclusively by asynchronous message passing:
//! - One cooperative message pump services every mailbox; handlers are
//!   detached so an actor can `ask` and await inside a handler without
//!   stalling the rest of the system
//! - Per-actor FIFO delivery with at most one handler in flight per actor
//! - Request/response with per-attempt timeouts and exponential-backoff
//!   retries
//! - Supervision trees with one-for-one and all-for-one restart strategies
//! - Actor-owned keyed timers, a type-routed event bus and a bounded
//!   dead-letter queue
//! - Swappable metrics / tracing / logging sinks
//!
//! # Example
//!
//! ```rust,ignore
//! use hypha_runtime::{Actor, ActorContext, ActorSystem, SystemConfig};
//!
//! #[derive(Default)]
//! struct Counter {
//!     count: u64,
//! }
//!
//! #[async_trait::async_trait]
//! impl Actor for Counter {
//!     async fn receive(&mut self, msg: Payload, ctx: &ActorContext) -> HandlerResult {
//!         if msg.downcast_ref::<Increment>().is_some() {
//!             self.count += 1;
//!         } else if msg.downcast_ref::<Get>().is_some() {
//!             if let Some(sender) = ctx.sender() {
//!                 sender.tell(self.count, Some(ctx.self_ref()));
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let system = ActorSystem::new(SystemConfig::default())?;
//! let counter = system.spawn("counter", Counter::default).await?;
//! counter.tell(Increment, None);
//! let count = counter.ask::<u64, _>(Get).await?;
//! ```

pub mod actor;
pub mod ask;
pub mod bus;
pub mod config;
pub mod dead_letter;
pub mod dispatcher;
pub mod error;
pub mod mailbox;
pub mod ports;
pub mod router;
pub mod system;
pub mod timer;

/// The runtime's envelope: the protocol envelope addressed by [`ActorRef`].
pub type Envelope = hypha_protocol::Envelope<actor::ActorRef>;

pub use actor::{
    Actor, ActorContext, ActorFactory, ActorRef, AllForOneStrategy, OneForOneStrategy,
    SupervisionDecision, SupervisionStrategy, Supervisor, Terminated,
};
pub use bus::{EventBus, MonitorEvent};
pub use config::{AskConfig, DeadLetterCapacity, SystemConfig};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use error::{ErrorKind, HandlerError, HandlerResult, Result, RuntimeError};
pub use ports::{
    InMemoryMetrics, InMemoryTracer, LogLevel, LogRecord, LogSink, MetricsSink, Ports, TraceEvent,
    TraceSink, TracingLogSink,
};
pub use system::{ActorSystem, Stop};
pub use timer::TimerScheduler;

pub use hypha_protocol::{ActorPath, CorrelationId, Message, Payload};
