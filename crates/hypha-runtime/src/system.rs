//! The actor system: registry, lifecycle and the wiring of every kernel
//! component.
//!
//! All state hangs off the system instance — registry, dispatcher, event bus,
//! dead-letter queue and sinks — so multiple independent systems can coexist
//! in one process. The system owns the actors; references and contexts hold
//! only non-owning back-edges.

use crate::actor::supervisor::{FailureOutcome, Supervisor, SupervisorBehavior, SupervisorState};
use crate::actor::{
    Actor, ActorContext, ActorFactory, ActorRef, OneForOneStrategy, SupervisionStrategy,
};
use crate::bus::EventBus;
use crate::config::{AskConfig, SystemConfig};
use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::dispatcher::{panic_message, Dispatcher};
use crate::error::{HandlerError, Result, RuntimeError};
use crate::mailbox::Mailbox;
use crate::ports::{InMemoryMetrics, InMemoryTracer, LogLevel, Ports, TracingLogSink};
use crate::router::RouterBehavior;
use crate::Envelope;
use dashmap::DashMap;
use futures::FutureExt;
use hypha_protocol::ActorPath;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Payload of the dead-letter entry posted when an unknown reference is
/// stopped.
#[derive(Debug, Clone)]
pub struct Stop;

/// One registered actor: its reference, behavior, context and restart
/// ingredients.
struct ActorCell {
    actor_ref: ActorRef,
    behavior: Arc<tokio::sync::Mutex<Box<dyn Actor>>>,
    context: Arc<ActorContext>,
    factory: ActorFactory,
    strategy: Option<Arc<dyn SupervisionStrategy>>,
    /// Present when this cell is a supervisor or router; failures of its
    /// children route here.
    supervisor: Option<Arc<SupervisorState>>,
}

/// The pieces the dispatcher needs to run one handler.
pub(crate) struct DispatchTarget {
    pub(crate) behavior: Arc<tokio::sync::Mutex<Box<dyn Actor>>>,
    pub(crate) context: Arc<ActorContext>,
}

pub(crate) struct SystemShared {
    config: SystemConfig,
    pub(crate) ask_config: Arc<AskConfig>,
    pub(crate) ports: Ports,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) dead_letters: Arc<DeadLetterQueue>,
    pub(crate) bus: Arc<EventBus>,
    registry: DashMap<ActorPath, ActorCell>,
    shutdown: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Non-owning self-handle, the source of the back-edges installed on
    /// contexts and supervisor states.
    self_weak: std::sync::Weak<SystemShared>,
}

impl SystemShared {
    pub(crate) fn dispatch_target(&self, path: &ActorPath) -> Option<DispatchTarget> {
        let cell = self.registry.get(path)?;
        Some(DispatchTarget {
            behavior: Arc::clone(&cell.behavior),
            context: Arc::clone(&cell.context),
        })
    }

    /// Spawn an actor at `path`. The cell is registered before `pre_start`
    /// runs, so the actor can schedule work against itself immediately; a
    /// failing `pre_start` rolls the registration back.
    pub(crate) async fn spawn_at(
        &self,
        path: ActorPath,
        factory: ActorFactory,
        strategy: Option<Arc<dyn SupervisionStrategy>>,
        supervisor: Option<Arc<SupervisorState>>,
    ) -> Result<ActorRef> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RuntimeError::SystemShutDown);
        }
        let behavior: Box<dyn Actor> = (factory)();
        let mailbox = Mailbox::new(path.clone(), Arc::clone(&self.dispatcher), self.ports.clone());
        let actor_ref = ActorRef::cell(
            path.clone(),
            Arc::clone(&mailbox),
            self.ports.clone(),
            Arc::downgrade(&self.dead_letters),
            Arc::clone(&self.ask_config),
        );
        let context = ActorContext::new(actor_ref.clone(), self.self_weak.clone());
        let behavior = Arc::new(tokio::sync::Mutex::new(behavior));

        {
            use dashmap::mapref::entry::Entry;
            match self.registry.entry(path.clone()) {
                Entry::Occupied(_) => return Err(RuntimeError::DuplicateActorId(path)),
                Entry::Vacant(vacant) => {
                    vacant.insert(ActorCell {
                        actor_ref: actor_ref.clone(),
                        behavior: Arc::clone(&behavior),
                        context: Arc::clone(&context),
                        factory,
                        strategy,
                        supervisor,
                    });
                }
            }
        }

        let started = {
            let mut behavior = behavior.lock().await;
            AssertUnwindSafe(behavior.pre_start(&context))
                .catch_unwind()
                .await
        };
        let failure: Option<String> = match started {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error.to_string()),
            Err(panic) => Some(panic_message(panic)),
        };
        if let Some(reason) = failure {
            self.registry.remove(&path);
            context.timers().dispose();
            actor_ref.kill();
            mailbox.dispose();
            self.ports.log(
                LogLevel::Error,
                format!("actor {path} failed to start: {reason}"),
                Some(&path),
            );
            return Err(RuntimeError::HandlerFailure {
                actor: path,
                reason,
            });
        }

        self.ports
            .metrics
            .increment("actors.spawned", 1, &[("actorId", path.as_str())]);
        self.ports
            .metrics
            .gauge("actors.active", self.registry.len() as f64, &[]);
        self.ports
            .log(LogLevel::Info, format!("actor {path} started"), Some(&path));
        Ok(actor_ref)
    }

    /// Stop the actor at `path`: timers, `post_stop`, event-bus cleanup,
    /// liveness flip, mailbox disposal, watcher notification, deregistration.
    pub(crate) async fn stop_path(&self, path: &ActorPath) -> Result<()> {
        let Some((_, cell)) = self.registry.remove(path) else {
            return Err(RuntimeError::RefNotAlive(path.clone()));
        };
        cell.context.timers().dispose();
        self.run_post_stop(&cell).await;
        self.bus.cleanup(path);
        cell.actor_ref.kill();
        if let Some(mailbox) = cell.actor_ref.mailbox() {
            mailbox.dispose();
        }
        cell.actor_ref.notify_watchers();
        self.ports
            .metrics
            .increment("actors.stopped", 1, &[("actorId", path.as_str())]);
        self.ports
            .metrics
            .gauge("actors.active", self.registry.len() as f64, &[]);
        self.ports
            .log(LogLevel::Info, format!("actor {path} stopped"), Some(&path));
        Ok(())
    }

    /// Run `post_stop` inline when the actor is idle; when a handler is
    /// still in flight the hook is detached and runs as soon as the handler
    /// resolves. Either way the stop itself does not wait on a busy handler.
    async fn run_post_stop(&self, cell: &ActorCell) {
        let context = Arc::clone(&cell.context);
        let ports = self.ports.clone();
        match Arc::clone(&cell.behavior).try_lock_owned() {
            Ok(mut guard) => run_post_stop_hook(&mut guard, &context, &ports).await,
            Err(_) => {
                let behavior = Arc::clone(&cell.behavior);
                tokio::spawn(async move {
                    let mut guard = behavior.lock().await;
                    run_post_stop_hook(&mut guard, &context, &ports).await;
                });
            }
        }
    }

    pub(crate) async fn restart(&self, path: &ActorPath) -> Result<ActorRef> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RuntimeError::SystemShutDown);
        }
        let (factory, strategy, supervisor) = {
            let cell = self
                .registry
                .get(path)
                .ok_or_else(|| RuntimeError::RefNotAlive(path.clone()))?;
            (
                cell.factory.clone(),
                cell.strategy.clone(),
                cell.supervisor.clone(),
            )
        };
        self.stop_path(path).await?;
        let new_ref = self.spawn_at(path.clone(), factory, strategy, supervisor).await?;
        self.ports
            .metrics
            .increment("actors.restarted", 1, &[("actorId", path.as_str())]);
        Ok(new_ref)
    }

    /// Route a handler failure to the parent supervisor, walking up on
    /// escalation. An actor with no supervisor above it is stopped; when a
    /// supervisor escalates and has no supervisor of its own, the supervisor
    /// itself is stopped.
    pub(crate) async fn handle_failure(&self, failed: &ActorPath, error: HandlerError) {
        self.ports
            .metrics
            .increment("actors.failed", 1, &[("actorId", failed.as_str())]);
        self.ports.log(
            LogLevel::Error,
            format!("actor {failed} handler failed: {error}"),
            Some(failed),
        );
        let mut subject = failed.clone();
        loop {
            let supervisor = subject
                .parent()
                .and_then(|parent| self.registry.get(&parent))
                .and_then(|cell| cell.supervisor.clone());
            match supervisor {
                None => {
                    if self.stop_path(&subject).await.is_err() {
                        tracing::debug!(actor = %subject, "failed actor already stopped");
                    }
                    break;
                }
                Some(state) => match state.on_child_failure(&subject, &error).await {
                    FailureOutcome::Handled => break,
                    FailureOutcome::Escalated => subject = state.path().clone(),
                },
            }
        }
    }
}

async fn run_post_stop_hook(behavior: &mut Box<dyn Actor>, context: &ActorContext, ports: &Ports) {
    let result = AssertUnwindSafe(behavior.post_stop(context))
        .catch_unwind()
        .await;
    let failure = match result {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error.to_string()),
        Err(panic) => Some(panic_message(panic)),
    };
    if let Some(reason) = failure {
        ports.metrics.increment("actors.stop_failed", 1, &[]);
        ports.log(
            LogLevel::Warning,
            format!("actor {} post_stop failed: {reason}", context.path()),
            Some(context.path()),
        );
    }
}

/// A single-process, in-memory actor system.
///
/// Cloning yields another handle to the same system. Must be created inside a
/// tokio runtime; the message pump runs as a task on it.
///
/// ```rust,ignore
/// let system = ActorSystem::new(SystemConfig::default())?;
/// let counter = system.spawn("counter", Counter::default).await?;
/// counter.tell(Command::Increment, None);
/// let total = counter.ask::<u64, _>(Command::Get).await?;
/// system.shutdown().await;
/// ```
#[derive(Clone)]
pub struct ActorSystem {
    shared: Arc<SystemShared>,
}

impl ActorSystem {
    pub fn new(config: SystemConfig) -> Result<Self> {
        config.ask.validate()?;
        let ports = Ports {
            metrics: config
                .metrics_sink
                .clone()
                .unwrap_or_else(|| Arc::new(InMemoryMetrics::default())),
            tracer: config
                .trace_sink
                .clone()
                .unwrap_or_else(|| Arc::new(InMemoryTracer::default())),
            log: config.log_sink.clone().unwrap_or_else(|| Arc::new(TracingLogSink)),
        };
        let dispatcher = Dispatcher::new();
        let dead_letters = Arc::new(DeadLetterQueue::new(
            config.dead_letter_capacity.0,
            ports.clone(),
        ));
        let ask_config = Arc::new(config.ask.clone());
        let shared = Arc::new_cyclic(|self_weak| SystemShared {
            config,
            ask_config,
            ports,
            dispatcher: Arc::clone(&dispatcher),
            dead_letters,
            bus: Arc::new(EventBus::new()),
            registry: DashMap::new(),
            shutdown: AtomicBool::new(false),
            pump: Mutex::new(None),
            self_weak: self_weak.clone(),
        });
        let pump = tokio::spawn(Arc::clone(&dispatcher).run(Arc::downgrade(&shared)));
        *shared.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        Ok(Self { shared })
    }

    pub(crate) fn from_shared(shared: Arc<SystemShared>) -> Self {
        Self { shared }
    }

    /// Spawn a top-level actor.
    pub async fn spawn<A, F>(&self, id: impl Into<ActorPath>, factory: F) -> Result<ActorRef>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let factory: ActorFactory = Arc::new(move || Box::new(factory()) as Box<dyn Actor>);
        self.shared.spawn_at(id.into(), factory, None, None).await
    }

    /// Spawn a top-level actor carrying a supervision strategy for its
    /// restarts.
    pub async fn spawn_supervised<A, F>(
        &self,
        id: impl Into<ActorPath>,
        factory: F,
        strategy: Arc<dyn SupervisionStrategy>,
    ) -> Result<ActorRef>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let factory: ActorFactory = Arc::new(move || Box::new(factory()) as Box<dyn Actor>);
        self.shared
            .spawn_at(id.into(), factory, Some(strategy), None)
            .await
    }

    /// Spawn a supervisor; children spawned through the returned handle live
    /// under its path and fail into its strategy.
    pub async fn spawn_supervisor(
        &self,
        id: impl Into<ActorPath>,
        strategy: Arc<dyn SupervisionStrategy>,
    ) -> Result<Supervisor> {
        let path = id.into();
        let state = Arc::new(SupervisorState::new(
            path.clone(),
            Arc::downgrade(&self.shared),
            Arc::clone(&strategy),
        ));
        let behavior_state = Arc::clone(&state);
        let factory: ActorFactory = Arc::new(move || {
            Box::new(SupervisorBehavior {
                state: Arc::clone(&behavior_state),
            }) as Box<dyn Actor>
        });
        let actor_ref = self
            .shared
            .spawn_at(path, factory, Some(strategy), Some(Arc::clone(&state)))
            .await?;
        Ok(Supervisor::new(state, actor_ref))
    }

    /// Spawn a round-robin router pool of `size` workers built from
    /// `factory`, supervised one-for-one with unlimited restarts.
    pub async fn spawn_pool<A, F>(
        &self,
        id: impl Into<ActorPath>,
        size: usize,
        factory: F,
    ) -> Result<ActorRef>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.spawn_pool_with_strategy(id, size, factory, Arc::new(OneForOneStrategy::always_restart()))
            .await
    }

    /// Spawn a router pool with an explicit worker supervision strategy.
    pub async fn spawn_pool_with_strategy<A, F>(
        &self,
        id: impl Into<ActorPath>,
        size: usize,
        factory: F,
        strategy: Arc<dyn SupervisionStrategy>,
    ) -> Result<ActorRef>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        if size == 0 {
            return Err(RuntimeError::InvalidConfig(
                "router pool size must be at least 1".to_string(),
            ));
        }
        let path = id.into();
        let state = Arc::new(SupervisorState::new(
            path.clone(),
            Arc::downgrade(&self.shared),
            Arc::clone(&strategy),
        ));
        let router_state = Arc::clone(&state);
        let router_factory: ActorFactory = Arc::new(move || {
            Box::new(RouterBehavior::new(Arc::clone(&router_state), size)) as Box<dyn Actor>
        });
        let actor_ref = self
            .shared
            .spawn_at(path, router_factory, Some(Arc::clone(&strategy)), Some(Arc::clone(&state)))
            .await?;
        let worker_factory: ActorFactory = Arc::new(move || Box::new(factory()) as Box<dyn Actor>);
        for index in 0..size {
            state
                .supervise(&index.to_string(), Arc::clone(&worker_factory))
                .await?;
        }
        Ok(actor_ref)
    }

    /// Stop an actor. Stopping a reference the registry does not know posts a
    /// dead-letter entry noting the unknown recipient.
    pub async fn stop(&self, actor: &ActorRef) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(RuntimeError::SystemShutDown);
        }
        if self.shared.registry.contains_key(actor.path()) {
            self.shared.stop_path(actor.path()).await
        } else {
            self.shared.dead_letters.publish(DeadLetter {
                envelope: Envelope::new(Stop),
                sender: None,
                recipient: Some(actor.path().clone()),
            });
            Ok(())
        }
    }

    /// Stop and respawn an actor from its retained factory and strategy.
    pub async fn restart(&self, id: impl Into<ActorPath>) -> Result<ActorRef> {
        self.shared.restart(&id.into()).await
    }

    /// Registry lookup. Returns nothing once the system is shut down.
    pub fn get(&self, id: impl Into<ActorPath>) -> Option<ActorRef> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return None;
        }
        self.shared
            .registry
            .get(&id.into())
            .map(|cell| cell.actor_ref.clone())
    }

    /// Stop every actor, dispose the dead-letter queue and event bus, and
    /// wind down the pump. Idempotent; subsequent operations observe a
    /// shut-down state.
    pub async fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.dispatcher.initiate_shutdown();
        let paths: Vec<ActorPath> = self
            .shared
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for path in paths {
            if self.shared.stop_path(&path).await.is_err() {
                tracing::debug!(actor = %path, "actor already stopped during shutdown");
            }
        }
        self.shared.registry.clear();
        self.shared.dead_letters.dispose();
        self.shared.bus.dispose();
        self.shared.ports.metrics.increment("system.shutdown", 1, &[]);
        let pump = self
            .shared
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            if tokio::time::timeout(Duration::from_secs(5), pump).await.is_err() {
                tracing::warn!("message pump did not stop within the shutdown window");
            }
        }
        self.shared
            .ports
            .log(LogLevel::Info, "actor system shut down", None);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Number of registered actors.
    pub fn actor_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn dead_letters(&self) -> Arc<DeadLetterQueue> {
        Arc::clone(&self.shared.dead_letters)
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.shared.bus)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("actors", &self.actor_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
