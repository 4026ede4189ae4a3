//! Supervision: failure-handling strategies and the supervisor actor.
//!
//! A strategy maps a child failure to a [`SupervisionDecision`]. The two
//! provided strategies differ in bookkeeping scope: one-for-one tracks retry
//! counters per child, all-for-one shares a single counter and restarts
//! every supervised child together.

use super::context::ActorContext;
use super::handle::{Actor, ActorFactory};
use super::ActorRef;
use crate::error::{HandlerError, HandlerResult, Result};
use crate::system::SystemShared;
use async_trait::async_trait;
use hypha_protocol::{ActorPath, Payload};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// What to do with a failed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionDecision {
    /// Leave the child as it is; its mailbox backlog drains normally.
    Resume,
    /// Stop the failed instance and respawn a fresh one from its factory.
    Restart,
    /// Stop the child permanently.
    Stop,
    /// Hand the failure to the supervisor's own supervisor.
    Escalate,
}

/// Decides the fate of failed children.
pub trait SupervisionStrategy: Send + Sync {
    fn handle(&self, child: &ActorPath, error: &HandlerError) -> SupervisionDecision;

    /// One-for-one when false (default): a restart touches only the failed
    /// child. All-for-one when true: a restart recreates every supervised
    /// child.
    fn restart_all(&self) -> bool {
        false
    }
}

/// User-supplied decision function consulted per failure.
pub type Decider = Arc<dyn Fn(&ActorPath, &HandlerError) -> SupervisionDecision + Send + Sync>;

struct RetryState {
    retries: u32,
    last_retry: Instant,
}

impl RetryState {
    fn fresh() -> Self {
        Self {
            retries: 0,
            last_retry: Instant::now(),
        }
    }

    /// Window/reset/cap bookkeeping shared by both strategies. Returns the
    /// effective decision.
    fn decide(
        &mut self,
        max_retries: u32,
        within: Option<Duration>,
        decision: SupervisionDecision,
    ) -> SupervisionDecision {
        if let Some(window) = within {
            if self.last_retry.elapsed() > window {
                self.retries = 0;
            }
        }
        if self.retries >= max_retries {
            return SupervisionDecision::Stop;
        }
        if decision == SupervisionDecision::Restart {
            self.retries += 1;
            self.last_retry = Instant::now();
        }
        decision
    }
}

fn always_restart_decider() -> Decider {
    Arc::new(|_, _| SupervisionDecision::Restart)
}

/// Per-child retry tracking; a restart touches only the failed child.
pub struct OneForOneStrategy {
    max_retries: u32,
    within: Option<Duration>,
    decider: Decider,
    state: Mutex<HashMap<ActorPath, RetryState>>,
}

impl OneForOneStrategy {
    pub fn new(max_retries: u32, within: Option<Duration>) -> Self {
        Self {
            max_retries,
            within,
            decider: always_restart_decider(),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Restart on every failure, without a retry cap.
    pub fn always_restart() -> Self {
        Self::new(u32::MAX, None)
    }

    pub fn with_decider(
        mut self,
        decider: impl Fn(&ActorPath, &HandlerError) -> SupervisionDecision + Send + Sync + 'static,
    ) -> Self {
        self.decider = Arc::new(decider);
        self
    }
}

impl SupervisionStrategy for OneForOneStrategy {
    fn handle(&self, child: &ActorPath, error: &HandlerError) -> SupervisionDecision {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = state.entry(child.clone()).or_insert_with(RetryState::fresh);
        let decision = (self.decider)(child, error);
        entry.decide(self.max_retries, self.within, decision)
    }
}

/// Shared retry tracking; a restart recreates every supervised child.
pub struct AllForOneStrategy {
    max_retries: u32,
    within: Option<Duration>,
    decider: Decider,
    state: Mutex<RetryState>,
}

impl AllForOneStrategy {
    pub fn new(max_retries: u32, within: Option<Duration>) -> Self {
        Self {
            max_retries,
            within,
            decider: always_restart_decider(),
            state: Mutex::new(RetryState::fresh()),
        }
    }

    pub fn always_restart() -> Self {
        Self::new(u32::MAX, None)
    }

    pub fn with_decider(
        mut self,
        decider: impl Fn(&ActorPath, &HandlerError) -> SupervisionDecision + Send + Sync + 'static,
    ) -> Self {
        self.decider = Arc::new(decider);
        self
    }
}

impl SupervisionStrategy for AllForOneStrategy {
    fn handle(&self, child: &ActorPath, error: &HandlerError) -> SupervisionDecision {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let decision = (self.decider)(child, error);
        state.decide(self.max_retries, self.within, decision)
    }

    fn restart_all(&self) -> bool {
        true
    }
}

/// Outcome of one supervisor consultation, driving the escalation walk.
pub(crate) enum FailureOutcome {
    Handled,
    Escalated,
}

/// The supervisor's bookkeeping: tracked children and their factories.
///
/// Shared between the supervisor's behavior cell and the failure-handling
/// path in the dispatcher.
pub(crate) struct SupervisorState {
    path: ActorPath,
    system: Weak<SystemShared>,
    strategy: Arc<dyn SupervisionStrategy>,
    children: Mutex<HashMap<String, ActorRef>>,
    factories: Mutex<HashMap<String, ActorFactory>>,
}

impl SupervisorState {
    pub(crate) fn new(
        path: ActorPath,
        system: Weak<SystemShared>,
        strategy: Arc<dyn SupervisionStrategy>,
    ) -> Self {
        Self {
            path,
            system,
            strategy,
            children: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn path(&self) -> &ActorPath {
        &self.path
    }

    pub(crate) fn child(&self, name: &str) -> Option<ActorRef> {
        self.lock_children().get(name).cloned()
    }

    fn lock_children(&self) -> MutexGuard<'_, HashMap<String, ActorRef>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_factories(&self) -> MutexGuard<'_, HashMap<String, ActorFactory>> {
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a child under `self/name` with the supervisor's strategy,
    /// retaining the factory for restarts.
    pub(crate) async fn supervise(&self, name: &str, factory: ActorFactory) -> Result<ActorRef> {
        let system = self
            .system
            .upgrade()
            .ok_or(crate::error::RuntimeError::SystemShutDown)?;
        let child_ref = system
            .spawn_at(
                self.path.child(name),
                factory.clone(),
                Some(self.strategy.clone()),
                None,
            )
            .await?;
        self.lock_children()
            .insert(name.to_string(), child_ref.clone());
        self.lock_factories().insert(name.to_string(), factory);
        Ok(child_ref)
    }

    pub(crate) async fn on_child_failure(
        &self,
        child: &ActorPath,
        error: &HandlerError,
    ) -> FailureOutcome {
        let Some(system) = self.system.upgrade() else {
            return FailureOutcome::Handled;
        };
        match self.strategy.handle(child, error) {
            SupervisionDecision::Resume => FailureOutcome::Handled,
            SupervisionDecision::Escalate => FailureOutcome::Escalated,
            SupervisionDecision::Stop => {
                if system.stop_path(child).await.is_err() {
                    tracing::debug!(child = %child, "failed child already gone at stop");
                }
                self.lock_children().remove(child.name());
                self.lock_factories().remove(child.name());
                FailureOutcome::Handled
            }
            SupervisionDecision::Restart => {
                if self.strategy.restart_all() {
                    let names: Vec<String> = self.lock_children().keys().cloned().collect();
                    for name in names {
                        self.restart_child(&system, &name).await;
                    }
                } else {
                    self.restart_child(&system, child.name()).await;
                }
                FailureOutcome::Handled
            }
        }
    }

    async fn restart_child(&self, system: &Arc<SystemShared>, name: &str) {
        let child_path = self.path.child(name);
        match system.restart(&child_path).await {
            Ok(new_ref) => {
                self.lock_children().insert(name.to_string(), new_ref);
            }
            Err(error) => {
                tracing::warn!(child = %child_path, %error, "failed to restart supervised child");
            }
        }
    }
}

/// The supervisor's behavior cell. Supervision is driven by the failure path
/// in the dispatcher, not by mail, so ordinary messages are ignored.
pub(crate) struct SupervisorBehavior {
    pub(crate) state: Arc<SupervisorState>,
}

#[async_trait]
impl Actor for SupervisorBehavior {
    async fn receive(&mut self, message: Payload, _ctx: &ActorContext) -> HandlerResult {
        tracing::debug!(
            supervisor = %self.state.path(),
            payload_type = ?message.type_id(),
            "supervisor ignoring direct message"
        );
        Ok(())
    }
}

/// Handle to a spawned supervisor.
///
/// Obtained from [`crate::system::ActorSystem::spawn_supervisor`]; spawns
/// children under the supervisor's path with its strategy.
pub struct Supervisor {
    state: Arc<SupervisorState>,
    actor_ref: ActorRef,
}

impl Supervisor {
    pub(crate) fn new(state: Arc<SupervisorState>, actor_ref: ActorRef) -> Self {
        Self { state, actor_ref }
    }

    pub fn actor_ref(&self) -> &ActorRef {
        &self.actor_ref
    }

    pub fn path(&self) -> &ActorPath {
        self.actor_ref.path()
    }

    /// Spawn a child under `self/name`, registered with this supervisor's
    /// strategy. The factory is retained so the child can be respawned on
    /// restart decisions.
    pub async fn supervise<A, F>(&self, name: &str, factory: F) -> Result<ActorRef>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let factory: ActorFactory = Arc::new(move || Box::new(factory()) as Box<dyn Actor>);
        self.state.supervise(name, factory).await
    }

    /// The current reference of a tracked child.
    pub fn child(&self, name: &str) -> Option<ActorRef> {
        self.state.child(name)
    }
}
