//! Actor references and the per-actor context.

use crate::ask::{self, ReplyState};
use crate::config::AskConfig;
use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::error::{Result, RuntimeError};
use crate::mailbox::Mailbox;
use crate::ports::{LogLevel, Ports};
use crate::system::{ActorSystem, SystemShared};
use crate::timer::TimerScheduler;
use crate::Envelope;
use hypha_protocol::message::erase;
use hypha_protocol::{ActorPath, Message};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// Notice delivered to watchers when a watched actor stops.
#[derive(Debug, Clone)]
pub struct Terminated(pub ActorRef);

/// Stable, lightweight handle to an actor.
///
/// References are cheap to clone, always safe to copy and never own the
/// actor. Liveness is one-way: a reference goes from alive to not-alive
/// exactly once, and a `tell` to a not-alive reference routes the envelope to
/// the dead-letter queue instead of failing.
#[derive(Clone)]
pub struct ActorRef {
    inner: Arc<RefInner>,
}

struct RefInner {
    path: ActorPath,
    alive: AtomicBool,
    kind: RefKind,
}

enum RefKind {
    /// A spawned actor with a mailbox.
    Cell(CellRef),
    /// An ephemeral ask reply handle.
    Reply(ReplyState),
}

pub(crate) struct CellRef {
    mailbox: Arc<Mailbox>,
    ports: Ports,
    dead_letters: Weak<DeadLetterQueue>,
    ask_config: Arc<AskConfig>,
    watchers: Mutex<Vec<ActorRef>>,
}

impl ActorRef {
    pub(crate) fn cell(
        path: ActorPath,
        mailbox: Arc<Mailbox>,
        ports: Ports,
        dead_letters: Weak<DeadLetterQueue>,
        ask_config: Arc<AskConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(RefInner {
                path,
                alive: AtomicBool::new(true),
                kind: RefKind::Cell(CellRef {
                    mailbox,
                    ports,
                    dead_letters,
                    ask_config,
                    watchers: Mutex::new(Vec::new()),
                }),
            }),
        }
    }

    pub(crate) fn reply(path: ActorPath, state: ReplyState) -> Self {
        Self {
            inner: Arc::new(RefInner {
                path,
                alive: AtomicBool::new(true),
                kind: RefKind::Reply(state),
            }),
        }
    }

    pub fn path(&self) -> &ActorPath {
        &self.inner.path
    }

    pub fn is_alive(&self) -> bool {
        let alive = self.inner.alive.load(Ordering::Acquire);
        match &self.inner.kind {
            RefKind::Cell(cell) => alive && !cell.mailbox.is_disposed(),
            RefKind::Reply(_) => alive,
        }
    }

    /// Fire-and-forget send.
    ///
    /// The message is wrapped into an envelope; a message that already is an
    /// envelope keeps its correlation id, metadata, reply-to and timestamp.
    /// An explicit `sender` overrides the envelope's own.
    pub fn tell<M: Message>(&self, message: M, sender: Option<&ActorRef>) {
        self.tell_envelope(wrap_message(message, sender));
    }

    pub(crate) fn tell_envelope(&self, envelope: Envelope) {
        match &self.inner.kind {
            RefKind::Cell(cell) => {
                if !self.is_alive() {
                    self.route_dead_letter(cell, envelope);
                    return;
                }
                cell.ports.trace(
                    envelope.correlation_id(),
                    "sent",
                    &self.inner.path,
                    envelope.payload_type(),
                );
                if let Err(envelope) = cell.mailbox.enqueue(envelope) {
                    // Disposed between the liveness check and the enqueue.
                    self.route_dead_letter(cell, envelope);
                }
            }
            RefKind::Reply(state) => {
                if state.complete(envelope) {
                    self.inner.alive.store(false, Ordering::Release);
                }
            }
        }
    }

    fn route_dead_letter(&self, cell: &CellRef, envelope: Envelope) {
        cell.ports.log(
            LogLevel::Warning,
            RuntimeError::Undeliverable(self.inner.path.clone()).to_string(),
            Some(&self.inner.path),
        );
        let Some(dead_letters) = cell.dead_letters.upgrade() else {
            return;
        };
        let sender = envelope.sender().cloned();
        dead_letters.publish(DeadLetter {
            envelope,
            sender,
            recipient: Some(self.inner.path.clone()),
        });
    }

    /// Request/response with the system's default per-attempt timeout.
    ///
    /// The expected response type is a compile-time parameter; a reply whose
    /// payload is not a `T` fails the attempt with a type-mismatch error.
    pub async fn ask<T: Message, M: Message>(&self, message: M) -> Result<Arc<T>> {
        self.ask_inner::<T>(wrap_message(message, None), None).await
    }

    /// Request/response with an explicit per-attempt timeout.
    pub async fn ask_with_timeout<T: Message, M: Message>(
        &self,
        message: M,
        timeout: Duration,
    ) -> Result<Arc<T>> {
        self.ask_inner::<T>(wrap_message(message, None), Some(timeout))
            .await
    }

    async fn ask_inner<T: Message>(
        &self,
        request: Envelope,
        timeout: Option<Duration>,
    ) -> Result<Arc<T>> {
        let RefKind::Cell(cell) = &self.inner.kind else {
            return Err(RuntimeError::UnsupportedOnReplyHandle);
        };
        if !self.is_alive() {
            return Err(RuntimeError::RefNotAlive(self.inner.path.clone()));
        }
        ask::run_ask::<T>(self, request, timeout, &cell.ask_config, &cell.ports).await
    }

    /// Register `watcher` to receive a [`Terminated`] notice when this actor
    /// stops. Watching an already-stopped actor notifies immediately.
    pub fn watch(&self, watcher: &ActorRef) -> Result<()> {
        let RefKind::Cell(cell) = &self.inner.kind else {
            return Err(RuntimeError::UnsupportedOnReplyHandle);
        };
        if !self.is_alive() {
            watcher.tell(Terminated(self.clone()), None);
            return Ok(());
        }
        let mut watchers = cell.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if !watchers.iter().any(|w| w.path() == watcher.path()) {
            watchers.push(watcher.clone());
        }
        Ok(())
    }

    /// Flip the reference to not-alive. One-way.
    pub(crate) fn kill(&self) {
        self.inner.alive.store(false, Ordering::Release);
    }

    pub(crate) fn mailbox(&self) -> Option<&Arc<Mailbox>> {
        match &self.inner.kind {
            RefKind::Cell(cell) => Some(&cell.mailbox),
            RefKind::Reply(_) => None,
        }
    }

    /// Deliver one [`Terminated`] notice to each watcher.
    pub(crate) fn notify_watchers(&self) {
        let RefKind::Cell(cell) = &self.inner.kind else {
            return;
        };
        let watchers: Vec<ActorRef> = {
            let mut watchers = cell.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            watchers.drain(..).collect()
        };
        for watcher in watchers {
            watcher.tell(Terminated(self.clone()), None);
        }
    }

    /// Stop an uncompleted reply handle, resolving its slot with a
    /// cancellation error. No-op on regular references.
    pub(crate) fn cancel_reply(&self) {
        if let RefKind::Reply(state) = &self.inner.kind {
            state.cancel(&self.inner.path);
            self.inner.alive.store(false, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef")
            .field("path", &self.inner.path)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.path == other.inner.path
    }
}

impl Eq for ActorRef {}

/// Wrap a message into an envelope, preserving the identity of a message
/// that already is one.
pub(crate) fn wrap_message<M: Message>(message: M, sender: Option<&ActorRef>) -> Envelope {
    let (payload, payload_type) = erase(message);
    match payload.downcast::<Envelope>() {
        Ok(inner) => {
            let sender = sender.cloned().or_else(|| inner.sender().cloned());
            inner.forwarded_from(sender)
        }
        Err(payload) => {
            let envelope = Envelope::from_shared(payload, payload_type);
            match sender {
                Some(sender) => envelope.with_sender(sender.clone()),
                None => envelope,
            }
        }
    }
}

/// Per-actor context handed to every handler invocation.
///
/// Owned by the actor's cell for its whole lifetime. The current message's
/// envelope is installed before the handler runs and cleared when it
/// resolves, so [`ActorContext::sender`] is only meaningful for the duration
/// of one invocation.
pub struct ActorContext {
    self_ref: ActorRef,
    system: Weak<SystemShared>,
    timers: TimerScheduler,
    current: Mutex<Option<Envelope>>,
}

impl ActorContext {
    pub(crate) fn new(self_ref: ActorRef, system: Weak<SystemShared>) -> Arc<Self> {
        let timers = TimerScheduler::new(self_ref.clone());
        Arc::new(Self {
            self_ref,
            system,
            timers,
            current: Mutex::new(None),
        })
    }

    /// This actor's own reference.
    pub fn self_ref(&self) -> &ActorRef {
        &self.self_ref
    }

    pub fn path(&self) -> &ActorPath {
        self.self_ref.path()
    }

    /// Handle to the owning system, for spawning, stopping or reaching the
    /// event bus from inside a handler.
    pub fn system(&self) -> Result<ActorSystem> {
        self.system
            .upgrade()
            .map(ActorSystem::from_shared)
            .ok_or(RuntimeError::SystemShutDown)
    }

    /// The sender of the message currently being handled, if any.
    pub fn sender(&self) -> Option<ActorRef> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|envelope| envelope.sender().cloned())
    }

    /// The full envelope currently being handled. Routers use this to forward
    /// a message without disturbing its sender or correlation id.
    pub fn current_envelope(&self) -> Option<Envelope> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Timers owned by this actor; disposed with it.
    pub fn timers(&self) -> &TimerScheduler {
        &self.timers
    }

    pub(crate) fn install_current(&self, envelope: Envelope) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(envelope);
    }

    pub(crate) fn clear_current(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl std::fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorContext")
            .field("path", self.path())
            .finish()
    }
}
