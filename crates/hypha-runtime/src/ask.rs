//! Request/response ("ask") protocol.
//!
//! Each attempt allocates a single-use reply handle: a reference-like object
//! wrapping a typed completion slot. The request envelope is copied with its
//! sender rewritten to the reply handle, so the target's handler replies by
//! telling `ctx.sender()` — the slot resolves, the handle dies, and the ask
//! future yields the typed response. Timeouts are retried with exponential
//! backoff up to `max_retries`; every other error kind is final by default.

use crate::actor::ActorRef;
use crate::config::AskConfig;
use crate::error::{Result, RuntimeError};
use crate::ports::Ports;
use crate::Envelope;
use hypha_protocol::{ActorPath, Message, Payload};
use std::any::TypeId;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Completion slot behind an ask reply handle.
///
/// Resolves at most once: with the payload when its type matches the
/// expectation, with a mismatch error otherwise, or with a cancellation
/// error when the handle is stopped uncompleted.
pub(crate) struct ReplyState {
    expected: TypeId,
    expected_type: &'static str,
    slot: Mutex<Option<oneshot::Sender<Result<Payload>>>>,
}

impl ReplyState {
    /// Resolve the slot from a reply envelope. Returns true when this call
    /// completed the slot (first completion wins).
    pub(crate) fn complete(&self, envelope: Envelope) -> bool {
        let Some(slot) = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            tracing::debug!(
                payload_type = envelope.payload_type(),
                "reply handle already completed, dropping reply"
            );
            return false;
        };
        let outcome = if envelope.payload_is::<Envelope>() {
            Err(RuntimeError::ResponseEnvelopeShape)
        } else if (**envelope.payload()).type_id() == self.expected {
            Ok(Arc::clone(envelope.payload()))
        } else {
            Err(RuntimeError::ResponseTypeMismatch {
                expected: self.expected_type,
                received: envelope.payload_type(),
            })
        };
        // The ask side may have given up already; that only drops the value.
        let _ = slot.send(outcome);
        true
    }

    /// Resolve an uncompleted slot with a cancellation error.
    pub(crate) fn cancel(&self, path: &ActorPath) {
        if let Some(slot) = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = slot.send(Err(RuntimeError::ResponseCancelled(path.clone())));
        }
    }
}

/// Allocate a reply handle expecting a `T`, unique per attempt.
fn reply_handle<T: Message>() -> (ActorRef, oneshot::Receiver<Result<Payload>>) {
    let (tx, rx) = oneshot::channel();
    let path = ActorPath::new(format!("_ask/{:016x}", rand::random::<u64>()));
    let state = ReplyState {
        expected: TypeId::of::<T>(),
        expected_type: std::any::type_name::<T>(),
        slot: Mutex::new(Some(tx)),
    };
    (ActorRef::reply(path, state), rx)
}

/// Drive one ask to completion: up to `max_retries + 1` attempts.
pub(crate) async fn run_ask<T: Message>(
    target: &ActorRef,
    request: Envelope,
    timeout: Option<Duration>,
    config: &AskConfig,
    ports: &Ports,
) -> Result<Arc<T>> {
    let timeout = timeout.unwrap_or(config.default_timeout);
    let correlation_id = request.correlation_id();
    let mut attempt: u32 = 1;
    loop {
        let (reply, receiver) = reply_handle::<T>();
        let envelope = request.forwarded_from(Some(reply.clone()));
        ports.trace(
            correlation_id,
            "ask_attempt",
            target.path(),
            format!("attempt={attempt} timeout={timeout:?}"),
        );
        target.tell_envelope(envelope);

        let error = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(Ok(payload))) => {
                return payload
                    .downcast::<T>()
                    .map_err(|_| RuntimeError::ResponseTypeMismatch {
                        expected: std::any::type_name::<T>(),
                        received: "<erased>",
                    });
            }
            Ok(Ok(Err(error))) => error,
            Ok(Err(_closed)) => RuntimeError::ResponseCancelled(reply.path().clone()),
            Err(_elapsed) => {
                reply.cancel_reply();
                RuntimeError::AskTimeout {
                    target: target.path().clone(),
                    timeout,
                    attempt,
                }
            }
        };

        let retryable = config.enable_retries && config.retryable_kinds.contains(&error.kind());
        if !retryable {
            ports.trace(
                correlation_id,
                "ask_failed_non_retryable",
                target.path(),
                error.to_string(),
            );
            return Err(error);
        }
        if attempt > config.max_retries {
            ports.trace(
                correlation_id,
                "ask_failed_final",
                target.path(),
                error.to_string(),
            );
            return Err(error);
        }
        ports.trace(
            correlation_id,
            "ask_retry",
            target.path(),
            format!("attempt={attempt} error={error}"),
        );
        tokio::time::sleep(config.backoff_for_attempt(attempt)).await;
        attempt += 1;
    }
}
