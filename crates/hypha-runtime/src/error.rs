use hypha_protocol::ActorPath;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("actor system is shut down")]
    SystemShutDown,

    #[error("actor {0} is not alive")]
    RefNotAlive(ActorPath),

    #[error("actor id already in use: {0}")]
    DuplicateActorId(ActorPath),

    #[error("ask to {target} timed out after {timeout:?} (attempt {attempt})")]
    AskTimeout {
        target: ActorPath,
        timeout: Duration,
        attempt: u32,
    },

    #[error(
        "reply payload type mismatch: expected {expected}, received {received}; \
         reply envelopes must carry the response value itself as their payload"
    )]
    ResponseTypeMismatch {
        expected: &'static str,
        received: &'static str,
    },

    #[error(
        "reply payload was an envelope, not a response value; \
         reply envelopes must carry the response value itself as their payload"
    )]
    ResponseEnvelopeShape,

    #[error("reply handle {0} was stopped before a response arrived")]
    ResponseCancelled(ActorPath),

    #[error("actor {actor} handler failed: {reason}")]
    HandlerFailure { actor: ActorPath, reason: String },

    #[error("message for {0} was undeliverable")]
    Undeliverable(ActorPath),

    #[error("operation not supported on an ask reply handle")]
    UnsupportedOnReplyHandle,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RuntimeError {
    /// The kind of this error, used by the ask protocol to decide whether an
    /// attempt may be retried.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SystemShutDown | Self::RefNotAlive(_) | Self::UnsupportedOnReplyHandle => {
                ErrorKind::InvalidState
            }
            Self::InvalidConfig(_) => ErrorKind::InvalidState,
            Self::DuplicateActorId(_) => ErrorKind::IdCollision,
            Self::AskTimeout { .. } => ErrorKind::Timeout,
            Self::ResponseTypeMismatch { .. } => ErrorKind::ResponseTypeMismatch,
            Self::ResponseEnvelopeShape => ErrorKind::ResponseEnvelopeShape,
            Self::ResponseCancelled(_) => ErrorKind::Cancelled,
            Self::HandlerFailure { .. } => ErrorKind::HandlerFailure,
            Self::Undeliverable(_) => ErrorKind::Undeliverable,
        }
    }
}

/// Coarse error classification.
///
/// [`crate::config::AskConfig::retryable_kinds`] is a set of these; only
/// `Timeout` is retryable by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidState,
    IdCollision,
    Timeout,
    ResponseTypeMismatch,
    ResponseEnvelopeShape,
    Cancelled,
    HandlerFailure,
    Undeliverable,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Error type raised by user message handlers and lifecycle hooks.
///
/// Handler failures never propagate to `tell` callers; they surface through
/// the supervision tree and the `actors.failed` counter.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = std::result::Result<(), HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_kind() {
        let err = RuntimeError::AskTimeout {
            target: ActorPath::new("svc"),
            timeout: Duration::from_millis(100),
            attempt: 1,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_mismatch_message_names_both_types() {
        let err = RuntimeError::ResponseTypeMismatch {
            expected: "u64",
            received: "alloc::string::String",
        };
        let text = err.to_string();
        assert!(text.contains("u64"));
        assert!(text.contains("String"));
    }
}
