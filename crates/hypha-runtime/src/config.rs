//! Runtime configuration.
//!
//! Plain structs with `Default` impls and `with_*` builders. [`AskConfig`]
//! carries serde derives so embedders can deserialize it from their own
//! configuration files; the sink overrides on [`SystemConfig`] are
//! programmatic only.

use crate::error::{ErrorKind, Result, RuntimeError};
use crate::ports::{LogSink, MetricsSink, TraceSink};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Parameters governing the request/response ("ask") protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskConfig {
    /// Per-attempt timeout used when the caller does not supply one.
    pub default_timeout: Duration,

    /// Retries beyond the first attempt; at most `max_retries + 1` attempts.
    pub max_retries: u32,

    /// Backoff before the first retry.
    pub retry_backoff_base: Duration,

    /// Multiplier applied per further retry; must be >= 1.0.
    pub retry_backoff_multiplier: f64,

    /// Upper bound on any single backoff sleep.
    pub max_backoff: Duration,

    /// When false, every failure is final.
    pub enable_retries: bool,

    /// Error kinds eligible for retry. Only timeouts by default.
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(100),
            retry_backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            enable_retries: true,
            retryable_kinds: HashSet::from([ErrorKind::Timeout]),
        }
    }
}

impl AskConfig {
    /// Generous timeouts and more retries, for interactive debugging.
    pub fn development() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_retries: 5,
            retry_backoff_base: Duration::from_millis(200),
            ..Self::default()
        }
    }

    /// Tight timeouts and fewer retries.
    pub fn production() -> Self {
        Self {
            default_timeout: Duration::from_secs(3),
            max_retries: 2,
            retry_backoff_base: Duration::from_millis(50),
            ..Self::default()
        }
    }

    /// Backoff before retrying after the failure of attempt `attempt`:
    /// `base * multiplier^(attempt - 1)`, capped at `max_backoff`. Zero for
    /// `attempt == 0`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.retry_backoff_multiplier.powi(attempt as i32 - 1);
        let backoff = self.retry_backoff_base.as_secs_f64() * factor;
        let capped = backoff.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_backoff_multiplier < 1.0 {
            return Err(RuntimeError::InvalidConfig(format!(
                "retry_backoff_multiplier must be >= 1.0, got {}",
                self.retry_backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Configuration for an [`crate::system::ActorSystem`].
#[derive(Clone, Default)]
pub struct SystemConfig {
    pub ask: AskConfig,
    pub dead_letter_capacity: DeadLetterCapacity,
    pub(crate) metrics_sink: Option<Arc<dyn MetricsSink>>,
    pub(crate) trace_sink: Option<Arc<dyn TraceSink>>,
    pub(crate) log_sink: Option<Arc<dyn LogSink>>,
}

/// Bounded capacity of the dead-letter queue (default 1000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterCapacity(pub usize);

impl Default for DeadLetterCapacity {
    fn default() -> Self {
        Self(1000)
    }
}

impl SystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ask_config(mut self, ask: AskConfig) -> Self {
        self.ask = ask;
        self
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = DeadLetterCapacity(capacity);
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for SystemConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemConfig")
            .field("ask", &self.ask)
            .field("dead_letter_capacity", &self.dead_letter_capacity)
            .field("metrics_sink", &self.metrics_sink.is_some())
            .field("trace_sink", &self.trace_sink.is_some())
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}
