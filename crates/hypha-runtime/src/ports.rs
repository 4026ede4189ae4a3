//! Observability ports: the metrics, tracing and logging sinks consumed by
//! the kernel.
//!
//! Each port is a narrow trait with a default implementation; embedders swap
//! in their own via [`crate::config::SystemConfig`]. The in-memory defaults
//! are inspectable, which the test suites rely on.

use dashmap::DashMap;
use hypha_protocol::{ActorPath, CorrelationId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// Counter, gauge and timing sink.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, count: u64, tags: &[(&str, &str)]);
    fn decrement(&self, name: &str, count: u64, tags: &[(&str, &str)]);
    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]);
    fn timing(&self, name: &str, duration: Duration, tags: &[(&str, &str)]);
}

/// One message-flow trace event.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub correlation_id: CorrelationId,
    pub event_name: &'static str,
    pub actor: ActorPath,
    pub detail: String,
    pub timestamp: SystemTime,
}

impl TraceEvent {
    pub fn new(
        correlation_id: CorrelationId,
        event_name: &'static str,
        actor: ActorPath,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            event_name,
            actor,
            detail: detail.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Message-flow trace sink.
///
/// Emitted event names: `sent`, `processed`, `ask_attempt`, `ask_retry`,
/// `ask_failed_non_retryable`, `ask_failed_final`.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: TraceEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: SystemTime,
    pub actor: Option<ActorPath>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>, actor: Option<ActorPath>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: SystemTime::now(),
            actor,
        }
    }
}

pub trait LogSink: Send + Sync {
    fn record(&self, record: LogRecord);
}

/// The three ports bundled, as the kernel passes them around.
#[derive(Clone)]
pub struct Ports {
    pub metrics: Arc<dyn MetricsSink>,
    pub tracer: Arc<dyn TraceSink>,
    pub log: Arc<dyn LogSink>,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            metrics: Arc::new(InMemoryMetrics::default()),
            tracer: Arc::new(InMemoryTracer::default()),
            log: Arc::new(TracingLogSink),
        }
    }
}

impl Ports {
    pub(crate) fn trace(
        &self,
        correlation_id: CorrelationId,
        event_name: &'static str,
        actor: &ActorPath,
        detail: impl Into<String>,
    ) {
        self.tracer
            .record(TraceEvent::new(correlation_id, event_name, actor.clone(), detail));
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>, actor: Option<&ActorPath>) {
        self.log.record(LogRecord::new(level, message, actor.cloned()));
    }
}

fn tagged_key(name: &str, tags: &[(&str, &str)]) -> String {
    let mut key = String::from(name);
    key.push('[');
    for (i, (tag, value)) in tags.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        key.push_str(tag);
        key.push('=');
        key.push_str(value);
    }
    key.push(']');
    key
}

/// In-memory metrics recorder.
///
/// Counters fold tags away under the bare metric name and additionally track
/// each tagged series, so tests can assert on either.
#[derive(Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, AtomicI64>,
    gauges: DashMap<String, f64>,
    timings: DashMap<String, Vec<Duration>>,
}

impl InMemoryMetrics {
    fn add(&self, name: &str, delta: i64, tags: &[(&str, &str)]) {
        self.counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
        if !tags.is_empty() {
            self.counters
                .entry(tagged_key(name, tags))
                .or_default()
                .fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Current value of a counter, tags folded away.
    pub fn counter(&self, name: &str) -> i64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current value of one tagged counter series.
    pub fn counter_with(&self, name: &str, tags: &[(&str, &str)]) -> i64 {
        self.counters
            .get(&tagged_key(name, tags))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Last value of an untagged gauge.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|g| *g)
    }

    /// Last value of one tagged gauge series.
    pub fn gauge_with(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        self.gauges.get(&tagged_key(name, tags)).map(|g| *g)
    }

    /// Number of recorded samples for a timing.
    pub fn timing_count(&self, name: &str) -> usize {
        self.timings.get(name).map(|t| t.len()).unwrap_or(0)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &str, count: u64, tags: &[(&str, &str)]) {
        self.add(name, count as i64, tags);
    }

    fn decrement(&self, name: &str, count: u64, tags: &[(&str, &str)]) {
        self.add(name, -(count as i64), tags);
    }

    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.gauges.insert(name.to_string(), value);
        if !tags.is_empty() {
            self.gauges.insert(tagged_key(name, tags), value);
        }
    }

    fn timing(&self, name: &str, duration: Duration, tags: &[(&str, &str)]) {
        self.timings.entry(name.to_string()).or_default().push(duration);
        if !tags.is_empty() {
            self.timings
                .entry(tagged_key(name, tags))
                .or_default()
                .push(duration);
        }
    }
}

/// In-memory trace recorder keeping a bounded ring of events.
pub struct InMemoryTracer {
    events: Mutex<VecDeque<TraceEvent>>,
    capacity: usize,
}

impl Default for InMemoryTracer {
    fn default() -> Self {
        Self::with_capacity(4096)
    }
}

impl InMemoryTracer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Snapshot of every retained event, oldest first.
    pub fn events(&self) -> Vec<TraceEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().cloned().collect()
    }

    /// Snapshot of retained events with the given name.
    pub fn events_named(&self, name: &str) -> Vec<TraceEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_name == name)
            .collect()
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.events_named(name).len()
    }
}

impl TraceSink for InMemoryTracer {
    fn record(&self, event: TraceEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Default log sink: forwards records to `tracing`.
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn record(&self, record: LogRecord) {
        let actor = record.actor.as_ref().map(ActorPath::as_str).unwrap_or("-");
        match record.level {
            LogLevel::Debug => tracing::debug!(actor, "{}", record.message),
            LogLevel::Info => tracing::info!(actor, "{}", record.message),
            LogLevel::Warning => tracing::warn!(actor, "{}", record.message),
            LogLevel::Error => tracing::error!(actor, "{}", record.message),
        }
    }
}
