//! Common test actors and shared test infrastructure

#![allow(dead_code)]

use async_trait::async_trait;
use hypha_runtime::{
    Actor, ActorContext, ActorSystem, AskConfig, HandlerResult, InMemoryMetrics, InMemoryTracer,
    Payload, SystemConfig, Terminated,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

// Common test message types

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Increment;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Get;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fail;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderCreated {
    pub id: u64,
}

/// A system wired with inspectable in-memory sinks.
pub struct TestSystem {
    pub system: ActorSystem,
    pub metrics: Arc<InMemoryMetrics>,
    pub tracer: Arc<InMemoryTracer>,
}

pub fn test_system() -> TestSystem {
    test_system_with(AskConfig::default())
}

pub fn test_system_with(ask: AskConfig) -> TestSystem {
    init_tracing();
    let metrics = Arc::new(InMemoryMetrics::default());
    let tracer = Arc::new(InMemoryTracer::default());
    let config = SystemConfig::new()
        .with_ask_config(ask)
        .with_metrics_sink(metrics.clone())
        .with_trace_sink(tracer.clone());
    let system = ActorSystem::new(config).expect("actor system");
    TestSystem {
        system,
        metrics,
        tracer,
    }
}

pub async fn wait_for_messages(ms: u64) {
    sleep(Duration::from_millis(ms)).await;
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Counts `Increment`s, answers `Get` with its count, fails on `Fail`.
#[derive(Default)]
pub struct CounterActor {
    count: u64,
}

#[async_trait]
impl Actor for CounterActor {
    async fn receive(&mut self, message: Payload, ctx: &ActorContext) -> HandlerResult {
        if message.downcast_ref::<Increment>().is_some() {
            self.count += 1;
        } else if message.downcast_ref::<Get>().is_some() {
            if let Some(sender) = ctx.sender() {
                sender.tell(self.count, Some(ctx.self_ref()));
            }
        } else if message.downcast_ref::<Fail>().is_some() {
            return Err("induced failure".into());
        }
        Ok(())
    }
}

/// Replies to every `String` with the same string.
pub struct EchoActor;

#[async_trait]
impl Actor for EchoActor {
    async fn receive(&mut self, message: Payload, ctx: &ActorContext) -> HandlerResult {
        if let Some(text) = message.downcast_ref::<String>() {
            if let Some(sender) = ctx.sender() {
                sender.tell(text.clone(), Some(ctx.self_ref()));
            }
        }
        Ok(())
    }
}

/// Receives everything, answers nothing. For timeout scenarios.
pub struct SilentActor;

#[async_trait]
impl Actor for SilentActor {
    async fn receive(&mut self, _message: Payload, _ctx: &ActorContext) -> HandlerResult {
        Ok(())
    }
}

/// Records a line per observed message into a channel, in arrival order.
pub struct ProbeActor {
    tx: mpsc::UnboundedSender<String>,
}

impl ProbeActor {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Actor for ProbeActor {
    async fn receive(&mut self, message: Payload, _ctx: &ActorContext) -> HandlerResult {
        let line = if let Some(text) = message.downcast_ref::<String>() {
            text.clone()
        } else if let Some(count) = message.downcast_ref::<u64>() {
            count.to_string()
        } else if message.downcast_ref::<Tick>().is_some() {
            "tick".to_string()
        } else if let Some(event) = message.downcast_ref::<OrderCreated>() {
            format!("order:{}", event.id)
        } else if let Some(terminated) = message.downcast_ref::<Terminated>() {
            format!("terminated:{}", terminated.0.path())
        } else {
            "other".to_string()
        };
        let _ = self.tx.send(line);
        Ok(())
    }
}

/// Drain every line currently buffered in a probe channel.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}
