//! Timeout, retry and typing behavior of the ask protocol.

mod common;

use common::*;
use hypha_runtime::{
    Actor, ActorContext, AskConfig, ErrorKind, HandlerResult, Payload, RuntimeError,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_successful_ask_emits_one_attempt() {
    let TestSystem { system, tracer, .. } = test_system();
    let counter = system.spawn("counter", CounterActor::default).await.unwrap();

    counter.tell(Increment, None);
    let count = counter
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(*count, 1);

    assert_eq!(tracer.count_named("ask_attempt"), 1);
    assert_eq!(tracer.count_named("ask_retry"), 0);
    assert_eq!(tracer.count_named("ask_failed_final"), 0);
    system.shutdown().await;
}

#[tokio::test]
async fn test_ask_timeout_without_retries() {
    let config = AskConfig {
        default_timeout: Duration::from_millis(100),
        enable_retries: false,
        ..AskConfig::default()
    };
    let TestSystem { system, .. } = test_system_with(config);
    let silent = system.spawn("silent", || SilentActor).await.unwrap();

    let started = Instant::now();
    let result = silent.ask::<u64, _>("ping".to_string()).await;
    let elapsed = started.elapsed();

    match result {
        Err(RuntimeError::AskTimeout {
            target,
            timeout,
            attempt,
        }) => {
            assert_eq!(target.as_str(), "silent");
            assert_eq!(timeout, Duration::from_millis(100));
            assert_eq!(attempt, 1);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(300));
    system.shutdown().await;
}

#[tokio::test]
async fn test_ask_retries_with_backoff() {
    let config = AskConfig {
        default_timeout: Duration::from_millis(50),
        max_retries: 2,
        retry_backoff_base: Duration::from_millis(10),
        retry_backoff_multiplier: 2.0,
        ..AskConfig::default()
    };
    let TestSystem { system, tracer, .. } = test_system_with(config);
    let silent = system.spawn("silent", || SilentActor).await.unwrap();

    let started = Instant::now();
    let result = silent.ask::<u64, _>("ping".to_string()).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(RuntimeError::AskTimeout { attempt: 3, .. })
    ));
    // 50ms + backoff 10ms + 50ms + backoff 20ms + 50ms
    assert!(elapsed >= Duration::from_millis(180));
    assert_eq!(tracer.count_named("ask_attempt"), 3);
    assert_eq!(tracer.count_named("ask_retry"), 2);
    assert_eq!(tracer.count_named("ask_failed_final"), 1);
    assert_eq!(tracer.count_named("ask_failed_non_retryable"), 0);
    system.shutdown().await;
}

#[tokio::test]
async fn test_type_mismatch_is_not_retried() {
    struct WrongTypeActor;

    #[async_trait::async_trait]
    impl Actor for WrongTypeActor {
        async fn receive(&mut self, _message: Payload, ctx: &ActorContext) -> HandlerResult {
            if let Some(sender) = ctx.sender() {
                sender.tell("not a number".to_string(), Some(ctx.self_ref()));
            }
            Ok(())
        }
    }

    let TestSystem { system, tracer, .. } = test_system();
    let wrong = system.spawn("wrong", || WrongTypeActor).await.unwrap();

    let result = wrong
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
        .await;
    match result {
        Err(error @ RuntimeError::ResponseTypeMismatch { .. }) => {
            assert_eq!(error.kind(), ErrorKind::ResponseTypeMismatch);
            assert!(error.to_string().contains("u64"));
        }
        other => panic!("expected type mismatch, got {other:?}"),
    }
    assert_eq!(tracer.count_named("ask_attempt"), 1);
    assert_eq!(tracer.count_named("ask_failed_non_retryable"), 1);
    system.shutdown().await;
}

#[tokio::test]
async fn test_ask_dead_target_fails_immediately() {
    let TestSystem { system, .. } = test_system();
    let target = system.spawn("target", CounterActor::default).await.unwrap();
    system.stop(&target).await.unwrap();

    let result = target.ask::<u64, _>(Get).await;
    assert!(matches!(result, Err(RuntimeError::RefNotAlive(_))));
    system.shutdown().await;
}

#[tokio::test]
async fn test_custom_retryable_kinds() {
    // With an empty retryable set even timeouts are final.
    let config = AskConfig {
        default_timeout: Duration::from_millis(50),
        retryable_kinds: HashSet::new(),
        ..AskConfig::default()
    };
    let TestSystem { system, tracer, .. } = test_system_with(config);
    let silent = system.spawn("silent", || SilentActor).await.unwrap();

    let result = silent.ask::<u64, _>("ping".to_string()).await;
    assert!(matches!(result, Err(RuntimeError::AskTimeout { .. })));
    assert_eq!(tracer.count_named("ask_attempt"), 1);
    assert_eq!(tracer.count_named("ask_failed_non_retryable"), 1);
    system.shutdown().await;
}

#[tokio::test]
async fn test_ask_from_inside_a_handler_does_not_stall_the_pump() {
    struct RelayActor;

    #[async_trait::async_trait]
    impl Actor for RelayActor {
        async fn receive(&mut self, message: Payload, ctx: &ActorContext) -> HandlerResult {
            if message.downcast_ref::<Get>().is_some() {
                let system = ctx.system()?;
                let counter = system.get("counter").ok_or("counter missing")?;
                // Awaiting inside the handler suspends this actor only; the
                // pump keeps servicing the counter's mailbox.
                let count = counter
                    .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
                    .await?;
                if let Some(sender) = ctx.sender() {
                    sender.tell(*count, Some(ctx.self_ref()));
                }
            }
            Ok(())
        }
    }

    let TestSystem { system, .. } = test_system();
    let counter = system.spawn("counter", CounterActor::default).await.unwrap();
    let relay = system.spawn("relay", || RelayActor).await.unwrap();

    counter.tell(Increment, None);
    counter.tell(Increment, None);
    counter.tell(Increment, None);

    let count = relay
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(*count, 3);
    system.shutdown().await;
}

#[tokio::test]
async fn test_attempt_envelopes_share_the_correlation_id() {
    let config = AskConfig {
        default_timeout: Duration::from_millis(40),
        max_retries: 1,
        retry_backoff_base: Duration::from_millis(5),
        ..AskConfig::default()
    };
    let TestSystem { system, tracer, .. } = test_system_with(config);
    let silent = system.spawn("silent", || SilentActor).await.unwrap();

    let _ = silent.ask::<u64, _>("ping".to_string()).await;
    let attempts = tracer.events_named("ask_attempt");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].correlation_id, attempts[1].correlation_id);
    system.shutdown().await;
}
