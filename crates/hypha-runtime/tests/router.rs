//! Round-robin router pools.

mod common;

use common::*;
use hypha_runtime::{Actor, ActorContext, HandlerResult, Payload};
use std::time::Duration;

#[tokio::test]
async fn test_round_robin_preserves_sender_and_order() {
    let TestSystem { system, .. } = test_system();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let probe_factory = move || ProbeActor::new(tx.clone());
    let probe = system.spawn("probe", probe_factory).await.unwrap();
    let router = system.spawn_pool("pool", 2, || EchoActor).await.unwrap();

    for i in 1..=4 {
        router.tell(format!("m{i}"), Some(&probe));
    }
    wait_for_messages(150).await;

    // Workers echo to the original sender, not the router, in FIFO order.
    assert_eq!(drain(&mut rx), vec!["m1", "m2", "m3", "m4"]);
    system.shutdown().await;
}

#[tokio::test]
async fn test_messages_are_spread_across_workers() {
    struct TaggingActor;

    #[async_trait::async_trait]
    impl Actor for TaggingActor {
        async fn receive(&mut self, message: Payload, ctx: &ActorContext) -> HandlerResult {
            if message.downcast_ref::<String>().is_some() {
                if let Some(sender) = ctx.sender() {
                    sender.tell(ctx.path().to_string(), Some(ctx.self_ref()));
                }
            }
            Ok(())
        }
    }

    let TestSystem { system, .. } = test_system();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let probe_factory = move || ProbeActor::new(tx.clone());
    let probe = system.spawn("probe", probe_factory).await.unwrap();
    let router = system.spawn_pool("pool", 3, || TaggingActor).await.unwrap();

    for i in 0..6 {
        router.tell(format!("job{i}"), Some(&probe));
    }
    wait_for_messages(150).await;

    let seen = drain(&mut rx);
    assert_eq!(
        seen,
        vec![
            "pool/0", "pool/1", "pool/2", "pool/0", "pool/1", "pool/2"
        ]
    );
    system.shutdown().await;
}

#[tokio::test]
async fn test_ask_through_the_router_reaches_the_caller() {
    let TestSystem { system, .. } = test_system();
    let router = system.spawn_pool("pool", 2, || EchoActor).await.unwrap();

    let reply = router
        .ask_with_timeout::<String, _>("hello".to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply.as_str(), "hello");
    system.shutdown().await;
}

#[tokio::test]
async fn test_failed_worker_is_replaced() {
    let TestSystem { system, metrics, .. } = test_system();
    let router = system.spawn_pool("pool", 2, CounterActor::default).await.unwrap();

    // First message lands on worker 0 and kills it; the default pool
    // strategy respawns it.
    router.tell(Fail, None);
    wait_for_messages(150).await;

    assert_eq!(
        metrics.counter_with("actors.restarted", &[("actorId", "pool/0")]),
        1
    );
    let worker = system.get("pool/0").expect("respawned worker");
    assert!(worker.is_alive());

    // The pool keeps routing.
    router.tell(Increment, None);
    router.tell(Increment, None);
    wait_for_messages(100).await;
    let count = system
        .get("pool/1")
        .unwrap()
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(*count, 1);
    system.shutdown().await;
}

#[tokio::test]
async fn test_empty_pool_is_rejected() {
    let TestSystem { system, .. } = test_system();
    let result = system.spawn_pool("pool", 0, || EchoActor).await;
    assert!(result.is_err());
    system.shutdown().await;
}
