//! Supervision tree behavior: restart strategies, stop decisions and
//! escalation.

mod common;

use common::*;
use hypha_runtime::{
    AllForOneStrategy, OneForOneStrategy, SupervisionDecision,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_one_for_one_restart_leaves_siblings_untouched() {
    let TestSystem { system, metrics, .. } = test_system();
    let supervisor = system
        .spawn_supervisor("sup", Arc::new(OneForOneStrategy::always_restart()))
        .await
        .unwrap();
    let c1 = supervisor.supervise("c1", CounterActor::default).await.unwrap();
    let c2 = supervisor.supervise("c2", CounterActor::default).await.unwrap();

    c2.tell(Increment, None);
    wait_for_messages(50).await;
    c1.tell(Fail, None);
    wait_for_messages(100).await;

    // The sibling kept its state.
    let c2_count = c2
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(*c2_count, 1);

    // The failed child came back fresh under the same path.
    let restarted = system.get("sup/c1").expect("restarted child");
    assert!(restarted.is_alive());
    let c1_count = restarted
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(*c1_count, 0);

    assert_eq!(metrics.counter("actors.failed"), 1);
    assert_eq!(
        metrics.counter_with("actors.restarted", &[("actorId", "sup/c1")]),
        1
    );
    assert_eq!(
        metrics.counter_with("actors.restarted", &[("actorId", "sup/c2")]),
        0
    );
    system.shutdown().await;
}

#[tokio::test]
async fn test_all_for_one_restart_recreates_every_sibling() {
    let TestSystem { system, metrics, .. } = test_system();
    let supervisor = system
        .spawn_supervisor("sup", Arc::new(AllForOneStrategy::always_restart()))
        .await
        .unwrap();
    let c1 = supervisor.supervise("c1", CounterActor::default).await.unwrap();
    let c2 = supervisor.supervise("c2", CounterActor::default).await.unwrap();

    c2.tell(Increment, None);
    wait_for_messages(50).await;
    c1.tell(Fail, None);
    wait_for_messages(100).await;

    // Both children were recreated; the sibling's state is gone too.
    let c2_count = system
        .get("sup/c2")
        .expect("recreated sibling")
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(*c2_count, 0);
    assert_eq!(
        metrics.counter_with("actors.restarted", &[("actorId", "sup/c2")]),
        1
    );
    system.shutdown().await;
}

#[tokio::test]
async fn test_stop_decision_removes_the_child() {
    let TestSystem { system, .. } = test_system();
    let strategy =
        OneForOneStrategy::new(5, None).with_decider(|_, _| SupervisionDecision::Stop);
    let supervisor = system
        .spawn_supervisor("sup", Arc::new(strategy))
        .await
        .unwrap();
    let child = supervisor.supervise("c1", CounterActor::default).await.unwrap();
    let sibling = supervisor.supervise("c2", CounterActor::default).await.unwrap();

    child.tell(Fail, None);
    wait_for_messages(100).await;

    assert!(system.get("sup/c1").is_none());
    assert!(!child.is_alive());
    assert!(sibling.is_alive());
    assert!(supervisor.child("c1").is_none());
    system.shutdown().await;
}

#[tokio::test]
async fn test_retry_cap_forces_stop() {
    let TestSystem { system, .. } = test_system();
    let supervisor = system
        .spawn_supervisor("sup", Arc::new(OneForOneStrategy::new(1, None)))
        .await
        .unwrap();
    supervisor.supervise("c1", CounterActor::default).await.unwrap();

    // First failure restarts, second hits the cap and stops the child.
    system.get("sup/c1").unwrap().tell(Fail, None);
    wait_for_messages(100).await;
    assert!(system.get("sup/c1").is_some());

    system.get("sup/c1").unwrap().tell(Fail, None);
    wait_for_messages(100).await;
    assert!(system.get("sup/c1").is_none());
    system.shutdown().await;
}

#[tokio::test]
async fn test_resume_leaves_the_child_running() {
    let TestSystem { system, .. } = test_system();
    let strategy =
        OneForOneStrategy::new(5, None).with_decider(|_, _| SupervisionDecision::Resume);
    let supervisor = system
        .spawn_supervisor("sup", Arc::new(strategy))
        .await
        .unwrap();
    let child = supervisor.supervise("c1", CounterActor::default).await.unwrap();

    child.tell(Increment, None);
    child.tell(Fail, None);
    child.tell(Increment, None);
    wait_for_messages(100).await;

    // Same instance, state intact, backlog drained.
    let count = child
        .ask_with_timeout::<u64, _>(Get, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(*count, 2);
    system.shutdown().await;
}

#[tokio::test]
async fn test_unsupervised_failure_stops_the_actor() {
    let TestSystem { system, metrics, .. } = test_system();
    let lone = system.spawn("lone", CounterActor::default).await.unwrap();

    lone.tell(Fail, None);
    wait_for_messages(100).await;

    assert!(system.get("lone").is_none());
    assert!(!lone.is_alive());
    assert_eq!(metrics.counter("actors.failed"), 1);
    assert_eq!(metrics.counter("actors.stopped"), 1);
    system.shutdown().await;
}

#[tokio::test]
async fn test_escalation_reaches_the_grandparent() {
    let TestSystem { system, metrics, .. } = test_system();
    // Root restarts whatever fails below it; the mid-level supervisor
    // escalates its children's failures instead of handling them.
    system
        .spawn_supervisor("root", Arc::new(OneForOneStrategy::always_restart()))
        .await
        .unwrap();
    let mid_strategy =
        OneForOneStrategy::new(5, None).with_decider(|_, _| SupervisionDecision::Escalate);
    let mid = system
        .spawn_supervisor("root/mid", Arc::new(mid_strategy))
        .await
        .unwrap();
    let child = mid.supervise("c", CounterActor::default).await.unwrap();

    child.tell(Fail, None);
    wait_for_messages(150).await;

    // The grandparent restarted the escalating supervisor.
    assert_eq!(
        metrics.counter_with("actors.restarted", &[("actorId", "root/mid")]),
        1
    );
    let restarted_mid = system.get("root/mid").expect("restarted supervisor");
    assert!(restarted_mid.is_alive());
    system.shutdown().await;
}

#[tokio::test]
async fn test_escalation_without_grandparent_stops_the_supervisor() {
    let TestSystem { system, .. } = test_system();
    let strategy =
        OneForOneStrategy::new(5, None).with_decider(|_, _| SupervisionDecision::Escalate);
    let supervisor = system
        .spawn_supervisor("sup", Arc::new(strategy))
        .await
        .unwrap();
    let child = supervisor.supervise("c", CounterActor::default).await.unwrap();

    child.tell(Fail, None);
    wait_for_messages(100).await;

    assert!(system.get("sup").is_none());
    system.shutdown().await;
}
