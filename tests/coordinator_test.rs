//! Readiness gating and timeout races for `call_when_connected`
//!
//! Every test ends by checking that no timer is left live and that the
//! one-shot `Opened` listener was removed.

mod common;

use std::time::Duration;

use common::{settle, Behavior, MockTransport};
use conductor_client::{call_when_connected, ClientError, EventKind, TimerKind, TimerRegistry};
use serde_json::json;
use tokio::time::Instant;

const MS_100: Option<Duration> = Some(Duration::from_millis(100));

fn assert_no_leaks(timers: &TimerRegistry, mock: &MockTransport) {
    assert_eq!(timers.active(), 0, "timer left live");
    assert_eq!(mock.listeners(EventKind::Opened), 0, "open listener left registered");
}

// =============================================================================
// Transport already ready
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ready_transport_skips_connect_timer() {
    let mock = MockTransport::ready(Behavior::Respond(json!({"ok": true})));
    let timers = TimerRegistry::new();

    let result = call_when_connected(mock.dyn_ref(), &timers, "info/instances", json!({}), MS_100)
        .await
        .unwrap();

    assert_eq!(result, json!({"ok": true}));
    assert_eq!(timers.armed(TimerKind::Connect), 0);
    assert_eq!(timers.armed(TimerKind::Response), 1);
    assert_eq!(mock.calls(), vec![("info/instances".to_string(), json!({}))]);
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_arms_no_timers() {
    let mock = MockTransport::ready(Behavior::Echo);
    let timers = TimerRegistry::new();

    let result = call_when_connected(mock.dyn_ref(), &timers, "echo", json!([1, 2]), None)
        .await
        .unwrap();

    assert_eq!(result, json!([1, 2]));
    assert_eq!(timers.armed(TimerKind::Connect), 0);
    assert_eq!(timers.armed(TimerKind::Response), 0);
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_response_timeout() {
    let mock = MockTransport::ready(Behavior::Hang);
    let timers = TimerRegistry::new();
    let started = Instant::now();

    let err = call_when_connected(
        mock.dyn_ref(),
        &timers,
        "slow/method",
        json!({"n": 1}),
        Some(Duration::from_millis(50)),
    )
    .await
    .unwrap_err();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(60));
    match &err {
        ClientError::ResponseTimeout { method, payload } => {
            assert_eq!(method, "slow/method");
            assert_eq!(payload, r#"{"n":1}"#);
        }
        other => panic!("expected response timeout, got {:?}", other),
    }
    assert!(err.to_string().contains("during ws call"));
    assert_no_leaks(&timers, &mock);

    // The abandoned transport call was dropped
    settle(|| mock.in_flight() == 0).await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_propagates_unchanged() {
    let mock = MockTransport::ready(Behavior::Fail("zome panicked".into()));
    let timers = TimerRegistry::new();

    let err = call_when_connected(mock.dyn_ref(), &timers, "call", json!(null), MS_100)
        .await
        .unwrap_err();

    match err {
        ClientError::Transport(message) => assert_eq!(message, "zome panicked"),
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_response_just_before_timeout_wins() {
    let mock = MockTransport::ready(Behavior::Delay(Duration::from_millis(90), json!("done")));
    let timers = TimerRegistry::new();

    let result = call_when_connected(mock.dyn_ref(), &timers, "m", json!({}), MS_100).await;

    assert_eq!(result.unwrap(), json!("done"));
    assert_no_leaks(&timers, &mock);
}

// =============================================================================
// Transport not yet ready
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_call_is_queued_until_open() {
    let mock = MockTransport::not_ready(Behavior::Respond(json!(42)));
    let timers = TimerRegistry::new();

    let transport = mock.dyn_ref();
    let registry = timers.clone();
    let task = tokio::spawn(async move {
        call_when_connected(transport, &registry, "a/b", json!({"x": 1}), MS_100).await
    });

    settle(|| mock.listeners(EventKind::Opened) == 1).await;
    assert!(mock.calls().is_empty(), "call forwarded before open");
    assert_eq!(timers.armed(TimerKind::Connect), 1);
    assert_eq!(timers.active(), 1);

    mock.open();

    // Connect timer was swapped for the response timer, never both
    assert_eq!(timers.armed(TimerKind::Response), 1);
    assert!(timers.active() <= 1);

    assert_eq!(task.await.unwrap().unwrap(), json!(42));
    assert_eq!(mock.calls(), vec![("a/b".to_string(), json!({"x": 1}))]);
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let mock = MockTransport::not_ready(Behavior::Respond(json!(1)));
    let timers = TimerRegistry::new();
    let started = Instant::now();

    let err = call_when_connected(
        mock.dyn_ref(),
        &timers,
        "info/instances",
        json!({"a": "b"}),
        MS_100,
    )
    .await
    .unwrap_err();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(110));
    assert!(matches!(err, ClientError::ConnectTimeout { .. }));
    assert!(err.to_string().contains("info/instances"));
    assert!(err.to_string().contains("waiting for ws to connect"));
    assert_eq!(timers.armed(TimerKind::Response), 0);
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_open_after_connect_timeout_does_not_forward() {
    let mock = MockTransport::not_ready(Behavior::Respond(json!(1)));
    let timers = TimerRegistry::new();

    let err = call_when_connected(mock.dyn_ref(), &timers, "late", json!({}), MS_100)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ConnectTimeout { .. }));

    mock.open();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(mock.calls().is_empty());
    assert_eq!(timers.armed(TimerKind::Response), 0);
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_response_timeout_after_queued_open() {
    let mock = MockTransport::not_ready(Behavior::Hang);
    let timers = TimerRegistry::new();

    let transport = mock.dyn_ref();
    let registry = timers.clone();
    let task = tokio::spawn(async move {
        call_when_connected(transport, &registry, "queued", json!({}), MS_100).await
    });

    settle(|| mock.listeners(EventKind::Opened) == 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    mock.open();

    // The response phase gets a fresh full timeout of its own
    let started = Instant::now();
    let err = task.await.unwrap().unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(err, ClientError::ResponseTimeout { .. }));
    assert_eq!(timers.armed(TimerKind::Connect), 1);
    assert_eq!(timers.armed(TimerKind::Response), 1);
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_after_queued_open() {
    let mock = MockTransport::not_ready(Behavior::Fail("socket reset".into()));
    let timers = TimerRegistry::new();

    let transport = mock.dyn_ref();
    let registry = timers.clone();
    let task = tokio::spawn(async move {
        call_when_connected(transport, &registry, "m", json!({}), MS_100).await
    });

    settle(|| mock.listeners(EventKind::Opened) == 1).await;
    mock.open();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Transport(ref m) if m == "socket reset"));
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_waits_indefinitely() {
    let mock = MockTransport::not_ready(Behavior::Hang);
    let timers = TimerRegistry::new();

    let transport = mock.dyn_ref();
    let registry = timers.clone();
    let pending = call_when_connected(transport, &registry, "forever", json!({}), None);

    // Ten times the default timeout
    let outcome = tokio::time::timeout(Duration::from_millis(50_000), pending).await;
    assert!(outcome.is_err(), "call settled without a timeout");
    assert_eq!(timers.armed(TimerKind::Connect), 0);

    // Dropping the future released the listener
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_ready_but_silent() {
    let mock = MockTransport::ready(Behavior::Hang);
    let timers = TimerRegistry::new();

    let pending = call_when_connected(mock.dyn_ref(), &timers, "forever", json!({}), None);
    let outcome = tokio::time::timeout(Duration::from_millis(50_000), pending).await;

    assert!(outcome.is_err());
    assert_eq!(timers.armed(TimerKind::Response), 0);
    settle(|| mock.in_flight() == 0).await;
    assert_no_leaks(&timers, &mock);
}

#[tokio::test(start_paused = true)]
async fn test_many_queued_calls_share_one_open() {
    let mock = MockTransport::not_ready(Behavior::Echo);
    let timers = TimerRegistry::new();

    let mut tasks = Vec::new();
    for n in 0..5 {
        let transport = mock.dyn_ref();
        let registry = timers.clone();
        tasks.push(tokio::spawn(async move {
            call_when_connected(transport, &registry, "echo", json!(n), MS_100).await
        }));
    }

    settle(|| mock.listeners(EventKind::Opened) == 5).await;
    assert_eq!(timers.active(), 5);
    mock.open();

    for (n, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), json!(n));
    }
    assert_eq!(mock.calls().len(), 5);
    assert_no_leaks(&timers, &mock);
}
