use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use waitkit::core::context::WaitContext;
use waitkit::core::errors::{TargetError, WaitError};
use waitkit::core::target::ContainerState;
use waitkit::core::wait::for_health_check;

use crate::common::MockStrategyTarget;

const POLL: Duration = Duration::from_millis(10);

#[tokio::test]
async fn test_unhealthy_target_times_out() {
    let target = MockStrategyTarget::new().with_state(|| Ok(ContainerState::running().with_health("unhealthy")));
    let err = for_health_check()
        .with_startup_timeout(Duration::from_millis(100))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap_err();

    assert!(err.is_deadline_exceeded(), "unexpected error: {}", err);
    assert!(!err.is_target_failure());
}

#[tokio::test]
async fn test_becomes_healthy() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let target = MockStrategyTarget::new().with_state(move || {
        let status = match counter.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => "starting",
            _ => "healthy",
        };
        Ok(ContainerState::running().with_health(status))
    });

    for_health_check()
        .with_timeout(Duration::from_secs(2))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_health_is_transient() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let target = MockStrategyTarget::new().with_state(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Ok(ContainerState::running())
        } else {
            Ok(ContainerState::running().with_health("healthy"))
        }
    });

    for_health_check()
        .with_startup_timeout(Duration::from_secs(2))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_oom_killed_target_is_fatal() {
    let target = MockStrategyTarget::new().with_state(|| {
        Ok(ContainerState {
            oom_killed: true,
            ..ContainerState::exited(137)
        })
    });

    let err = for_health_check()
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap_err();
    assert!(matches!(err, WaitError::OomKilled));
}

#[tokio::test]
async fn test_state_error_is_fatal() {
    let target = MockStrategyTarget::new().with_state(|| Err(TargetError::Other("daemon unreachable".to_string())));

    let err = for_health_check()
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "get state: daemon unreachable");
}
