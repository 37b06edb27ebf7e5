use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use waitkit::core::context::WaitContext;
use waitkit::core::errors::TargetError;
use waitkit::core::target::ContainerState;
use waitkit::core::wait::for_exit;

use crate::common::MockStrategyTarget;

const POLL: Duration = Duration::from_millis(10);

#[tokio::test]
async fn test_waits_until_not_running() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let target = MockStrategyTarget::new().with_state(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
            Ok(ContainerState::running())
        } else {
            Ok(ContainerState::exited(0))
        }
    });

    for_exit()
        .with_exit_timeout(Duration::from_secs(2))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
    assert_eq!(polls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_gone_target_counts_as_exited() {
    let target = MockStrategyTarget::new().with_state(|| Err(TargetError::NotFound("container abc".to_string())));
    for_exit()
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_running_target_times_out() {
    let target = MockStrategyTarget::new();
    let err = for_exit()
        .with_timeout(Duration::from_millis(100))
        .with_poll_interval(POLL)
        .wait_until_ready(&WaitContext::background(), &target)
        .await
        .unwrap_err();
    assert!(err.is_deadline_exceeded());
}

#[test]
fn test_no_default_timeout() {
    assert_eq!(for_exit().timeout(), None);
    assert_eq!(
        for_exit().with_timeout(Duration::from_secs(4)).timeout(),
        Some(Duration::from_secs(4))
    );
}
