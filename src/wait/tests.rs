//! Timing-sensitive tests for the wait engine, run under a paused clock.

use std::time::Duration;

use rstest::rstest;
use tokio::time::{Instant, sleep};

use crate::errors::LifecycleError;
use crate::wait::observe::{OperationStatus, await_operation, delegate};
use crate::wait::{BackoffPolicy, WaitPolicy, WaitResult, wait_or_timeout, wait_until};

fn unit_policy(timeout_secs: u64) -> WaitPolicy {
    WaitPolicy::fixed(Duration::from_secs(timeout_secs), Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn wait_until_returns_ready_after_exactly_three_probes() {
    let started = Instant::now();
    let mut probes: u32 = 0;

    let result = wait_until(&unit_policy(10), || {
        probes += 1;
        let ready = probes >= 3;
        async move { Ok::<_, LifecycleError>(ready.then_some(())) }
    })
    .await;

    assert_eq!(result, Ok(WaitResult::Ready(())));
    assert_eq!(probes, 3);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn wait_until_never_ready_times_out_at_deadline() {
    let started = Instant::now();
    let mut probes: u32 = 0;

    let result = wait_until(&unit_policy(5), || {
        probes += 1;
        async move { Ok::<Option<()>, LifecycleError>(None) }
    })
    .await;

    assert_eq!(result, Ok(WaitResult::TimedOut));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(probes, 5);
}

#[tokio::test(start_paused = true)]
async fn wait_until_clamps_final_sleep_to_the_deadline() {
    let policy = WaitPolicy::fixed(Duration::from_secs(5), Duration::from_secs(3));
    let started = Instant::now();
    let mut probes: u32 = 0;

    let result = wait_until(&policy, || {
        probes += 1;
        async move { Ok::<Option<()>, LifecycleError>(None) }
    })
    .await;

    // Probes land at t=3 and t=5; the second sleep shrinks from 3s to 2s.
    assert_eq!(result, Ok(WaitResult::TimedOut));
    assert_eq!(probes, 2);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn wait_until_propagates_probe_errors() {
    let result: Result<WaitResult<()>, LifecycleError> =
        wait_until(&unit_policy(5), || async {
            Err(LifecycleError::Config(String::from("broken probe")))
        })
        .await;

    assert_eq!(
        result,
        Err(LifecycleError::Config(String::from("broken probe")))
    );
}

#[tokio::test(start_paused = true)]
async fn wait_or_timeout_labels_the_timeout() {
    let result: Result<(), LifecycleError> =
        wait_or_timeout(&unit_policy(2), "wait_for_ready", "srv-1", || async {
            Ok(None)
        })
        .await;

    assert_eq!(result, Err(LifecycleError::timeout("wait_for_ready", "srv-1")));
}

#[rstest]
#[case(0, 1)]
#[case(1, 2)]
#[case(2, 4)]
#[case(3, 8)]
#[case(10, 8)]
fn exponential_backoff_doubles_until_the_cap(#[case] attempt: u32, #[case] expected_secs: u64) {
    let backoff = BackoffPolicy::exponential(
        Duration::from_secs(1),
        2,
        Duration::from_secs(8),
    );
    assert_eq!(backoff.delay(attempt), Duration::from_secs(expected_secs));
}

#[test]
fn fixed_backoff_ignores_the_attempt_number() {
    let backoff = BackoffPolicy::fixed(Duration::from_secs(2));
    assert_eq!(backoff.delay(0), Duration::from_secs(2));
    assert_eq!(backoff.delay(100), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn await_operation_polls_until_terminal_status() {
    let mut statuses = vec![
        OperationStatus::new("PENDING"),
        OperationStatus::new("RUNNING"),
        OperationStatus::new("DONE"),
    ]
    .into_iter();

    let result = await_operation(&unit_policy(10), "op-1", "DONE", || {
        let next = statuses.next().unwrap_or_else(|| OperationStatus::new("DONE"));
        async move { Ok(next) }
    })
    .await;

    assert_eq!(result, Ok(OperationStatus::new("DONE")));
}

#[tokio::test(start_paused = true)]
async fn await_operation_surfaces_terminal_errors() {
    let result = await_operation(&unit_policy(10), "op-2", "DONE", || async {
        Ok(OperationStatus {
            status: String::from("DONE"),
            error: Some(String::from("quota exceeded")),
        })
    })
    .await;

    assert!(matches!(
        result,
        Err(LifecycleError::Operation { ref resource_id, ref message, .. })
            if resource_id == "op-2" && message == "quota exceeded"
    ));
}

#[tokio::test(start_paused = true)]
async fn await_operation_times_out_when_never_terminal() {
    let result = await_operation(&unit_policy(3), "op-3", "DONE", || async {
        Ok(OperationStatus::new("PENDING"))
    })
    .await;

    assert_eq!(result, Err(LifecycleError::timeout("operation", "op-3")));
}

#[tokio::test(start_paused = true)]
async fn delegate_passes_the_waiter_result_through() {
    let result = delegate(&unit_policy(5), "image_available", "img-1", async {
        Ok::<_, LifecycleError>(42_u32)
    })
    .await;

    assert_eq!(result, Ok(42));
}

#[tokio::test(start_paused = true)]
async fn delegate_bounds_a_slow_provider_waiter() {
    let result: Result<(), LifecycleError> =
        delegate(&unit_policy(1), "image_available", "img-2", async {
            sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

    assert_eq!(
        result,
        Err(LifecycleError::timeout("image_available", "img-2"))
    );
}
