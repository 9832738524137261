//! Behavioural tests for the instance handle's state machine.

use std::time::Duration;

use crate::backend::ImageRef;
use crate::command::CommandOutput;
use crate::errors::LifecycleError;
use crate::instance::{Capabilities, Instance};
use crate::state::InstanceState;
use crate::test_support::FakeDriver;
use crate::wait::{BackoffPolicy, WaitPolicy};

fn fast_policy() -> WaitPolicy {
    WaitPolicy {
        timeout: Duration::from_secs(60),
        backoff: BackoffPolicy::Fixed {
            interval: Duration::from_secs(1),
        },
    }
}

fn handle(driver: FakeDriver) -> Instance<FakeDriver> {
    Instance::new(driver, fast_policy())
}

#[tokio::test]
async fn start_on_running_handle_skips_the_backend() {
    let driver = FakeDriver::new("vm-1");
    let mut instance = handle(driver.clone()).with_state(InstanceState::Running);

    instance.start(false).await.expect("start should succeed");

    assert!(driver.calls().is_empty());
    assert_eq!(instance.last_known_state(), InstanceState::Running);
}

#[tokio::test]
async fn shutdown_on_stopped_handle_skips_the_backend() {
    let driver = FakeDriver::new("vm-1");
    let mut instance = handle(driver.clone()).with_state(InstanceState::Stopped);

    instance
        .shutdown(false)
        .await
        .expect("shutdown should succeed");

    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn delete_on_deleted_handle_skips_the_backend() {
    let driver = FakeDriver::new("vm-1");
    let mut instance = handle(driver.clone()).with_state(InstanceState::Deleted);

    instance.delete(false).await.expect("delete should succeed");

    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn deleted_handle_rejects_every_other_operation() {
    let driver = FakeDriver::new("vm-1");
    let mut instance = handle(driver.clone()).with_state(InstanceState::Deleted);

    let start = instance.start(false).await;
    let shutdown = instance.shutdown(false).await;
    let execute = instance.execute(&[String::from("true")]).await;

    assert!(matches!(start, Err(LifecycleError::InstanceGone { .. })));
    assert!(matches!(shutdown, Err(LifecycleError::InstanceGone { .. })));
    assert!(matches!(
        execute,
        Err(LifecycleError::InstanceGone { ref instance_id }) if instance_id == "vm-1"
    ));
    assert!(driver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn deletion_in_flight_rejects_everything_but_the_delete_wait() {
    let driver = FakeDriver::new("vm-1");
    let mut instance = handle(driver.clone()).with_state(InstanceState::Running);
    instance.delete(false).await.expect("delete should succeed");

    let start = instance.start(false).await;
    let shutdown = instance.shutdown(false).await;
    let execute = instance.execute(&[String::from("true")]).await;

    assert!(matches!(start, Err(LifecycleError::InstanceGone { .. })));
    assert!(matches!(shutdown, Err(LifecycleError::InstanceGone { .. })));
    assert!(matches!(execute, Err(LifecycleError::InstanceGone { .. })));
    assert_eq!(driver.calls(), vec![String::from("delete")]);

    instance
        .wait_for_delete()
        .await
        .expect("confirming absence still works");
    assert_eq!(instance.last_known_state(), InstanceState::Deleted);
}

#[tokio::test]
async fn deleted_handle_still_allows_wait_for_delete() {
    let driver = FakeDriver::new("vm-1");
    let mut instance = handle(driver.clone()).with_state(InstanceState::Deleted);

    instance
        .wait_for_delete()
        .await
        .expect("confirming absence should succeed");
}

#[tokio::test(start_paused = true)]
async fn start_without_wait_leaves_state_undetermined() {
    let driver = FakeDriver::new("vm-1");
    let mut instance = handle(driver.clone()).with_state(InstanceState::Stopped);

    instance.start(false).await.expect("start should succeed");

    assert_eq!(driver.calls(), vec![String::from("start")]);
    assert_eq!(instance.last_known_state(), InstanceState::Unknown);
}

#[tokio::test(start_paused = true)]
async fn start_with_wait_records_running() {
    let driver = FakeDriver::new("vm-1");
    driver.ready_after(2);
    let mut instance = handle(driver.clone()).with_state(InstanceState::Stopped);

    instance.start(true).await.expect("start should succeed");

    assert_eq!(instance.last_known_state(), InstanceState::Running);
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_leaves_the_handle_usable() {
    let driver = FakeDriver::new("vm-1");
    driver.ready_after(u32::MAX);
    let mut instance = handle(driver.clone());

    let result = instance.wait().await;

    assert!(matches!(
        result,
        Err(LifecycleError::Timeout { ref action, .. }) if action == "wait_for_ready"
    ));
    instance.delete(false).await.expect("cleanup still works");
    assert!(driver.calls().contains(&String::from("delete")));
}

#[tokio::test(start_paused = true)]
async fn restart_is_a_full_stop_then_start() {
    let driver = FakeDriver::new("vm-1");
    driver.push_state(InstanceState::Stopped);
    let mut instance = handle(driver.clone()).with_state(InstanceState::Running);

    instance.restart(true).await.expect("restart should succeed");

    assert_eq!(driver.calls(), vec![String::from("stop"), String::from("start")]);
    assert_eq!(instance.last_known_state(), InstanceState::Running);
}

#[tokio::test(start_paused = true)]
async fn delete_with_wait_confirms_absence() {
    let driver = FakeDriver::new("vm-1");
    driver.gone_after(3);
    let mut instance = handle(driver.clone()).with_state(InstanceState::Running);

    instance.delete(true).await.expect("delete should succeed");

    assert_eq!(instance.last_known_state(), InstanceState::Deleted);
    instance
        .delete(false)
        .await
        .expect("repeat delete is a no-op");
    assert_eq!(driver.calls(), vec![String::from("delete")]);
}

#[tokio::test]
async fn start_propagates_request_failures() {
    let driver = FakeDriver::new("vm-1");
    driver.fail_next_start(LifecycleError::Operation {
        resource_id: String::from("vm-1"),
        state: InstanceState::Stopped,
        message: String::from("quota exceeded"),
    });
    let mut instance = handle(driver).with_state(InstanceState::Stopped);

    let result = instance.start(false).await;

    assert!(matches!(
        result,
        Err(LifecycleError::Operation { ref message, .. }) if message == "quota exceeded"
    ));
}

#[tokio::test]
async fn state_probe_failure_degrades_to_unknown() {
    let driver = FakeDriver::new("vm-1");
    driver.fail_next_state_fetch(LifecycleError::Parse {
        resource: String::from("vm-1"),
        message: String::from("malformed status"),
    });
    let mut instance = handle(driver).with_state(InstanceState::Running);

    let state = instance.state().await;

    assert_eq!(state, InstanceState::Unknown);
    assert_eq!(instance.last_known_state(), InstanceState::Unknown);
}

#[tokio::test]
async fn state_refresh_updates_the_cache() {
    let driver = FakeDriver::new("vm-1");
    driver.push_state(InstanceState::Stopped);
    let mut instance = handle(driver).with_state(InstanceState::Running);

    let state = instance.state().await;

    assert_eq!(state, InstanceState::Stopped);
    assert_eq!(instance.last_known_state(), InstanceState::Stopped);
}

#[tokio::test]
async fn ip_reads_through_the_driver() {
    let driver = FakeDriver::new("vm-1");
    driver.set_ip("10.0.0.7".parse().expect("valid address"));
    let instance = handle(driver);

    let ip = instance.ip().await.expect("address should resolve");

    assert_eq!(ip, Some("10.0.0.7".parse().expect("valid address")));
}

#[tokio::test]
async fn execute_reports_non_zero_exit_as_data() {
    let driver = FakeDriver::new("vm-1");
    driver.push_exec_output(CommandOutput::err(2, "boom"));
    let instance = handle(driver);

    let output = instance
        .execute(&[String::from("false")])
        .await
        .expect("execute should run");

    assert!(output.failed());
    assert_eq!(output.stderr, "boom");
}

#[tokio::test]
async fn missing_capability_is_a_checked_unsupported_error() {
    let driver = FakeDriver::new("vm-1");
    driver.set_capabilities(Capabilities::none());
    let instance = handle(driver.clone());

    let console = instance.console_log().await;
    let capture = instance.capture_image("snap").await;

    assert!(matches!(
        console,
        Err(LifecycleError::Unsupported { ref operation, .. }) if operation == "console_log"
    ));
    assert!(matches!(
        capture,
        Err(LifecycleError::Unsupported { ref operation, .. }) if operation == "capture_image"
    ));
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn declared_capabilities_route_to_the_driver() {
    let driver = FakeDriver::new("vm-1");
    let instance = handle(driver.clone());

    let console = instance.console_log().await.expect("console supported");
    let image = instance.capture_image("snap").await.expect("capture supported");

    assert_eq!(console, "fake console output");
    assert_eq!(image, ImageRef::new("image-snap"));
    assert_eq!(
        driver.calls(),
        vec![
            String::from("console_log"),
            String::from("capture_image snap"),
        ]
    );
}
