//! Issue/wait decoupling for batched operations.
//!
//! The engine introduces no parallel execution of its own: throughput comes
//! purely from issuing every request before waiting on any of them, so the
//! backend-side operations proceed concurrently and N operations complete
//! in roughly the time of the slowest one. Callers may apply the same
//! pattern manually to any two independent handles.

use tracing::debug;

use crate::backend::{CloudBackend, LaunchOptions};
use crate::errors::LifecycleError;
use crate::instance::{Instance, InstanceDriver};

/// Launches `count` instances from `image_id` and waits for all of them.
///
/// Launches are issued non-blocking and sequentially; readiness waits begin
/// only after every issue has been dispatched.
///
/// # Errors
///
/// Returns the first launch or wait failure. Handles already launched are
/// returned to the caller's responsibility only on full success; on error,
/// clean up via the backend's session tag.
pub async fn launch_many<B: CloudBackend>(
    backend: &B,
    count: usize,
    image_id: &str,
    options: &LaunchOptions,
) -> Result<Vec<Instance<B::Driver>>, LifecycleError> {
    let mut fleet = Vec::with_capacity(count);
    for _ in 0..count {
        fleet.push(backend.launch(image_id, options, false).await?);
    }
    debug!(count, image = image_id, "issued launches; waiting for readiness");

    for instance in &mut fleet {
        instance.wait().await?;
    }
    Ok(fleet)
}

/// Deletes every handle and waits for the backend to confirm absence.
///
/// Deletions are issued non-blocking first; absence waits follow.
///
/// # Errors
///
/// Returns the first deletion or wait failure.
pub async fn delete_many<D: InstanceDriver>(
    instances: &mut [Instance<D>],
) -> Result<(), LifecycleError> {
    for instance in &mut *instances {
        instance.delete(false).await?;
    }
    debug!(count = instances.len(), "issued deletions; waiting for absence");

    for instance in instances {
        instance.wait_for_delete().await?;
    }
    Ok(())
}
