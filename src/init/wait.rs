// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

pub type TaskResult = Result<(), BoxError>;

/// Wait for the first task to finish and return its result.
///
/// An empty set resolves immediately with `Ok`.
pub async fn wait_for_any_task(tasks: &mut JoinSet<TaskResult>) -> TaskResult {
    match tasks.join_next().await {
        None => Ok(()),
        Some(res) => res?,
    }
}

/// Drain the set, giving up once `timeout` has passed.
///
/// The last task error wins. Tasks still running at the deadline are aborted.
pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<TaskResult>,
    timeout: Duration,
) -> TaskResult {
    let stop_at = Instant::now() + timeout;
    let mut result = Ok(());

    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                tasks.abort_all();
                return Err("timed out waiting for tasks to complete".into());
            }
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => error!(error = ?e, "Failed to join with task"),
        }
    }

    result
}
