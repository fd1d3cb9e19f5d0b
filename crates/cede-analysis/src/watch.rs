use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use cede_types::TaskStatus;

use crate::client::StatusSource;

/// Fixed-interval status watcher with cooperative cancellation.
///
/// Fetches once on spawn and then on every interval tick, stopping itself
/// after the first terminal snapshot. Fetch errors are logged and skipped;
/// the next tick retries. After [`TaskWatcher::stop`] the observer is never
/// invoked again: the token is checked before each tick, raced against the
/// in-flight request, and consulted once more before the callback runs, so
/// an already-in-flight response is dropped rather than surfaced.
pub struct TaskWatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskWatcher {
    pub fn spawn(
        source: Arc<dyn StatusSource>,
        task_id: impl Into<String>,
        interval: Duration,
        mut on_update: impl FnMut(TaskStatus) + Send + 'static,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_id = task_id.into();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let status = tokio::select! {
                    _ = token.cancelled() => break,
                    fetched = source.task_status(&task_id) => match fetched {
                        Ok(status) => status,
                        Err(err) => {
                            warn!("watch poll for task {task_id} failed: {err}");
                            continue;
                        }
                    }
                };
                if token.is_cancelled() {
                    break;
                }
                let terminal = status.status.is_terminal();
                on_update(status);
                if terminal {
                    break;
                }
            }
        });
        Self { cancel, handle }
    }

    /// Ask the watch loop to stop. Cancellation is cooperative, not
    /// preemptive; the loop exits at its next checkpoint.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A clone of the watcher's cancellation token, for wiring an external
    /// stop signal to the loop.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the watch loop to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}
