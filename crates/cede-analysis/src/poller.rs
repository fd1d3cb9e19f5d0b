use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tracing::warn;

use cede_types::{ProgressSnapshot, TaskState, TaskStatus};

use crate::client::{EngineClient, StatusSource};
use crate::error::AnalysisError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Progress value reported while the engine has not yet said anything
/// useful (absent or zero progress).
const PROGRESS_FLOOR: u8 = 10;

/// Budget for one polling run. Worst-case wall clock is
/// `max_attempts * interval` plus network time.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Coarse milestone surfaced to [`analyze_file`] observers.
#[derive(Debug, Clone)]
pub struct AnalysisProgress {
    pub stage: String,
    pub progress: u8,
    /// Raw engine snapshot behind this update; absent for the synthesized
    /// submit/retrieve/complete milestones.
    pub snapshot: Option<ProgressSnapshot>,
}

impl AnalysisProgress {
    fn milestone(stage: &str, progress: u8) -> Self {
        Self {
            stage: stage.to_string(),
            progress,
            snapshot: None,
        }
    }
}

/// Everything produced by a completed analyze run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub task_id: String,
    /// Opaque result payload, stored and forwarded without inspection.
    pub result: Value,
    /// Ordered snapshots observed while polling, for the audit trail.
    pub progress_history: Vec<ProgressSnapshot>,
}

/// Drive `source` until the task reaches a terminal state or the attempt
/// budget runs out.
///
/// Every successfully fetched snapshot is handed to `on_update`, including
/// non-terminal ones; a terminal one is returned immediately without a
/// further delay. A transport or server error consumes its attempt and the
/// loop keeps going after the normal interval instead of failing fast.
/// Attempts are strictly sequential, so no two fetches for the same task are
/// ever in flight, and `on_update` is never invoked after this returns.
pub async fn poll_task_status(
    source: &dyn StatusSource,
    task_id: &str,
    mut on_update: impl FnMut(&TaskStatus),
    options: PollOptions,
) -> Result<TaskStatus, AnalysisError> {
    for attempt in 1..=options.max_attempts {
        match source.task_status(task_id).await {
            Ok(status) => {
                on_update(&status);
                if status.status.is_terminal() {
                    return Ok(status);
                }
            }
            Err(err) => {
                warn!("status poll attempt {attempt} for task {task_id} failed: {err}");
            }
        }
        if attempt < options.max_attempts {
            tokio::time::sleep(options.interval).await;
        }
    }
    Err(AnalysisError::Timeout {
        attempts: options.max_attempts,
    })
}

/// Full workflow: submit the document at `path`, poll the resulting task to
/// completion, and hand back the opaque result payload together with the
/// observed progress trail.
///
/// A FAILED terminal state surfaces [`AnalysisError::Failed`] carrying the
/// engine's message, or a generic one when the engine gave none. Resubmitting
/// after any failure yields a fresh task id; nothing here retries on its own
/// beyond the poll budget.
pub async fn analyze_file(
    client: &EngineClient,
    path: &Path,
    options: PollOptions,
    mut on_progress: impl FnMut(AnalysisProgress),
) -> anyhow::Result<AnalysisOutcome> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("submission")
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading submission file {}", path.display()))?;

    on_progress(AnalysisProgress::milestone("Submitting file...", 0));
    let task_id = client.submit(&file_name, bytes).await?;

    on_progress(AnalysisProgress::milestone("Processing...", PROGRESS_FLOOR));
    let mut history = Vec::new();
    let final_status = poll_task_status(
        client,
        &task_id,
        |status| {
            let snapshot = ProgressSnapshot::observe(status);
            history.push(snapshot.clone());
            on_progress(AnalysisProgress {
                stage: status
                    .current_status
                    .clone()
                    .unwrap_or_else(|| "Processing...".to_string()),
                progress: status
                    .progress
                    .filter(|p| *p > 0)
                    .unwrap_or(PROGRESS_FLOOR),
                snapshot: Some(snapshot),
            });
        },
        options,
    )
    .await?;

    if final_status.status == TaskState::Failed {
        let message = final_status
            .error
            .clone()
            .unwrap_or_else(|| "Analysis failed".to_string());
        return Err(AnalysisError::Failed { task_id, message }.into());
    }

    let result = match final_status.result {
        Some(result) => result,
        None => {
            on_progress(AnalysisProgress::milestone("Retrieving results...", 90));
            client.task_result(&task_id).await?
        }
    };
    on_progress(AnalysisProgress::milestone("Complete!", 100));

    Ok(AnalysisOutcome {
        task_id,
        result,
        progress_history: history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replays a scripted sequence of responses, then keeps answering with
    /// the fallback status.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<TaskStatus, AnalysisError>>>,
        fallback: TaskStatus,
    }

    impl ScriptedSource {
        fn new(
            script: Vec<Result<TaskStatus, AnalysisError>>,
            fallback: TaskStatus,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
            }
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn task_status(&self, _task_id: &str) -> Result<TaskStatus, AnalysisError> {
            match self.script.lock().await.pop_front() {
                Some(response) => response,
                None => Ok(self.fallback.clone()),
            }
        }
    }

    fn status(state: TaskState, progress: u8) -> TaskStatus {
        TaskStatus {
            task_id: "task-1".to_string(),
            status: state,
            progress: Some(progress),
            current_status: None,
            result: None,
            error: None,
        }
    }

    fn fast_options(max_attempts: u32) -> PollOptions {
        PollOptions {
            max_attempts,
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn resolves_on_first_terminal_state() {
        let mut success = status(TaskState::Success, 100);
        success.result = Some(serde_json::json!({"confidence_score": 0.9}));
        let source = ScriptedSource::new(
            vec![
                Ok(status(TaskState::Pending, 10)),
                Ok(status(TaskState::Processing, 40)),
                Ok(success),
            ],
            status(TaskState::Pending, 0),
        );

        let mut seen = Vec::new();
        let final_status = poll_task_status(
            &source,
            "task-1",
            |s| seen.push((s.status, s.progress)),
            fast_options(10),
        )
        .await
        .unwrap();

        assert_eq!(final_status.status, TaskState::Success);
        assert!(final_status.result.is_some());
        assert_eq!(
            seen,
            vec![
                (TaskState::Pending, Some(10)),
                (TaskState::Processing, Some(40)),
                (TaskState::Success, Some(100)),
            ]
        );
    }

    #[tokio::test]
    async fn transient_errors_consume_attempts_without_aborting() {
        let source = ScriptedSource::new(
            vec![
                Err(AnalysisError::Server {
                    status: 503,
                    message: "engine busy".to_string(),
                }),
                Ok(status(TaskState::Processing, 55)),
                Ok(status(TaskState::Success, 100)),
            ],
            status(TaskState::Pending, 0),
        );

        let mut updates = 0;
        let final_status =
            poll_task_status(&source, "task-1", |_| updates += 1, fast_options(10))
                .await
                .unwrap();

        assert_eq!(final_status.status, TaskState::Success);
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn never_terminal_times_out_within_budget() {
        let source = ScriptedSource::new(Vec::new(), status(TaskState::Pending, 5));

        let mut updates = 0;
        let err = poll_task_status(&source, "task-1", |_| updates += 1, fast_options(3))
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Timeout { attempts: 3 }));
        assert_eq!(updates, 3, "every attempt surfaces its snapshot");
    }

    #[tokio::test]
    async fn timeout_wins_even_when_every_attempt_errors() {
        let source = ScriptedSource::new(
            vec![
                Err(AnalysisError::Server {
                    status: 500,
                    message: "boom".to_string(),
                }),
                Err(AnalysisError::Server {
                    status: 500,
                    message: "boom".to_string(),
                }),
            ],
            status(TaskState::Pending, 0),
        );

        let err = poll_task_status(&source, "task-1", |_| {}, fast_options(2))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Timeout { attempts: 2 }));
    }
}
