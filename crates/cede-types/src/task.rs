use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution state of an analysis task as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Processing,
    Success,
    Failed,
}

impl TaskState {
    /// Returns `true` for SUCCESS and FAILED; the engine reports no further
    /// transitions out of either.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskState::Pending => "PENDING",
            TaskState::Processing => "PROCESSING",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
        };
        write!(f, "{label}")
    }
}

/// One status snapshot for a submitted task, the shape returned by
/// `GET /task-status/{task_id}`.
///
/// `result` is an opaque payload the engine only attaches on SUCCESS; it is
/// stored and forwarded, never inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub status: TaskState,
    /// Latest-reported completion percentage, 0-100. The engine makes no
    /// monotonicity guarantee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One `(status, progress, message)` tuple captured during polling.
///
/// Snapshots are never persisted on their own; an ordered sequence may ride
/// along on a history record for audit purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl ProgressSnapshot {
    /// Capture the observable parts of a status response, stamped now.
    pub fn observe(status: &TaskStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            status: status.status,
            current_status: status.current_status.clone(),
            progress: status.progress,
        }
    }
}
