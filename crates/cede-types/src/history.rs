use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProgressSnapshot, TaskState};

/// Outcome recorded in the history ledger. Only terminal outcomes are
/// representable; there is deliberately no pending/processing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    Success,
    Failed,
}

impl TryFrom<TaskState> for HistoryStatus {
    type Error = TaskState;

    /// Succeeds only for terminal states; the non-terminal state comes back
    /// as the error.
    fn try_from(state: TaskState) -> Result<Self, TaskState> {
        match state {
            TaskState::Success => Ok(HistoryStatus::Success),
            TaskState::Failed => Ok(HistoryStatus::Failed),
            other => Err(other),
        }
    }
}

/// Which side of the API boundary persisted a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistedBy {
    Server,
    Client,
}

/// Durable snapshot of a terminal task outcome, keyed by `taskId`.
///
/// A later upsert carrying the same `taskId` replaces the whole record;
/// `status` is assigned once at creation and never transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisHistoryRecord {
    pub task_id: String,
    #[serde(default)]
    pub file_name: String,
    pub status: HistoryStatus,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progress_history: Vec<ProgressSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_by: Option<PersistedBy>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_terminal_states_convert() {
        assert_eq!(
            HistoryStatus::try_from(TaskState::Success),
            Ok(HistoryStatus::Success)
        );
        assert_eq!(
            HistoryStatus::try_from(TaskState::Failed),
            Ok(HistoryStatus::Failed)
        );
        assert_eq!(
            HistoryStatus::try_from(TaskState::Pending),
            Err(TaskState::Pending)
        );
        assert_eq!(
            HistoryStatus::try_from(TaskState::Processing),
            Err(TaskState::Processing)
        );
    }

    #[test]
    fn record_round_trips_with_camel_case_keys() {
        let record = AnalysisHistoryRecord {
            task_id: "t-9".to_string(),
            file_name: "submission.msg".to_string(),
            status: HistoryStatus::Success,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            result: Some(json!({"confidence_score": 0.82})),
            error: None,
            metadata: None,
            progress_history: Vec::new(),
            persisted_by: Some(PersistedBy::Server),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["taskId"], "t-9");
        assert_eq!(value["fileName"], "submission.msg");
        assert_eq!(value["status"], "SUCCESS");
        assert_eq!(value["persistedBy"], "server");
        assert!(value.get("error").is_none());

        let back: AnalysisHistoryRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.task_id, record.task_id);
        assert_eq!(back.status, record.status);
    }

    #[test]
    fn candidate_without_timestamps_gets_defaults() {
        let record: AnalysisHistoryRecord = serde_json::from_value(json!({
            "taskId": "t-3",
            "status": "FAILED",
            "error": "Document conversion failed"
        }))
        .unwrap();
        assert_eq!(record.file_name, "");
        assert_eq!(record.error.as_deref(), Some("Document conversion failed"));
        assert!(record.completed_at <= Utc::now());
    }
}
