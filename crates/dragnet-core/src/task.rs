//! Task domain model: main tasks, sub-task specs, status records and
//! control signals.
//!
//! Sub-task specs and status records cross process boundaries as JSON, so
//! their field names are part of the shared contract and use camelCase.
//! Main-task records live only in the scan store and keep snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a user-submitted main task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MainTaskStatus {
    Created,
    Pending,
    Started,
    Success,
    Failure,
    Stopped,
    Paused,
}

impl MainTaskStatus {
    /// Terminal states are never overwritten by a later progress update.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MainTaskStatus::Success | MainTaskStatus::Failure | MainTaskStatus::Stopped
        )
    }
}

/// One user scan submission, parent of one or more sub-tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainTask {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    /// Raw multi-line target string as submitted.
    pub target: String,
    /// JSON config blob; parsed via [`crate::config::TaskConfig`].
    pub config: String,
    pub status: MainTaskStatus,
    pub sub_task_count: u32,
    pub sub_task_done: u32,
    /// Batches that reached a failure terminal state.
    pub sub_task_failed: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
}

impl MainTask {
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
        config: impl Into<String>,
    ) -> Self {
        MainTask {
            id: id.into(),
            workspace_id: workspace_id.into(),
            name: name.into(),
            target: target.into(),
            config: config.into(),
            status: MainTaskStatus::Created,
            sub_task_count: 0,
            sub_task_done: 0,
            sub_task_failed: 0,
            start_time: None,
            update_time: Utc::now(),
        }
    }
}

/// The unit of work a worker claims from the shared queue.
///
/// Serialised form is the sorted-set member, so field names are contractual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskSpec {
    /// Equals the main task id for single-batch tasks, `<mainTaskId>-<index>`
    /// otherwise.
    pub task_id: String,
    pub main_task_id: String,
    pub workspace_id: String,
    pub task_name: String,
    /// Per-batch config JSON with `target`, `subTaskIndex` and `subTaskTotal`
    /// injected.
    pub config: String,
    /// Explicit queue priority, 1 (low) to 4 (urgent).
    pub priority: i64,
    /// Worker-affinity list; empty means any worker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<String>,
}

/// Worker-side state of a claimed sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Started,
    Paused,
    Success,
    Failure,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

/// Progress snapshot for one sub-task, stored under `task:status:<taskId>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusRecord {
    pub state: TaskState,
    /// Name of the worker holding the claim.
    pub worker: String,
    /// Latest result snippet from the engine.
    #[serde(default)]
    pub result: String,
    /// Current phase, e.g. an engine/module name or `paused`.
    #[serde(default)]
    pub phase: String,
    /// 0-100.
    pub progress: u8,
    pub update_time: DateTime<Utc>,
}

impl TaskStatusRecord {
    pub fn claimed(worker: impl Into<String>) -> Self {
        TaskStatusRecord {
            state: TaskState::Started,
            worker: worker.into(),
            result: String::new(),
            phase: String::new(),
            progress: 0,
            update_time: Utc::now(),
        }
    }
}

/// Phase string reported with a terminal update when a STOP signal ended the
/// engine. Stopped batches count as done but not failed.
pub const PHASE_STOPPED: &str = "stopped";

/// Transient consume-once control instruction addressed to one sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlAction {
    Stop,
    Pause,
    Resume,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Stop => "STOP",
            ControlAction::Pause => "PAUSE",
            ControlAction::Resume => "RESUME",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOP" => Some(ControlAction::Stop),
            "PAUSE" => Some(ControlAction::Pause),
            "RESUME" => Some(ControlAction::Resume),
            _ => None,
        }
    }
}

/// Builder metadata cached under `task:info:<mainTaskId>` for 24 hours, so
/// workers and completion logic can resolve context without the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfoCache {
    pub workspace_id: String,
    pub main_task_id: String,
    pub sub_task_count: u32,
    pub batch_count: u32,
    pub enabled_modules: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_status_terminality() {
        assert!(MainTaskStatus::Success.is_terminal());
        assert!(MainTaskStatus::Failure.is_terminal());
        assert!(MainTaskStatus::Stopped.is_terminal());
        assert!(!MainTaskStatus::Started.is_terminal());
        assert!(!MainTaskStatus::Paused.is_terminal());
    }

    #[test]
    fn sub_task_spec_round_trips_with_camel_case_keys() {
        let spec = SubTaskSpec {
            task_id: "m1-0".to_string(),
            main_task_id: "m1".to_string(),
            workspace_id: "w1".to_string(),
            task_name: "nightly".to_string(),
            config: "{}".to_string(),
            priority: 1,
            workers: vec![],
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"taskId\""));
        assert!(json.contains("\"mainTaskId\""));
        assert!(!json.contains("\"workers\""));

        let back: SubTaskSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn control_action_parse_round_trip() {
        for action in [ControlAction::Stop, ControlAction::Pause, ControlAction::Resume] {
            assert_eq!(ControlAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(ControlAction::parse("HALT"), None);
    }

    #[test]
    fn main_status_serialises_screaming_case() {
        let json = serde_json::to_string(&MainTaskStatus::Started).unwrap();
        assert_eq!(json, "\"STARTED\"");
    }
}
