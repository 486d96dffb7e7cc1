//! Request/response bodies for the worker-facing HTTP API and the result
//! RPC.
//!
//! Every endpoint replies HTTP 200; failures are carried in the `code` field
//! (0 = ok). Field names are camelCase on the wire and shared between the
//! orchestrator server and the worker client.

use serde::{Deserialize, Serialize};

use crate::task::{ControlAction, TaskState};

/// Application-level success code.
pub const CODE_OK: i32 = 0;
/// Malformed config or target.
pub const CODE_BAD_INPUT: i32 = 400;
/// Internal error (store unreachable after retries, etc.).
pub const CODE_INTERNAL: i32 = 500;

/// 1/5/15-minute load averages reported beside the worker heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// `POST /worker/task/check`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckTaskRequest {
    pub worker_name: String,
    /// Parallel sub-task slots this worker runs.
    #[serde(default)]
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub load: Option<LoadAvg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckTaskResponse {
    pub code: i32,
    /// A sub-task was claimed and is carried in the remaining fields.
    pub is_exist: bool,
    /// The shared queue was empty at poll time.
    pub is_finished: bool,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub main_task_id: String,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub config: String,
}

impl CheckTaskResponse {
    pub fn empty() -> Self {
        CheckTaskResponse {
            code: CODE_OK,
            is_exist: false,
            is_finished: true,
            task_id: String::new(),
            main_task_id: String::new(),
            workspace_id: String::new(),
            config: String::new(),
        }
    }
}

/// `POST /worker/task/update`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub task_id: String,
    pub state: TaskState,
    pub worker: String,
    #[serde(default)]
    pub result: String,
    /// 0-100.
    pub progress: u8,
    #[serde(default)]
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusResponse {
    pub code: i32,
    pub success: bool,
    #[serde(default)]
    pub msg: String,
}

impl UpdateStatusResponse {
    pub fn ok() -> Self {
        UpdateStatusResponse {
            code: CODE_OK,
            success: true,
            msg: String::new(),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        UpdateStatusResponse {
            code,
            success: false,
            msg: msg.into(),
        }
    }
}

/// `POST /worker/task/control`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPollRequest {
    pub worker_name: String,
    /// Sub-task ids currently running on the worker.
    #[serde(default)]
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEntry {
    pub task_id: String,
    pub action: ControlAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPollResponse {
    pub code: i32,
    #[serde(default)]
    pub signals: Vec<SignalEntry>,
}

/// `POST /worker/task/recovery`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    pub worker_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResponse {
    pub code: i32,
    /// Main task ids reset and re-enqueued.
    #[serde(default)]
    pub recovered_tasks: Vec<String>,
    pub recovered_count: u32,
}

/// Generic ok/error envelope for operator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseResponse {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
}

impl BaseResponse {
    pub fn ok() -> Self {
        BaseResponse {
            code: CODE_OK,
            msg: String::new(),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        BaseResponse {
            code,
            msg: msg.into(),
        }
    }
}

/// `POST /task/submit`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub workspace_id: String,
    pub name: String,
    /// Raw multi-line target string.
    pub target: String,
    /// JSON config blob; empty means all defaults.
    #[serde(default)]
    pub config: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub task_id: String,
    pub sub_task_count: u32,
}

/// `POST /task/control`: operator STOP/PAUSE/RESUME for a main task or a
/// single sub-task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskControlRequest {
    pub task_id: String,
    pub action: ControlAction,
}

/// One vulnerability finding as reported by a worker engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnReport {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub url: String,
    pub poc_file: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub cvss_score: Option<f64>,
    #[serde(default)]
    pub cve_id: String,
    #[serde(default)]
    pub cwe_id: String,
    #[serde(default)]
    pub matcher_name: String,
    #[serde(default)]
    pub extracted_results: Vec<String>,
    #[serde(default)]
    pub curl_command: String,
    #[serde(default)]
    pub request: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub references: Vec<String>,
}

/// `POST /worker/result/vulns`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveVulnBatchRequest {
    #[serde(default)]
    pub workspace_id: String,
    pub main_task_id: String,
    #[serde(default)]
    pub vulnerabilities: Vec<VulnReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveVulnBatchResponse {
    pub code: i32,
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    /// Count of successfully written vulnerabilities.
    pub total: u32,
}

/// `POST /worker/poc/validate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PocValidateRequest {
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub urls: Vec<String>,
    pub poc_id: String,
    #[serde(default)]
    pub poc_type: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub batch_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PocValidateResponse {
    pub code: i32,
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub task_id: String,
}
