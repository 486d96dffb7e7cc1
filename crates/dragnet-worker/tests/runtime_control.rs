//! End-to-end worker runtime behaviour against a fake orchestrator:
//! claim/execute/report, control-signal handling and pause/resume.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dragnet_core::wire::{
    CheckTaskRequest, CheckTaskResponse, ControlPollRequest, ControlPollResponse, RecoveryRequest,
    RecoveryResponse, SaveVulnBatchRequest, SaveVulnBatchResponse, SignalEntry,
    UpdateStatusRequest, UpdateStatusResponse, VulnReport, CODE_OK,
};
use dragnet_core::{ControlAction, Result, TaskConfig, TaskState, PHASE_STOPPED};
use dragnet_worker::{
    EngineContext, EngineOutput, EnginePipeline, OrchestratorApi, ScanEngine, WorkerConfig,
    WorkerRuntime,
};

#[derive(Default)]
struct FakeOrchestrator {
    tasks: Mutex<VecDeque<CheckTaskResponse>>,
    updates: Mutex<Vec<UpdateStatusRequest>>,
    pending_signals: Mutex<HashMap<String, VecDeque<ControlAction>>>,
    vuln_batches: Mutex<Vec<SaveVulnBatchRequest>>,
}

impl FakeOrchestrator {
    fn offer_task(&self, task_id: &str, config: &str) {
        self.tasks.lock().unwrap().push_back(CheckTaskResponse {
            code: CODE_OK,
            is_exist: true,
            is_finished: false,
            task_id: task_id.to_string(),
            main_task_id: task_id.to_string(),
            workspace_id: "w1".to_string(),
            config: config.to_string(),
        });
    }

    fn queue_signal(&self, task_id: &str, action: ControlAction) {
        self.pending_signals
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(action);
    }

    fn updates(&self) -> Vec<UpdateStatusRequest> {
        self.updates.lock().unwrap().clone()
    }

    fn terminal_update(&self) -> Option<UpdateStatusRequest> {
        self.updates().into_iter().find(|u| u.state.is_terminal())
    }
}

#[async_trait]
impl OrchestratorApi for FakeOrchestrator {
    async fn check_task(&self, _request: &CheckTaskRequest) -> Result<CheckTaskResponse> {
        let mut tasks = self.tasks.lock().unwrap();
        Ok(tasks.pop_front().unwrap_or_else(CheckTaskResponse::empty))
    }

    async fn update_status(&self, request: &UpdateStatusRequest) -> Result<UpdateStatusResponse> {
        self.updates.lock().unwrap().push(request.clone());
        Ok(UpdateStatusResponse::ok())
    }

    async fn poll_control(&self, request: &ControlPollRequest) -> Result<ControlPollResponse> {
        let mut pending = self.pending_signals.lock().unwrap();
        let mut signals = Vec::new();
        for task_id in &request.task_ids {
            if let Some(actions) = pending.get_mut(task_id) {
                if let Some(action) = actions.pop_front() {
                    signals.push(SignalEntry {
                        task_id: task_id.clone(),
                        action,
                    });
                }
            }
        }
        Ok(ControlPollResponse {
            code: CODE_OK,
            signals,
        })
    }

    async fn announce_recovery(&self, _request: &RecoveryRequest) -> Result<RecoveryResponse> {
        Ok(RecoveryResponse {
            code: CODE_OK,
            recovered_tasks: vec![],
            recovered_count: 0,
        })
    }

    async fn save_vulns(&self, request: &SaveVulnBatchRequest) -> Result<SaveVulnBatchResponse> {
        self.vuln_batches.lock().unwrap().push(request.clone());
        Ok(SaveVulnBatchResponse {
            code: CODE_OK,
            success: true,
            msg: String::new(),
            total: request.vulnerabilities.len() as u32,
        })
    }
}

/// Engine that checkpoints in a tight loop for `iterations` rounds, so
/// control signals land quickly in tests.
struct LoopingEngine {
    iterations: usize,
    vulns: Vec<VulnReport>,
}

#[async_trait]
impl ScanEngine for LoopingEngine {
    fn module(&self) -> &str {
        "portScan"
    }

    async fn execute(&self, ctx: &mut EngineContext, _config: &TaskConfig) -> Result<EngineOutput> {
        let mut round = 0usize;
        loop {
            ctx.checkpoint().await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            round += 1;
            if self.iterations > 0 && round >= self.iterations {
                return Ok(EngineOutput {
                    vulns: self.vulns.clone(),
                    summary: "port scan complete".to_string(),
                });
            }
        }
    }
}

fn fast_config(name: &str) -> WorkerConfig {
    WorkerConfig {
        name: name.to_string(),
        concurrency: 1,
        poll_interval: Duration::from_millis(30),
        control_interval: Duration::from_millis(30),
        ..WorkerConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn worker_claims_executes_and_reports_success() {
    let api = Arc::new(FakeOrchestrator::default());
    api.offer_task("t1", r#"{"target":"a.com"}"#);

    let vuln = VulnReport {
        host: "a.com".to_string(),
        port: 80,
        poc_file: "cve-2023-x.yaml".to_string(),
        cvss_score: Some(8.5),
        ..VulnReport::default()
    };
    let pipeline = EnginePipeline::new().register(Arc::new(LoopingEngine {
        iterations: 3,
        vulns: vec![vuln],
    }));

    let runtime = WorkerRuntime::new(fast_config("w-a"), api.clone(), pipeline);
    let handle = tokio::spawn(Arc::clone(&runtime).run());

    wait_for("terminal update", || api.terminal_update().is_some()).await;

    let terminal = api.terminal_update().unwrap();
    assert_eq!(terminal.task_id, "t1");
    assert_eq!(terminal.state, TaskState::Success);
    assert_eq!(terminal.progress, 100);
    assert_eq!(terminal.worker, "w-a");
    assert!(terminal.result.contains("port scan complete"));

    // Findings were shipped before the terminal update.
    let batches = api.vuln_batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].main_task_id, "t1");
    assert_eq!(batches[0].vulnerabilities.len(), 1);

    runtime.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_signal_terminates_a_running_task() {
    let api = Arc::new(FakeOrchestrator::default());
    api.offer_task("t-stop", r#"{"target":"a.com"}"#);

    // Infinite engine: only a STOP can end it.
    let pipeline = EnginePipeline::new().register(Arc::new(LoopingEngine {
        iterations: 0,
        vulns: vec![],
    }));

    let runtime = WorkerRuntime::new(fast_config("w-a"), api.clone(), pipeline);
    let handle = tokio::spawn(Arc::clone(&runtime).run());

    // Wait until the task is running (first progress update).
    wait_for("task start", || !api.updates().is_empty()).await;

    api.queue_signal("t-stop", ControlAction::Stop);
    wait_for("terminal update", || api.terminal_update().is_some()).await;

    let terminal = api.terminal_update().unwrap();
    assert_eq!(terminal.state, TaskState::Failure);
    assert_eq!(terminal.phase, PHASE_STOPPED);

    runtime.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn pause_holds_the_task_and_resume_completes_it() {
    let api = Arc::new(FakeOrchestrator::default());
    api.offer_task("t-pause", r#"{"target":"a.com"}"#);

    let pipeline = EnginePipeline::new().register(Arc::new(LoopingEngine {
        iterations: 8,
        vulns: vec![],
    }));

    let runtime = WorkerRuntime::new(fast_config("w-a"), api.clone(), pipeline);
    let handle = tokio::spawn(Arc::clone(&runtime).run());

    wait_for("task start", || !api.updates().is_empty()).await;
    api.queue_signal("t-pause", ControlAction::Pause);

    // The paused task keeps its claim, re-announcing started/paused.
    wait_for("paused update", || {
        api.updates()
            .iter()
            .any(|u| u.state == TaskState::Started && u.phase == "paused")
    })
    .await;
    assert!(api.terminal_update().is_none());

    api.queue_signal("t-pause", ControlAction::Resume);
    wait_for("terminal update", || api.terminal_update().is_some()).await;
    assert_eq!(api.terminal_update().unwrap().state, TaskState::Success);

    runtime.shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn signals_for_idle_tasks_are_ignored() {
    let api = Arc::new(FakeOrchestrator::default());
    let pipeline = EnginePipeline::new();
    let runtime = WorkerRuntime::new(fast_config("w-a"), api.clone(), pipeline);

    // Applying a signal with nothing running must not panic or record
    // anything.
    runtime.apply_signal("ghost-task", ControlAction::Stop);
    assert!(api.updates().is_empty());
}
