//! Worker runtime.
//!
//! One long-lived process: a poll loop claims sub-tasks from the
//! orchestrator into the bounded local queue, N execution slots drain it
//! through the engine pipeline, a control loop applies STOP/PAUSE/RESUME to
//! running tasks, and the queue sweeper expires stale work. Terminal status
//! updates are delivered at-least-once with exponential backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dragnet_core::wire::{
    CheckTaskRequest, ControlPollRequest, RecoveryRequest, SaveVulnBatchRequest,
    UpdateStatusRequest,
};
use dragnet_core::{
    derive_priority, ControlAction, DragnetError, Result, SubTaskSpec, TaskConfig, TaskState,
    PHASE_STOPPED,
};

use crate::client::OrchestratorApi;
use crate::engine::{EngineCommand, EngineContext, EnginePipeline, ProgressEvent};
use crate::queue::TaskQueueManager;
use crate::sysload::sample_load;

/// Attempts for an at-least-once terminal delivery.
const TERMINAL_RETRIES: u32 = 5;
/// First retry delay; doubles per attempt.
const TERMINAL_BACKOFF: Duration = Duration::from_millis(500);

/// Tunables for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// Parallel execution slots.
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub control_interval: Duration,
    pub max_queue_size: usize,
    pub max_wait_time: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name: "dragnet-worker".to_string(),
            concurrency: 2,
            poll_interval: Duration::from_secs(5),
            control_interval: Duration::from_secs(5),
            max_queue_size: crate::queue::DEFAULT_MAX_QUEUE_SIZE,
            max_wait_time: crate::queue::DEFAULT_MAX_WAIT,
        }
    }
}

struct RunningTask {
    commands: watch::Sender<EngineCommand>,
}

/// The long-lived worker process body.
pub struct WorkerRuntime {
    config: WorkerConfig,
    api: Arc<dyn OrchestratorApi>,
    pipeline: Arc<EnginePipeline>,
    queue: Arc<TaskQueueManager>,
    running: Arc<Mutex<HashMap<String, RunningTask>>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerRuntime {
    pub fn new(
        config: WorkerConfig,
        api: Arc<dyn OrchestratorApi>,
        pipeline: EnginePipeline,
    ) -> Arc<Self> {
        let queue = Arc::new(TaskQueueManager::new(
            config.max_queue_size,
            config.max_wait_time,
        ));
        let (shutdown, _) = watch::channel(false);
        Arc::new(WorkerRuntime {
            config,
            api,
            pipeline: Arc::new(pipeline),
            queue,
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueueManager> {
        &self.queue
    }

    /// Signal all loops to wind down and running engines to stop.
    pub fn shutdown(&self) {
        info!("worker shutting down");
        let _ = self.shutdown.send(true);
        let running = self.running.lock().unwrap();
        for task in running.values() {
            let _ = task.commands.send(EngineCommand::Stop);
        }
    }

    /// Announce the restart, start every loop and block until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.announce_recovery().await;

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        handles.push(self.queue.spawn_sweeper(self.shutdown.subscribe()));
        handles.push(self.clone().spawn_poll_loop());
        handles.push(self.clone().spawn_control_loop());
        for slot in 0..self.config.concurrency.max(1) {
            handles.push(self.clone().spawn_slot(slot));
        }

        let mut shutdown = self.shutdown.subscribe();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        for handle in handles {
            handle.await.ok();
        }
        info!("worker stopped");
        Ok(())
    }

    async fn announce_recovery(&self) {
        let request = RecoveryRequest {
            worker_name: self.config.name.clone(),
        };
        match self.api.announce_recovery(&request).await {
            Ok(response) if response.recovered_count > 0 => {
                info!(
                    recovered = response.recovered_count,
                    tasks = ?response.recovered_tasks,
                    "orchestrator recovered orphaned sub-tasks"
                );
            }
            Ok(_) => info!("registered with orchestrator, nothing to recover"),
            Err(e) => warn!(error = %e, "recovery announcement failed"),
        }
    }

    fn spawn_poll_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.poll_once().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Claim tasks until the local queue is full or the shared queue runs
    /// dry, so a burst drains quickly without busy-polling in the idle case.
    async fn poll_once(&self) {
        loop {
            if self.queue.is_full() {
                return;
            }

            let request = CheckTaskRequest {
                worker_name: self.config.name.clone(),
                concurrency: Some(self.config.concurrency as u32),
                load: Some(sample_load()),
            };
            let response = match self.api.check_task(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "task poll failed");
                    return;
                }
            };

            if response.code != 0 {
                warn!(code = response.code, "task poll rejected");
                return;
            }
            if !response.is_exist {
                return;
            }

            let config = match TaskConfig::parse(&response.config) {
                Ok(config) => config,
                Err(e) => {
                    error!(task_id = %response.task_id, error = %e, "claimed task has bad config");
                    self.send_terminal(
                        &response.task_id,
                        TaskState::Failure,
                        format!("bad config: {e}"),
                        0,
                        String::new(),
                    )
                    .await;
                    continue;
                }
            };

            let priority = derive_priority(&config);
            let spec = SubTaskSpec {
                task_id: response.task_id.clone(),
                main_task_id: response.main_task_id,
                workspace_id: response.workspace_id,
                task_name: String::new(),
                config: response.config,
                priority: priority as i64,
                workers: Vec::new(),
            };

            if !self.queue.enqueue(spec, priority) {
                // Already claimed remotely; the stale sweep will re-issue it.
                warn!(task_id = %response.task_id, "local queue rejected claimed task");
                return;
            }
            debug!(task_id = %response.task_id, priority = priority.as_str(), "task queued locally");
        }
    }

    fn spawn_control_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.control_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.poll_control_once().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn poll_control_once(&self) {
        let task_ids: Vec<String> = {
            let running = self.running.lock().unwrap();
            running.keys().cloned().collect()
        };
        if task_ids.is_empty() {
            return;
        }

        let request = ControlPollRequest {
            worker_name: self.config.name.clone(),
            task_ids,
        };
        let response = match self.api.poll_control(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "control poll failed");
                return;
            }
        };

        for signal in response.signals {
            self.apply_signal(&signal.task_id, signal.action);
        }
    }

    /// Idempotent signal application: repeated or out-of-date signals are
    /// no-ops (a STOP for an already-finished task finds no running entry).
    pub fn apply_signal(&self, task_id: &str, action: ControlAction) {
        let command = match action {
            ControlAction::Stop => EngineCommand::Stop,
            ControlAction::Pause => EngineCommand::Pause,
            ControlAction::Resume => EngineCommand::Run,
        };

        let running = self.running.lock().unwrap();
        match running.get(task_id) {
            Some(task) => {
                info!(task_id, action = action.as_str(), "applying control signal");
                let _ = task.commands.send(command);
            }
            None => debug!(task_id, action = action.as_str(), "signal for idle task ignored"),
        }
    }

    fn spawn_slot(self: Arc<Self>, slot: usize) -> JoinHandle<()> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                let spec = tokio::select! {
                    spec = self.queue.dequeue() => spec,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                };
                debug!(slot, task_id = %spec.task_id, "slot picked up task");
                self.execute_task(spec).await;
            }
        })
    }

    async fn execute_task(&self, spec: SubTaskSpec) {
        let mut config = match TaskConfig::parse(&spec.config) {
            Ok(config) => config,
            Err(e) => {
                self.send_terminal(
                    &spec.task_id,
                    TaskState::Failure,
                    format!("bad config: {e}"),
                    0,
                    String::new(),
                )
                .await;
                return;
            }
        };

        // Engines read their rate/concurrency/timeout tuning from the
        // host-profile block.
        if let Ok(adaptive) = serde_json::to_value(dragnet_core::adaptive_config()) {
            config.set("adaptive", adaptive);
        }

        let (cmd_tx, cmd_rx) = watch::channel(EngineCommand::Run);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        {
            let mut running = self.running.lock().unwrap();
            running.insert(
                spec.task_id.clone(),
                RunningTask {
                    commands: cmd_tx.clone(),
                },
            );
        }

        let forwarder = self.spawn_progress_forwarder(spec.task_id.clone(), progress_rx);

        let mut ctx = EngineContext::new(
            spec.task_id.clone(),
            spec.main_task_id.clone(),
            spec.workspace_id.clone(),
            cmd_rx,
            progress_tx,
        );
        let result = self.pipeline.run(&mut ctx, &config).await;
        drop(ctx);

        {
            let mut running = self.running.lock().unwrap();
            running.remove(&spec.task_id);
        }
        forwarder.await.ok();

        match result {
            Ok(output) => {
                if !output.vulns.is_empty() {
                    self.report_vulns(&spec, output.vulns.clone()).await;
                }
                self.send_terminal(
                    &spec.task_id,
                    TaskState::Success,
                    output.summary,
                    100,
                    "done".to_string(),
                )
                .await;
            }
            Err(e) => {
                let stopped = *cmd_tx.borrow() == EngineCommand::Stop;
                let phase = if stopped {
                    PHASE_STOPPED.to_string()
                } else {
                    String::new()
                };
                self.send_terminal(&spec.task_id, TaskState::Failure, e.to_string(), 0, phase)
                    .await;
            }
        }
    }

    fn spawn_progress_forwarder(
        &self,
        task_id: String,
        mut progress_rx: mpsc::UnboundedReceiver<ProgressEvent>,
    ) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let worker = self.config.name.clone();
        tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                // A paused task keeps its claim: it re-publishes `started`
                // with phase "paused" instead of a distinct state.
                let request = UpdateStatusRequest {
                    task_id: task_id.clone(),
                    state: TaskState::Started,
                    worker: worker.clone(),
                    result: String::new(),
                    progress: event.progress,
                    phase: event.phase,
                };
                if let Err(e) = api.update_status(&request).await {
                    debug!(task_id = %task_id, error = %e, "progress update failed");
                }
            }
        })
    }

    async fn report_vulns(&self, spec: &SubTaskSpec, vulns: Vec<dragnet_core::wire::VulnReport>) {
        let request = SaveVulnBatchRequest {
            workspace_id: spec.workspace_id.clone(),
            main_task_id: spec.main_task_id.clone(),
            vulnerabilities: vulns,
        };
        match self.with_backoff(|| self.api.save_vulns(&request)).await {
            Ok(response) => {
                info!(task_id = %spec.task_id, saved = response.total, "findings reported");
            }
            Err(e) => error!(task_id = %spec.task_id, error = %e, "failed to report findings"),
        }
    }

    /// Terminal updates are at-least-once: transport failures retry with
    /// exponential backoff before giving up.
    async fn send_terminal(
        &self,
        task_id: &str,
        state: TaskState,
        result: String,
        progress: u8,
        phase: String,
    ) {
        let request = UpdateStatusRequest {
            task_id: task_id.to_string(),
            state,
            worker: self.config.name.clone(),
            result,
            progress,
            phase,
        };
        if let Err(e) = self.with_backoff(|| self.api.update_status(&request)).await {
            error!(task_id, error = %e, "terminal status update lost after retries");
        }
    }

    async fn with_backoff<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = TERMINAL_BACKOFF;
        let mut last_err = None;
        for attempt in 0..TERMINAL_RETRIES {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e @ DragnetError::Transport(_)) => {
                    warn!(attempt, error = %e, "transport error, backing off");
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| DragnetError::Transport("retries exhausted".to_string())))
    }
}
