//! Engine adapters.
//!
//! Scan engines are black-box capabilities behind the [`ScanEngine`] trait:
//! `execute(ctx, config)` consumes a sub-task config and emits progress plus
//! findings. Adapters must checkpoint through [`EngineContext`] at least
//! every five seconds so STOP lands within one control-loop period plus one
//! checkpoint. A tagged module key, not inheritance, selects which engines
//! run for a sub-task.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use dragnet_core::wire::VulnReport;
use dragnet_core::{DragnetError, Result, TaskConfig};

/// Engines must reach a checkpoint at least this often.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);
/// How often a paused task re-announces itself.
const PAUSED_REPUBLISH_INTERVAL: Duration = Duration::from_secs(10);

/// Desired execution state, driven by control signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Run,
    Pause,
    Stop,
}

/// Progress event emitted by an engine adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 0-100 across the whole sub-task.
    pub progress: u8,
    pub phase: String,
}

/// Execution context handed to engine adapters: command channel, progress
/// sink and task identity.
pub struct EngineContext {
    pub task_id: String,
    pub main_task_id: String,
    pub workspace_id: String,
    commands: watch::Receiver<EngineCommand>,
    progress: mpsc::UnboundedSender<ProgressEvent>,
}

impl EngineContext {
    pub fn new(
        task_id: impl Into<String>,
        main_task_id: impl Into<String>,
        workspace_id: impl Into<String>,
        commands: watch::Receiver<EngineCommand>,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        EngineContext {
            task_id: task_id.into(),
            main_task_id: main_task_id.into(),
            workspace_id: workspace_id.into(),
            commands,
            progress,
        }
    }

    /// Report sub-task progress. Best-effort: a closed sink means the task
    /// is being torn down.
    pub fn report(&self, progress: u8, phase: impl Into<String>) {
        let _ = self.progress.send(ProgressEvent {
            progress: progress.min(100),
            phase: phase.into(),
        });
    }

    pub fn stop_requested(&self) -> bool {
        *self.commands.borrow() == EngineCommand::Stop
    }

    /// Cooperative checkpoint. Returns immediately while running, blocks for
    /// the duration of a pause (re-announcing the paused phase), and yields
    /// an engine error once a stop arrives.
    pub async fn checkpoint(&mut self) -> Result<()> {
        loop {
            let command = *self.commands.borrow();
            match command {
                EngineCommand::Run => return Ok(()),
                EngineCommand::Stop => {
                    return Err(DragnetError::Engine {
                        task_id: self.task_id.clone(),
                        message: "stopped by control signal".to_string(),
                    })
                }
                EngineCommand::Pause => {
                    self.report(0, "paused");
                    loop {
                        match tokio::time::timeout(
                            PAUSED_REPUBLISH_INTERVAL,
                            self.commands.changed(),
                        )
                        .await
                        {
                            Ok(Ok(())) => break,
                            // The runtime dropped the channel; treat as stop.
                            Ok(Err(_)) => {
                                return Err(DragnetError::Engine {
                                    task_id: self.task_id.clone(),
                                    message: "control channel closed".to_string(),
                                })
                            }
                            Err(_) => {
                                if *self.commands.borrow() != EngineCommand::Pause {
                                    break;
                                }
                                self.report(0, "paused");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Findings produced by one engine run.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub vulns: Vec<VulnReport>,
    /// Short human-readable summary carried in the status `result` field.
    pub summary: String,
}

/// One scan capability (port scan, fingerprint, dir scan, POC validation).
#[async_trait]
pub trait ScanEngine: Send + Sync {
    /// Module key this engine serves, e.g. `portScan`.
    fn module(&self) -> &str;

    async fn execute(&self, ctx: &mut EngineContext, config: &TaskConfig) -> Result<EngineOutput>;
}

/// Line protocol an external engine writes on stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EngineEvent {
    Progress {
        progress: u8,
        #[serde(default)]
        phase: String,
    },
    Vuln(Box<VulnReport>),
    #[serde(other)]
    Other,
}

/// Adapter that shells out to an external engine binary.
///
/// The sub-task config is written to a scratch file whose path becomes the
/// last argument; the engine streams JSON-lines events on stdout. STOP
/// kills the child; PAUSE holds at the next checkpoint once the child
/// exits its current stage.
pub struct CommandEngine {
    module: String,
    command: Vec<String>,
    timeout: Duration,
}

impl CommandEngine {
    pub fn new(module: impl Into<String>, command: Vec<String>, timeout: Duration) -> Self {
        CommandEngine {
            module: module.into(),
            command,
            timeout,
        }
    }
}

#[async_trait]
impl ScanEngine for CommandEngine {
    fn module(&self) -> &str {
        &self.module
    }

    async fn execute(&self, ctx: &mut EngineContext, config: &TaskConfig) -> Result<EngineOutput> {
        if self.command.is_empty() {
            return Err(DragnetError::Engine {
                task_id: ctx.task_id.clone(),
                message: format!("engine {} has no command configured", self.module),
            });
        }

        let mut config_file = tempfile::NamedTempFile::new().map_err(|e| DragnetError::Engine {
            task_id: ctx.task_id.clone(),
            message: format!("cannot create engine config file: {e}"),
        })?;
        {
            use std::io::Write;
            config_file
                .write_all(config.to_json().as_bytes())
                .map_err(|e| DragnetError::Engine {
                    task_id: ctx.task_id.clone(),
                    message: format!("cannot write engine config: {e}"),
                })?;
        }

        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .arg(config_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DragnetError::Engine {
                task_id: ctx.task_id.clone(),
                message: format!("cannot spawn engine {}: {e}", self.module),
            })?;

        let stdout = child.stdout.take().expect("stdout piped");
        let mut lines = BufReader::new(stdout).lines();

        let mut output = EngineOutput::default();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut ticker = tokio::time::interval(CHECKPOINT_INTERVAL);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => handle_engine_line(&line, ctx, &mut output),
                        // Stream closed: the child is done writing.
                        Ok(None) => break,
                        Err(e) => {
                            warn!(module = %self.module, error = %e, "engine stdout read failed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if ctx.stop_requested() {
                        child.kill().await.ok();
                        return Err(DragnetError::Engine {
                            task_id: ctx.task_id.clone(),
                            message: "stopped by control signal".to_string(),
                        });
                    }
                    if tokio::time::Instant::now() >= deadline {
                        child.kill().await.ok();
                        return Err(DragnetError::Engine {
                            task_id: ctx.task_id.clone(),
                            message: format!(
                                "engine {} exceeded {}s timeout",
                                self.module,
                                self.timeout.as_secs()
                            ),
                        });
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| DragnetError::Engine {
            task_id: ctx.task_id.clone(),
            message: format!("engine {} wait failed: {e}", self.module),
        })?;

        if !status.success() {
            let mut stderr_tail = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                use tokio::io::AsyncReadExt;
                let mut buf = String::new();
                if stderr.read_to_string(&mut buf).await.is_ok() {
                    stderr_tail = buf.chars().rev().take(512).collect::<String>();
                    stderr_tail = stderr_tail.chars().rev().collect();
                }
            }
            return Err(DragnetError::Engine {
                task_id: ctx.task_id.clone(),
                message: format!(
                    "engine {} exited with {}: {}",
                    self.module,
                    status.code().unwrap_or(-1),
                    stderr_tail.trim()
                ),
            });
        }

        if output.summary.is_empty() {
            output.summary = format!("{}: {} findings", self.module, output.vulns.len());
        }
        Ok(output)
    }
}

fn handle_engine_line(line: &str, ctx: &EngineContext, output: &mut EngineOutput) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<EngineEvent>(line) {
        Ok(EngineEvent::Progress { progress, phase }) => ctx.report(progress, phase),
        Ok(EngineEvent::Vuln(report)) => output.vulns.push(*report),
        Ok(EngineEvent::Other) => {}
        Err(_) => debug!(line, "ignoring non-protocol engine output"),
    }
}

/// Runs the enabled modules of one sub-task in order, scaling per-module
/// progress into the 0-100 range of the whole sub-task.
pub struct EnginePipeline {
    engines: HashMap<String, Arc<dyn ScanEngine>>,
}

impl EnginePipeline {
    pub fn new() -> Self {
        EnginePipeline {
            engines: HashMap::new(),
        }
    }

    pub fn register(mut self, engine: Arc<dyn ScanEngine>) -> Self {
        self.engines.insert(engine.module().to_string(), engine);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Execute every enabled module. A module without a registered adapter
    /// is skipped with a warning; a failing module fails the whole
    /// sub-task.
    pub async fn run(&self, ctx: &mut EngineContext, config: &TaskConfig) -> Result<EngineOutput> {
        let modules = config.enabled_module_names();
        let total = modules.len().max(1) as u32;
        let mut combined = EngineOutput::default();

        for (index, module) in modules.iter().enumerate() {
            ctx.checkpoint().await?;

            let Some(engine) = self.engines.get(*module) else {
                warn!(module, task_id = %ctx.task_id, "no engine adapter registered, skipping");
                continue;
            };

            let base = (index as u32 * 100) / total;
            ctx.report(base as u8, *module);
            info!(module, task_id = %ctx.task_id, "starting engine");

            let output = engine.execute(ctx, config).await?;
            combined.vulns.extend(output.vulns);
            if !output.summary.is_empty() {
                if !combined.summary.is_empty() {
                    combined.summary.push_str("; ");
                }
                combined.summary.push_str(&output.summary);
            }

            let done = ((index as u32 + 1) * 100) / total;
            ctx.report(done as u8, *module);
        }

        ctx.checkpoint().await?;
        Ok(combined)
    }
}

impl Default for EnginePipeline {
    fn default() -> Self {
        EnginePipeline::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (
        EngineContext,
        watch::Sender<EngineCommand>,
        mpsc::UnboundedReceiver<ProgressEvent>,
    ) {
        let (cmd_tx, cmd_rx) = watch::channel(EngineCommand::Run);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let ctx = EngineContext::new("t1", "m1", "w1", cmd_rx, progress_tx);
        (ctx, cmd_tx, progress_rx)
    }

    struct RecordingEngine {
        module: &'static str,
    }

    #[async_trait]
    impl ScanEngine for RecordingEngine {
        fn module(&self) -> &str {
            self.module
        }

        async fn execute(
            &self,
            ctx: &mut EngineContext,
            _config: &TaskConfig,
        ) -> Result<EngineOutput> {
            ctx.report(50, self.module);
            Ok(EngineOutput {
                vulns: vec![],
                summary: format!("{} ok", self.module),
            })
        }
    }

    #[tokio::test]
    async fn checkpoint_passes_while_running() {
        let (mut ctx, _cmd_tx, _rx) = context();
        ctx.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_errors_on_stop() {
        let (mut ctx, cmd_tx, _rx) = context();
        cmd_tx.send(EngineCommand::Stop).unwrap();
        assert!(ctx.checkpoint().await.is_err());
    }

    #[tokio::test]
    async fn checkpoint_blocks_through_pause_and_resumes() {
        let (mut ctx, cmd_tx, mut rx) = context();
        cmd_tx.send(EngineCommand::Pause).unwrap();

        let resumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cmd_tx.send(EngineCommand::Run).unwrap();
            cmd_tx
        });

        ctx.checkpoint().await.unwrap();
        resumer.await.unwrap();

        // The pause announced itself on the progress channel.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.phase, "paused");
    }

    #[tokio::test]
    async fn pipeline_runs_enabled_modules_in_order() {
        let pipeline = EnginePipeline::new()
            .register(Arc::new(RecordingEngine { module: "portScan" }))
            .register(Arc::new(RecordingEngine {
                module: "fingerprint",
            }));

        let (mut ctx, _cmd_tx, mut rx) = context();
        let config =
            TaskConfig::parse(r#"{"fingerprint":{"enable":true},"target":"a.com"}"#).unwrap();

        let output = pipeline.run(&mut ctx, &config).await.unwrap();
        assert_eq!(output.summary, "portScan ok; fingerprint ok");

        let mut phases = Vec::new();
        while let Ok(event) = rx.try_recv() {
            phases.push((event.progress, event.phase));
        }
        // Module boundaries scale into the sub-task range.
        assert!(phases.contains(&(0, "portScan".to_string())));
        assert!(phases.contains(&(50, "fingerprint".to_string())));
        assert!(phases.contains(&(100, "fingerprint".to_string())));
    }

    #[tokio::test]
    async fn pipeline_skips_modules_without_adapters() {
        let pipeline =
            EnginePipeline::new().register(Arc::new(RecordingEngine { module: "portScan" }));

        let (mut ctx, _cmd_tx, _rx) = context();
        let config =
            TaskConfig::parse(r#"{"pocScan":{"enable":true},"target":"a.com"}"#).unwrap();

        // portScan (default on) runs, pocScan has no adapter and is skipped.
        let output = pipeline.run(&mut ctx, &config).await.unwrap();
        assert_eq!(output.summary, "portScan ok");
    }
}
