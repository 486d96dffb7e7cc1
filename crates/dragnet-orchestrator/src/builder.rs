//! Converts one accepted main task into enqueued sub-tasks.

use std::sync::Arc;

use tracing::{error, info};

use dragnet_core::{
    DragnetError, MainTask, MainTaskStatus, Result, SubTaskSpec, TaskConfig, TaskInfoCache,
    TargetSplitter,
};
use dragnet_state::ScanStore;

use crate::scheduler::Scheduler;

/// Summary of a build-and-push run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub batch_count: u32,
    pub enabled_modules: u32,
    pub sub_task_count: u32,
    /// Batches actually enqueued; the rest become stuck tasks picked up by
    /// recovery.
    pub pushed: u32,
}

/// Splits a main task's targets and pushes one sub-task per batch.
pub struct TaskBuilder {
    scheduler: Arc<Scheduler>,
    scan: Arc<dyn ScanStore>,
}

impl TaskBuilder {
    pub fn new(scheduler: Arc<Scheduler>, scan: Arc<dyn ScanStore>) -> Self {
        TaskBuilder { scheduler, scan }
    }

    /// Split targets, persist the accounting, cache builder metadata and
    /// enqueue every batch. A single enqueue failure does not abort the
    /// loop. A target list that expands to nothing yields zero batches and
    /// completes on the spot through the `done == count` roll-up.
    pub async fn build_and_push(&self, task: &MainTask) -> Result<BuildSummary> {
        let config = TaskConfig::parse(&task.config)?;

        let splitter = TargetSplitter::new(config.batch_size());
        let batches = splitter.split(&task.target);

        let enabled_modules = config.enabled_modules();
        let batch_count = batches.len() as u32;
        let sub_task_count = batch_count * enabled_modules;

        self.scan
            .start_main_task(&task.workspace_id, &task.id, sub_task_count)
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;

        self.scheduler
            .cache_task_info(&TaskInfoCache {
                workspace_id: task.workspace_id.clone(),
                main_task_id: task.id.clone(),
                sub_task_count,
                batch_count,
                enabled_modules,
            })
            .await?;

        let workers = config.workers();
        info!(
            main_task_id = %task.id,
            batches = batch_count,
            modules = enabled_modules,
            "pushing sub-tasks"
        );

        let mut pushed = 0;
        let total = batches.len();
        for (index, batch) in batches.iter().enumerate() {
            let spec = build_sub_task(task, &config, batch, index, total, &workers);
            match self.scheduler.push_sub_task(&spec).await {
                Ok(()) => pushed += 1,
                Err(e) => {
                    // Missing batches are recoverable via the stale-task
                    // path, so keep pushing the rest.
                    error!(
                        main_task_id = %task.id,
                        batch = index,
                        error = %e,
                        "failed to push batch"
                    );
                }
            }
        }

        if sub_task_count == 0 {
            self.scan
                .set_main_status(&task.workspace_id, &task.id, MainTaskStatus::Success)
                .await
                .map_err(|e| DragnetError::Store(e.to_string()))?;
        }

        Ok(BuildSummary {
            batch_count,
            enabled_modules,
            sub_task_count,
            pushed,
        })
    }
}

/// Mint the sub-task for one batch: deep-copied config with the batch target
/// and index metadata injected. Single-batch tasks reuse the main task id.
pub fn build_sub_task(
    task: &MainTask,
    base_config: &TaskConfig,
    batch_target: &str,
    index: usize,
    total: usize,
    workers: &[String],
) -> SubTaskSpec {
    let sub_config = base_config.for_batch(batch_target, index, total);
    let task_id = if total > 1 {
        format!("{}-{}", task.id, index)
    } else {
        task.id.clone()
    };

    SubTaskSpec {
        task_id,
        main_task_id: task.id.clone(),
        workspace_id: task.workspace_id.clone(),
        task_name: task.name.clone(),
        config: sub_config.to_json(),
        priority: 1,
        workers: workers.to_vec(),
    }
}
