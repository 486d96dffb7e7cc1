//! Orphan recovery on worker restart.
//!
//! A reporting worker triggers two sweeps: (a) processing-set entries whose
//! status blob names that worker are cleared, whatever state the blob is in
//! (intentionally broad: the restart proves those claims are stale); (b)
//! STARTED main tasks with no progress inside the liveness window are reset
//! to PENDING and all their batches re-enqueued ahead of fresh work.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use dragnet_core::{DragnetError, MainTaskStatus, Result, TaskConfig, WorkerLogEntry};
use dragnet_state::{keys, ScanStore};

use crate::builder::build_sub_task;
use crate::scheduler::Scheduler;

/// Default window after which a STARTED main task with no updates counts as
/// abandoned.
pub const DEFAULT_LIVENESS_WINDOW_SECS: i64 = 5 * 60;

pub struct RecoveryService {
    scheduler: Arc<Scheduler>,
    scan: Arc<dyn ScanStore>,
    liveness_window: Duration,
}

impl RecoveryService {
    pub fn new(scheduler: Arc<Scheduler>, scan: Arc<dyn ScanStore>) -> Self {
        RecoveryService {
            scheduler,
            scan,
            liveness_window: Duration::seconds(DEFAULT_LIVENESS_WINDOW_SECS),
        }
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Handle a worker restart announcement. Returns the re-enqueued
    /// sub-task ids.
    pub async fn recover(&self, worker_name: &str) -> Result<Vec<String>> {
        self.scheduler.heartbeat(worker_name).await?;
        self.clear_stale_claims(worker_name).await?;
        let recovered = self.requeue_stale_main_tasks().await?;

        if !recovered.is_empty() {
            self.scheduler
                .log_event(WorkerLogEntry::warn(
                    worker_name,
                    format!("recovery re-enqueued {} sub-tasks", recovered.len()),
                ))
                .await;
        }

        Ok(recovered)
    }

    async fn clear_stale_claims(&self, worker_name: &str) -> Result<()> {
        let control = self.scheduler.control();
        let processing = control
            .processing_members()
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;

        for task_id in processing {
            let Some(record) = self.scheduler.read_status(&task_id).await? else {
                continue;
            };
            if record.worker != worker_name {
                continue;
            }
            control
                .processing_remove(&task_id)
                .await
                .map_err(|e| DragnetError::Store(e.to_string()))?;
            control
                .delete(&keys::task_status(&task_id))
                .await
                .map_err(|e| DragnetError::Store(e.to_string()))?;
            info!(task_id = %task_id, worker = worker_name, "cleared stale claim");
        }
        Ok(())
    }

    async fn requeue_stale_main_tasks(&self) -> Result<Vec<String>> {
        let cutoff = Utc::now() - self.liveness_window;
        let stale = self
            .scan
            .list_stale_started(cutoff)
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;

        let mut recovered = Vec::new();
        for main in stale {
            let config = match TaskConfig::parse(&main.config) {
                Ok(config) => config,
                Err(e) => {
                    warn!(main_task_id = %main.id, error = %e, "unrecoverable config, skipping");
                    continue;
                }
            };

            let splitter = dragnet_core::TargetSplitter::new(config.batch_size());
            let batches = splitter.split(&main.target);
            if batches.is_empty() {
                continue;
            }

            let sub_task_count = batches.len() as u32 * config.enabled_modules();

            // Reset the accounting, then park in PENDING until workers pick
            // the re-issued batches up.
            self.scan
                .start_main_task(&main.workspace_id, &main.id, sub_task_count)
                .await
                .map_err(|e| DragnetError::Store(e.to_string()))?;
            self.scan
                .set_main_status(&main.workspace_id, &main.id, MainTaskStatus::Pending)
                .await
                .map_err(|e| DragnetError::Store(e.to_string()))?;

            let workers = config.workers();
            let total = batches.len();
            for (index, batch) in batches.iter().enumerate() {
                let spec = build_sub_task(&main, &config, batch, index, total, &workers);
                match self.scheduler.push_recovered(&spec).await {
                    Ok(()) => recovered.push(spec.task_id),
                    Err(e) => {
                        warn!(
                            task_id = %spec.task_id,
                            error = %e,
                            "failed to re-enqueue recovered sub-task"
                        );
                    }
                }
            }

            info!(
                main_task_id = %main.id,
                batches = total,
                "stale main task reset and re-enqueued"
            );
        }

        Ok(recovered)
    }
}
