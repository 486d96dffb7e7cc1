//! Progress and terminal status handling, plus the main-task roll-up.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use dragnet_core::wire::UpdateStatusRequest;
use dragnet_core::{
    DragnetError, MainTaskStatus, Result, TaskState, TaskStatusRecord, WorkerLogEntry,
    PHASE_STOPPED,
};
use dragnet_state::{ScanStore, StoreError};

use crate::scheduler::Scheduler;

/// Applies worker status updates to the control plane and the scan store.
pub struct StatusService {
    scheduler: Arc<Scheduler>,
    scan: Arc<dyn ScanStore>,
}

impl StatusService {
    pub fn new(scheduler: Arc<Scheduler>, scan: Arc<dyn ScanStore>) -> Self {
        StatusService { scheduler, scan }
    }

    /// Apply one update. Status writes are last-writer-wins, except that a
    /// terminal state (success/failure) is never downgraded back to
    /// started/paused by a late progress update.
    pub async fn apply(&self, update: &UpdateStatusRequest) -> Result<()> {
        if let Some(current) = self.scheduler.read_status(&update.task_id).await? {
            if current.state.is_terminal() && !update.state.is_terminal() {
                return Ok(());
            }
        }

        let record = TaskStatusRecord {
            state: update.state,
            worker: update.worker.clone(),
            result: update.result.clone(),
            phase: update.phase.clone(),
            progress: update.progress.min(100),
            update_time: Utc::now(),
        };
        self.scheduler.write_status(&update.task_id, &record).await?;

        let info = self.scheduler.resolve_main_task(&update.task_id).await?;

        if !update.state.is_terminal() {
            // Progress keeps the main task out of the stale-recovery sweep.
            if let Some(info) = &info {
                if let Err(e) = self
                    .scan
                    .touch_main_task(&info.workspace_id, &info.main_task_id)
                    .await
                {
                    if !matches!(e, StoreError::NotFound { .. }) {
                        return Err(DragnetError::Store(e.to_string()));
                    }
                }
            }
            return Ok(());
        }

        // Terminal: release the claim and roll the accounting up.
        self.scheduler
            .control()
            .processing_remove(&update.task_id)
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;

        self.scheduler
            .log_event(WorkerLogEntry::info(
                &update.worker,
                format!(
                    "sub-task {} finished: {}",
                    update.task_id,
                    match update.state {
                        TaskState::Success => "success",
                        TaskState::Failure => "failure",
                        _ => "done",
                    }
                ),
            ))
            .await;

        let Some(info) = info else {
            // Ad-hoc tasks (POC validation) have no main-task record.
            return Ok(());
        };

        let failed = update.state == TaskState::Failure && update.phase != PHASE_STOPPED;

        // One queue entry covers `enabledModules` accounting units.
        let main = match self
            .scan
            .record_sub_task_done(
                &info.workspace_id,
                &info.main_task_id,
                info.enabled_modules,
                failed,
            )
            .await
        {
            Ok(main) => main,
            Err(StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(DragnetError::Store(e.to_string())),
        };

        if main.sub_task_done >= main.sub_task_count && !main.status.is_terminal() {
            let final_status = if main.sub_task_failed > 0 {
                MainTaskStatus::Failure
            } else {
                MainTaskStatus::Success
            };
            if let Err(e) = self
                .scan
                .set_main_status(&info.workspace_id, &info.main_task_id, final_status)
                .await
            {
                warn!(
                    main_task_id = %info.main_task_id,
                    error = %e,
                    "failed to roll up main task status"
                );
            }
        }

        Ok(())
    }
}
