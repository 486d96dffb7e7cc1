//! Operator control fan-out.
//!
//! Control signals address individual sub-tasks, but operators think in main
//! tasks. When the given id resolves to a cached main task the signal fans
//! out to every batch id; otherwise it targets the single sub-task. Both
//! paths are idempotent: re-sending just refreshes the short-lived keys.

use std::sync::Arc;

use tracing::info;

use dragnet_core::{ControlAction, DragnetError, MainTaskStatus, Result};
use dragnet_state::{ScanStore, StoreError};

use crate::scheduler::Scheduler;

pub struct ControlService {
    scheduler: Arc<Scheduler>,
    scan: Arc<dyn ScanStore>,
}

impl ControlService {
    pub fn new(scheduler: Arc<Scheduler>, scan: Arc<dyn ScanStore>) -> Self {
        ControlService { scheduler, scan }
    }

    /// Publish `action` for the main task or sub-task identified by
    /// `task_id`. Returns the number of control keys written.
    pub async fn signal(&self, task_id: &str, action: ControlAction) -> Result<u32> {
        let Some(info) = self.scheduler.task_info(task_id).await? else {
            // Plain sub-task id.
            self.scheduler.send_control(task_id, action).await?;
            return Ok(1);
        };

        // Main task: one key per batch, matching the builder's id minting.
        let mut written = 0;
        if info.batch_count <= 1 {
            self.scheduler.send_control(&info.main_task_id, action).await?;
            written += 1;
        } else {
            for index in 0..info.batch_count {
                let sub_id = format!("{}-{}", info.main_task_id, index);
                self.scheduler.send_control(&sub_id, action).await?;
                written += 1;
            }
        }

        let new_status = match action {
            ControlAction::Stop => MainTaskStatus::Stopped,
            ControlAction::Pause => MainTaskStatus::Paused,
            ControlAction::Resume => MainTaskStatus::Started,
        };
        match self
            .scan
            .get_main_task(&info.workspace_id, &info.main_task_id)
            .await
        {
            // A main task that already reached success/failure stays there.
            Ok(Some(main)) if !main.status.is_terminal() => {
                match self
                    .scan
                    .set_main_status(&info.workspace_id, &info.main_task_id, new_status)
                    .await
                {
                    Ok(()) | Err(StoreError::NotFound { .. }) => {}
                    Err(e) => return Err(DragnetError::Store(e.to_string())),
                }
            }
            Ok(_) => {}
            Err(e) => return Err(DragnetError::Store(e.to_string())),
        }

        info!(
            main_task_id = %info.main_task_id,
            action = action.as_str(),
            signals = written,
            "control signal fanned out"
        );
        Ok(written)
    }
}
