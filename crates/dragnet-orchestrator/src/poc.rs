//! Ad-hoc POC validation tasks.
//!
//! Unlike full scan submissions these skip the main-task record: a UUID task
//! id is minted, the single-batch config goes straight onto the queue at
//! high priority, and the info cache carries enough context for result
//! queries.

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use dragnet_core::wire::{PocValidateRequest, PocValidateResponse, CODE_BAD_INPUT, CODE_OK};
use dragnet_core::{Result, SubTaskSpec, TaskInfoCache};

use crate::scheduler::Scheduler;

/// Workspace used when the request does not name one.
const DEFAULT_WORKSPACE: &str = "default";

pub struct PocValidationService {
    scheduler: Arc<Scheduler>,
}

impl PocValidationService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        PocValidationService { scheduler }
    }

    /// Create and enqueue a validation task. Fails fast when no worker holds
    /// a live heartbeat, so the caller gets an actionable message instead of
    /// a task that sits in the queue forever.
    pub async fn create(&self, request: &PocValidateRequest) -> Result<PocValidateResponse> {
        if !self.scheduler.any_worker_alive().await? {
            return Ok(PocValidateResponse {
                code: CODE_OK,
                success: false,
                message: "no live scan workers available, check worker status".to_string(),
                task_id: String::new(),
            });
        }

        let workspace_id = if request.workspace_id.is_empty() {
            DEFAULT_WORKSPACE.to_string()
        } else {
            request.workspace_id.clone()
        };

        let (task_type, target_urls) = if request.batch_mode && !request.urls.is_empty() {
            ("poc_batch_validate", request.urls.clone())
        } else if !request.url.is_empty() {
            ("poc_validate", vec![request.url.clone()])
        } else {
            return Ok(PocValidateResponse {
                code: CODE_BAD_INPUT,
                success: false,
                message: "no target url provided".to_string(),
                task_id: String::new(),
            });
        };

        let task_id = Uuid::new_v4().to_string();

        let mut config = json!({
            "taskType": task_type,
            "urls": target_urls,
            "pocId": request.poc_id,
            "pocType": request.poc_type,
            "timeout": request.timeout,
            "workspaceId": workspace_id,
            "batchMode": request.batch_mode,
            "target": target_urls.join("\n"),
        });
        if target_urls.len() == 1 {
            config["url"] = json!(target_urls[0]);
        }

        let task_name = if request.batch_mode {
            "poc batch validation"
        } else {
            "poc validation"
        };

        let spec = SubTaskSpec {
            task_id: task_id.clone(),
            main_task_id: task_id.clone(),
            workspace_id: workspace_id.clone(),
            task_name: task_name.to_string(),
            config: config.to_string(),
            priority: 3,
            workers: Vec::new(),
        };
        self.scheduler.push_sub_task(&spec).await?;

        self.scheduler
            .cache_task_info(&TaskInfoCache {
                workspace_id,
                main_task_id: task_id.clone(),
                sub_task_count: 1,
                batch_count: 1,
                enabled_modules: 1,
            })
            .await?;

        info!(
            task_id = %task_id,
            poc_id = %request.poc_id,
            targets = target_urls.len(),
            "poc validation task enqueued"
        );

        Ok(PocValidateResponse {
            code: CODE_OK,
            success: true,
            message: "poc validation task dispatched".to_string(),
            task_id,
        })
    }
}
