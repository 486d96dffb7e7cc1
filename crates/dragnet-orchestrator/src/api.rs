//! Worker-facing HTTP API.
//!
//! Every endpoint answers HTTP 200; failures travel in the body `code`
//! field so workers treat transport errors and application errors
//! separately. Handlers stay thin and delegate to the service layer.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::error;
use uuid::Uuid;

use dragnet_core::wire::{
    BaseResponse, CheckTaskRequest, CheckTaskResponse, ControlPollRequest, ControlPollResponse,
    PocValidateRequest, PocValidateResponse, RecoveryRequest, RecoveryResponse,
    SaveVulnBatchRequest, SaveVulnBatchResponse, SignalEntry, SubmitTaskRequest,
    SubmitTaskResponse, TaskControlRequest, UpdateStatusRequest, UpdateStatusResponse,
    CODE_BAD_INPUT, CODE_INTERNAL, CODE_OK,
};
use dragnet_core::{DragnetError, MainTask};
use dragnet_state::ScanStore;

use crate::builder::TaskBuilder;
use crate::control::ControlService;
use crate::ingest::ResultIngestor;
use crate::poc::PocValidationService;
use crate::recovery::RecoveryService;
use crate::scheduler::{Claim, Scheduler};
use crate::status::StatusService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub builder: Arc<TaskBuilder>,
    pub status: Arc<StatusService>,
    pub recovery: Arc<RecoveryService>,
    pub ingestor: Arc<ResultIngestor>,
    pub poc: Arc<PocValidationService>,
    pub control: Arc<ControlService>,
    pub scan: Arc<dyn ScanStore>,
}

impl AppState {
    pub fn new(
        control_store: Arc<dyn dragnet_state::ControlStore>,
        scan: Arc<dyn ScanStore>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(control_store));
        AppState {
            builder: Arc::new(TaskBuilder::new(scheduler.clone(), scan.clone())),
            status: Arc::new(StatusService::new(scheduler.clone(), scan.clone())),
            recovery: Arc::new(RecoveryService::new(scheduler.clone(), scan.clone())),
            ingestor: Arc::new(ResultIngestor::new(scan.clone())),
            poc: Arc::new(PocValidationService::new(scheduler.clone())),
            control: Arc::new(ControlService::new(scheduler.clone(), scan.clone())),
            scheduler,
            scan,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/worker/task/check", post(check_task))
        .route("/worker/task/update", post(update_task))
        .route("/worker/task/control", post(poll_control))
        .route("/worker/task/recovery", post(announce_recovery))
        .route("/worker/result/vulns", post(save_vulns))
        .route("/worker/poc/validate", post(validate_poc))
        .route("/task/submit", post(submit_task))
        .route("/task/control", post(control_task))
        .with_state(state)
}

fn error_code(err: &DragnetError) -> i32 {
    match err {
        DragnetError::InvalidInput(_) => CODE_BAD_INPUT,
        _ => CODE_INTERNAL,
    }
}

async fn check_task(
    State(state): State<AppState>,
    Json(request): Json<CheckTaskRequest>,
) -> Json<CheckTaskResponse> {
    if let Err(e) = state.scheduler.heartbeat(&request.worker_name).await {
        error!(worker = %request.worker_name, error = %e, "heartbeat failed");
        return Json(CheckTaskResponse {
            code: error_code(&e),
            ..CheckTaskResponse::empty()
        });
    }

    match state.scheduler.claim(&request.worker_name).await {
        Ok(Claim::Task(spec)) => Json(CheckTaskResponse {
            code: CODE_OK,
            is_exist: true,
            is_finished: false,
            task_id: spec.task_id,
            main_task_id: spec.main_task_id,
            workspace_id: spec.workspace_id,
            config: spec.config,
        }),
        Ok(Claim::NotEligible) => Json(CheckTaskResponse {
            is_finished: false,
            ..CheckTaskResponse::empty()
        }),
        Ok(Claim::Empty) => Json(CheckTaskResponse::empty()),
        Err(e) => {
            error!(worker = %request.worker_name, error = %e, "claim failed");
            Json(CheckTaskResponse {
                code: error_code(&e),
                ..CheckTaskResponse::empty()
            })
        }
    }
}

async fn update_task(
    State(state): State<AppState>,
    Json(request): Json<UpdateStatusRequest>,
) -> Json<UpdateStatusResponse> {
    match state.status.apply(&request).await {
        Ok(()) => Json(UpdateStatusResponse::ok()),
        Err(e) => {
            error!(task_id = %request.task_id, error = %e, "status update failed");
            Json(UpdateStatusResponse::error(error_code(&e), e.to_string()))
        }
    }
}

async fn poll_control(
    State(state): State<AppState>,
    Json(request): Json<ControlPollRequest>,
) -> Json<ControlPollResponse> {
    if let Err(e) = state.scheduler.heartbeat(&request.worker_name).await {
        error!(worker = %request.worker_name, error = %e, "heartbeat failed");
    }

    match state.scheduler.take_control_signals(&request.task_ids).await {
        Ok(signals) => Json(ControlPollResponse {
            code: CODE_OK,
            signals: signals
                .into_iter()
                .map(|(task_id, action)| SignalEntry { task_id, action })
                .collect(),
        }),
        Err(e) => {
            error!(worker = %request.worker_name, error = %e, "control poll failed");
            Json(ControlPollResponse {
                code: error_code(&e),
                signals: Vec::new(),
            })
        }
    }
}

async fn announce_recovery(
    State(state): State<AppState>,
    Json(request): Json<RecoveryRequest>,
) -> Json<RecoveryResponse> {
    match state.recovery.recover(&request.worker_name).await {
        Ok(recovered) => Json(RecoveryResponse {
            code: CODE_OK,
            recovered_count: recovered.len() as u32,
            recovered_tasks: recovered,
        }),
        Err(e) => {
            error!(worker = %request.worker_name, error = %e, "recovery failed");
            Json(RecoveryResponse {
                code: error_code(&e),
                recovered_tasks: Vec::new(),
                recovered_count: 0,
            })
        }
    }
}

async fn save_vulns(
    State(state): State<AppState>,
    Json(request): Json<SaveVulnBatchRequest>,
) -> Json<SaveVulnBatchResponse> {
    Json(state.ingestor.save(&request).await)
}

async fn validate_poc(
    State(state): State<AppState>,
    Json(request): Json<PocValidateRequest>,
) -> Json<PocValidateResponse> {
    match state.poc.create(&request).await {
        Ok(response) => Json(response),
        Err(e) => {
            error!(error = %e, "poc validation dispatch failed");
            Json(PocValidateResponse {
                code: error_code(&e),
                success: false,
                message: e.to_string(),
                task_id: String::new(),
            })
        }
    }
}

async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitTaskRequest>,
) -> Json<SubmitTaskResponse> {
    let workspace_id = if request.workspace_id.is_empty() {
        "default".to_string()
    } else {
        request.workspace_id.clone()
    };

    let task = MainTask::new(
        Uuid::new_v4().to_string(),
        workspace_id,
        request.name.clone(),
        request.target.clone(),
        if request.config.is_empty() {
            "{}".to_string()
        } else {
            request.config.clone()
        },
    );

    if let Err(e) = state.scan.insert_main_task(&task).await {
        error!(error = %e, "failed to persist main task");
        return Json(SubmitTaskResponse {
            code: CODE_INTERNAL,
            msg: e.to_string(),
            task_id: String::new(),
            sub_task_count: 0,
        });
    }

    match state.builder.build_and_push(&task).await {
        Ok(summary) => Json(SubmitTaskResponse {
            code: CODE_OK,
            msg: String::new(),
            task_id: task.id,
            sub_task_count: summary.sub_task_count,
        }),
        Err(e) => {
            error!(task_id = %task.id, error = %e, "task build failed");
            Json(SubmitTaskResponse {
                code: error_code(&e),
                msg: e.to_string(),
                task_id: task.id,
                sub_task_count: 0,
            })
        }
    }
}

async fn control_task(
    State(state): State<AppState>,
    Json(request): Json<TaskControlRequest>,
) -> Json<BaseResponse> {
    match state.control.signal(&request.task_id, request.action).await {
        Ok(_) => Json(BaseResponse::ok()),
        Err(e) => {
            error!(task_id = %request.task_id, error = %e, "control signal failed");
            Json(BaseResponse::error(error_code(&e), e.to_string()))
        }
    }
}
