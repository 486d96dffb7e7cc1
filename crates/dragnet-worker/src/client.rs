//! HTTP client for the orchestrator's worker API.
//!
//! The trait seam lets the runtime run against a fake in tests; the real
//! client is a thin `reqwest` wrapper. Endpoints always answer HTTP 200
//! with an application `code`, so transport failures and application
//! failures surface as distinct errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use dragnet_core::wire::{
    CheckTaskRequest, CheckTaskResponse, ControlPollRequest, ControlPollResponse, RecoveryRequest,
    RecoveryResponse, SaveVulnBatchRequest, SaveVulnBatchResponse, UpdateStatusRequest,
    UpdateStatusResponse,
};
use dragnet_core::{DragnetError, Result};

/// Worker-side view of the control plane.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    async fn check_task(&self, request: &CheckTaskRequest) -> Result<CheckTaskResponse>;
    async fn update_status(&self, request: &UpdateStatusRequest) -> Result<UpdateStatusResponse>;
    async fn poll_control(&self, request: &ControlPollRequest) -> Result<ControlPollResponse>;
    async fn announce_recovery(&self, request: &RecoveryRequest) -> Result<RecoveryResponse>;
    async fn save_vulns(&self, request: &SaveVulnBatchRequest) -> Result<SaveVulnBatchResponse>;
}

/// Production client over HTTP.
pub struct HttpOrchestratorClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpOrchestratorClient {
    /// Bounded timeouts keep a wedged orchestrator from stalling the poll
    /// loops; retry policy lives with the callers.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("dragnet-worker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| DragnetError::Fatal(format!("cannot build http client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(HttpOrchestratorClient { base_url, http })
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| DragnetError::Transport(format!("POST {path}: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| DragnetError::Transport(format!("POST {path}: bad response: {e}")))
    }
}

#[async_trait]
impl OrchestratorApi for HttpOrchestratorClient {
    async fn check_task(&self, request: &CheckTaskRequest) -> Result<CheckTaskResponse> {
        self.post_json("/worker/task/check", request).await
    }

    async fn update_status(&self, request: &UpdateStatusRequest) -> Result<UpdateStatusResponse> {
        self.post_json("/worker/task/update", request).await
    }

    async fn poll_control(&self, request: &ControlPollRequest) -> Result<ControlPollResponse> {
        self.post_json("/worker/task/control", request).await
    }

    async fn announce_recovery(&self, request: &RecoveryRequest) -> Result<RecoveryResponse> {
        self.post_json("/worker/task/recovery", request).await
    }

    async fn save_vulns(&self, request: &SaveVulnBatchRequest) -> Result<SaveVulnBatchResponse> {
        self.post_json("/worker/result/vulns", request).await
    }
}
