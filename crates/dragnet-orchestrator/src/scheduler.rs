//! Shared-queue scheduling over the control store.
//!
//! Score encoding: the default score is the wall-clock instant in
//! nanoseconds, so equal-priority sub-tasks dequeue FIFO. An explicit
//! priority (1 low .. 4 urgent) subtracts one 1000-second band per level
//! above low; a recovery enqueue subtracts 5000 seconds to leap ahead of all
//! fresh work. Ordering is advisory across workers, so a stepped-back clock
//! only reorders, never corrupts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use dragnet_core::{
    ControlAction, DragnetError, Result, SubTaskSpec, TaskInfoCache, TaskStatusRecord,
    WorkerLogEntry,
};
use dragnet_state::{keys, ControlStore};

const NANOS_PER_SEC: f64 = 1e9;
/// Seconds one explicit priority level jumps ahead of the next lower one.
const PRIORITY_BAND_SECS: f64 = 1000.0;
/// Seconds a recovery enqueue jumps ahead of fresh work.
const RECOVERY_BOOST_SECS: f64 = 5000.0;

/// Queue score for a sub-task enqueued at `now` with an explicit 1-4
/// priority. Lower scores dequeue first.
pub fn queue_score(priority: i64, now: DateTime<Utc>) -> f64 {
    let base = now.timestamp_nanos_opt().unwrap_or(0) as f64;
    let levels = (priority - 1).clamp(0, 3) as f64;
    base - levels * PRIORITY_BAND_SECS * NANOS_PER_SEC
}

/// Boosted score used when re-enqueueing recovered work.
pub fn recovery_score(now: DateTime<Utc>) -> f64 {
    let base = now.timestamp_nanos_opt().unwrap_or(0) as f64;
    base - RECOVERY_BOOST_SECS * NANOS_PER_SEC
}

/// Result of a claim attempt.
#[derive(Debug)]
pub enum Claim {
    /// A sub-task was atomically popped and moved to the processing set.
    Task(SubTaskSpec),
    /// The queue held only work pinned to other workers.
    NotEligible,
    /// The queue was empty.
    Empty,
}

/// Queue, control-signal and worker-registry operations shared by every API
/// handler.
pub struct Scheduler {
    control: Arc<dyn ControlStore>,
}

impl Scheduler {
    pub fn new(control: Arc<dyn ControlStore>) -> Self {
        Scheduler { control }
    }

    pub fn control(&self) -> &Arc<dyn ControlStore> {
        &self.control
    }

    /// Serialise and enqueue a sub-task at its explicit priority.
    pub async fn push_sub_task(&self, spec: &SubTaskSpec) -> Result<()> {
        self.push_with_score(spec, queue_score(spec.priority, Utc::now()))
            .await
    }

    /// Enqueue with the recovery boost.
    pub async fn push_recovered(&self, spec: &SubTaskSpec) -> Result<()> {
        self.push_with_score(spec, recovery_score(Utc::now())).await
    }

    async fn push_with_score(&self, spec: &SubTaskSpec, score: f64) -> Result<()> {
        let member = serde_json::to_string(spec)?;
        self.control
            .queue_push(&member, score)
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))
    }

    /// Refresh the worker registry entry and its liveness key. Called on
    /// every poll, so the <=30 s TTL stays ahead of the <=5 s poll cadence.
    pub async fn heartbeat(&self, worker_name: &str) -> Result<()> {
        self.control
            .register_worker(worker_name)
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;
        self.control
            .put_string(
                &keys::worker_heartbeat(worker_name),
                "alive",
                Some(keys::HEARTBEAT_TTL),
            )
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))
    }

    /// Whether any registered worker currently holds a live heartbeat.
    pub async fn any_worker_alive(&self) -> Result<bool> {
        let workers = self
            .control
            .workers()
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;
        for name in workers {
            let alive = self
                .control
                .exists(&keys::worker_heartbeat(&name))
                .await
                .map_err(|e| DragnetError::Store(e.to_string()))?;
            if alive {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Atomically claim the next sub-task for `worker_name`.
    ///
    /// On success the member moves to the processing set and its status key
    /// records the claim. A popped sub-task pinned to other workers is
    /// pushed back near the queue front and `NotEligible` is returned.
    pub async fn claim(&self, worker_name: &str) -> Result<Claim> {
        let Some(member) = self
            .control
            .queue_pop_min()
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?
        else {
            return Ok(Claim::Empty);
        };

        let spec: SubTaskSpec = match serde_json::from_str(&member) {
            Ok(spec) => spec,
            Err(e) => {
                // A corrupt member would wedge the queue head forever if
                // re-pushed; drop it and keep serving.
                warn!(error = %e, "dropping undecodable queue member");
                return Ok(Claim::Empty);
            }
        };

        if !spec.workers.is_empty() && !spec.workers.iter().any(|w| w == worker_name) {
            debug!(
                task_id = %spec.task_id,
                worker = worker_name,
                "sub-task pinned to other workers, re-queueing"
            );
            let near_front =
                Utc::now().timestamp_nanos_opt().unwrap_or(0) as f64 - NANOS_PER_SEC;
            self.push_with_score(&spec, near_front).await?;
            return Ok(Claim::NotEligible);
        }

        self.control
            .processing_add(&spec.task_id)
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;

        let record = TaskStatusRecord::claimed(worker_name);
        self.write_status(&spec.task_id, &record).await?;

        self.log_event(WorkerLogEntry::info(
            worker_name,
            format!("claimed sub-task {}", spec.task_id),
        ))
        .await;

        Ok(Claim::Task(spec))
    }

    pub async fn write_status(&self, task_id: &str, record: &TaskStatusRecord) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.control
            .put_string(&keys::task_status(task_id), &value, Some(keys::STATUS_TTL))
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))
    }

    pub async fn read_status(&self, task_id: &str) -> Result<Option<TaskStatusRecord>> {
        let raw = self
            .control
            .get_string(&keys::task_status(task_id))
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Publish a control signal for one sub-task. Idempotent: re-sending the
    /// same action just refreshes the short-lived key.
    pub async fn send_control(&self, task_id: &str, action: ControlAction) -> Result<()> {
        self.control
            .put_string(
                &keys::task_ctrl(task_id),
                action.as_str(),
                Some(keys::CTRL_TTL),
            )
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))
    }

    /// Consume pending control signals for the given sub-tasks. Each key is
    /// read-and-cleared so a signal is delivered at most once.
    pub async fn take_control_signals(
        &self,
        task_ids: &[String],
    ) -> Result<Vec<(String, ControlAction)>> {
        let mut signals = Vec::new();
        for task_id in task_ids {
            let raw = self
                .control
                .take_string(&keys::task_ctrl(task_id))
                .await
                .map_err(|e| DragnetError::Store(e.to_string()))?;
            if let Some(action) = raw.as_deref().and_then(ControlAction::parse) {
                signals.push((task_id.clone(), action));
            }
        }
        Ok(signals)
    }

    pub async fn cache_task_info(&self, info: &TaskInfoCache) -> Result<()> {
        let value = serde_json::to_string(info)?;
        self.control
            .put_string(
                &keys::task_info(&info.main_task_id),
                &value,
                Some(keys::INFO_TTL),
            )
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))
    }

    pub async fn task_info(&self, main_task_id: &str) -> Result<Option<TaskInfoCache>> {
        let raw = self
            .control
            .get_string(&keys::task_info(main_task_id))
            .await
            .map_err(|e| DragnetError::Store(e.to_string()))?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Resolve the owning main task of a sub-task id via the info cache:
    /// the id is either the main id itself (single batch) or
    /// `<mainTaskId>-<batchIndex>`.
    pub async fn resolve_main_task(&self, task_id: &str) -> Result<Option<TaskInfoCache>> {
        if let Some(info) = self.task_info(task_id).await? {
            return Ok(Some(info));
        }
        if let Some((prefix, suffix)) = task_id.rsplit_once('-') {
            if suffix.parse::<u32>().is_ok() {
                return self.task_info(prefix).await;
            }
        }
        Ok(None)
    }

    /// Best-effort append to the shared log stream and realtime fanout.
    pub async fn log_event(&self, entry: WorkerLogEntry) {
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(_) => return,
        };
        if let Err(e) = self.control.append_log(&json).await {
            warn!(error = %e, "failed to append worker log entry");
        }
        if let Err(e) = self.control.publish_log(&json).await {
            debug!(error = %e, "failed to publish worker log entry");
        }
    }
}
