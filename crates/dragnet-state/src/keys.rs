//! Shared key layout of the control-plane store.
//!
//! The string layout is part of the cross-process contract: orchestrator,
//! workers (via the API) and recovery all address the same keys. Changing a
//! name here is a wire-compatibility break.

use std::time::Duration;

/// Sorted set of pending sub-tasks; score orders dequeue.
pub const TASK_QUEUE: &str = "task:queue";

/// Set of in-flight sub-task ids, used for orphan detection.
pub const TASK_PROCESSING: &str = "task:processing";

/// Set of registered worker names.
pub const WORKERS: &str = "workers";

/// Stream of historical worker log entries.
pub const WORKER_LOGS_STREAM: &str = "worker:logs";

/// Pub/sub channel for live log fanout.
pub const WORKER_LOGS_CHANNEL: &str = "worker:logs:realtime";

/// Progress snapshot for one sub-task.
pub fn task_status(task_id: &str) -> String {
    format!("task:status:{task_id}")
}

/// Pending control signal for one sub-task.
pub fn task_ctrl(task_id: &str) -> String {
    format!("task:ctrl:{task_id}")
}

/// Builder metadata for one main task.
pub fn task_info(main_task_id: &str) -> String {
    format!("task:info:{main_task_id}")
}

/// Liveness key for one worker.
pub fn worker_heartbeat(name: &str) -> String {
    format!("worker:{name}")
}

pub const STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const CTRL_TTL: Duration = Duration::from_secs(5 * 60);
pub const INFO_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(30);

/// Approximate cap on the rolling log stream.
pub const LOG_STREAM_MAXLEN: usize = 10_000;
