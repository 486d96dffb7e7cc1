//! Storage trait definitions for Dragnet.
//!
//! Two abstractions:
//! - `ControlStore`: the shared KV/stream store backing the sub-task queue,
//!   control signals, worker registry and log stream.
//! - `ScanStore`: the opaque persistence layer for main tasks, assets and
//!   vulnerabilities.
//!
//! All traits are async and backend-agnostic. In-memory implementations are
//! provided in the `memory` module; the Redis backend implements
//! `ControlStore` for production. The production `ScanStore` adapter lives
//! outside this workspace.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dragnet_core::{Asset, MainTask, MainTaskStatus, Vulnerability};

use crate::error::StoreResult;

/// Outcome of a vulnerability upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulnUpsert {
    /// `true` when a new row was created, `false` on dedup update.
    pub inserted: bool,
    /// Scan count after the write.
    pub scan_count: u32,
}

/// Shared control-plane store.
///
/// Guarantees required of implementations:
/// - `queue_pop_min` is atomic across concurrent callers: at most one caller
///   receives a given member.
/// - Members with equal score dequeue in insertion order.
/// - `take_string` is consume-once: concurrent takers see the value at most
///   once.
/// - TTLs are honoured; an expired key behaves as absent.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Add a member to the task queue with the given score. Lower scores
    /// dequeue first.
    async fn queue_push(&self, member: &str, score: f64) -> StoreResult<()>;

    /// Atomically pop the lowest-score member, if any.
    async fn queue_pop_min(&self) -> StoreResult<Option<String>>;

    async fn queue_len(&self) -> StoreResult<u64>;

    /// Snapshot of queue members, lowest score first. Used by recovery
    /// checks and tests; not part of the worker hot path.
    async fn queue_members(&self) -> StoreResult<Vec<(String, f64)>>;

    async fn processing_add(&self, task_id: &str) -> StoreResult<()>;
    async fn processing_remove(&self, task_id: &str) -> StoreResult<()>;
    async fn processing_members(&self) -> StoreResult<Vec<String>>;

    /// Set a string key, optionally with a TTL.
    async fn put_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    async fn get_string(&self, key: &str) -> StoreResult<Option<String>>;

    /// Get and delete in one step (consume-once semantics).
    async fn take_string(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Add a worker name to the registry set.
    async fn register_worker(&self, name: &str) -> StoreResult<()>;

    async fn remove_worker(&self, name: &str) -> StoreResult<()>;

    async fn workers(&self) -> StoreResult<Vec<String>>;

    /// Append a JSON entry to the rolling log stream.
    async fn append_log(&self, entry_json: &str) -> StoreResult<()>;

    /// Fan an entry out to live subscribers. Best-effort; no delivery
    /// guarantee.
    async fn publish_log(&self, entry_json: &str) -> StoreResult<()>;
}

/// Opaque persistence for main tasks, assets and vulnerabilities.
///
/// Upserts are keyed semantically, so replaying the same write is safe and
/// only bumps counters and timestamps.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn insert_main_task(&self, task: &MainTask) -> StoreResult<()>;

    async fn get_main_task(&self, workspace_id: &str, id: &str) -> StoreResult<Option<MainTask>>;

    /// Flip a main task to STARTED with its sub-task accounting reset.
    async fn start_main_task(
        &self,
        workspace_id: &str,
        id: &str,
        sub_task_count: u32,
    ) -> StoreResult<()>;

    /// Set the status and bump `update_time`.
    async fn set_main_status(
        &self,
        workspace_id: &str,
        id: &str,
        status: MainTaskStatus,
    ) -> StoreResult<()>;

    /// Bump `update_time` only (progress heartbeat).
    async fn touch_main_task(&self, workspace_id: &str, id: &str) -> StoreResult<()>;

    /// Atomically add `done_delta` to `sub_task_done` (and flag a failed
    /// batch), returning the updated record so the caller can roll up.
    async fn record_sub_task_done(
        &self,
        workspace_id: &str,
        id: &str,
        done_delta: u32,
        failed: bool,
    ) -> StoreResult<MainTask>;

    /// Main tasks in STARTED state whose `update_time` is older than the
    /// given instant, across all workspaces.
    async fn list_stale_started(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<MainTask>>;

    async fn insert_asset(&self, asset: &Asset) -> StoreResult<()>;

    async fn find_asset(
        &self,
        workspace_id: &str,
        host: &str,
        port: u16,
    ) -> StoreResult<Option<Asset>>;

    /// Replace an existing asset record.
    async fn update_asset(&self, asset: &Asset) -> StoreResult<()>;

    /// Insert-or-update keyed by (workspace, host, port, poc_file, url).
    /// Insert sets `scan_count=1` and both seen timestamps; update bumps
    /// `scan_count` and `last_seen` only and overwrites the mutable
    /// evidence fields.
    async fn upsert_vuln(&self, vuln: &Vulnerability) -> StoreResult<VulnUpsert>;

    async fn find_vuln(
        &self,
        workspace_id: &str,
        host: &str,
        port: u16,
        poc_file: &str,
        url: &str,
    ) -> StoreResult<Option<Vulnerability>>;

    async fn count_vulns(&self, workspace_id: &str) -> StoreResult<u64>;
}
