//! In-memory store implementations for testing.
//!
//! `MemoryControlStore` and `MemoryScanStore` satisfy the trait contracts
//! without any external service. TTLs are simulated with lazy expiry checks;
//! tests can force a key to expire via [`MemoryControlStore::force_expire`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dragnet_core::{Asset, MainTask, MainTaskStatus, Vulnerability};

use crate::error::{StoreError, StoreResult};
use crate::traits::{ControlStore, ScanStore, VulnUpsert};

// ---------------------------------------------------------------------------
// MemoryControlStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ControlInner {
    seq: u64,
    /// (score, insertion seq, member); equal scores dequeue in seq order.
    queue: Vec<(f64, u64, String)>,
    processing: Vec<String>,
    strings: HashMap<String, (String, Option<Instant>)>,
    workers: Vec<String>,
    logs: Vec<String>,
    published: Vec<String>,
}

impl ControlInner {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.strings
            .retain(|_, (_, expiry)| expiry.map(|e| e > now).unwrap_or(true));
    }
}

/// In-memory control-plane store backed by plain collections.
#[derive(Debug, Default)]
pub struct MemoryControlStore {
    inner: Mutex<ControlInner>,
}

impl MemoryControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a key as if its TTL elapsed.
    pub fn force_expire(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
    }

    /// Entries published on the realtime channel so far.
    pub fn published(&self) -> Vec<String> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Entries appended to the log stream so far.
    pub fn log_entries(&self) -> Vec<String> {
        self.inner.lock().unwrap().logs.clone()
    }
}

#[async_trait]
impl ControlStore for MemoryControlStore {
    async fn queue_push(&self, member: &str, score: f64) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.seq += 1;
        let seq = inner.seq;
        inner.queue.push((score, seq, member.to_string()));
        Ok(())
    }

    async fn queue_pop_min(&self) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        let min_idx = inner
            .queue
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            })
            .map(|(idx, _)| idx);
        Ok(min_idx.map(|idx| inner.queue.remove(idx).2))
    }

    async fn queue_len(&self) -> StoreResult<u64> {
        Ok(self.inner.lock().unwrap().queue.len() as u64)
    }

    async fn queue_members(&self) -> StoreResult<Vec<(String, f64)>> {
        let inner = self.inner.lock().unwrap();
        let mut members: Vec<_> = inner.queue.clone();
        members.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        Ok(members.into_iter().map(|(score, _, m)| (m, score)).collect())
    }

    async fn processing_add(&self, task_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.processing.iter().any(|t| t == task_id) {
            inner.processing.push(task_id.to_string());
        }
        Ok(())
    }

    async fn processing_remove(&self, task_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.retain(|t| t != task_id);
        Ok(())
    }

    async fn processing_members(&self) -> StoreResult<Vec<String>> {
        Ok(self.inner.lock().unwrap().processing.clone())
    }

    async fn put_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let expiry = ttl.map(|d| Instant::now() + d);
        inner.strings.insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn get_string(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        Ok(inner.strings.get(key).map(|(v, _)| v.clone()))
    }

    async fn take_string(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        Ok(inner.strings.remove(key).map(|(v, _)| v))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.purge_expired();
        Ok(inner.strings.contains_key(key))
    }

    async fn register_worker(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.workers.iter().any(|w| w == name) {
            inner.workers.push(name.to_string());
        }
        Ok(())
    }

    async fn remove_worker(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.workers.retain(|w| w != name);
        Ok(())
    }

    async fn workers(&self) -> StoreResult<Vec<String>> {
        Ok(self.inner.lock().unwrap().workers.clone())
    }

    async fn append_log(&self, entry_json: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.logs.push(entry_json.to_string());
        Ok(())
    }

    async fn publish_log(&self, entry_json: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.published.push(entry_json.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryScanStore
// ---------------------------------------------------------------------------

type VulnDedupKey = (String, u16, String, String);

#[derive(Debug, Default)]
struct WorkspaceData {
    main_tasks: HashMap<String, MainTask>,
    assets: HashMap<(String, u16), Asset>,
    vulns: HashMap<VulnDedupKey, Vulnerability>,
}

/// In-memory scan store, workspace-partitioned like the production backend.
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    workspaces: Mutex<HashMap<String, WorkspaceData>>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(workspace_id: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        key: format!("{workspace_id}/{id}"),
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn insert_main_task(&self, task: &MainTask) -> StoreResult<()> {
        let mut ws = self.workspaces.lock().unwrap();
        ws.entry(task.workspace_id.clone())
            .or_default()
            .main_tasks
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_main_task(&self, workspace_id: &str, id: &str) -> StoreResult<Option<MainTask>> {
        let ws = self.workspaces.lock().unwrap();
        Ok(ws
            .get(workspace_id)
            .and_then(|data| data.main_tasks.get(id))
            .cloned())
    }

    async fn start_main_task(
        &self,
        workspace_id: &str,
        id: &str,
        sub_task_count: u32,
    ) -> StoreResult<()> {
        let mut ws = self.workspaces.lock().unwrap();
        let task = ws
            .get_mut(workspace_id)
            .and_then(|data| data.main_tasks.get_mut(id))
            .ok_or_else(|| missing(workspace_id, id))?;
        task.status = MainTaskStatus::Started;
        task.sub_task_count = sub_task_count;
        task.sub_task_done = 0;
        task.sub_task_failed = 0;
        task.start_time = Some(Utc::now());
        task.update_time = Utc::now();
        Ok(())
    }

    async fn set_main_status(
        &self,
        workspace_id: &str,
        id: &str,
        status: MainTaskStatus,
    ) -> StoreResult<()> {
        let mut ws = self.workspaces.lock().unwrap();
        let task = ws
            .get_mut(workspace_id)
            .and_then(|data| data.main_tasks.get_mut(id))
            .ok_or_else(|| missing(workspace_id, id))?;
        task.status = status;
        task.update_time = Utc::now();
        Ok(())
    }

    async fn touch_main_task(&self, workspace_id: &str, id: &str) -> StoreResult<()> {
        let mut ws = self.workspaces.lock().unwrap();
        let task = ws
            .get_mut(workspace_id)
            .and_then(|data| data.main_tasks.get_mut(id))
            .ok_or_else(|| missing(workspace_id, id))?;
        task.update_time = Utc::now();
        Ok(())
    }

    async fn record_sub_task_done(
        &self,
        workspace_id: &str,
        id: &str,
        done_delta: u32,
        failed: bool,
    ) -> StoreResult<MainTask> {
        let mut ws = self.workspaces.lock().unwrap();
        let task = ws
            .get_mut(workspace_id)
            .and_then(|data| data.main_tasks.get_mut(id))
            .ok_or_else(|| missing(workspace_id, id))?;
        task.sub_task_done = (task.sub_task_done + done_delta).min(task.sub_task_count);
        if failed {
            task.sub_task_failed += 1;
        }
        task.update_time = Utc::now();
        Ok(task.clone())
    }

    async fn list_stale_started(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<MainTask>> {
        let ws = self.workspaces.lock().unwrap();
        let mut stale: Vec<MainTask> = ws
            .values()
            .flat_map(|data| data.main_tasks.values())
            .filter(|t| t.status == MainTaskStatus::Started && t.update_time < older_than)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stale)
    }

    async fn insert_asset(&self, asset: &Asset) -> StoreResult<()> {
        let mut ws = self.workspaces.lock().unwrap();
        ws.entry(asset.workspace_id.clone())
            .or_default()
            .assets
            .insert((asset.host.clone(), asset.port), asset.clone());
        Ok(())
    }

    async fn find_asset(
        &self,
        workspace_id: &str,
        host: &str,
        port: u16,
    ) -> StoreResult<Option<Asset>> {
        let ws = self.workspaces.lock().unwrap();
        Ok(ws
            .get(workspace_id)
            .and_then(|data| data.assets.get(&(host.to_string(), port)))
            .cloned())
    }

    async fn update_asset(&self, asset: &Asset) -> StoreResult<()> {
        let mut ws = self.workspaces.lock().unwrap();
        let data = ws
            .get_mut(&asset.workspace_id)
            .ok_or_else(|| missing(&asset.workspace_id, &asset.authority))?;
        data.assets
            .insert((asset.host.clone(), asset.port), asset.clone());
        Ok(())
    }

    async fn upsert_vuln(&self, vuln: &Vulnerability) -> StoreResult<VulnUpsert> {
        let mut ws = self.workspaces.lock().unwrap();
        let data = ws.entry(vuln.workspace_id.clone()).or_default();
        let key = (
            vuln.host.clone(),
            vuln.port,
            vuln.poc_file.clone(),
            vuln.url.clone(),
        );
        let now = Utc::now();

        match data.vulns.get_mut(&key) {
            Some(existing) => {
                existing.scan_count += 1;
                existing.last_seen = now;
                // Latest evidence wins; first_seen is immutable.
                existing.matcher_name = vuln.matcher_name.clone();
                existing.extracted_results = vuln.extracted_results.clone();
                existing.curl_command = vuln.curl_command.clone();
                existing.request = vuln.request.clone();
                existing.response = vuln.response.clone();
                existing.task_id = vuln.task_id.clone();
                Ok(VulnUpsert {
                    inserted: false,
                    scan_count: existing.scan_count,
                })
            }
            None => {
                let mut fresh = vuln.clone();
                fresh.scan_count = 1;
                fresh.first_seen = now;
                fresh.last_seen = now;
                data.vulns.insert(key, fresh);
                Ok(VulnUpsert {
                    inserted: true,
                    scan_count: 1,
                })
            }
        }
    }

    async fn find_vuln(
        &self,
        workspace_id: &str,
        host: &str,
        port: u16,
        poc_file: &str,
        url: &str,
    ) -> StoreResult<Option<Vulnerability>> {
        let ws = self.workspaces.lock().unwrap();
        Ok(ws
            .get(workspace_id)
            .and_then(|data| {
                data.vulns.get(&(
                    host.to_string(),
                    port,
                    poc_file.to_string(),
                    url.to_string(),
                ))
            })
            .cloned())
    }

    async fn count_vulns(&self, workspace_id: &str) -> StoreResult<u64> {
        let ws = self.workspaces.lock().unwrap();
        Ok(ws
            .get(workspace_id)
            .map(|data| data.vulns.len() as u64)
            .unwrap_or(0))
    }
}
