//! Typed accessor over the JSON sub-task config blob.
//!
//! Configs travel as free-form JSON objects because engine-specific keys are
//! open-ended; this wrapper pins down the top-level keys the core itself
//! reads: `target`, `batchSize`, `workers`, `urgent`, `priority`, `taskType`,
//! the per-module `{enable: bool}` sub-objects, and the builder-injected
//! `subTaskIndex`/`subTaskTotal`.

use serde_json::{Map, Value};

use crate::error::{DragnetError, Result};
use crate::target::TargetSplitter;

/// Per-module config keys, in execution order. `portScan` is default-on when
/// the key is absent or null.
pub const MODULE_KEYS: [&str; 6] = [
    "domainScan",
    "portScan",
    "portIdentify",
    "fingerprint",
    "dirScan",
    "pocScan",
];

/// Parsed sub-task / main-task config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskConfig(Map<String, Value>);

impl TaskConfig {
    pub fn new() -> Self {
        TaskConfig(Map::new())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(TaskConfig::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(TaskConfig(map)),
            Ok(_) => Err(DragnetError::InvalidInput(
                "task config must be a JSON object".to_string(),
            )),
            Err(e) => Err(DragnetError::InvalidInput(format!(
                "task config is not valid JSON: {e}"
            ))),
        }
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Newline-separated target hosts.
    pub fn target(&self) -> &str {
        self.0.get("target").and_then(Value::as_str).unwrap_or("")
    }

    pub fn target_line_count(&self) -> usize {
        self.target()
            .lines()
            .filter(|l| {
                let l = l.trim();
                !l.is_empty() && !l.starts_with('#')
            })
            .count()
    }

    /// Requested batch size, falling back to the splitter default.
    pub fn batch_size(&self) -> usize {
        match self.0.get("batchSize").and_then(Value::as_u64) {
            Some(n) if n > 0 => n as usize,
            _ => TargetSplitter::DEFAULT_BATCH_SIZE,
        }
    }

    /// Worker-affinity list; empty means any worker may claim.
    pub fn workers(&self) -> Vec<String> {
        self.0
            .get("workers")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn urgent(&self) -> bool {
        self.0.get("urgent").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Explicit priority label, if one of the recognised values.
    pub fn priority_label(&self) -> Option<&str> {
        match self.0.get("priority").and_then(Value::as_str) {
            Some(p @ ("urgent" | "high" | "low")) => Some(p),
            _ => None,
        }
    }

    pub fn task_type(&self) -> &str {
        self.0.get("taskType").and_then(Value::as_str).unwrap_or("")
    }

    /// Whether a scan module is enabled. `portScan` counts as enabled when
    /// its key is absent or null.
    pub fn module_enabled(&self, module: &str) -> bool {
        match self.0.get(module) {
            Some(Value::Object(m)) => m.get("enable").and_then(Value::as_bool).unwrap_or(false),
            Some(Value::Null) | None => module == "portScan",
            Some(_) => false,
        }
    }

    /// Count of enabled scan modules, floored at one so a config with no
    /// module blocks still yields one unit of work per batch.
    pub fn enabled_modules(&self) -> u32 {
        let count = MODULE_KEYS
            .iter()
            .filter(|m| self.module_enabled(m))
            .count() as u32;
        count.max(1)
    }

    /// Names of the enabled modules in execution order.
    pub fn enabled_module_names(&self) -> Vec<&'static str> {
        MODULE_KEYS
            .iter()
            .copied()
            .filter(|m| self.module_enabled(m))
            .collect()
    }

    /// Deep-copy this config for one batch: overwrite `target` and inject
    /// `subTaskIndex`/`subTaskTotal`.
    pub fn for_batch(&self, batch_target: &str, index: usize, total: usize) -> TaskConfig {
        let mut copy = self.0.clone();
        copy.insert("target".to_string(), Value::String(batch_target.to_string()));
        copy.insert("subTaskIndex".to_string(), Value::from(index as u64));
        copy.insert("subTaskTotal".to_string(), Value::from(total as u64));
        TaskConfig(copy)
    }

    pub fn sub_task_index(&self) -> Option<u64> {
        self.0.get("subTaskIndex").and_then(Value::as_u64)
    }

    pub fn sub_task_total(&self) -> Option<u64> {
        self.0.get("subTaskTotal").and_then(Value::as_u64)
    }
}
