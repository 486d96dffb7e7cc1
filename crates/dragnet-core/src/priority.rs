//! Sub-task priority bands and the derivation ladder.

use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;

/// Strict priority bands for the worker-side queue. Higher dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl TaskPriority {
    /// Bands in dequeue order.
    pub const DESCENDING: [TaskPriority; 4] = [
        TaskPriority::Urgent,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    /// Map the explicit 1-4 queue integer onto a band; out-of-range values
    /// land on `Normal`.
    pub fn from_queue_int(p: i64) -> Self {
        match p {
            1 => TaskPriority::Low,
            2 => TaskPriority::Normal,
            3 => TaskPriority::High,
            4 => TaskPriority::Urgent,
            _ => TaskPriority::Normal,
        }
    }
}

/// Derive the worker-queue priority of a sub-task from its config.
///
/// First match wins: explicit `urgent` flag, explicit `priority` label, POC
/// validation task types, then target count (small batches jump ahead, very
/// large ones fall behind).
pub fn derive_priority(config: &TaskConfig) -> TaskPriority {
    if config.urgent() {
        return TaskPriority::Urgent;
    }

    if let Some(label) = config.priority_label() {
        return match label {
            "urgent" => TaskPriority::Urgent,
            "high" => TaskPriority::High,
            _ => TaskPriority::Low,
        };
    }

    if matches!(config.task_type(), "poc_validate" | "poc_batch_validate") {
        return TaskPriority::High;
    }

    let lines = config.target_line_count();
    if lines > 0 && lines <= 10 {
        TaskPriority::High
    } else if lines >= 1000 {
        TaskPriority::Low
    } else {
        TaskPriority::Normal
    }
}
