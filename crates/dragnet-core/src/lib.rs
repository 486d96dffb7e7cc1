//! Dragnet Core Library
//!
//! Domain model and pure logic for the scan orchestration platform: target
//! parsing and batching, task/asset/vulnerability types, sub-task priority
//! derivation, the adaptive resource profile, and the worker API wire types.

pub mod adaptive;
pub mod asset;
pub mod config;
pub mod error;
pub mod priority;
pub mod target;
pub mod task;
pub mod telemetry;
pub mod wire;

pub use adaptive::{adaptive_config, AdaptiveScanConfig, SystemProfile};
pub use asset::{Asset, RiskLevel, VulnKey, Vulnerability};
pub use config::{TaskConfig, MODULE_KEYS};
pub use error::{DragnetError, Result};
pub use priority::{derive_priority, TaskPriority};
pub use target::{format_authority, Target, TargetKind, TargetParser, TargetSplitter};
pub use task::{
    ControlAction, MainTask, MainTaskStatus, SubTaskSpec, TaskInfoCache, TaskState,
    TaskStatusRecord, PHASE_STOPPED,
};
pub use telemetry::{init_tracing, WorkerLogEntry};
