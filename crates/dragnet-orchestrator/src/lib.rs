//! Dragnet control plane
//!
//! Task building, shared-queue scheduling, control signals, worker
//! recovery, result ingestion and the worker-facing HTTP API.

pub mod api;
pub mod builder;
pub mod control;
pub mod ingest;
pub mod poc;
pub mod recovery;
pub mod scheduler;
pub mod status;

pub use api::{router, AppState};
pub use builder::{BuildSummary, TaskBuilder};
pub use control::ControlService;
pub use ingest::ResultIngestor;
pub use poc::PocValidationService;
pub use recovery::RecoveryService;
pub use scheduler::{queue_score, recovery_score, Claim, Scheduler};
pub use status::StatusService;
