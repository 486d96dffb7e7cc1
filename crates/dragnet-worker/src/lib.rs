//! Dragnet worker runtime
//!
//! Pull-based scan worker: claims sub-tasks over the orchestrator HTTP API,
//! buffers them in a bounded in-memory priority queue, executes them through
//! engine adapters and streams progress and findings back.

pub mod client;
pub mod engine;
pub mod queue;
pub mod runtime;
pub mod sysload;

pub use client::{HttpOrchestratorClient, OrchestratorApi};
pub use engine::{
    CommandEngine, EngineCommand, EngineContext, EngineOutput, EnginePipeline, ProgressEvent,
    ScanEngine, CHECKPOINT_INTERVAL,
};
pub use queue::{QueueStats, TaskQueueManager, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_WAIT};
pub use runtime::{WorkerConfig, WorkerRuntime};
pub use sysload::sample_load;
