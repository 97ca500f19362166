//! Key stores, reachability probe and the orchestration client.

pub mod memory;
pub mod orchestrator;
pub mod probe;
#[cfg(windows)]
pub mod registry;
pub mod snapshot;

pub use memory::{HandleStats, MemoryConnection, MemoryKey, MemoryProvider};
pub use orchestrator::{
    Credentials, HttpOrchestrator, Job, OrchestratorError, OrchestratorService, RunbookInstance,
};
pub use probe::{DEFAULT_PROBE_PORT, DEFAULT_PROBE_TIMEOUT_MS, TcpProbe};
#[cfg(windows)]
pub use registry::{RegistryConnection, RegistryHandle, RegistryProvider};
pub use snapshot::{
    SNAPSHOT_EXTENSION, SnapshotConnection, SnapshotError, SnapshotKey, SnapshotProvider,
};
