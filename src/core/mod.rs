pub mod artifact;
pub mod capacity;
pub mod error;
pub mod executor;
pub mod identity;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod recorder;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod transfer_tool;

pub use capacity::{CapacityGuard, CapacityVerdict};
pub use error::{MonitorError, StoreError, ToolError, TriggerError};
pub use executor::{LifecycleExecutor, PhaseFailure, Submission};
pub use identity::{IdentityResolver, NoIdentity, OAuthIdentityResolver};
pub use models::{
    ConnectionState, ExecutionResult, JobDefinition, JobSpec, JobStatus, LogEntry, OperationMode,
    RemoteStatus, TransferMode,
};
pub use monitor::{MonitorSettings, RemoteHealthMonitor};
pub use orchestrator::Orchestrator;
pub use recorder::ResultRecorder;
pub use retention::RetentionManager;
pub use schedule::{calculate_next_run, next_run};
pub use scheduler::Scheduler;
pub use store::{JobStore, LogStore, RemoteStore};
