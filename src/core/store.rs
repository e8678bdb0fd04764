//! Storage seams the engine depends on.
//!
//! The scheduler, executor and monitor only ever see these traits. The SQLite
//! implementation lives in `crate::db`; anything honouring the same contracts
//! (in particular the atomicity of [`JobStore::try_claim`]) can stand in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::models::{JobDefinition, JobStatus, LogEntry, RemoteStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new definition. Implementations must store
    /// `max_retention = 0` for sync-mode jobs.
    async fn create(&self, job: JobDefinition) -> Result<JobDefinition, StoreError>;

    /// Replace the editable fields of an existing definition, keeping its
    /// run state. Returns `false` when no job has that id. The same
    /// sync-mode retention rule as [`JobStore::create`] applies.
    async fn update(&self, job: JobDefinition) -> Result<bool, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<JobDefinition>, StoreError>;

    /// Active definitions with a non-empty cron expression, in store order.
    async fn find_scheduled(&self) -> Result<Vec<JobDefinition>, StoreError>;

    async fn list(&self) -> Result<Vec<JobDefinition>, StoreError>;

    /// Atomically move a job from any non-RUNNING status to RUNNING.
    ///
    /// Returns `false` when no row changed, meaning another claimant owns the
    /// run. This single conditional write is the only per-job lock.
    async fn try_claim(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Record the persisted status and last-run time after an attempt.
    async fn finish(&self, id: &str, status: JobStatus, at: DateTime<Utc>)
    -> Result<(), StoreError>;

    /// Return every RUNNING job to PENDING. Used at startup, when no run can
    /// still own a claim from a previous process.
    async fn release_interrupted(&self) -> Result<u64, StoreError>;

    async fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError>;

    /// Number of non-restore definitions pointing at `remote`.
    async fn count_on_remote(&self, remote: &str) -> Result<u64, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: &LogEntry) -> Result<i64, StoreError>;

    /// Newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError>;
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert(&self, status: &RemoteStatus) -> Result<(), StoreError>;

    /// Overwrite the row of an already tracked remote. Returns `false`, and
    /// writes nothing, when the remote is not tracked.
    async fn update(&self, status: &RemoteStatus) -> Result<bool, StoreError>;

    async fn find(&self, name: &str) -> Result<Option<RemoteStatus>, StoreError>;

    async fn list(&self) -> Result<Vec<RemoteStatus>, StoreError>;

    async fn delete(&self, name: &str) -> Result<bool, StoreError>;
}
