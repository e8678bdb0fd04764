//! Runs one job instance through guard, pre-hook, transfer and post-hook.
//!
//! Every run ends in exactly one recorded result. Phase failures are values
//! ([`PhaseFailure`]), never panics, and the first one short-circuits the rest
//! of the pipeline.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::artifact::artifact_name;
use crate::core::capacity::{CapacityGuard, CapacityVerdict};
use crate::core::error::TriggerError;
use crate::core::models::{ExecutionResult, JobDefinition, JobSpec, JobStatus, OperationMode, TransferMode};
use crate::core::recorder::ResultRecorder;
use crate::core::retention::RetentionManager;
use crate::core::store::JobStore;
use crate::core::transfer_tool::{
    RunLimits, TransferRequest, TransferTool, TransferVerb, join_remote_path, remote_location, run_hook,
};

/// Flags passed to every transfer.
const TRANSFER_FLAGS: &[&str] = &["--checksum", "--stats", "5s", "--stats-log-level", "NOTICE"];

/// The phase that ended a run, with the result that explains why.
#[derive(Debug, Error)]
pub enum PhaseFailure {
    #[error("insufficient remote space: {}", reason(.0))]
    Storage(ExecutionResult),

    #[error("pre-script failed: {}", reason(.0))]
    PreScript(ExecutionResult),

    #[error("source check failed: {}", reason(.0))]
    SourceCheck(ExecutionResult),

    #[error("transfer failed: {}", reason(.0))]
    Transfer(ExecutionResult),

    #[error("post-script failed: {}", reason(.0))]
    PostScript(ExecutionResult),
}

fn reason(result: &ExecutionResult) -> &str {
    &result.error
}

impl PhaseFailure {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Storage(_) => JobStatus::FailStorage,
            Self::PreScript(_) => JobStatus::FailPreScript,
            Self::SourceCheck(_) => JobStatus::FailSourceCheck,
            Self::Transfer(_) => JobStatus::FailRclone,
            Self::PostScript(_) => JobStatus::FailPostScript,
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        match self {
            Self::Storage(r)
            | Self::PreScript(r)
            | Self::SourceCheck(r)
            | Self::Transfer(r)
            | Self::PostScript(r) => r,
        }
    }
}

/// Where a transfer writes to, decided once the source has been inspected.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferTarget {
    /// Fresh timestamped artifact under the job's destination root.
    Backup { artifact_path: String, source_is_dir: bool },
    /// Pull `remote:source` back to the local destination.
    Restore,
}

/// A freshly submitted job and, for manual jobs, its first run.
pub struct Submission {
    pub job: JobDefinition,
    pub run: Option<JoinHandle<JobStatus>>,
}

pub struct LifecycleExecutor {
    jobs: Arc<dyn JobStore>,
    tool: Arc<dyn TransferTool>,
    guard: CapacityGuard,
    retention: RetentionManager,
    recorder: ResultRecorder,
    limits: RunLimits,
    runs: TaskTracker,
}

impl LifecycleExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tool: Arc<dyn TransferTool>,
        guard: CapacityGuard,
        recorder: ResultRecorder,
        limits: RunLimits,
    ) -> Self {
        Self {
            jobs,
            retention: RetentionManager::new(tool.clone()),
            tool,
            guard,
            recorder,
            limits,
            runs: TaskTracker::new(),
        }
    }

    /// Run an already-claimed job in the background.
    ///
    /// Dropping the handle detaches the run; awaiting it yields the terminal
    /// status that was recorded.
    pub fn dispatch(self: &Arc<Self>, job: JobDefinition) -> JoinHandle<JobStatus> {
        let executor = Arc::clone(self);
        self.runs.spawn(async move { executor.execute(job).await })
    }

    /// Wait for every dispatched run to record its result.
    ///
    /// Runs still in a hook or transfer only finish early if the cancellation
    /// token in this executor's [`RunLimits`] has fired.
    pub async fn drain(&self) {
        self.runs.close();
        self.runs.wait().await;
        self.runs.reopen();
    }

    /// Manual trigger: claim the job the same way the scheduler does, then
    /// dispatch it.
    pub async fn trigger(self: &Arc<Self>, id: &str) -> Result<JoinHandle<JobStatus>, TriggerError> {
        let job = self
            .jobs
            .find_by_id(id)
            .await?
            .ok_or_else(|| TriggerError::NotFound(id.to_string()))?;

        if !self.jobs.try_claim(id, Utc::now()).await? {
            return Err(TriggerError::AlreadyRunning(id.to_string()));
        }

        info!(job_id = %id, name = %job.name, "Job triggered manually");
        Ok(self.dispatch(job))
    }

    /// Persist a new job. Jobs without a schedule start right away.
    pub async fn submit(self: &Arc<Self>, spec: JobSpec) -> Result<Submission, TriggerError> {
        let job = self.jobs.create(spec.into_definition(Utc::now())).await?;
        info!(job_id = %job.id, name = %job.name, cron = %job.schedule_cron, "Job created");

        let run = if job.is_scheduled() {
            None
        } else {
            Some(self.trigger(&job.id).await?)
        };

        Ok(Submission { job, run })
    }

    /// Run `job` to completion and record the outcome.
    pub async fn execute(&self, job: JobDefinition) -> JobStatus {
        let span = info_span!("job", job_id = %job.id, name = %job.name);

        async {
            info!(mode = %job.operation_mode, remote = %job.remote_name, "Job started");

            let (status, result) = match self.run_pipeline(&job).await {
                Ok(result) => (JobStatus::Completed, result),
                Err(failure) => {
                    warn!(status = %failure.status(), error = %failure, "Job failed");
                    (failure.status(), failure.into_result())
                }
            };

            self.recorder.record(&job, status, &result).await;
            status
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(&self, job: &JobDefinition) -> Result<ExecutionResult, PhaseFailure> {
        if let CapacityVerdict::Insufficient { free_gb, required_gb } = self.guard.evaluate(job).await {
            return Err(PhaseFailure::Storage(ExecutionResult::failure(format!(
                "job suspended: {} has {free_gb:.2} GB free, {required_gb:.2} GB required",
                job.remote_name
            ))));
        }

        if let Some(script) = &job.pre_script {
            debug!("Running pre-script");
            let result = run_hook(script, &self.limits).await;
            if !result.success {
                return Err(PhaseFailure::PreScript(result));
            }
        }

        let target = match job.operation_mode {
            OperationMode::Backup => self.prepare_backup(job).await?,
            OperationMode::Restore => TransferTarget::Restore,
        };

        let request = build_transfer_request(job, &target);
        let transfer = self.tool.transfer(&request, &self.limits).await;
        if !transfer.success {
            return Err(PhaseFailure::Transfer(transfer));
        }
        info!(bytes = transfer.transferred_bytes, "Transfer finished");

        if let Some(script) = &job.post_script {
            debug!("Running post-script");
            let result = run_hook(script, &self.limits).await;
            if !result.success {
                return Err(PhaseFailure::PostScript(result));
            }
        }

        Ok(transfer)
    }

    /// Inspect the source, name the artifact and make room for it.
    async fn prepare_backup(&self, job: &JobDefinition) -> Result<TransferTarget, PhaseFailure> {
        let source = Path::new(&job.source_path);
        let meta = tokio::fs::metadata(source).await.map_err(|e| {
            PhaseFailure::SourceCheck(ExecutionResult::failure(format!(
                "failed to stat source path {}: {e}",
                source.display()
            )))
        })?;

        let source_is_dir = meta.is_dir();
        let name = artifact_name(source, source_is_dir, Utc::now());
        let artifact_path = join_remote_path(&job.destination_path, &name);
        debug!(artifact = %artifact_path, "Resolved artifact destination");

        if job.max_retention > 0 {
            if let Err(e) = self
                .retention
                .enforce(&job.remote_name, &job.destination_path, job.max_retention)
                .await
            {
                warn!(error = %e, "Retention check failed, continuing with transfer");
            }
        }

        Ok(TransferTarget::Backup {
            artifact_path,
            source_is_dir,
        })
    }
}

/// The tool invocation for one run of `job`.
pub fn build_transfer_request(job: &JobDefinition, target: &TransferTarget) -> TransferRequest {
    let (verb, source, destination) = match target {
        TransferTarget::Backup {
            artifact_path,
            source_is_dir,
        } => {
            let verb = match (source_is_dir, job.transfer_mode) {
                (false, _) => TransferVerb::CopyTo,
                (true, TransferMode::Copy) => TransferVerb::Copy,
                (true, TransferMode::Sync) => TransferVerb::Sync,
            };
            (
                verb,
                job.source_path.clone(),
                remote_location(&job.remote_name, artifact_path),
            )
        }
        TransferTarget::Restore => (
            TransferVerb::Copy,
            remote_location(&job.remote_name, &job.source_path),
            job.destination_path.clone(),
        ),
    };

    let mut flags: Vec<String> = TRANSFER_FLAGS.iter().map(|f| f.to_string()).collect();
    if let Some(key) = &job.encryption_key {
        flags.extend(encryption_flags(&job.id, key));
    }

    TransferRequest {
        verb,
        source,
        destination,
        flags,
    }
}

/// Flags asking the tool to encrypt names and content with `key`.
///
/// The salt is derived from the job id and key so repeated runs of the same
/// job stay readable with the same pair.
pub fn encryption_flags(job_id: &str, key: &str) -> Vec<String> {
    vec![
        "--crypt-filename-encryption".to_string(),
        "standard".to_string(),
        "--crypt-password".to_string(),
        key.to_string(),
        "--crypt-password2".to_string(),
        crypt_salt(job_id, key),
    ]
}

fn crypt_salt(job_id: &str, key: &str) -> String {
    let hash = blake3::hash(format!("{job_id}:{key}").as_bytes());
    hash.to_hex().as_str()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::JobSpec;

    fn job(mode: OperationMode, transfer: TransferMode) -> JobDefinition {
        JobSpec {
            name: "photos".to_string(),
            operation_mode: mode,
            transfer_mode: transfer,
            source_path: "/srv/photos".to_string(),
            remote_name: "gdrive".to_string(),
            destination_path: "backups".to_string(),
            pre_script: None,
            post_script: None,
            schedule_cron: "0 2 * * *".to_string(),
            max_retention: 3,
            encryption_key: None,
        }
        .into_definition(Utc::now())
    }

    #[test]
    fn directory_backup_copies_into_artifact() {
        let job = job(OperationMode::Backup, TransferMode::Copy);
        let req = build_transfer_request(
            &job,
            &TransferTarget::Backup {
                artifact_path: "backups/photos_20240115_100000".to_string(),
                source_is_dir: true,
            },
        );
        assert_eq!(req.verb, TransferVerb::Copy);
        assert_eq!(req.source, "/srv/photos");
        assert_eq!(req.destination, "gdrive:backups/photos_20240115_100000");
        assert_eq!(req.flags[0], "--checksum");
    }

    #[test]
    fn file_backup_uses_single_item_copy() {
        let job = job(OperationMode::Backup, TransferMode::Sync);
        let req = build_transfer_request(
            &job,
            &TransferTarget::Backup {
                artifact_path: "backups/report_20240115_100000.csv".to_string(),
                source_is_dir: false,
            },
        );
        assert_eq!(req.verb, TransferVerb::CopyTo);
    }

    #[test]
    fn sync_directory_backup_syncs() {
        let job = job(OperationMode::Backup, TransferMode::Sync);
        let req = build_transfer_request(
            &job,
            &TransferTarget::Backup {
                artifact_path: "backups/photos_20240115_100000".to_string(),
                source_is_dir: true,
            },
        );
        assert_eq!(req.verb, TransferVerb::Sync);
    }

    #[test]
    fn restore_pulls_with_copy_even_in_sync_mode() {
        let mut job = job(OperationMode::Restore, TransferMode::Sync);
        job.source_path = "backups/photos_20240115_100000".to_string();
        job.destination_path = "/srv/restore".to_string();

        let req = build_transfer_request(&job, &TransferTarget::Restore);
        assert_eq!(req.verb, TransferVerb::Copy);
        assert_eq!(req.source, "gdrive:backups/photos_20240115_100000");
        assert_eq!(req.destination, "/srv/restore");
    }

    #[test]
    fn encryption_appends_crypt_flags_with_stable_salt() {
        let mut job = job(OperationMode::Backup, TransferMode::Copy);
        job.encryption_key = Some("hunter2".to_string());
        let target = TransferTarget::Backup {
            artifact_path: "backups/x_20240115_100000".to_string(),
            source_is_dir: true,
        };

        let first = build_transfer_request(&job, &target);
        let second = build_transfer_request(&job, &target);
        assert_eq!(first.flags, second.flags);

        let pos = first
            .flags
            .iter()
            .position(|f| f == "--crypt-password2")
            .unwrap();
        let salt = &first.flags[pos + 1];
        assert_eq!(salt.len(), 32);
        assert!(salt.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(salt, &crypt_salt("other-job", "hunter2"));
    }

    #[test]
    fn failure_maps_to_status() {
        let failure = PhaseFailure::Transfer(ExecutionResult::failure("boom"));
        assert_eq!(failure.status(), JobStatus::FailRclone);
        assert_eq!(failure.to_string(), "transfer failed: boom");
        assert_eq!(failure.into_result().error, "boom");
    }
}
