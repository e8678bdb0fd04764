use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::models::{ExecutionResult, JobDefinition, JobStatus, LogEntry};
use crate::core::store::{JobStore, LogStore};
use crate::core::transfer_tool::final_transfer_line;

/// Writes the terminal result of a run: one log entry, then one status update.
///
/// The pair is serialised across every concurrently finishing run so that no
/// two completions interleave their writes.
pub struct ResultRecorder {
    jobs: Arc<dyn JobStore>,
    logs: Arc<dyn LogStore>,
    lock: Mutex<()>,
}

impl ResultRecorder {
    pub fn new(jobs: Arc<dyn JobStore>, logs: Arc<dyn LogStore>) -> Self {
        Self {
            jobs,
            logs,
            lock: Mutex::new(()),
        }
    }

    /// Record the outcome of one attempt.
    ///
    /// Storage failures are logged rather than returned; by the time a run is
    /// being recorded there is nobody left to hand them to. The returned entry
    /// has no id when the append itself failed.
    pub async fn record(
        &self,
        job: &JobDefinition,
        status: JobStatus,
        result: &ExecutionResult,
    ) -> LogEntry {
        let _guard = self.lock.lock().await;
        let now = Utc::now();

        let mut entry = LogEntry {
            id: None,
            job_id: Some(job.id.clone()),
            status,
            message: log_message(status, result),
            duration_secs: result.duration.as_secs(),
            transferred_bytes: result.transferred_bytes,
            timestamp: now,
        };

        match self.logs.append(&entry).await {
            Ok(id) => entry.id = Some(id),
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to append job log"),
        }

        let persisted = if job.resets_after_run() {
            JobStatus::Pending
        } else {
            status
        };

        if let Err(e) = self.jobs.finish(&job.id, persisted, now).await {
            error!(job_id = %job.id, error = %e, "Failed to update job status");
        }

        if status == JobStatus::FailStorage {
            match self.jobs.set_active(&job.id, false).await {
                Ok(_) => warn!(job_id = %job.id, "Job suspended for lack of remote space"),
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to suspend job"),
            }
        }

        info!(
            job_id = %job.id,
            status = %status,
            persisted = %persisted,
            bytes = result.transferred_bytes,
            "Recorded job result"
        );

        entry
    }
}

fn log_message(status: JobStatus, result: &ExecutionResult) -> String {
    if status == JobStatus::Completed {
        return final_transfer_line(&result.output)
            .map(str::to_string)
            .unwrap_or_else(|| "Completed".to_string());
    }

    if result.error.is_empty() {
        result.output.clone()
    } else {
        result.error.clone()
    }
}
