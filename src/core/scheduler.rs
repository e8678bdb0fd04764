use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::error::StoreError;
use crate::core::executor::LifecycleExecutor;
use crate::core::models::JobStatus;
use crate::core::schedule::next_run;
use crate::core::store::JobStore;

/// Polls scheduled jobs and dispatches the due ones.
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    executor: Arc<LifecycleExecutor>,
    period: Duration,
}

impl Scheduler {
    pub fn new(jobs: Arc<dyn JobStore>, executor: Arc<LifecycleExecutor>, period: Duration) -> Self {
        Self {
            jobs,
            executor,
            period,
        }
    }

    /// One poll at `now`: claim every due job and dispatch it without waiting.
    ///
    /// Returns the handles of the runs it started. A job whose claim is lost
    /// belongs to another claimant this cycle and is skipped silently.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<JobStatus>>, StoreError> {
        let jobs = self.jobs.find_scheduled().await?;
        let mut dispatched = Vec::new();

        for job in jobs {
            let Some(next) = next_run(&job) else {
                warn!(job_id = %job.id, cron = %job.schedule_cron, "Job has no valid next run, skipping");
                continue;
            };

            if next > now {
                continue;
            }

            match self.jobs.try_claim(&job.id, now).await {
                Ok(true) => {
                    info!(job_id = %job.id, name = %job.name, due = %next, "Dispatching scheduled job");
                    dispatched.push(self.executor.dispatch(job));
                }
                Ok(false) => debug!(job_id = %job.id, "Job already claimed"),
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to claim job"),
            }
        }

        Ok(dispatched)
    }

    /// Poll on a fixed interval until `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = self.period.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle(Utc::now()).await {
                            error!(error = %e, "Scheduler cycle failed");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("Scheduler stopped");
                        break;
                    }
                }
            }
        })
    }
}
