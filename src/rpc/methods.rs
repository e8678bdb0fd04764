//! RPC method handlers.
//!
//! Dispatches JSON-RPC method calls onto the stores and engine components.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::info;

use crate::context::AppContext;
use crate::core::models::{JobDefinition, JobSpec, JobStatus};
use crate::core::schedule::next_run;
use crate::core::transfer_tool::remote_location;

use super::protocol::{REMOTE_NOT_FOUND, Request, Response};

const DEFAULT_LOG_LIMIT: u32 = 50;

/// A job definition as shown to clients, with its computed next run.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: JobDefinition,
    pub next_run: Option<DateTime<Utc>>,
}

impl From<JobDefinition> for JobView {
    fn from(job: JobDefinition) -> Self {
        let next_run = if job.active { next_run(&job) } else { None };
        Self { job, next_run }
    }
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

fn remote_not_found(id: Value, name: &str) -> Response {
    Response::error(id, REMOTE_NOT_FOUND, format!("Remote not tracked: {name}"))
}

pub struct MethodHandler {
    ctx: AppContext,
    start_time: Instant,
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| e.to_string())
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            start_time: Instant::now(),
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "daemon.status" => self.daemon_status(id).await,
            "jobs.list" => self.jobs_list(id).await,
            "jobs.get" => self.jobs_get(id, params).await,
            "jobs.create" => self.jobs_create(id, params).await,
            "jobs.update" => self.jobs_update(id, params).await,
            "jobs.trigger" => self.jobs_trigger(id, params).await,
            "jobs.delete" => self.jobs_delete(id, params).await,
            "jobs.activate" => self.jobs_activate(id, params).await,
            "remotes.list" => self.remotes_list(id).await,
            "remotes.refresh" => self.remotes_refresh(id, params).await,
            "remotes.browse" => self.remotes_browse(id, params).await,
            "remotes.sync" => self.remotes_sync(id).await,
            "logs.list" => self.logs_list(id, params).await,
            _ => Response::method_not_found(id, &request.method),
        }
    }

    async fn daemon_status(&self, id: Value) -> Response {
        #[derive(Serialize)]
        struct DaemonStatus {
            version: &'static str,
            uptime_secs: u64,
            running_jobs: usize,
            rpc_bind: String,
            simulation: bool,
        }

        let running_jobs = match self.ctx.jobs.list().await {
            Ok(jobs) => jobs.iter().filter(|j| j.status == JobStatus::Running).count(),
            Err(e) => return Response::internal_error(id, e.to_string()),
        };

        Response::success(
            id,
            DaemonStatus {
                version: env!("CARGO_PKG_VERSION"),
                uptime_secs: self.start_time.elapsed().as_secs(),
                running_jobs,
                rpc_bind: self.ctx.config.rpc_bind.to_string(),
                simulation: self.ctx.config.simulation,
            },
        )
    }

    async fn jobs_list(&self, id: Value) -> Response {
        match self.ctx.jobs.list().await {
            Ok(jobs) => Response::success(id, jobs.into_iter().map(JobView::from).collect::<Vec<_>>()),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    async fn jobs_get(&self, id: Value, params: Value) -> Response {
        let params: IdParams = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        match self.ctx.jobs.find_by_id(&params.id).await {
            Ok(Some(job)) => Response::success(id, JobView::from(job)),
            Ok(None) => Response::job_not_found(id, &params.id),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    /// Persist a new job; a job without a schedule starts immediately.
    async fn jobs_create(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            job: JobSpec,
        }

        #[derive(Serialize)]
        struct Created {
            #[serde(flatten)]
            job: JobView,
            started: bool,
        }

        let params: Params = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        match self.ctx.executor.submit(params.job).await {
            Ok(submission) => Response::success(
                id,
                Created {
                    started: submission.run.is_some(),
                    job: JobView::from(submission.job),
                },
            ),
            Err(e) => Response::trigger_error(id, &e),
        }
    }

    /// Replace a job's definition. A run already in flight keeps the
    /// definition it started with.
    async fn jobs_update(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            id: String,
            job: JobSpec,
        }

        let params: Params = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        let existing = match self.ctx.jobs.find_by_id(&params.id).await {
            Ok(Some(job)) => job,
            Ok(None) => return Response::job_not_found(id, &params.id),
            Err(e) => return Response::internal_error(id, e.to_string()),
        };

        let edited = params.job.apply_to(existing);
        match self.ctx.jobs.update(edited.clone()).await {
            Ok(true) => {
                info!(job_id = %edited.id, name = %edited.name, cron = %edited.schedule_cron, "Job updated");
                Response::success(id, JobView::from(edited))
            }
            Ok(false) => Response::job_not_found(id, &params.id),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    async fn jobs_trigger(&self, id: Value, params: Value) -> Response {
        let params: IdParams = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        match self.ctx.executor.trigger(&params.id).await {
            Ok(_run) => Response::success(id, serde_json::json!({ "id": params.id, "started": true })),
            Err(e) => Response::trigger_error(id, &e),
        }
    }

    async fn jobs_delete(&self, id: Value, params: Value) -> Response {
        let params: IdParams = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        match self.ctx.jobs.delete(&params.id).await {
            Ok(true) => {
                info!(job_id = %params.id, "Job deleted");
                Response::success(id, serde_json::json!({ "id": params.id, "deleted": true }))
            }
            Ok(false) => Response::job_not_found(id, &params.id),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    /// Suspend or re-enable a job. Re-enabling is how a job suspended for
    /// lack of space comes back.
    async fn jobs_activate(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            id: String,
            active: bool,
        }

        let params: Params = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        match self.ctx.jobs.set_active(&params.id, params.active).await {
            Ok(true) => {
                info!(job_id = %params.id, active = params.active, "Job activation changed");
                Response::success(id, serde_json::json!({ "id": params.id, "active": params.active }))
            }
            Ok(false) => Response::job_not_found(id, &params.id),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    async fn remotes_list(&self, id: Value) -> Response {
        match self.ctx.remotes.list().await {
            Ok(remotes) => Response::success(id, remotes),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    /// Check one tracked remote now instead of waiting for the timer.
    async fn remotes_refresh(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            name: String,
        }

        let params: Params = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        match self.ctx.monitor.refresh(&params.name).await {
            Ok(Some(status)) => Response::success(id, status),
            Ok(None) => remote_not_found(id, &params.name),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    /// List the entries under a path of a tracked remote, e.g. to pick a
    /// backup artifact to restore.
    async fn remotes_browse(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            #[serde(default)]
            path: String,
        }

        let params: Params = match parse(params) {
            Ok(p) => p,
            Err(e) => return Response::invalid_params(id, e),
        };

        match self.ctx.remotes.find(&params.name).await {
            Ok(Some(_)) => {}
            Ok(None) => return remote_not_found(id, &params.name),
            Err(e) => return Response::internal_error(id, e.to_string()),
        }

        match self.ctx.tool.list(&remote_location(&params.name, &params.path)).await {
            Ok(entries) => Response::success(id, entries),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    /// Align tracked remotes with the tool's profiles now. Status checks for
    /// new remotes continue in the background.
    async fn remotes_sync(&self, id: Value) -> Response {
        #[derive(Serialize)]
        struct Synced {
            added: Vec<String>,
            removed: Vec<String>,
        }

        match self.ctx.monitor.reconcile().await {
            Ok(report) => Response::success(
                id,
                Synced {
                    added: report.added,
                    removed: report.removed,
                },
            ),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }

    async fn logs_list(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            limit: Option<u32>,
        }

        let params: Params = if params.is_null() {
            Params::default()
        } else {
            match parse(params) {
                Ok(p) => p,
                Err(e) => return Response::invalid_params(id, e),
            }
        };

        match self.ctx.logs.recent(params.limit.unwrap_or(DEFAULT_LOG_LIMIT)).await {
            Ok(logs) => Response::success(id, logs),
            Err(e) => Response::internal_error(id, e.to_string()),
        }
    }
}
