use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::core::scheduler::Scheduler;
use crate::rpc::RpcServer;

/// Runs the scheduler, the remote monitor and the control channel until
/// shutdown.
pub struct Orchestrator {
    ctx: AppContext,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn start(&self) -> Result<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            simulation = self.ctx.config.simulation,
            database = %self.ctx.config.database_path.display(),
            "gbkd daemon starting"
        );

        let released = self
            .ctx
            .jobs
            .release_interrupted()
            .await
            .context("Failed to release interrupted jobs")?;
        if released > 0 {
            warn!(count = released, "Jobs left RUNNING by a previous run reset to PENDING");
        }

        let cancel = self.ctx.cancel.clone();

        let scheduler = Arc::new(Scheduler::new(
            self.ctx.jobs.clone(),
            self.ctx.executor.clone(),
            self.ctx.config.scheduler_interval(),
        ));
        let scheduler_task = scheduler.start(cancel.clone());
        let monitor_tasks = self.ctx.monitor.clone().start(cancel.clone());

        let rpc = Arc::new(RpcServer::new(self.ctx.clone(), self.ctx.config.rpc_bind));
        let rpc_task = {
            let rpc = rpc.clone();
            tokio::spawn(async move {
                if let Err(e) = rpc.start().await {
                    error!(error = %e, "RPC server failed");
                }
            })
        };

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown requested");

        cancel.cancel();
        rpc.shutdown();

        let _ = scheduler_task.await;
        monitor_tasks.join().await;
        let _ = rpc_task.await;
        self.ctx.executor.drain().await;

        info!("gbkd daemon stopped");
        Ok(())
    }
}
