use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::capacity::CapacityGuard;
use crate::core::executor::LifecycleExecutor;
use crate::core::identity::IdentityResolver;
use crate::core::monitor::{MonitorSettings, RemoteHealthMonitor};
use crate::core::recorder::ResultRecorder;
use crate::core::store::{JobStore, LogStore, RemoteStore};
use crate::core::transfer_tool::{RunLimits, TransferTool};
use crate::db::SqliteStore;

/// Shared handles to configuration, stores and engine components.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub logs: Arc<dyn LogStore>,
    pub remotes: Arc<dyn RemoteStore>,
    pub executor: Arc<LifecycleExecutor>,
    pub monitor: Arc<RemoteHealthMonitor>,
    pub tool: Arc<dyn TransferTool>,
    /// Cancelled on shutdown. Stops in-flight hooks and transfers, and the
    /// tool's own commands when it was built with the same token.
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        store: SqliteStore,
        tool: Arc<dyn TransferTool>,
        identity: Arc<dyn IdentityResolver>,
        cancel: CancellationToken,
    ) -> Self {
        let store = Arc::new(store);
        let jobs: Arc<dyn JobStore> = store.clone();
        let logs: Arc<dyn LogStore> = store.clone();
        let remotes: Arc<dyn RemoteStore> = store;

        let limits = RunLimits {
            deadline: config.phase_timeout(),
            cancel: cancel.clone(),
        };
        let executor = Arc::new(LifecycleExecutor::new(
            jobs.clone(),
            tool.clone(),
            CapacityGuard::new(remotes.clone(), config.safety_margin_gb),
            ResultRecorder::new(jobs.clone(), logs.clone()),
            limits,
        ));

        let monitor = Arc::new(RemoteHealthMonitor::new(
            remotes.clone(),
            jobs.clone(),
            tool.clone(),
            identity,
            MonitorSettings {
                status_refresh: config.status_refresh(),
                reconcile: config.reconcile_interval(),
                usage_warning_percent: config.usage_warning_percent,
            },
        ));

        Self {
            config: Arc::new(config),
            jobs,
            logs,
            remotes,
            executor,
            monitor,
            tool,
            cancel,
        }
    }
}
