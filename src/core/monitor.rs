use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::capacity::BYTES_PER_GB;
use crate::core::error::{MonitorError, StoreError};
use crate::core::identity::IdentityResolver;
use crate::core::models::{ConnectionState, RemoteStatus};
use crate::core::store::{JobStore, RemoteStore};
use crate::core::transfer_tool::{Capacity, TransferTool};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub status_refresh: Duration,
    pub reconcile: Duration,
    /// Used-space percentage at which a remote carries a warning.
    pub usage_warning_percent: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            status_refresh: Duration::from_secs(300),
            reconcile: Duration::from_secs(60),
            usage_warning_percent: 85.0,
        }
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Out-of-band status checks started for the added remotes.
    pub checks: Vec<JoinHandle<()>>,
}

pub struct MonitorTasks {
    pub refresh: JoinHandle<()>,
    pub reconcile: JoinHandle<()>,
}

impl MonitorTasks {
    pub async fn join(self) {
        let _ = tokio::join!(self.refresh, self.reconcile);
    }
}

/// Keeps an eventually consistent view of every remote's capacity,
/// connectivity and owner.
pub struct RemoteHealthMonitor {
    remotes: Arc<dyn RemoteStore>,
    jobs: Arc<dyn JobStore>,
    tool: Arc<dyn TransferTool>,
    identity: Arc<dyn IdentityResolver>,
    settings: MonitorSettings,
}

impl RemoteHealthMonitor {
    pub fn new(
        remotes: Arc<dyn RemoteStore>,
        jobs: Arc<dyn JobStore>,
        tool: Arc<dyn TransferTool>,
        identity: Arc<dyn IdentityResolver>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            remotes,
            jobs,
            tool,
            identity,
            settings,
        }
    }

    /// Check one tracked remote and store the result.
    ///
    /// A failed capacity query marks the remote DISCONNECTED with the raw
    /// error and keeps the last known figures. Returns `None` without writing
    /// anything when the remote is not tracked, including when it was removed
    /// while the check was in flight.
    pub async fn refresh(&self, name: &str) -> Result<Option<RemoteStatus>, StoreError> {
        let now = Utc::now();
        let Some(previous) = self.remotes.find(name).await? else {
            debug!(remote = name, "Remote not tracked, skipping check");
            return Ok(None);
        };

        let active_jobs = self.jobs.count_on_remote(name).await.unwrap_or_else(|e| {
            warn!(remote = name, error = %e, "Failed to count jobs on remote");
            0
        });

        let status = match self.tool.about(name).await {
            Ok(capacity) => {
                let owner_email = match self.identity.resolve(name).await {
                    Ok(email) => email,
                    Err(e) => {
                        debug!(remote = name, error = %e, "Owner lookup failed");
                        String::new()
                    }
                };
                let status = connected_status(
                    name,
                    capacity,
                    owner_email,
                    active_jobs,
                    self.settings.usage_warning_percent,
                );
                info!(
                    remote = name,
                    used_gb = status.used_gb,
                    total_gb = status.total_gb,
                    active_jobs,
                    "Remote connected"
                );
                status
            }
            Err(e) => {
                warn!(remote = name, error = %e, "Remote unreachable");
                RemoteStatus {
                    state: ConnectionState::Disconnected,
                    active_jobs,
                    message: e.to_string(),
                    last_checked: now,
                    ..previous
                }
            }
        };

        if !self.remotes.update(&status).await? {
            debug!(remote = name, "Remote removed during check, result dropped");
            return Ok(None);
        }
        Ok(Some(status))
    }

    /// Check every tracked remote, each in its own task.
    pub async fn refresh_all(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let tracked = self.remotes.list().await?;
        Ok(tracked
            .into_iter()
            .map(|remote| self.spawn_refresh(remote.name))
            .collect())
    }

    /// Align the tracked set with the profiles the tool knows about.
    pub async fn reconcile(self: &Arc<Self>) -> Result<ReconcileReport, MonitorError> {
        let external: Vec<String> = self.tool.list_remotes().await?;
        let tracked: Vec<String> = self
            .remotes
            .list()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();

        let external_set: HashSet<&str> = external.iter().map(String::as_str).collect();
        let tracked_set: HashSet<&str> = tracked.iter().map(String::as_str).collect();
        let mut report = ReconcileReport::default();

        for name in tracked.iter().filter(|n| !external_set.contains(n.as_str())) {
            self.remotes.delete(name).await?;
            info!(remote = %name, "Remote no longer configured, removed");
            report.removed.push(name.clone());
        }

        for name in external.iter().filter(|n| !tracked_set.contains(n.as_str())) {
            self.remotes
                .upsert(&RemoteStatus::pending(name, Utc::now()))
                .await?;
            info!(remote = %name, "New remote discovered");
            report.added.push(name.clone());
            report.checks.push(self.spawn_refresh(name.clone()));
        }

        Ok(report)
    }

    fn spawn_refresh(self: &Arc<Self>, name: String) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = monitor.refresh(&name).await {
                error!(remote = %name, error = %e, "Failed to store remote status");
            }
        })
    }

    /// Start the refresh and reconciliation timers. Both fire once right
    /// away, then on their own periods, until `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> MonitorTasks {
        let refresh = {
            let monitor = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = interval(monitor.settings.status_refresh);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = monitor.refresh_all().await {
                                error!(error = %e, "Status refresh failed");
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
                debug!("Status refresh stopped");
            })
        };

        let reconcile = tokio::spawn(async move {
            let mut ticker = interval(self.settings.reconcile);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.reconcile().await {
                            error!(error = %e, "Remote reconciliation failed");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            debug!("Remote reconciliation stopped");
        });

        MonitorTasks { refresh, reconcile }
    }
}

fn connected_status(
    name: &str,
    capacity: Capacity,
    owner_email: String,
    active_jobs: u64,
    warning_percent: f64,
) -> RemoteStatus {
    let mut status = RemoteStatus {
        name: name.to_string(),
        state: ConnectionState::Connected,
        total_gb: capacity.total as f64 / BYTES_PER_GB,
        used_gb: capacity.used as f64 / BYTES_PER_GB,
        free_gb: capacity.free as f64 / BYTES_PER_GB,
        owner_email,
        last_checked: Utc::now(),
        active_jobs,
        message: String::new(),
    };

    if let Some(percent) = status.used_percent()
        && percent >= warning_percent
    {
        status.message = format!("storage {percent:.1}% full");
    }
    status
}
