use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use gbkd::core::identity::IdentityError;
use gbkd::core::transfer_tool::{Capacity, SimulatedTool};
use gbkd::core::{
    ConnectionState, IdentityResolver, JobSpec, JobStore, MonitorSettings, NoIdentity, OperationMode,
    RemoteHealthMonitor, RemoteStatus, RemoteStore, TransferMode,
};
use gbkd::db::SqliteStore;

const GIB: u64 = 1024 * 1024 * 1024;

struct FixedIdentity(&'static str);

#[async_trait]
impl IdentityResolver for FixedIdentity {
    async fn resolve(&self, _remote: &str) -> Result<String, IdentityError> {
        Ok(self.0.to_string())
    }
}

struct Setup {
    jobs: Arc<dyn JobStore>,
    remotes: Arc<dyn RemoteStore>,
    tool: Arc<SimulatedTool>,
    monitor: Arc<RemoteHealthMonitor>,
}

async fn setup(tool: SimulatedTool, identity: Arc<dyn IdentityResolver>) -> Setup {
    let store = Arc::new(SqliteStore::open_in_memory(100).await.unwrap());
    let jobs: Arc<dyn JobStore> = store.clone();
    let remotes: Arc<dyn RemoteStore> = store;
    let tool = Arc::new(tool);

    let monitor = Arc::new(RemoteHealthMonitor::new(
        remotes.clone(),
        jobs.clone(),
        tool.clone(),
        identity,
        MonitorSettings::default(),
    ));

    Setup {
        jobs,
        remotes,
        tool,
        monitor,
    }
}

fn capacity(total_gb: u64, used_gb: u64) -> Capacity {
    Capacity {
        total: total_gb * GIB,
        used: used_gb * GIB,
        free: (total_gb - used_gb) * GIB,
    }
}

#[tokio::test]
async fn reconcile_tracks_configured_remotes() {
    let s = setup(
        SimulatedTool::new()
            .with_remote("gdrive", capacity(15, 5))
            .with_remote("work", capacity(100, 10)),
        Arc::new(NoIdentity),
    )
    .await;
    s.remotes
        .upsert(&RemoteStatus::pending("retired", Utc::now()))
        .await
        .unwrap();

    let report = s.monitor.reconcile().await.unwrap();
    assert_eq!(report.added, vec!["gdrive".to_string(), "work".to_string()]);
    assert_eq!(report.removed, vec!["retired".to_string()]);

    for check in report.checks {
        check.await.unwrap();
    }

    let tracked = s.remotes.list().await.unwrap();
    let names: Vec<&str> = tracked.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["gdrive", "work"]);
    assert!(tracked.iter().all(|r| r.state == ConnectionState::Connected));

    // A second pass has nothing to do.
    let again = s.monitor.reconcile().await.unwrap();
    assert!(again.added.is_empty());
    assert!(again.removed.is_empty());
}

#[tokio::test]
async fn refresh_records_capacity_owner_and_job_count() {
    let s = setup(
        SimulatedTool::new().with_remote("gdrive", capacity(100, 90)),
        Arc::new(FixedIdentity("owner@example.com")),
    )
    .await;

    for mode in [OperationMode::Backup, OperationMode::Backup, OperationMode::Restore] {
        let spec = JobSpec {
            name: "docs".to_string(),
            operation_mode: mode,
            transfer_mode: TransferMode::Copy,
            source_path: "/srv/docs".to_string(),
            remote_name: "gdrive".to_string(),
            destination_path: "backups".to_string(),
            pre_script: None,
            post_script: None,
            schedule_cron: String::new(),
            max_retention: 0,
            encryption_key: None,
        };
        s.jobs.create(spec.into_definition(Utc::now())).await.unwrap();
    }
    s.remotes.upsert(&RemoteStatus::pending("gdrive", Utc::now())).await.unwrap();

    let status = s.monitor.refresh("gdrive").await.unwrap().unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.total_gb, 100.0);
    assert_eq!(status.free_gb, 10.0);
    assert_eq!(status.owner_email, "owner@example.com");
    assert_eq!(status.active_jobs, 2);
    assert_eq!(status.message, "storage 90.0% full");

    let stored = s.remotes.find("gdrive").await.unwrap().unwrap();
    assert_eq!(stored.state, ConnectionState::Connected);
    assert_eq!(stored.used_gb, 90.0);
    assert_eq!(stored.owner_email, status.owner_email);
    assert_eq!(stored.active_jobs, 2);
}

#[tokio::test]
async fn unreachable_remote_keeps_last_known_figures() {
    let s = setup(
        SimulatedTool::new().with_remote("gdrive", capacity(15, 5)),
        Arc::new(NoIdentity),
    )
    .await;

    s.remotes.upsert(&RemoteStatus::pending("gdrive", Utc::now())).await.unwrap();

    let connected = s.monitor.refresh("gdrive").await.unwrap().unwrap();
    assert_eq!(connected.state, ConnectionState::Connected);
    assert!(connected.owner_email.is_empty());

    s.tool.set_unreachable("gdrive");
    let status = s.monitor.refresh("gdrive").await.unwrap().unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.message.is_empty());
    assert_eq!(status.total_gb, 15.0);
    assert_eq!(status.free_gb, 10.0);
    assert!(status.last_checked >= connected.last_checked);
}

#[tokio::test]
async fn refresh_all_checks_every_tracked_remote() {
    let s = setup(
        SimulatedTool::new().with_remote("gdrive", capacity(15, 5)),
        Arc::new(NoIdentity),
    )
    .await;
    s.remotes.upsert(&RemoteStatus::pending("gdrive", Utc::now())).await.unwrap();
    s.remotes.upsert(&RemoteStatus::pending("gone", Utc::now())).await.unwrap();

    for check in s.monitor.refresh_all().await.unwrap() {
        check.await.unwrap();
    }

    let gdrive = s.remotes.find("gdrive").await.unwrap().unwrap();
    assert_eq!(gdrive.state, ConnectionState::Connected);
    let gone = s.remotes.find("gone").await.unwrap().unwrap();
    assert_eq!(gone.state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn removed_remote_is_not_brought_back_by_a_check() {
    let s = setup(
        SimulatedTool::new().with_remote("gdrive", capacity(15, 5)),
        Arc::new(NoIdentity),
    )
    .await;
    s.remotes.upsert(&RemoteStatus::pending("gdrive", Utc::now())).await.unwrap();
    s.remotes.delete("gdrive").await.unwrap();

    assert!(s.monitor.refresh("gdrive").await.unwrap().is_none());
    assert!(s.remotes.find("gdrive").await.unwrap().is_none());

    s.tool.set_unreachable("gdrive");
    assert!(s.monitor.refresh("gdrive").await.unwrap().is_none());
    assert!(s.remotes.list().await.unwrap().is_empty());
}
