use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gbkd::config::AppConfig;
use gbkd::context::AppContext;
use chrono::{TimeZone, Utc};
use gbkd::core::transfer_tool::{Capacity, RemoteEntry, SimulatedTool};
use gbkd::core::NoIdentity;
use gbkd::db::SqliteStore;
use gbkd::rpc::{ClientError, JOB_NOT_FOUND, REMOTE_NOT_FOUND, RpcClient, RpcServer};
use tokio_util::sync::CancellationToken;

async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn start_daemon() -> (Arc<RpcServer>, RpcClient, tempfile::TempDir) {
    start_daemon_with(SimulatedTool::new()).await
}

async fn start_daemon_with(tool: SimulatedTool) -> (Arc<RpcServer>, RpcClient, tempfile::TempDir) {
    let addr = free_addr().await;
    let config = AppConfig {
        rpc_bind: addr,
        simulation: true,
        ..AppConfig::default()
    };

    let store = SqliteStore::open_in_memory(config.log_history_limit).await.unwrap();
    let ctx = AppContext::new(
        config,
        store,
        Arc::new(tool),
        Arc::new(NoIdentity),
        CancellationToken::new(),
    );
    let server = Arc::new(RpcServer::new(ctx, addr));

    let running = server.clone();
    tokio::spawn(async move { running.start().await });

    let client = RpcClient::new(addr);
    for _ in 0..50 {
        if client.call::<Value>("daemon.status", None).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    (server, client, tempfile::tempdir().unwrap())
}

#[tokio::test]
async fn create_list_and_trigger_over_the_wire() {
    let (server, client, source) = start_daemon().await;

    let status: Value = client.call("daemon.status", None).await.unwrap();
    assert_eq!(status["simulation"], json!(true));
    assert_eq!(status["running_jobs"], json!(0));

    let created: Value = client
        .call(
            "jobs.create",
            Some(json!({
                "job": {
                    "name": "photos",
                    "operation_mode": "BACKUP",
                    "transfer_mode": "copy",
                    "source_path": source.path().to_str().unwrap(),
                    "remote_name": "gdrive",
                    "destination_path": "backups",
                    "schedule_cron": "0 2 * * *",
                    "max_retention": 5
                }
            })),
        )
        .await
        .unwrap();
    assert_eq!(created["started"], json!(false));
    assert!(created["next_run"].is_string());
    let id = created["id"].as_str().unwrap().to_string();

    let jobs: Vec<Value> = client.call("jobs.list", None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], json!(id));
    assert_eq!(jobs[0]["status"], json!("PENDING"));

    let triggered: Value = client
        .call("jobs.trigger", Some(json!({ "id": id })))
        .await
        .unwrap();
    assert_eq!(triggered["started"], json!(true));

    let mut logs: Vec<Value> = Vec::new();
    for _ in 0..100 {
        logs = client.call("logs.list", Some(json!({ "limit": 5 }))).await.unwrap();
        if !logs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["status"], json!("COMPLETED"));

    server.shutdown();
}

#[tokio::test]
async fn unknown_job_maps_to_error_code() {
    let (server, client, _source) = start_daemon().await;

    let err = client
        .call::<Value>("jobs.trigger", Some(json!({ "id": "missing" })))
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(e) => assert_eq!(e.code, JOB_NOT_FOUND),
        other => panic!("unexpected error: {other}"),
    }

    let err = client.call::<Value>("jobs.explode", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Rpc(_)));

    server.shutdown();
}

#[tokio::test]
async fn deactivated_job_has_no_next_run() {
    let (server, client, _source) = start_daemon().await;

    let created: Value = client
        .call(
            "jobs.create",
            Some(json!({
                "job": {
                    "name": "nightly",
                    "operation_mode": "BACKUP",
                    "transfer_mode": "sync",
                    "source_path": "/srv/data",
                    "remote_name": "gdrive",
                    "destination_path": "mirror",
                    "schedule_cron": "0 2 * * *",
                    "max_retention": 7
                }
            })),
        )
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();
    assert_eq!(created["max_retention"], json!(0));

    let _: Value = client
        .call("jobs.activate", Some(json!({ "id": id, "active": false })))
        .await
        .unwrap();

    let job: Value = client.call("jobs.get", Some(json!({ "id": id }))).await.unwrap();
    assert_eq!(job["active"], json!(false));
    assert!(job["next_run"].is_null());

    server.shutdown();
}

#[tokio::test]
async fn update_replaces_definition_but_keeps_identity() {
    let (server, client, _source) = start_daemon().await;

    let created: Value = client
        .call(
            "jobs.create",
            Some(json!({
                "job": {
                    "name": "nightly",
                    "operation_mode": "BACKUP",
                    "transfer_mode": "copy",
                    "source_path": "/srv/data",
                    "remote_name": "gdrive",
                    "destination_path": "backups",
                    "schedule_cron": "0 2 * * *",
                    "max_retention": 5
                }
            })),
        )
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let updated: Value = client
        .call(
            "jobs.update",
            Some(json!({
                "id": id,
                "job": {
                    "name": "mirror",
                    "operation_mode": "BACKUP",
                    "transfer_mode": "sync",
                    "source_path": "/srv/data",
                    "remote_name": "gdrive",
                    "destination_path": "mirror",
                    "schedule_cron": "30 3 * * *",
                    "max_retention": 5
                }
            })),
        )
        .await
        .unwrap();
    assert_eq!(updated["id"], json!(id));
    assert_eq!(updated["max_retention"], json!(0));
    assert!(updated["next_run"].is_string());

    let job: Value = client.call("jobs.get", Some(json!({ "id": id }))).await.unwrap();
    assert_eq!(job["name"], json!("mirror"));
    assert_eq!(job["destination_path"], json!("mirror"));
    assert_eq!(job["schedule_cron"], json!("30 3 * * *"));
    assert_eq!(job["status"], json!("PENDING"));

    let err = client
        .call::<Value>(
            "jobs.update",
            Some(json!({
                "id": "missing",
                "job": {
                    "name": "x",
                    "operation_mode": "BACKUP",
                    "transfer_mode": "copy",
                    "source_path": "/srv/data",
                    "remote_name": "gdrive",
                    "destination_path": "x",
                    "max_retention": 0
                }
            })),
        )
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(e) => assert_eq!(e.code, JOB_NOT_FOUND),
        other => panic!("unexpected error: {other}"),
    }

    server.shutdown();
}

#[tokio::test]
async fn remotes_can_be_synced_and_browsed() {
    let artifact = RemoteEntry {
        name: "photos_20240101_020000".to_string(),
        size: -1,
        is_dir: true,
        mod_time: Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 5).unwrap(),
    };
    let tool = SimulatedTool::new()
        .with_remote(
            "gdrive",
            Capacity {
                total: 100,
                used: 10,
                free: 90,
            },
        )
        .with_listing("gdrive:backups", vec![artifact]);
    let (server, client, _source) = start_daemon_with(tool).await;

    let err = client
        .call::<Value>("remotes.browse", Some(json!({ "name": "gdrive", "path": "backups" })))
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(e) => assert_eq!(e.code, REMOTE_NOT_FOUND),
        other => panic!("unexpected error: {other}"),
    }

    let synced: Value = client.call("remotes.sync", None).await.unwrap();
    assert_eq!(synced["added"], json!(["gdrive"]));
    assert_eq!(synced["removed"], json!([]));

    let entries: Vec<Value> = client
        .call("remotes.browse", Some(json!({ "name": "gdrive", "path": "backups" })))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["Name"], json!("photos_20240101_020000"));
    assert_eq!(entries[0]["IsDir"], json!(true));

    let err = client
        .call::<Value>("remotes.refresh", Some(json!({ "name": "elsewhere" })))
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(e) => assert_eq!(e.code, REMOTE_NOT_FOUND),
        other => panic!("unexpected error: {other}"),
    }

    server.shutdown();
}
