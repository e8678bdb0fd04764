//! Adapter around the external transfer tool.
//!
//! All data movement goes through an opaque CLI. The engine only relies on the
//! exit status, the `Transferred:` summary lines and the JSON emitted by the
//! listing and account-info commands.

mod output;
mod process;
mod rclone;
mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::error::ToolError;
use crate::core::models::ExecutionResult;

pub use output::{final_transfer_line, parse_transferred_bytes, unit_multiplier};
pub use process::{ProcessOutput, RunLimits, hardened_script, run_hook, run_process, spawn_and_wait};
pub use rclone::RcloneTool;
pub use simulated::{SimulatedTool, ToolCall};

/// Account capacity in bytes, as reported by `about --json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub free: u64,
}

/// One entry of a remote directory listing (`lsjson`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "IsDir", default)]
    pub is_dir: bool,
    #[serde(rename = "ModTime")]
    pub mod_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferVerb {
    /// Bulk copy of a directory's contents.
    Copy,
    /// Bulk copy that also deletes extraneous destination files.
    Sync,
    /// Single-item copy to an exact destination name.
    CopyTo,
}

impl TransferVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Sync => "sync",
            Self::CopyTo => "copyto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRequest {
    pub verb: TransferVerb,
    pub source: String,
    pub destination: String,
    pub flags: Vec<String>,
}

/// `remote:path` location string understood by the tool.
pub fn remote_location(remote: &str, path: &str) -> String {
    format!("{remote}:{path}")
}

/// Join a remote path and a child name with a single separator.
pub fn join_remote_path(root: &str, name: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        name.to_string()
    } else {
        format!("{root}/{name}")
    }
}

#[async_trait]
pub trait TransferTool: Send + Sync {
    /// Capacity of a remote profile.
    async fn about(&self, remote: &str) -> Result<Capacity, ToolError>;

    /// Entries directly under a `remote:path` location.
    async fn list(&self, location: &str) -> Result<Vec<RemoteEntry>, ToolError>;

    /// Run a copy/sync. Failures are reported in the result, never as errors.
    async fn transfer(&self, req: &TransferRequest, limits: &RunLimits) -> ExecutionResult;

    /// Remove one entry: recursively for directories, a single item otherwise.
    async fn remove(&self, location: &str, is_dir: bool) -> Result<(), ToolError>;

    /// Names of the profiles configured in the tool itself.
    async fn list_remotes(&self) -> Result<Vec<String>, ToolError>;
}

/// Build the tool selected by configuration. `limits` bound the tool's own
/// housekeeping commands; transfers take theirs per call.
pub fn create_tool(config: &AppConfig, limits: RunLimits) -> Arc<dyn TransferTool> {
    if config.simulation {
        Arc::new(SimulatedTool::demo())
    } else {
        Arc::new(
            RcloneTool::new(config.rclone_binary.clone(), config.rclone_config_path()).with_limits(limits),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_remote_paths() {
        assert_eq!(join_remote_path("backups/", "a_20240101_000000"), "backups/a_20240101_000000");
        assert_eq!(join_remote_path("", "a"), "a");
        assert_eq!(remote_location("gdrive", "backups/a"), "gdrive:backups/a");
    }

    #[test]
    fn decodes_lsjson_entries() {
        let json = r#"[
            {"Path":"photos_20240101_020000","Name":"photos_20240101_020000","Size":-1,"MimeType":"inode/directory","ModTime":"2024-01-01T02:00:05.123+07:00","IsDir":true},
            {"Path":"notes.txt","Name":"notes.txt","Size":42,"ModTime":"2024-01-02T00:00:00Z","IsDir":false}
        ]"#;
        let entries: Vec<RemoteEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size, 42);
        assert!(entries[0].mod_time < entries[1].mod_time);
    }

    #[test]
    fn decodes_about_without_free() {
        let cap: Capacity = serde_json::from_str(r#"{"total": 100, "used": 40}"#).unwrap();
        assert_eq!(cap.free, 0);
        assert_eq!(cap.used, 40);
    }

    #[tokio::test]
    async fn configured_tool_honours_shutdown() {
        use std::os::unix::fs::PermissionsExt;
        use tokio_util::sync::CancellationToken;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("rclone");
        std::fs::write(&binary, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = AppConfig {
            rclone_binary: binary.display().to_string(),
            rclone_config: Some(dir.path().join("rclone.conf")),
            simulation: false,
            ..AppConfig::default()
        };
        let cancel = CancellationToken::new();
        let tool = create_tool(
            &config,
            RunLimits {
                deadline: None,
                cancel: cancel.clone(),
            },
        );

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let started = std::time::Instant::now();
        let err = tool.about("gdrive").await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
