use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Direction of a job: push local data to a remote, or pull it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationMode {
    Backup,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Copy,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    FailPreScript,
    FailRclone,
    FailPostScript,
    FailSourceCheck,
    FailStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Pending,
}

/// Error returned when a stored enum column holds an unknown value.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(OperationMode, "operation mode", {
    Backup => "BACKUP",
    Restore => "RESTORE",
});

string_enum!(TransferMode, "transfer mode", {
    Copy => "copy",
    Sync => "sync",
});

string_enum!(JobStatus, "job status", {
    Pending => "PENDING",
    Running => "RUNNING",
    Completed => "COMPLETED",
    FailPreScript => "FAIL_PRE_SCRIPT",
    FailRclone => "FAIL_RCLONE",
    FailPostScript => "FAIL_POST_SCRIPT",
    FailSourceCheck => "FAIL_SOURCE_CHECK",
    FailStorage => "FAIL_STORAGE",
});

string_enum!(ConnectionState, "connection state", {
    Connected => "CONNECTED",
    Disconnected => "DISCONNECTED",
    Pending => "PENDING",
});

impl JobStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running | Self::Completed)
    }
}

/// Persisted template for one backup or restore task.
#[derive(Debug, Clone, Serialize)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    pub operation_mode: OperationMode,
    pub transfer_mode: TransferMode,
    pub source_path: String,
    pub remote_name: String,
    pub destination_path: String,
    pub pre_script: Option<String>,
    pub post_script: Option<String>,
    /// Empty means the job only runs when triggered by hand.
    pub schedule_cron: String,
    pub max_retention: u32,
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    pub active: bool,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobDefinition {
    pub fn is_scheduled(&self) -> bool {
        !self.schedule_cron.trim().is_empty()
    }

    /// Whether a finished run should leave the job re-triggerable instead of
    /// showing its terminal status.
    pub fn resets_after_run(&self) -> bool {
        !self.is_scheduled() || self.operation_mode == OperationMode::Restore
    }

    /// Apply the invariants every persisted definition must satisfy.
    pub fn normalized(mut self) -> Self {
        if self.transfer_mode == TransferMode::Sync {
            self.max_retention = 0;
        }
        self.schedule_cron = self.schedule_cron.trim().to_string();
        self
    }
}

/// Fully-formed job payload as submitted by a client. Defaults are the
/// caller's business; nothing here fills them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub operation_mode: OperationMode,
    pub transfer_mode: TransferMode,
    pub source_path: String,
    pub remote_name: String,
    pub destination_path: String,
    #[serde(default)]
    pub pre_script: Option<String>,
    #[serde(default)]
    pub post_script: Option<String>,
    #[serde(default)]
    pub schedule_cron: String,
    pub max_retention: u32,
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl JobSpec {
    pub fn into_definition(self, created_at: DateTime<Utc>) -> JobDefinition {
        JobDefinition {
            id: Uuid::now_v7().to_string(),
            name: self.name,
            operation_mode: self.operation_mode,
            transfer_mode: self.transfer_mode,
            source_path: self.source_path,
            remote_name: self.remote_name,
            destination_path: self.destination_path,
            pre_script: self.pre_script.filter(|s| !s.trim().is_empty()),
            post_script: self.post_script.filter(|s| !s.trim().is_empty()),
            schedule_cron: self.schedule_cron,
            max_retention: self.max_retention,
            encryption_key: self.encryption_key.filter(|k| !k.is_empty()),
            active: true,
            status: JobStatus::Pending,
            last_run: None,
            created_at,
        }
        .normalized()
    }

    /// `job` edited to match this payload. Identity, activation and run state
    /// are kept.
    pub fn apply_to(self, job: JobDefinition) -> JobDefinition {
        JobDefinition {
            id: job.id,
            active: job.active,
            status: job.status,
            last_run: job.last_run,
            ..self.into_definition(job.created_at)
        }
    }
}

/// Outcome of one external process run. Transient: it only lives long enough
/// to become a `LogEntry` and a status update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub duration: Duration,
    pub transferred_bytes: u64,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Default::default()
        }
    }
}

/// One immutable record per execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: Option<i64>,
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub message: String,
    pub duration_secs: u64,
    pub transferred_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Last known health of a remote profile.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteStatus {
    pub name: String,
    pub state: ConnectionState,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub owner_email: String,
    pub last_checked: DateTime<Utc>,
    pub active_jobs: u64,
    /// Usage warning when connected, raw error text when disconnected.
    pub message: String,
}

impl RemoteStatus {
    pub fn pending(name: &str, at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            state: ConnectionState::Pending,
            total_gb: 0.0,
            used_gb: 0.0,
            free_gb: 0.0,
            owner_email: String::new(),
            last_checked: at,
            active_jobs: 0,
            message: String::new(),
        }
    }

    pub fn used_percent(&self) -> Option<f64> {
        if self.total_gb > 0.0 {
            Some(self.used_gb / self.total_gb * 100.0)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: TransferMode, retention: u32) -> JobSpec {
        JobSpec {
            name: "photos".to_string(),
            operation_mode: OperationMode::Backup,
            transfer_mode: mode,
            source_path: "/srv/photos".to_string(),
            remote_name: "gdrive".to_string(),
            destination_path: "backups".to_string(),
            pre_script: Some("   ".to_string()),
            post_script: None,
            schedule_cron: " 0 2 * * * ".to_string(),
            max_retention: retention,
            encryption_key: None,
        }
    }

    #[test]
    fn sync_jobs_never_keep_retention() {
        let job = spec(TransferMode::Sync, 10).into_definition(Utc::now());
        assert_eq!(job.max_retention, 0);

        let job = spec(TransferMode::Copy, 10).into_definition(Utc::now());
        assert_eq!(job.max_retention, 10);
    }

    #[test]
    fn blank_scripts_and_cron_whitespace_are_dropped() {
        let job = spec(TransferMode::Copy, 3).into_definition(Utc::now());
        assert!(job.pre_script.is_none());
        assert_eq!(job.schedule_cron, "0 2 * * *");
        assert!(job.is_scheduled());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.active);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::FailPreScript,
            JobStatus::FailRclone,
            JobStatus::FailPostScript,
            JobStatus::FailSourceCheck,
            JobStatus::FailStorage,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("FAILED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn restore_and_manual_jobs_reset_after_run() {
        let mut job = spec(TransferMode::Copy, 3).into_definition(Utc::now());
        assert!(!job.resets_after_run());

        job.operation_mode = OperationMode::Restore;
        assert!(job.resets_after_run());

        job.operation_mode = OperationMode::Backup;
        job.schedule_cron.clear();
        assert!(job.resets_after_run());
    }

    #[test]
    fn used_percent_requires_known_total() {
        let mut status = RemoteStatus::pending("gdrive", Utc::now());
        assert!(status.used_percent().is_none());

        status.total_gb = 100.0;
        status.used_gb = 90.0;
        assert_eq!(status.used_percent(), Some(90.0));
    }
}
