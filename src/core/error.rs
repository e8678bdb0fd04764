use std::time::Duration;
use thiserror::Error;

/// Failure talking to the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt {table} row: {details}")]
    Corrupt {
        table: &'static str,
        details: String,
    },
}

impl StoreError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Failure invoking the external transfer tool or a hook.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {output}", exit_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("unexpected {what} output: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Simulated(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "signal".to_string(),
    }
}

/// Failure during a monitor reconciliation pass.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a manual trigger or submission did not start a run.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
