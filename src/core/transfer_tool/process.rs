use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::output::parse_transferred_bytes;
use crate::core::error::ToolError;
use crate::core::models::ExecutionResult;

/// Deadline and cancellation applied to one external process.
///
/// The default has no deadline and a token nobody cancels, so the process
/// runs to completion.
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    pub deadline: Option<Duration>,
    pub cancel: CancellationToken,
}

/// Raw result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    /// stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Spawn `argv` and wait for it, honouring the deadline and cancellation.
///
/// A process that outlives its deadline or is cancelled is killed.
pub async fn spawn_and_wait(argv: &[String], limits: &RunLimits) -> Result<ProcessOutput, ToolError> {
    let (program, args) = argv.split_first().ok_or(ToolError::EmptyCommand)?;

    debug!(program = %program, args = ?args, "Spawning process");

    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    let output = tokio::select! {
        res = &mut wait => res.map_err(|source| ToolError::Wait {
            program: program.clone(),
            source,
        })?,
        _ = limits.cancel.cancelled() => return Err(ToolError::Cancelled),
        _ = expire(limits.deadline) => {
            return Err(ToolError::TimedOut(limits.deadline.unwrap_or_default()));
        }
    };

    Ok(ProcessOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: start.elapsed(),
    })
}

async fn expire(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// Run `argv` to an [`ExecutionResult`]. Never fails: spawn errors, non-zero
/// exits and deadline expiry all become an unsuccessful result.
///
/// The byte count is parsed whether or not the run succeeded, since a failed
/// transfer may still have moved data.
pub async fn run_process(argv: &[String], limits: &RunLimits) -> ExecutionResult {
    let start = Instant::now();

    match spawn_and_wait(argv, limits).await {
        Ok(out) => {
            let output = out.combined();
            let transferred_bytes = parse_transferred_bytes(&output);
            let error = if out.success {
                String::new()
            } else {
                ToolError::Exit {
                    program: argv[0].clone(),
                    code: out.code,
                    output: output.clone(),
                }
                .to_string()
            };

            ExecutionResult {
                success: out.success,
                output,
                error,
                duration: out.duration,
                transferred_bytes,
            }
        }
        Err(e) => ExecutionResult {
            duration: start.elapsed(),
            ..ExecutionResult::failure(e.to_string())
        },
    }
}

/// Prefix user script text with strict-mode options.
pub fn hardened_script(script: &str) -> String {
    format!("set -eo pipefail\n{script}")
}

/// Run a user-supplied hook under bash strict mode.
pub async fn run_hook(script: &str, limits: &RunLimits) -> ExecutionResult {
    let argv = vec![
        "bash".to_string(),
        "-c".to_string(),
        hardened_script(script),
    ];
    run_process(&argv, limits).await
}
