use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use super::process::{RunLimits, run_process, spawn_and_wait};
use super::{Capacity, RemoteEntry, TransferRequest, TransferTool};
use crate::core::error::ToolError;
use crate::core::models::ExecutionResult;

/// Transfer tool backed by the `rclone` binary.
pub struct RcloneTool {
    binary: String,
    config: Option<PathBuf>,
    limits: RunLimits,
}

impl RcloneTool {
    pub fn new(binary: String, config: Option<PathBuf>) -> Self {
        Self {
            binary,
            config,
            limits: RunLimits::default(),
        }
    }

    /// Limits for the short housekeeping commands (about, list, remove).
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Full argument vector, including the binary and global flags.
    pub fn command<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![self.binary.clone()];
        if let Some(config) = &self.config {
            argv.push("--config".to_string());
            argv.push(config.display().to_string());
        }
        argv.extend(args.into_iter().map(Into::into));
        argv
    }

    /// Run a command and return its stdout, failing on non-zero exit.
    async fn stdout_of(&self, argv: Vec<String>) -> Result<String, ToolError> {
        let out = spawn_and_wait(&argv, &self.limits).await?;
        if !out.success {
            return Err(ToolError::Exit {
                program: self.binary.clone(),
                code: out.code,
                output: out.combined(),
            });
        }
        Ok(out.stdout)
    }

    pub fn transfer_argv(&self, req: &TransferRequest) -> Vec<String> {
        let mut args = vec![
            req.verb.as_str().to_string(),
            req.source.clone(),
            req.destination.clone(),
        ];
        args.extend(req.flags.iter().cloned());
        self.command(args)
    }
}

#[async_trait]
impl TransferTool for RcloneTool {
    async fn about(&self, remote: &str) -> Result<Capacity, ToolError> {
        let stdout = self
            .stdout_of(self.command(["about".to_string(), format!("{remote}:"), "--json".to_string()]))
            .await?;
        serde_json::from_str(&stdout).map_err(|source| ToolError::Parse {
            what: "about",
            source,
        })
    }

    async fn list(&self, location: &str) -> Result<Vec<RemoteEntry>, ToolError> {
        let stdout = self.stdout_of(self.command(["lsjson", location])).await?;
        serde_json::from_str(&stdout).map_err(|source| ToolError::Parse {
            what: "lsjson",
            source,
        })
    }

    async fn transfer(&self, req: &TransferRequest, limits: &RunLimits) -> ExecutionResult {
        let argv = self.transfer_argv(req);
        info!(
            verb = req.verb.as_str(),
            source = %req.source,
            destination = %req.destination,
            "Starting rclone transfer"
        );
        run_process(&argv, limits).await
    }

    async fn remove(&self, location: &str, is_dir: bool) -> Result<(), ToolError> {
        let verb = if is_dir { "purge" } else { "deletefile" };
        debug!(verb, location, "Removing remote entry");
        self.stdout_of(self.command([verb, location])).await?;
        Ok(())
    }

    async fn list_remotes(&self) -> Result<Vec<String>, ToolError> {
        let stdout = self.stdout_of(self.command(["listremotes"])).await?;
        Ok(parse_remote_names(&stdout))
    }
}

/// `listremotes` prints one `name:` per line.
pub fn parse_remote_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_suffix(':'))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transfer_tool::TransferVerb;

    #[test]
    fn parses_listremotes_output() {
        let names = parse_remote_names("gdrive:\n  work-drive:\n\nnot a remote\n:\n");
        assert_eq!(names, vec!["gdrive".to_string(), "work-drive".to_string()]);
    }

    #[test]
    fn global_config_flag_precedes_verb() {
        let tool = RcloneTool::new("rclone".to_string(), Some(PathBuf::from("/etc/rclone.conf")));
        let argv = tool.transfer_argv(&TransferRequest {
            verb: TransferVerb::CopyTo,
            source: "/data/report.csv".to_string(),
            destination: "gdrive:reports/report_20240115_100000.csv".to_string(),
            flags: vec!["--checksum".to_string()],
        });
        assert_eq!(
            argv,
            vec![
                "rclone",
                "--config",
                "/etc/rclone.conf",
                "copyto",
                "/data/report.csv",
                "gdrive:reports/report_20240115_100000.csv",
                "--checksum",
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_surfaces_spawn_error() {
        let tool = RcloneTool::new("/nonexistent/rclone".to_string(), None);
        let err = tool.list_remotes().await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
