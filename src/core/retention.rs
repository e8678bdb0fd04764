use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::artifact::is_managed_artifact;
use crate::core::error::ToolError;
use crate::core::transfer_tool::{RemoteEntry, TransferTool, join_remote_path, remote_location};

/// Outcome of one purge pass over a destination root.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PurgeReport {
    /// Managed artifacts found before purging.
    pub matched: usize,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Managed artifacts to delete so that one more fits under `max`.
///
/// Entries without the timestamp suffix are never candidates. Returns the
/// `count - max + 1` oldest by modification time, or nothing when the count
/// is already below the cap. `max == 0` disables eviction.
pub fn select_for_eviction(entries: &[RemoteEntry], max: u32) -> Vec<RemoteEntry> {
    if max == 0 {
        return Vec::new();
    }

    let mut managed: Vec<&RemoteEntry> = entries
        .iter()
        .filter(|e| is_managed_artifact(&e.name))
        .collect();

    let max = max as usize;
    if managed.len() < max {
        return Vec::new();
    }

    managed.sort_by_key(|e| e.mod_time);
    let excess = managed.len() - max + 1;
    managed.into_iter().take(excess).cloned().collect()
}

/// Keeps the number of historical artifacts under a destination root bounded.
pub struct RetentionManager {
    tool: Arc<dyn TransferTool>,
}

impl RetentionManager {
    pub fn new(tool: Arc<dyn TransferTool>) -> Self {
        Self { tool }
    }

    /// Free one slot under `remote:root` for an incoming artifact.
    ///
    /// Only a failed listing is an error. Individual deletions that fail are
    /// logged and reported, and the rest of the purge carries on.
    pub async fn enforce(&self, remote: &str, root: &str, max: u32) -> Result<PurgeReport, ToolError> {
        if max == 0 {
            return Ok(PurgeReport::default());
        }

        let location = remote_location(remote, root);
        let entries = self.tool.list(&location).await?;
        let matched = entries.iter().filter(|e| is_managed_artifact(&e.name)).count();
        let victims = select_for_eviction(&entries, max);

        let mut report = PurgeReport {
            matched,
            ..Default::default()
        };

        if victims.is_empty() {
            debug!(remote, root, matched, max, "Retention within limit");
            return Ok(report);
        }

        for entry in victims {
            let target = remote_location(remote, &join_remote_path(root, &entry.name));
            match self.tool.remove(&target, entry.is_dir).await {
                Ok(()) => {
                    info!(remote, artifact = %entry.name, "Purged old backup");
                    report.removed.push(entry.name);
                }
                Err(e) => {
                    warn!(remote, artifact = %entry.name, error = %e, "Failed to purge old backup");
                    report.failed.push(entry.name);
                }
            }
        }

        Ok(report)
    }
}
