use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::models::{ConnectionState, JobDefinition, OperationMode};
use crate::core::store::RemoteStore;

pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Result of the preflight space check.
#[derive(Debug, Clone, PartialEq)]
pub enum CapacityVerdict {
    /// Enough known free space for the estimated payload.
    Sufficient { free_gb: f64, required_gb: f64 },
    /// Not enough room; the run must not start.
    Insufficient { free_gb: f64, required_gb: f64 },
    /// Nothing to compare against (manual job, restore, or no known capacity).
    Skipped,
}

impl CapacityVerdict {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Insufficient { .. })
    }
}

/// Preflight check comparing a backup's estimated size with the destination
/// remote's last known free space.
pub struct CapacityGuard {
    remotes: Arc<dyn RemoteStore>,
    safety_margin_gb: f64,
}

impl CapacityGuard {
    pub fn new(remotes: Arc<dyn RemoteStore>, safety_margin_gb: f64) -> Self {
        Self {
            remotes,
            safety_margin_gb,
        }
    }

    /// Only scheduled backups are guarded. A remote that has never been
    /// checked, or that the store cannot return, lets the job through.
    pub async fn evaluate(&self, job: &JobDefinition) -> CapacityVerdict {
        if job.operation_mode != OperationMode::Backup || !job.is_scheduled() {
            return CapacityVerdict::Skipped;
        }

        let remote = match self.remotes.find(&job.remote_name).await {
            Ok(Some(remote)) if remote.state != ConnectionState::Pending => remote,
            Ok(_) => {
                debug!(remote = %job.remote_name, "No known capacity, skipping space check");
                return CapacityVerdict::Skipped;
            }
            Err(e) => {
                warn!(remote = %job.remote_name, error = %e, "Could not load remote status, skipping space check");
                return CapacityVerdict::Skipped;
            }
        };

        let payload_gb = estimate_payload_gb(Path::new(&job.source_path)).await;
        let required_gb = payload_gb + self.safety_margin_gb;

        if remote.free_gb < required_gb {
            CapacityVerdict::Insufficient {
                free_gb: remote.free_gb,
                required_gb,
            }
        } else {
            CapacityVerdict::Sufficient {
                free_gb: remote.free_gb,
                required_gb,
            }
        }
    }
}

/// Size of `source` from a single stat.
///
/// Directories report their own entry size, not their contents. A source
/// that cannot be stat'ed counts as empty: the pre-hook may yet create it.
pub async fn estimate_payload_gb(source: &Path) -> f64 {
    match tokio::fs::metadata(source).await {
        Ok(meta) => meta.len() as f64 / BYTES_PER_GB,
        Err(e) => {
            warn!(source = %source.display(), error = %e, "Could not stat source for size estimate");
            0.0
        }
    }
}
