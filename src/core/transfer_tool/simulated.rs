use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use super::output::parse_transferred_bytes;
use super::process::RunLimits;
use super::{Capacity, RemoteEntry, TransferRequest, TransferTool};
use crate::core::error::ToolError;
use crate::core::models::ExecutionResult;

/// A call observed by the simulated tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    About(String),
    List(String),
    Transfer(TransferRequest),
    Remove { location: String, is_dir: bool },
    ListRemotes,
}

#[derive(Default)]
struct SimState {
    remotes: BTreeMap<String, Capacity>,
    listings: HashMap<String, Vec<RemoteEntry>>,
    unreachable: HashSet<String>,
    undeletable: HashSet<String>,
    fail_transfers: bool,
    transfer_bytes: u64,
    calls: Vec<ToolCall>,
}

/// In-memory stand-in for the transfer tool.
///
/// Remotes, listings and failures are scripted up front; successful transfers
/// add the new artifact to the destination's parent listing so retention sees
/// it on the next run.
pub struct SimulatedTool {
    state: Mutex<SimState>,
    latency: Duration,
}

impl Default for SimulatedTool {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                transfer_bytes: 1024 * 1024,
                ..Default::default()
            }),
            latency: Duration::ZERO,
        }
    }

    /// Tool used by the daemon's simulation mode: one roomy remote and a
    /// short delay per transfer.
    pub fn demo() -> Self {
        let tool = Self::new().with_remote(
            "simulated",
            Capacity {
                total: 100 * 1024 * 1024 * 1024,
                used: 20 * 1024 * 1024 * 1024,
                free: 80 * 1024 * 1024 * 1024,
            },
        );
        Self {
            latency: Duration::from_millis(500),
            ..tool
        }
    }

    pub fn with_remote(self, name: &str, capacity: Capacity) -> Self {
        self.add_remote(name, capacity);
        self
    }

    pub fn with_listing(self, location: &str, entries: Vec<RemoteEntry>) -> Self {
        self.lock().listings.insert(location.to_string(), entries);
        self
    }

    pub fn add_remote(&self, name: &str, capacity: Capacity) {
        self.lock().remotes.insert(name.to_string(), capacity);
    }

    pub fn remove_remote(&self, name: &str) {
        self.lock().remotes.remove(name);
    }

    /// Make `about` fail for this remote.
    pub fn set_unreachable(&self, name: &str) {
        self.lock().unreachable.insert(name.to_string());
    }

    /// Make `remove` fail for this exact location.
    pub fn set_undeletable(&self, location: &str) {
        self.lock().undeletable.insert(location.to_string());
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.lock().fail_transfers = fail;
    }

    pub fn set_transfer_bytes(&self, bytes: u64) {
        self.lock().transfer_bytes = bytes;
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.lock().calls.clone()
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ToolCall::Transfer(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn listing(&self, location: &str) -> Vec<RemoteEntry> {
        self.lock().listings.get(location).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn split_location(location: &str) -> Option<(&str, &str)> {
    location.rsplit_once('/')
}

#[async_trait]
impl TransferTool for SimulatedTool {
    async fn about(&self, remote: &str) -> Result<Capacity, ToolError> {
        let mut state = self.lock();
        state.calls.push(ToolCall::About(remote.to_string()));

        if state.unreachable.contains(remote) {
            return Err(ToolError::Simulated(format!(
                "couldn't connect to {remote}: simulated outage"
            )));
        }
        state
            .remotes
            .get(remote)
            .copied()
            .ok_or_else(|| ToolError::Simulated(format!("didn't find section in config file ({remote})")))
    }

    async fn list(&self, location: &str) -> Result<Vec<RemoteEntry>, ToolError> {
        let mut state = self.lock();
        state.calls.push(ToolCall::List(location.to_string()));
        Ok(state.listings.get(location).cloned().unwrap_or_default())
    }

    async fn transfer(&self, req: &TransferRequest, limits: &RunLimits) -> ExecutionResult {
        let (fail, bytes) = {
            let mut state = self.lock();
            state.calls.push(ToolCall::Transfer(req.clone()));
            (state.fail_transfers, state.transfer_bytes)
        };

        if !self.latency.is_zero() {
            tokio::select! {
                _ = sleep(self.latency) => {}
                _ = limits.cancel.cancelled() => return ExecutionResult::failure(ToolError::Cancelled.to_string()),
            }
        }

        if fail {
            return ExecutionResult {
                duration: self.latency,
                ..ExecutionResult::failure("ERROR : simulated transfer failure")
            };
        }

        if let Some((parent, name)) = split_location(&req.destination) {
            let mut state = self.lock();
            state
                .listings
                .entry(parent.to_string())
                .or_default()
                .push(RemoteEntry {
                    name: name.to_string(),
                    size: bytes as i64,
                    is_dir: req.verb != super::TransferVerb::CopyTo,
                    mod_time: Utc::now(),
                });
        }

        let output = format!(
            "Transferred:   \t {kib} KiB / {kib} KiB, 100%, 0 B/s, ETA -\nTransferred:            1 / 1, 100%\n",
            kib = bytes / 1024
        );
        ExecutionResult {
            success: true,
            transferred_bytes: parse_transferred_bytes(&output),
            output,
            error: String::new(),
            duration: self.latency,
        }
    }

    async fn remove(&self, location: &str, is_dir: bool) -> Result<(), ToolError> {
        let mut state = self.lock();
        state.calls.push(ToolCall::Remove {
            location: location.to_string(),
            is_dir,
        });

        if state.undeletable.contains(location) {
            return Err(ToolError::Simulated(format!("permission denied: {location}")));
        }

        let (parent, name) = split_location(location)
            .ok_or_else(|| ToolError::Simulated(format!("not a child path: {location}")))?;
        let entries = state.listings.entry(parent.to_string()).or_default();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Err(ToolError::Simulated(format!("object not found: {location}")));
        }
        Ok(())
    }

    async fn list_remotes(&self) -> Result<Vec<String>, ToolError> {
        let mut state = self.lock();
        state.calls.push(ToolCall::ListRemotes);
        Ok(state.remotes.keys().cloned().collect())
    }
}
