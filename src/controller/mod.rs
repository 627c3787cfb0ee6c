//! CSI controller orchestration over an asynchronous block-storage backend.
//!
//! [`Controller`] turns single CSI controller calls into idempotent,
//! retry-safe workflows: find-or-create by name, content-source resolution,
//! status-gated attach/detach/resize, and snapshot or backup creation with
//! guaranteed removal of the transient snapshot a backup is built from.
//!
//! Every operation takes a [`RequestContext`]; backend calls and waits race
//! against it, so a cancelled request stops polling promptly.

mod backup;
pub mod error;
mod expand;
mod lease;
pub mod params;
mod publish;
pub mod request;
mod snapshot;
mod source;
mod volume;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

pub use error::ControllerError;
pub use request::*;

use crate::backend::{BackendError, BlockStorage};
use crate::context::RequestContext;
use crate::wait::{Backoff, Observed};
use lease::NameLeases;

/// Default driver name, also the prefix of the topology key.
pub const DEFAULT_DRIVER_NAME: &str = "block.csi.cloud";

/// Poll schedules and budgets for each asynchronous operation.
///
/// The defaults match the backend's observed completion times. Tests
/// shrink them to milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timing {
    /// Wait for a created volume to become available.
    pub volume_create: Backoff,
    /// Wait for an attachment to show up on the volume.
    pub attach: Backoff,
    /// Wait for an attachment to clear.
    pub detach: Backoff,
    /// Wait for a resize to finish.
    pub expand: Backoff,
    /// Wait for a snapshot to become available.
    pub snapshot_ready: Backoff,
    /// Interval between backup status polls.
    pub backup_poll_interval: Duration,
    /// Fixed part of the backup budget.
    pub backup_base_timeout: Duration,
    /// Default per-GiB part of the backup budget, in seconds.
    pub backup_seconds_per_gib: u64,
    /// Budget for deleting a transient snapshot after the request ended.
    pub cleanup_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        let second = Duration::from_secs(1);
        Self {
            volume_create: Backoff::exponential(second, 1.1, 10),
            attach: Backoff::exponential(second, 1.2, 15),
            detach: Backoff::exponential(second, 1.2, 13),
            expand: Backoff::exponential(second, 1.2, 15),
            snapshot_ready: Backoff::exponential(second, 1.2, 10),
            backup_poll_interval: Duration::from_secs(7),
            backup_base_timeout: Duration::from_secs(30),
            backup_seconds_per_gib: 20,
            cleanup_timeout: Duration::from_secs(60),
        }
    }
}

impl Timing {
    /// Budget for a backup of `size_gib` to become available.
    #[must_use]
    pub fn backup_timeout(&self, seconds_per_gib: u64, size_gib: u64) -> Duration {
        Duration::from_secs(seconds_per_gib.saturating_mul(size_gib))
            .saturating_add(self.backup_base_timeout)
    }
}

/// CSI controller service bound to one backend.
#[derive(Debug)]
pub struct Controller<S> {
    storage: S,
    driver_name: String,
    topology_key: String,
    cluster: Option<String>,
    timing: Timing,
    leases: NameLeases,
}

impl<S: BlockStorage> Controller<S> {
    /// Creates a controller with default timing.
    #[must_use]
    pub fn new(storage: S, driver_name: impl Into<String>) -> Self {
        let driver = driver_name.into();
        Self {
            storage,
            topology_key: format!("topology.{driver}/zone"),
            driver_name: driver,
            cluster: None,
            timing: Timing::default(),
            leases: NameLeases::default(),
        }
    }

    /// Replaces the poll schedules.
    #[must_use]
    pub const fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Tags every created resource with the cluster name.
    #[must_use]
    pub fn with_cluster(mut self, cluster: Option<String>) -> Self {
        self.cluster = cluster.filter(|name| !name.is_empty());
        self
    }

    /// Topology segment key carrying the availability zone.
    #[must_use]
    pub fn topology_key(&self) -> &str {
        &self.topology_key
    }

    fn labels(&self, parameters: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let cluster_key = format!("{}/cluster", self.driver_name);
        params::labels(
            parameters,
            self.cluster
                .as_deref()
                .map(|cluster| (cluster_key.as_str(), cluster)),
        )
    }

    fn topology_for(&self, zone: &str) -> Vec<Topology> {
        if zone.is_empty() {
            return Vec::new();
        }
        vec![Topology {
            segments: [(self.topology_key.clone(), zone.to_owned())]
                .into_iter()
                .collect(),
        }]
    }
}

/// Describes a resource for a timeout message, preferring a fresh fetch over
/// the state the wait last saw.
async fn final_state<R, F>(ctx: &RequestContext, fetch: F, last_state: Option<String>) -> String
where
    R: Observed,
    F: std::future::Future<Output = Result<R, BackendError>>,
{
    match ctx.run(fetch).await {
        Ok(Ok(record)) => record.observed_state(),
        Ok(Err(err)) => {
            debug!(error = %err, "final status lookup failed");
            last_state.unwrap_or_else(|| String::from("unknown"))
        }
        Err(_) => last_state.unwrap_or_else(|| String::from("unknown")),
    }
}
