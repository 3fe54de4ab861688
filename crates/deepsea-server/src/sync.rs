//! Periodic full-registry synchronization against the backend.
//!
//! Notifications can be lost and backend-side changes never produce one, so
//! these loops walk every record on a fixed tick. Shutdown is checked between
//! records, never inside one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use deepsea_core::ResourceKind;
use deepsea_storage::{DynBackend, ResourceRegistry, StorageResult};

use crate::reconcile::WorkQueue;

/// Per-pass counters, mostly for tests and debug logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub registered: usize,
    pub applied: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Converges every device with its backend record.
pub struct DeviceSynchronizer {
    registry: Arc<ResourceRegistry>,
    backend: DynBackend,
    interval: Duration,
}

impl DeviceSynchronizer {
    pub fn new(registry: Arc<ResourceRegistry>, backend: DynBackend, interval: Duration) -> Self {
        Self {
            registry,
            backend,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "Device synchronizer started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.sync_once(&shutdown).await;
                    if stats != SyncStats::default() {
                        debug!(?stats, "Device sync pass");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Device synchronizer stopped");
    }

    /// One pass over every device in the registry.
    pub async fn sync_once(&self, shutdown: &watch::Receiver<bool>) -> SyncStats {
        let mut stats = SyncStats::default();
        for name in self.registry.names(ResourceKind::Device) {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.sync_device(&name, &mut stats).await {
                stats.failed += 1;
                warn!(device = %name, error = %err, "Device sync failed");
            }
        }
        stats
    }

    async fn sync_device(&self, name: &str, stats: &mut SyncStats) -> StorageResult<()> {
        let Some(device) = self.registry.get_device(name) else {
            return Ok(());
        };

        let mut remote = match self.backend.get_device(name).await? {
            Some(remote) => remote,
            None => {
                // First write wins: a concurrent registration keeps its record.
                self.backend.register_device(&device).await?;
                stats.registered += 1;
                return Ok(());
            }
        };

        let pending = device.pending_inputs();
        if !pending.is_empty() {
            remote.status = self.backend.apply_inputs(name, &pending).await?;
            stats.applied += 1;
        }

        if !remote.status.same_as(&device.status) {
            match self.registry.replace_status(name, remote.status) {
                Ok(true) => stats.refreshed += 1,
                Ok(false) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Re-enqueues every module on a slow tick so the module controller
/// re-checks links and backend registration.
pub struct ModuleSynchronizer {
    registry: Arc<ResourceRegistry>,
    queue: Arc<WorkQueue>,
    interval: Duration,
}

impl ModuleSynchronizer {
    pub fn new(registry: Arc<ResourceRegistry>, queue: Arc<WorkQueue>, interval: Duration) -> Self {
        Self {
            registry,
            queue,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The controller enqueues everything on start.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let queued = self.enqueue_all(&shutdown);
                    debug!(queued, "Module sync pass");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Module synchronizer stopped");
    }

    pub fn enqueue_all(&self, shutdown: &watch::Receiver<bool>) -> usize {
        let mut queued = 0;
        for name in self.registry.names(ResourceKind::Module) {
            if *shutdown.borrow() {
                break;
            }
            self.queue.add(name);
            queued += 1;
        }
        queued
    }
}
