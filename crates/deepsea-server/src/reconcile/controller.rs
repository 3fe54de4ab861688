//! Generic reconcile loop: change notifications in, keys through a
//! [`WorkQueue`], a fixed pool of workers calling a [`Reconciler`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use deepsea_core::events::ChangeNotification;
use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::ReconcileError;
use super::queue::WorkQueue;

/// Reconcile logic for one resource kind.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Converge the record identified by `key`.
    ///
    /// Must be idempotent: the same key may be reconciled any number of times.
    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError>;

    /// Keys to enqueue for a change notification.
    fn keys_for(&self, change: &ChangeNotification) -> Vec<String>;

    /// Every key of this kind, used on start and after lost notifications.
    fn resync_keys(&self) -> Vec<String>;
}

pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    workers: usize,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, queue: Arc<WorkQueue>, workers: usize) -> Self {
        Self {
            reconciler,
            queue,
            workers: workers.max(1),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until shutdown is signalled or a worker hits a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the first `ReconcileError::Fatal` any worker produced.
    pub async fn run(
        self,
        mut changes: broadcast::Receiver<ChangeNotification>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReconcileError> {
        let name = self.reconciler.name();
        for key in self.reconciler.resync_keys() {
            self.queue.add(key);
        }

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(worker(
                id,
                Arc::clone(&self.reconciler),
                Arc::clone(&self.queue),
            ));
        }
        info!(controller = name, workers = self.workers, "Controller started");

        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(Err(err))) => break Err(err),
                    Some(Ok(Ok(()))) | None => break Ok(()),
                    Some(Err(err)) => {
                        error!(controller = name, error = %err, "Controller worker aborted");
                    }
                },
                received = changes.recv() => match received {
                    Ok(change) => {
                        for key in self.reconciler.keys_for(&change) {
                            self.queue.add(key);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(controller = name, missed, "Change notifications lost, resyncing");
                        for key in self.reconciler.resync_keys() {
                            self.queue.add(key);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                },
            }
        };

        self.queue.shutdown();
        let mut outcome = outcome;
        while let Some(joined) = workers.join_next().await {
            if let Ok(Err(err)) = joined {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        info!(controller = name, "Controller stopped");
        outcome
    }
}

async fn worker<R: Reconciler>(
    id: usize,
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
) -> Result<(), ReconcileError> {
    let name = reconciler.name();
    while let Some(key) = queue.get().await {
        let outcome = AssertUnwindSafe(reconciler.reconcile(&key))
            .catch_unwind()
            .await;

        let fatal = match outcome {
            Ok(Ok(())) => {
                debug!(controller = name, worker = id, key = %key, "Reconciled");
                queue.forget(&key);
                None
            }
            Ok(Err(err @ ReconcileError::Transient(_))) => {
                warn!(
                    controller = name,
                    key = %key,
                    retries = queue.num_requeues(&key),
                    error = %err,
                    "Reconcile failed, requeueing"
                );
                queue.add_rate_limited(key.as_str());
                None
            }
            Ok(Err(err @ ReconcileError::Permanent(_))) => {
                error!(
                    controller = name,
                    key = %key,
                    error = %err,
                    "Reconcile failed, dropping key"
                );
                queue.forget(&key);
                None
            }
            Ok(Err(err @ ReconcileError::Fatal(_))) => {
                error!(controller = name, key = %key, error = %err, "Fatal reconcile failure");
                Some(err)
            }
            Err(panic) => {
                let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(controller = name, key = %key, panic = %panic_msg, "Reconciler panicked");
                queue.add_rate_limited(key.as_str());
                None
            }
        };

        queue.done(&key);
        if let Some(err) = fatal {
            queue.shutdown();
            return Err(err);
        }
    }
    Ok(())
}
