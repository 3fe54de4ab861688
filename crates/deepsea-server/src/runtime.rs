//! Wiring of the control plane: registry, backend, event dispatcher,
//! controllers, synchronizers and simulator, plus their shared shutdown.

use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

use deepsea_core::events::{ChangeBroadcaster, EventBus};
use deepsea_storage::{DynBackend, InMemoryBackend, ResourceRegistry};

use crate::config::AppConfig;
use crate::reconcile::{Controller, DeviceReconciler, ModuleReconciler, WorkQueue};
use crate::simulation::PhysicalSimulator;
use crate::sync::{DeviceSynchronizer, ModuleSynchronizer};

/// Handle to the running background tasks.
pub struct Runtime {
    registry: Arc<ResourceRegistry>,
    backend: Arc<InMemoryBackend>,
    shutdown: Arc<watch::Sender<bool>>,
    supervisor: Mutex<Option<JoinHandle<Option<String>>>>,
}

impl Runtime {
    /// Spawn every background task. Must be called inside a tokio runtime.
    pub fn start(cfg: &AppConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let (bus, dispatcher) = EventBus::new(cfg.events.subscriber_queue_capacity);
        let changes = ChangeBroadcaster::with_capacity(cfg.controller.notification_buffer);
        let registry = Arc::new(ResourceRegistry::new(bus, changes.clone()));
        let backend = Arc::new(InMemoryBackend::new());
        let dyn_backend: DynBackend = backend.clone();

        let mut tasks: JoinSet<Result<(), String>> = JoinSet::new();

        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            dispatcher.run(rx).await;
            Ok(())
        });

        let new_queue = || {
            WorkQueue::new(
                cfg.controller.retry_base_delay(),
                cfg.controller.retry_max_delay(),
            )
        };

        let devices = Controller::new(
            Arc::new(DeviceReconciler::new(registry.clone(), dyn_backend.clone())),
            new_queue(),
            cfg.controller.workers,
        );
        let modules = Controller::new(
            Arc::new(ModuleReconciler::new(registry.clone(), dyn_backend.clone())),
            new_queue(),
            cfg.controller.workers,
        );
        let module_queue = modules.queue();

        let (changes_rx, rx) = (changes.subscribe(), shutdown_rx.clone());
        tasks.spawn(async move { devices.run(changes_rx, rx).await.map_err(|e| e.to_string()) });
        let (changes_rx, rx) = (changes.subscribe(), shutdown_rx.clone());
        tasks.spawn(async move { modules.run(changes_rx, rx).await.map_err(|e| e.to_string()) });

        let device_sync = DeviceSynchronizer::new(
            registry.clone(),
            dyn_backend.clone(),
            cfg.controller.device_sync_interval(),
        );
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            device_sync.run(rx).await;
            Ok(())
        });

        let module_sync = ModuleSynchronizer::new(
            registry.clone(),
            module_queue,
            cfg.controller.module_sync_interval(),
        );
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            module_sync.run(rx).await;
            Ok(())
        });

        if cfg.simulation.enabled {
            let simulator = PhysicalSimulator::new(
                registry.clone(),
                dyn_backend,
                cfg.simulation.pressure_model(),
                cfg.simulation.tick_interval(),
            );
            let rx = shutdown_rx;
            tasks.spawn(async move {
                simulator.run(rx).await;
                Ok(())
            });
        }

        let supervisor = tokio::spawn(supervise(tasks, shutdown.clone()));
        info!(simulation = cfg.simulation.enabled, "Control plane started");

        Self {
            registry,
            backend,
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    pub fn registry(&self) -> Arc<ResourceRegistry> {
        self.registry.clone()
    }

    pub fn backend(&self) -> Arc<InMemoryBackend> {
        self.backend.clone()
    }

    /// Receiver that flips to `true` once shutdown starts, whether requested
    /// or caused by a fatal controller error.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Sender side of the shutdown signal, for callers that need to trigger it
    /// without waiting.
    pub fn shutdown_sender(&self) -> Arc<watch::Sender<bool>> {
        self.shutdown.clone()
    }

    /// Signal every task to stop and wait for them.
    ///
    /// # Errors
    ///
    /// Fails if a controller stopped on a fatal error.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.shutdown.send_replace(true);
        let supervisor = self.supervisor.lock().take();
        let Some(supervisor) = supervisor else {
            return Ok(());
        };
        match supervisor.await? {
            Some(fatal) => Err(anyhow!("control plane halted: {fatal}")),
            None => {
                info!("Control plane stopped");
                Ok(())
            }
        }
    }
}

/// Wait for every task; the first failure stops the rest.
async fn supervise(
    mut tasks: JoinSet<Result<(), String>>,
    shutdown: Arc<watch::Sender<bool>>,
) -> Option<String> {
    let mut fatal = None;
    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(err) => Some(format!("background task aborted: {err}")),
        };
        if let Some(failure) = failure {
            error!(error = %failure, "Background task failed, shutting down");
            fatal.get_or_insert(failure);
            shutdown.send_replace(true);
        }
    }
    fatal
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field("shutting_down", &*self.shutdown.borrow())
            .finish_non_exhaustive()
    }
}
