use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use deepsea_core::ResourceKind;
use deepsea_core::events::{ChangeKind, ChangeNotification};
use deepsea_storage::{DynBackend, ResourceRegistry};

use super::controller::Reconciler;
use super::error::ReconcileError;

/// Links a module's three devices back to it and registers the module with
/// the backend.
pub struct ModuleReconciler {
    registry: Arc<ResourceRegistry>,
    backend: DynBackend,
}

impl ModuleReconciler {
    pub fn new(registry: Arc<ResourceRegistry>, backend: DynBackend) -> Self {
        Self { registry, backend }
    }

    pub async fn reconcile_module(&self, name: &str) -> Result<(), ReconcileError> {
        let Some(module) = self.registry.get_module(name) else {
            debug!(module = %name, "Module gone, nothing to reconcile");
            return Ok(());
        };

        let mut missing = Vec::new();
        for (role, device) in module.devices().iter() {
            match self.registry.link_device_to_module(device, &module.name) {
                Ok(true) => {
                    info!(module = %module.name, device = %device, role = %role, "Device linked")
                }
                Ok(false) => {}
                Err(err) if err.is_not_found() => missing.push(device.to_string()),
                Err(err) => return Err(err.into()),
            }
        }
        // A broken owner index is Internal, which halts the controller.
        self.registry.check_integrity()?;

        let registered = self.backend.get_module(&module.name).await?;
        if registered.as_ref() != Some(&module) {
            self.backend.register_module(&module).await?;
            info!(module = %module.name, "Module registered with backend");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::transient(format!(
                "module {} references missing devices: {}",
                module.name,
                missing.join(", ")
            )))
        }
    }
}

#[async_trait]
impl Reconciler for ModuleReconciler {
    fn name(&self) -> &'static str {
        "module"
    }

    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError> {
        self.reconcile_module(key).await
    }

    fn keys_for(&self, change: &ChangeNotification) -> Vec<String> {
        match change.resource_kind {
            ResourceKind::Module => vec![change.name.clone()],
            // A new device may complete a module that was waiting for it.
            ResourceKind::Device if change.kind == ChangeKind::Add => self
                .registry
                .modules_referencing(&change.name)
                .into_iter()
                .map(|m| m.name)
                .collect(),
            ResourceKind::Device => Vec::new(),
        }
    }

    fn resync_keys(&self) -> Vec<String> {
        self.registry.names(ResourceKind::Module)
    }
}
