//! In-memory simulated physical backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use deepsea_core::value::set_value;
use deepsea_core::{Device, DeviceStatus, Module, ResourceKind, Value};

use crate::error::StorageError;
use crate::traits::DeviceBackend;

#[derive(Debug, Default)]
struct BackendState {
    devices: BTreeMap<String, Device>,
    modules: BTreeMap<String, Module>,
    /// device name -> module name
    links: HashMap<String, String>,
}

/// Backend keeping the simulated physical state in process memory.
#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    available: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// `StorageError::BackendUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Module a device is linked to on the backend side.
    pub fn linked_module(&self, device: &str) -> Option<String> {
        self.state.lock().links.get(device).cloned()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::backend_unavailable("simulated backend is offline"))
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBackend for InMemoryBackend {
    async fn get_device(&self, name: &str) -> Result<Option<Device>, StorageError> {
        self.check_available()?;
        Ok(self.state.lock().devices.get(name).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StorageError> {
        self.check_available()?;
        Ok(self.state.lock().devices.values().cloned().collect())
    }

    async fn register_device(&self, device: &Device) -> Result<bool, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.devices.contains_key(&device.name) {
            return Ok(false);
        }
        state.devices.insert(device.name.clone(), device.clone());
        debug!(device = %device.name, "Backend registered device");
        Ok(true)
    }

    async fn apply_inputs(
        &self,
        name: &str,
        inputs: &[Value],
    ) -> Result<DeviceStatus, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found(ResourceKind::Device, name))?;
        for input in inputs {
            set_value(&mut device.spec.inputs, input.clone());
            set_value(&mut device.status.observed_inputs, input.clone());
        }
        debug!(device = %name, inputs = inputs.len(), "Backend applied inputs");
        Ok(device.status.clone())
    }

    async fn set_output(&self, name: &str, output: Value) -> Result<DeviceStatus, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(name)
            .ok_or_else(|| StorageError::not_found(ResourceKind::Device, name))?;
        set_value(&mut device.status.outputs, output);
        Ok(device.status.clone())
    }

    async fn get_module(&self, name: &str) -> Result<Option<Module>, StorageError> {
        self.check_available()?;
        Ok(self.state.lock().modules.get(name).cloned())
    }

    async fn register_module(&self, module: &Module) -> Result<bool, StorageError> {
        self.check_available()?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.modules.get(&module.name) == Some(module) {
            return Ok(false);
        }

        // Re-registration releases the previous device set first.
        state.links.retain(|_, owner| *owner != module.name);

        for (role, device_name) in module.devices().iter() {
            if state.links.contains_key(device_name) {
                continue;
            }
            let device = state
                .devices
                .entry(device_name.to_string())
                .or_insert_with(|| Device::new(device_name));
            device.status = role.default_status();
            state
                .links
                .insert(device_name.to_string(), module.name.clone());
        }

        state.modules.insert(module.name.clone(), module.clone());
        debug!(module = %module.name, "Backend registered module");
        Ok(true)
    }
}
