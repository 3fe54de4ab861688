//! Device reconciliation.
//!
//! A device moves through `Unlinked -> Linked -> Converged`:
//! - link: every module whose `spec.devices` names the device gets an owner reference
//! - control: a linked pressure sensor drives the pump count of its module
//! - write-through: desired inputs that differ from the observed ones are
//!   pushed to the backend and mirrored back as observed inputs

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use deepsea_core::events::ChangeNotification;
use deepsea_core::value::{ACTIVE_COUNT, PRESSURE, find_value};
use deepsea_core::{
    Device, DeviceRole, Module, PumpSchedule, Resource, ResourceKind, Value, ValueType,
};
use deepsea_storage::{DynBackend, ResourceRegistry};

use super::controller::Reconciler;
use super::error::ReconcileError;

/// Where a device stands in its reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No module owns the device yet
    Unlinked,
    /// Owned, but desired inputs are not all observed
    Linked,
    Converged,
}

impl DeviceState {
    pub fn of(device: &Device) -> Self {
        if device.owner_module().is_none() {
            DeviceState::Unlinked
        } else if device.is_converged() {
            DeviceState::Converged
        } else {
            DeviceState::Linked
        }
    }
}

pub struct DeviceReconciler {
    registry: Arc<ResourceRegistry>,
    backend: DynBackend,
    schedule: PumpSchedule,
}

impl DeviceReconciler {
    pub fn new(registry: Arc<ResourceRegistry>, backend: DynBackend) -> Self {
        Self::with_schedule(registry, backend, PumpSchedule::default())
    }

    pub fn with_schedule(
        registry: Arc<ResourceRegistry>,
        backend: DynBackend,
        schedule: PumpSchedule,
    ) -> Self {
        Self {
            registry,
            backend,
            schedule,
        }
    }

    pub async fn reconcile_device(&self, name: &str) -> Result<DeviceState, ReconcileError> {
        let Some(device) = self.registry.get_device(name) else {
            debug!(device = %name, "Device gone, nothing to reconcile");
            return Ok(DeviceState::Unlinked);
        };

        let module = self.ensure_linked(&device)?;
        if let Some(module) = &module {
            if module.devices().pressure_sensor == device.name {
                self.control_pumps(module, &device).await?;
            }
        }

        let Some(device) = self.registry.get_device(name) else {
            return Ok(DeviceState::Unlinked);
        };
        self.write_through(&device).await?;

        let state = self
            .registry
            .get_device(name)
            .map_or(DeviceState::Unlinked, |d| DeviceState::of(&d));
        Ok(state)
    }

    /// Add the owner reference of every module that names this device.
    fn ensure_linked(&self, device: &Device) -> Result<Option<Module>, ReconcileError> {
        for owner in device
            .owner_references
            .iter()
            .filter(|r| r.kind == ResourceKind::Module)
        {
            if self.registry.get_module(&owner.name).is_none() {
                return Err(ReconcileError::transient(format!(
                    "device {} is owned by missing module {}",
                    device.name, owner.name
                )));
            }
        }

        for module in self.registry.modules_referencing(&device.name) {
            if self.registry.link_device_to_module(&device.name, &module.name)? {
                info!(device = %device.name, module = %module.name, "Device linked");
            }
        }

        Ok(self
            .registry
            .module_of(&device.name)
            .and_then(|module| self.registry.get_module(&module)))
    }

    /// Set the module's pump count from the sensor's pressure reading.
    async fn control_pumps(&self, module: &Module, sensor: &Device) -> Result<(), ReconcileError> {
        let Some(pressure) = sensor.output(PRESSURE) else {
            debug!(device = %sensor.name, "Sensor has no pressure reading yet");
            return Ok(());
        };
        if pressure.value_type != ValueType::Float {
            return Err(ReconcileError::permanent(format!(
                "pressure of {} has type {}, expected Float",
                sensor.name, pressure.value_type
            )));
        }
        let reading = pressure
            .value
            .to_f64()
            .filter(|p| p.is_finite())
            .ok_or_else(|| {
                ReconcileError::permanent(format!(
                    "pressure of {} is not a finite number: {}",
                    sensor.name, pressure.value
                ))
            })?;

        let pump_name = module.devices().device(DeviceRole::Pump);
        let Some(pump) = self.registry.get_device(pump_name) else {
            return Err(ReconcileError::transient(format!(
                "module {} references missing pump {pump_name}",
                module.name
            )));
        };

        let pumps = self.schedule.setpoint(reading);
        let desired = Value::integer(ACTIVE_COUNT, pumps);
        if pump.input(ACTIVE_COUNT).map(|v| &v.value) != Some(&desired.value) {
            self.registry.set_input(pump_name, desired)?;
            info!(
                module = %module.name,
                pressure = reading,
                pumps,
                "Pump setpoint changed"
            );
        }

        match self.registry.get_device(pump_name) {
            Some(pump) => self.write_through(&pump).await,
            None => Ok(()),
        }
    }

    /// Push pending desired inputs to the backend and record what it applied.
    async fn write_through(&self, device: &Device) -> Result<(), ReconcileError> {
        let pending = device.pending_inputs();
        if pending.is_empty() {
            return Ok(());
        }

        if self.backend.get_device(&device.name).await?.is_none() {
            self.backend.register_device(device).await?;
        }
        let status = self.backend.apply_inputs(&device.name, &pending).await?;

        let applied: Vec<Value> = pending
            .iter()
            .filter_map(|v| find_value(&status.observed_inputs, &v.name).cloned())
            .collect();
        let changed = self.registry.record_observed_inputs(&device.name, &applied)?;
        debug!(
            device = %device.name,
            applied = applied.len(),
            changed = changed.len(),
            "Inputs written through"
        );
        Ok(())
    }
}

#[async_trait]
impl Reconciler for DeviceReconciler {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError> {
        self.reconcile_device(key).await.map(|_| ())
    }

    fn keys_for(&self, change: &ChangeNotification) -> Vec<String> {
        match change.resource_kind {
            ResourceKind::Device => vec![change.name.clone()],
            ResourceKind::Module => {
                let mut keys: Vec<String> = [&change.old, &change.new]
                    .into_iter()
                    .flatten()
                    .filter_map(Resource::as_module)
                    .flat_map(|m| {
                        m.devices()
                            .iter()
                            .map(|(_, d)| d.to_string())
                            .collect::<Vec<_>>()
                    })
                    .collect();
                keys.sort();
                keys.dedup();
                keys
            }
        }
    }

    fn resync_keys(&self) -> Vec<String> {
        self.registry.names(ResourceKind::Device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::{Harness, seed_devices};
    use deepsea_core::{DeviceSpec, Quantity};
    use deepsea_core::events::EventMessage;
    use deepsea_storage::DeviceBackend;

    fn reconciler(h: &Harness) -> DeviceReconciler {
        DeviceReconciler::new(h.registry.clone(), h.backend.clone())
    }

    #[tokio::test]
    async fn test_device_links_to_referencing_module() {
        let h = Harness::new();
        seed_devices(&h);
        h.registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();

        let state = reconciler(&h).reconcile_device("alarm").await.unwrap();
        assert_eq!(state, DeviceState::Converged);
        assert_eq!(h.registry.module_of("alarm").as_deref(), Some("m1"));
        assert_eq!(h.registry.module_of("pump"), None);
    }

    #[tokio::test]
    async fn test_unreferenced_device_stays_unlinked() {
        let h = Harness::new();
        h.registry.put_device("loose", DeviceSpec::default(), None).unwrap();
        let state = reconciler(&h).reconcile_device("loose").await.unwrap();
        assert_eq!(state, DeviceState::Unlinked);

        // A deleted device reconciles to nothing.
        let state = reconciler(&h).reconcile_device("ghost").await.unwrap();
        assert_eq!(state, DeviceState::Unlinked);
    }

    #[tokio::test]
    async fn test_pressure_drives_pump_count() {
        let h = Harness::new();
        seed_devices(&h);
        h.registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();
        h.registry
            .set_output("sensor", Value::float(PRESSURE, Quantity::from_milli(11_500)))
            .unwrap();

        reconciler(&h).reconcile_device("sensor").await.unwrap();

        let pump = h.registry.get_device("pump").unwrap();
        assert_eq!(pump.input(ACTIVE_COUNT), Some(&Value::integer(ACTIVE_COUNT, 0)));
        assert_eq!(pump.observed_input(ACTIVE_COUNT), Some(&Value::integer(ACTIVE_COUNT, 0)));

        let backend_pump = h.backend.get_device("pump").await.unwrap().unwrap();
        assert_eq!(
            backend_pump.observed_input(ACTIVE_COUNT),
            Some(&Value::integer(ACTIVE_COUNT, 0))
        );
    }

    #[tokio::test]
    async fn test_low_pressure_runs_every_pump() {
        let h = Harness::new();
        seed_devices(&h);
        h.registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();
        h.registry
            .set_output("sensor", Value::float(PRESSURE, Quantity::from_milli(7_000)))
            .unwrap();

        reconciler(&h).reconcile_device("sensor").await.unwrap();
        let pump = h.registry.get_device("pump").unwrap();
        assert_eq!(pump.observed_input(ACTIVE_COUNT), Some(&Value::integer(ACTIVE_COUNT, 5)));
    }

    #[tokio::test]
    async fn test_missing_pump_is_transient() {
        let h = Harness::new();
        h.registry
            .put_device(
                "sensor",
                DeviceSpec::default(),
                Some(DeviceRole::PressureSensor.default_status()),
            )
            .unwrap();
        h.registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();

        let err = reconciler(&h).reconcile_device("sensor").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_pressure_is_permanent() {
        let h = Harness::new();
        seed_devices(&h);
        h.registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();
        let mut status = h.registry.get_device("sensor").unwrap().status;
        status.outputs = vec![Value::integer(PRESSURE, 9)];
        h.registry.replace_status("sensor", status).unwrap();

        let err = reconciler(&h).reconcile_device("sensor").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_converged_device_is_idempotent() {
        let h = Harness::new();
        seed_devices(&h);
        h.registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();
        let reconciler = reconciler(&h);
        reconciler.reconcile_device("sensor").await.unwrap();
        reconciler.reconcile_device("pump").await.unwrap();

        let writes = h.backend.writes();
        let mut subscriber = h.registry.subscribe().handle;
        let mut changes = h.registry.changes().subscribe();

        assert_eq!(
            reconciler.reconcile_device("pump").await.unwrap(),
            DeviceState::Converged
        );
        reconciler.reconcile_device("sensor").await.unwrap();

        assert_eq!(h.backend.writes(), writes);
        assert!(changes.try_recv().is_err());
        let event: Option<EventMessage> =
            tokio::time::timeout(std::time::Duration::from_millis(50), subscriber.recv())
                .await
                .ok()
                .flatten();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn test_module_change_fans_out_to_devices() {
        let h = Harness::new();
        let reconciler = reconciler(&h);
        let change = ChangeNotification::updated(
            Module::new("m1", "pump", "alarm", "sensor"),
            Module::new("m1", "pump2", "alarm", "sensor"),
        );
        assert_eq!(
            reconciler.keys_for(&change),
            vec!["alarm", "pump", "pump2", "sensor"]
        );

        let change = ChangeNotification::added(Device::new("pump"));
        assert_eq!(reconciler.keys_for(&change), vec!["pump"]);
    }
}
