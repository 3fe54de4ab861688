//! In-memory registry of Module and Device records.
//!
//! Every operation runs under one exclusive lock covering the whole registry,
//! so cross-record invariants (owner references, the device -> module index)
//! are always observed atomically. Events and change notifications for a
//! mutation are published before the guard is released, which makes the
//! publish order equal to the mutation order.

use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use deepsea_core::events::{
    ChangeBroadcaster, EventBus, EventMessage, SubscriberHandle, value_path,
};
use deepsea_core::value::{find_value, known_value_type, set_value, validate_values};
use deepsea_core::{
    Device, DeviceSpec, DeviceStatus, Module, OwnerReference, Resource, ResourceKind, Value,
};

use crate::error::StorageError;
use crate::StorageResult;

/// Which value list of a device an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueList {
    /// `spec.inputs`
    Inputs,
    /// `status.observedInputs`
    ObservedInputs,
    /// `status.outputs`
    Outputs,
}

impl ValueList {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueList::Inputs => "spec.inputs",
            ValueList::ObservedInputs => "status.observedInputs",
            ValueList::Outputs => "status.outputs",
        }
    }

    /// Observed lists are what subscribers see.
    pub fn is_observed(&self) -> bool {
        !matches!(self, ValueList::Inputs)
    }

    fn of<'a>(&self, device: &'a Device) -> &'a Vec<Value> {
        match self {
            ValueList::Inputs => &device.spec.inputs,
            ValueList::ObservedInputs => &device.status.observed_inputs,
            ValueList::Outputs => &device.status.outputs,
        }
    }

    fn of_mut<'a>(&self, device: &'a mut Device) -> &'a mut Vec<Value> {
        match self {
            ValueList::Inputs => &mut device.spec.inputs,
            ValueList::ObservedInputs => &mut device.status.observed_inputs,
            ValueList::Outputs => &mut device.status.outputs,
        }
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Updated,
    Unchanged,
}

/// A new subscriber: the full-state snapshot plus its live queue.
///
/// Every value change committed after `snapshot` was captured arrives on
/// `handle`; none committed before it does.
#[derive(Debug)]
pub struct Subscription {
    pub snapshot: Vec<EventMessage>,
    pub handle: SubscriberHandle,
}

#[derive(Debug, Default)]
struct RegistryState {
    modules: BTreeMap<String, Module>,
    devices: BTreeMap<String, Device>,
    /// device name -> owning module name
    owners: HashMap<String, String>,
}

impl RegistryState {
    /// Module whose name prefixes value paths of `device`.
    fn path_module(&self, device: &str) -> Option<&str> {
        self.owners
            .get(device)
            .map(String::as_str)
            .filter(|module| self.modules.contains_key(*module))
    }
}

/// Owner of all Module and Device records.
pub struct ResourceRegistry {
    state: Mutex<RegistryState>,
    events: EventBus,
    changes: ChangeBroadcaster,
}

impl ResourceRegistry {
    pub fn new(events: EventBus, changes: ChangeBroadcaster) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            events,
            changes,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn changes(&self) -> &ChangeBroadcaster {
        &self.changes
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    // ==================== Reads ====================

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<Resource> {
        match kind {
            ResourceKind::Module => self.get_module(name).map(Resource::Module),
            ResourceKind::Device => self.get_device(name).map(Resource::Device),
        }
    }

    pub fn get_module(&self, name: &str) -> Option<Module> {
        self.lock().modules.get(name).cloned()
    }

    pub fn get_device(&self, name: &str) -> Option<Device> {
        self.lock().devices.get(name).cloned()
    }

    pub fn list(&self, kind: ResourceKind) -> Vec<Resource> {
        match kind {
            ResourceKind::Module => self.list_modules().into_iter().map(Resource::Module).collect(),
            ResourceKind::Device => self.list_devices().into_iter().map(Resource::Device).collect(),
        }
    }

    pub fn list_modules(&self) -> Vec<Module> {
        self.lock().modules.values().cloned().collect()
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.lock().devices.values().cloned().collect()
    }

    /// Names of every record of `kind`, sorted.
    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        let state = self.lock();
        match kind {
            ResourceKind::Module => state.modules.keys().cloned().collect(),
            ResourceKind::Device => state.devices.keys().cloned().collect(),
        }
    }

    /// Module a device is linked to.
    pub fn module_of(&self, device: &str) -> Option<String> {
        self.lock().owners.get(device).cloned()
    }

    /// Modules whose `spec.devices` reference `device`.
    pub fn modules_referencing(&self, device: &str) -> Vec<Module> {
        self.lock()
            .modules
            .values()
            .filter(|m| m.devices().contains(device))
            .cloned()
            .collect()
    }

    // ==================== Writes ====================

    /// Upsert any resource.
    ///
    /// A device's status is only replaced when the record carries one; an
    /// empty status keeps whatever the device has accumulated.
    pub fn put(&self, resource: Resource) -> StorageResult<PutOutcome> {
        match resource {
            Resource::Module(module) => self.put_module(module),
            Resource::Device(device) => {
                let status = (!device.status.is_empty()).then_some(device.status);
                self.put_device(&device.name, device.spec, status)
            }
        }
    }

    /// Upsert a module.
    ///
    /// Devices the previous version referenced and this one does not are unlinked.
    /// Referenced devices are not linked here; that is the module reconciler's job.
    pub fn put_module(&self, module: Module) -> StorageResult<PutOutcome> {
        module.validate()?;

        let mut state = self.lock();
        let old = state.modules.get(&module.name).cloned();
        if old.as_ref() == Some(&module) {
            return Ok(PutOutcome::Unchanged);
        }

        if let Some(old) = &old {
            let dropped: Vec<String> = old
                .devices()
                .iter()
                .map(|(_, d)| d)
                .filter(|d| !module.devices().contains(d))
                .map(str::to_string)
                .collect();
            for device in dropped {
                self.unlink_locked(&mut state, &device, &module.name);
            }
        }

        state.modules.insert(module.name.clone(), module.clone());

        let outcome = match old {
            None => {
                self.events.publish(EventMessage::module_created(&module.name));
                self.changes.send_added(module.clone());
                PutOutcome::Created
            }
            Some(old) => {
                self.events.publish(EventMessage::module_updated(&module.name));
                self.changes.send_updated(old, module.clone());
                PutOutcome::Updated
            }
        };
        debug!(module = %module.name, outcome = ?outcome, "Module stored");
        Ok(outcome)
    }

    /// Upsert a device.
    ///
    /// On an existing device only the spec is replaced; status is replaced
    /// only when `status` is supplied. Owner references are always preserved.
    pub fn put_device(
        &self,
        name: &str,
        spec: DeviceSpec,
        status: Option<DeviceStatus>,
    ) -> StorageResult<PutOutcome> {
        let supplied = status.is_some();
        let candidate = Device::new(name)
            .with_inputs(spec.inputs)
            .with_status(status.unwrap_or_default());
        candidate.validate()?;

        let mut state = self.lock();
        let old = state.devices.get(name).cloned();
        let new = match &old {
            Some(old) => {
                let mut updated = old.clone();
                updated.spec = candidate.spec;
                if supplied {
                    updated.status = candidate.status;
                }
                updated
            }
            None => candidate,
        };

        if old.as_ref() == Some(&new) {
            return Ok(PutOutcome::Unchanged);
        }

        let old_status = old.as_ref().map(|d| d.status.clone()).unwrap_or_default();
        self.publish_status_changes(&state, name, &old_status, &new.status);
        state.devices.insert(name.to_string(), new.clone());

        let outcome = match old {
            None => {
                self.changes.send_added(new);
                PutOutcome::Created
            }
            Some(old) => {
                self.changes.send_updated(old, new);
                PutOutcome::Updated
            }
        };
        debug!(device = %name, outcome = ?outcome, "Device stored");
        Ok(outcome)
    }

    /// Delete a record. Deleting a module unlinks its devices but never deletes them.
    pub fn delete(&self, kind: ResourceKind, name: &str) -> StorageResult<Resource> {
        let mut state = self.lock();
        match kind {
            ResourceKind::Module => {
                let module = state
                    .modules
                    .remove(name)
                    .ok_or_else(|| StorageError::not_found(kind, name))?;
                let linked: Vec<String> = state
                    .owners
                    .iter()
                    .filter(|(_, owner)| owner.as_str() == name)
                    .map(|(device, _)| device.clone())
                    .collect();
                for device in module.devices().iter().map(|(_, d)| d.to_string()).chain(linked) {
                    self.unlink_locked(&mut state, &device, name);
                }
                self.events.publish(EventMessage::module_deleted(name));
                self.changes.send_deleted(module.clone());
                debug!(module = %name, "Module deleted");
                Ok(Resource::Module(module))
            }
            ResourceKind::Device => {
                let device = state
                    .devices
                    .remove(name)
                    .ok_or_else(|| StorageError::not_found(kind, name))?;
                state.owners.remove(name);
                self.changes.send_deleted(device.clone());
                debug!(device = %name, "Device deleted");
                Ok(Resource::Device(device))
            }
        }
    }

    /// Record that `module` owns `device`.
    ///
    /// Idempotent set-add of the owner reference. Returns `true` if anything changed.
    ///
    /// # Errors
    ///
    /// `NotFound` if either record is missing, `Conflict` if the module does not
    /// reference the device.
    pub fn link_device_to_module(&self, device: &str, module: &str) -> StorageResult<bool> {
        let mut state = self.lock();
        let owner = state
            .modules
            .get(module)
            .ok_or_else(|| StorageError::not_found(ResourceKind::Module, module))?
            .clone();
        if !owner.devices().contains(device) {
            return Err(StorageError::conflict(format!(
                "module {module} does not reference device {device}"
            )));
        }

        let record = state
            .devices
            .get_mut(device)
            .ok_or_else(|| StorageError::not_found(ResourceKind::Device, device))?;
        let old = record.clone();
        let ref_added = record.add_owner_reference(owner.owner_reference());
        let current = record.clone();

        let previous = state.owners.insert(device.to_string(), module.to_string());
        let index_changed = previous.as_deref() != Some(module);

        if index_changed {
            // The device now has value paths under this module.
            for value in current
                .status
                .observed_inputs
                .iter()
                .chain(current.status.outputs.iter())
            {
                let path = value_path(module, device, &value.name);
                self.events.publish(EventMessage::value(path, &value.value));
            }
        }
        if ref_added {
            self.changes.send_updated(old, current);
            debug!(device = %device, module = %module, "Device linked to module");
        }
        Ok(ref_added || index_changed)
    }

    /// Merge named values into one of a device's lists.
    ///
    /// An existing entry keeps its type and takes the new value. A missing
    /// entry is appended only for known value names. The merge is all or
    /// nothing. Returns the entries that changed.
    pub fn patch_values(
        &self,
        device: &str,
        list: ValueList,
        values: &[Value],
    ) -> StorageResult<Vec<Value>> {
        self.merge_values(device, list, values, true)
    }

    /// Mirror inputs the backend has applied into `status.observedInputs`.
    ///
    /// Unlike [`patch_values`](Self::patch_values), names outside the known
    /// set are accepted with the type they arrive with, since they were
    /// already accepted as desired inputs.
    pub fn record_observed_inputs(
        &self,
        device: &str,
        values: &[Value],
    ) -> StorageResult<Vec<Value>> {
        self.merge_values(device, ValueList::ObservedInputs, values, false)
    }

    /// Type and validate `value` the way [`patch_values`](Self::patch_values)
    /// would, without writing it.
    pub fn resolve_value(
        &self,
        device: &str,
        list: ValueList,
        value: &Value,
    ) -> StorageResult<Value> {
        let state = self.lock();
        let record = state
            .devices
            .get(device)
            .ok_or_else(|| StorageError::not_found(ResourceKind::Device, device))?;
        typed_entry(list.of(record), device, value, true)
    }

    fn merge_values(
        &self,
        device: &str,
        list: ValueList,
        values: &[Value],
        strict: bool,
    ) -> StorageResult<Vec<Value>> {
        let mut state = self.lock();
        let record = state
            .devices
            .get(device)
            .ok_or_else(|| StorageError::not_found(ResourceKind::Device, device))?;

        let mut merged = list.of(record).clone();
        let mut changed = Vec::new();
        for value in values {
            let entry = typed_entry(&merged, device, value, strict)?;
            if set_value(&mut merged, entry.clone()) {
                changed.push(entry);
            }
        }
        if changed.is_empty() {
            return Ok(changed);
        }
        validate_values(&merged, list.as_str())?;

        if list.is_observed() {
            if let Some(module) = state.path_module(device) {
                for value in &changed {
                    let path = value_path(module, device, &value.name);
                    self.events.publish(EventMessage::value(path, &value.value));
                }
            }
        }

        let Some(record) = state.devices.get_mut(device) else {
            return Err(StorageError::internal(format!("device {device} vanished under lock")));
        };
        let old = record.clone();
        *list.of_mut(record) = merged;
        let new = record.clone();
        self.changes.send_updated(old, new);
        debug!(
            device = %device,
            list = list.as_str(),
            changed = changed.len(),
            "Device values patched"
        );
        Ok(changed)
    }

    /// Set one desired input. Returns `true` if it changed.
    pub fn set_input(&self, device: &str, value: Value) -> StorageResult<bool> {
        Ok(!self.patch_values(device, ValueList::Inputs, &[value])?.is_empty())
    }

    pub fn set_observed_input(&self, device: &str, value: Value) -> StorageResult<bool> {
        Ok(!self
            .patch_values(device, ValueList::ObservedInputs, &[value])?
            .is_empty())
    }

    /// Set one sensor output. Returns `true` if it changed.
    pub fn set_output(&self, device: &str, value: Value) -> StorageResult<bool> {
        Ok(!self.patch_values(device, ValueList::Outputs, &[value])?.is_empty())
    }

    /// Overwrite a device's status when it differs semantically from `status`.
    ///
    /// Returns `true` if the status was replaced.
    pub fn replace_status(&self, device: &str, status: DeviceStatus) -> StorageResult<bool> {
        validate_values(&status.observed_inputs, ValueList::ObservedInputs.as_str())?;
        validate_values(&status.outputs, ValueList::Outputs.as_str())?;

        let mut state = self.lock();
        let record = state
            .devices
            .get(device)
            .ok_or_else(|| StorageError::not_found(ResourceKind::Device, device))?;
        if record.status.same_as(&status) {
            return Ok(false);
        }
        let old = record.clone();
        self.publish_status_changes(&state, device, &old.status, &status);

        let Some(record) = state.devices.get_mut(device) else {
            return Err(StorageError::internal(format!("device {device} vanished under lock")));
        };
        record.status = status;
        let new = record.clone();
        self.changes.send_updated(old, new);
        debug!(device = %device, "Device status replaced");
        Ok(true)
    }

    // ==================== Subscribers ====================

    /// Register a subscriber together with a snapshot of every observed value.
    ///
    /// Snapshot capture and registration happen under the registry lock.
    pub fn subscribe(&self) -> Subscription {
        let state = self.lock();
        let snapshot = Self::snapshot_locked(&state);
        let handle = self.events.register();
        drop(state);
        debug!(subscriber = %handle.id(), snapshot = snapshot.len(), "Subscriber attached");
        Subscription { snapshot, handle }
    }

    /// One value message per observed input and output of every linked device.
    pub fn snapshot(&self) -> Vec<EventMessage> {
        Self::snapshot_locked(&self.lock())
    }

    fn snapshot_locked(state: &RegistryState) -> Vec<EventMessage> {
        let mut messages = Vec::new();
        for (name, device) in &state.devices {
            let Some(module) = state.path_module(name) else {
                continue;
            };
            for value in device
                .status
                .observed_inputs
                .iter()
                .chain(device.status.outputs.iter())
            {
                messages.push(EventMessage::value(
                    value_path(module, name, &value.name),
                    &value.value,
                ));
            }
        }
        messages
    }

    // ==================== Integrity ====================

    /// Verify the owner index against the records.
    ///
    /// # Errors
    ///
    /// `Internal` when the index and the owner references disagree.
    pub fn check_integrity(&self) -> StorageResult<()> {
        let state = self.lock();
        for (device, module) in &state.owners {
            let record = state.devices.get(device).ok_or_else(|| {
                StorageError::internal(format!("owner index names missing device {device}"))
            })?;
            if !record.has_owner(&OwnerReference::module(module)) {
                return Err(StorageError::internal(format!(
                    "device {device} is indexed under module {module} without an owner reference"
                )));
            }
        }
        Ok(())
    }

    // ==================== Helpers ====================

    fn unlink_locked(&self, state: &mut RegistryState, device: &str, module: &str) {
        if state.owners.get(device).map(String::as_str) == Some(module) {
            state.owners.remove(device);
        }
        let Some(record) = state.devices.get_mut(device) else {
            return;
        };
        let old = record.clone();
        if record.remove_owner_reference(&OwnerReference::module(module)) {
            let new = record.clone();
            self.changes.send_updated(old, new);
            debug!(device = %device, module = %module, "Device unlinked from module");
        }
    }

    fn publish_status_changes(
        &self,
        state: &RegistryState,
        device: &str,
        old: &DeviceStatus,
        new: &DeviceStatus,
    ) {
        let Some(module) = state.path_module(device) else {
            return;
        };
        let changed = new
            .observed_inputs
            .iter()
            .filter(|v| find_value(&old.observed_inputs, &v.name) != Some(*v))
            .chain(
                new.outputs
                    .iter()
                    .filter(|v| find_value(&old.outputs, &v.name) != Some(*v)),
            );
        for value in changed {
            let path = value_path(module, device, &value.name);
            self.events.publish(EventMessage::value(path, &value.value));
        }
    }
}

/// Give `value` the type of the entry it replaces, or of its well-known name.
///
/// Non-strict callers may introduce names outside the known set.
fn typed_entry(
    current: &[Value],
    device: &str,
    value: &Value,
    strict: bool,
) -> StorageResult<Value> {
    let value_type = match find_value(current, &value.name) {
        Some(existing) => existing.value_type,
        None => match known_value_type(&value.name) {
            Some(value_type) => value_type,
            None if !strict => value.value_type,
            None => return Err(StorageError::unknown_value(device, &value.name)),
        },
    };
    let entry = Value::new(&value.name, value_type, value.value.clone());
    entry.validate()?;
    Ok(entry)
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ResourceRegistry")
            .field("modules", &state.modules.len())
            .field("devices", &state.devices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsea_core::events::{ChangeKind, EventType};
    use deepsea_core::value::{ACTIVE_COUNT, ALARM, PRESSURE};
    use deepsea_core::{DeviceRole, Quantity};
    use std::time::Duration;
    use tokio::sync::watch;

    struct Harness {
        registry: ResourceRegistry,
        _shutdown: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let (bus, dispatcher) = EventBus::new(1024);
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(dispatcher.run(shutdown_rx));
        Harness {
            registry: ResourceRegistry::new(bus, ChangeBroadcaster::new()),
            _shutdown: shutdown,
        }
    }

    fn seed(registry: &ResourceRegistry) {
        registry
            .put_device("pump", DeviceSpec::default(), Some(DeviceRole::Pump.default_status()))
            .unwrap();
        registry
            .put_device(
                "alarm",
                DeviceSpec::default(),
                Some(DeviceRole::WaterAlarm.default_status()),
            )
            .unwrap();
        registry
            .put_device(
                "sensor",
                DeviceSpec::default(),
                Some(DeviceRole::PressureSensor.default_status()),
            )
            .unwrap();
        registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();
        for device in ["pump", "alarm", "sensor"] {
            registry.link_device_to_module(device, "m1").unwrap();
        }
    }

    async fn drain(handle: &mut SubscriberHandle) -> Vec<EventMessage> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(50), handle.recv()).await
        {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_put_device_preserves_status() {
        let h = harness();
        let registry = &h.registry;
        seed(registry);

        let outcome = registry
            .put_device(
                "pump",
                DeviceSpec {
                    inputs: vec![Value::integer(ACTIVE_COUNT, 3)],
                },
                None,
            )
            .unwrap();
        assert_eq!(outcome, PutOutcome::Updated);

        let pump = registry.get_device("pump").unwrap();
        assert_eq!(pump.status, DeviceRole::Pump.default_status());
        assert_eq!(pump.owner_module(), Some("m1"));
        assert_eq!(pump.input(ACTIVE_COUNT), Some(&Value::integer(ACTIVE_COUNT, 3)));

        let again = registry
            .put_device(
                "pump",
                DeviceSpec {
                    inputs: vec![Value::integer(ACTIVE_COUNT, 3)],
                },
                None,
            )
            .unwrap();
        assert_eq!(again, PutOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_link_is_idempotent() {
        let h = harness();
        let registry = &h.registry;
        seed(registry);

        assert!(!registry.link_device_to_module("pump", "m1").unwrap());
        let pump = registry.get_device("pump").unwrap();
        assert_eq!(pump.owner_references, vec![OwnerReference::module("m1")]);
        assert_eq!(registry.module_of("pump").as_deref(), Some("m1"));
        registry.check_integrity().unwrap();
    }

    #[tokio::test]
    async fn test_link_requires_records() {
        let h = harness();
        let registry = &h.registry;
        registry
            .put_module(Module::new("m1", "pump", "alarm", "sensor"))
            .unwrap();

        let err = registry.link_device_to_module("pump", "m1").unwrap_err();
        assert!(err.is_not_found());
        let err = registry.link_device_to_module("pump", "m2").unwrap_err();
        assert!(err.is_not_found());

        registry.put_device("other", DeviceSpec::default(), None).unwrap();
        let err = registry.link_device_to_module("other", "m1").unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_patch_values_known_names_only() {
        let h = harness();
        let registry = &h.registry;
        registry.put_device("pump", DeviceSpec::default(), None).unwrap();

        assert!(registry.set_input("pump", Value::integer(ACTIVE_COUNT, 2)).unwrap());
        assert!(!registry.set_input("pump", Value::integer(ACTIVE_COUNT, 2)).unwrap());

        let err = registry
            .set_input("pump", Value::integer("temperature", 2))
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownValue { .. }));

        // Existing entries keep their type.
        let err = registry
            .set_input("pump", Value::float(ACTIVE_COUNT, Quantity::from_milli(2500)))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidResource { .. }));

        let err = registry.set_output("ghost", Value::boolean(ALARM, true)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_value_types_without_writing() {
        let h = harness();
        let registry = &h.registry;
        registry.put_device("sensor", DeviceSpec::default(), None).unwrap();

        let typed = registry
            .resolve_value("sensor", ValueList::Outputs, &Value::integer(PRESSURE, 9))
            .unwrap();
        assert_eq!(typed.value_type, deepsea_core::ValueType::Float);
        assert!(registry.get_device("sensor").unwrap().output(PRESSURE).is_none());

        let err = registry
            .resolve_value("sensor", ValueList::Outputs, &Value::integer("temperature", 4))
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownValue { .. }));
        let err = registry
            .resolve_value("ghost", ValueList::Outputs, &Value::integer(PRESSURE, 9))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_record_observed_inputs_accepts_any_name() {
        let h = harness();
        let registry = &h.registry;
        registry.put_device("valve", DeviceSpec::default(), None).unwrap();

        let changed = registry
            .record_observed_inputs("valve", &[Value::boolean("open", true)])
            .unwrap();
        assert_eq!(changed.len(), 1);
        let valve = registry.get_device("valve").unwrap();
        assert_eq!(valve.observed_input("open"), Some(&Value::boolean("open", true)));
        assert!(registry
            .record_observed_inputs("valve", &[Value::boolean("open", true)])
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_value_events_follow_mutation_order() {
        let h = harness();
        let registry = &h.registry;
        seed(registry);
        let Subscription { snapshot, mut handle } = registry.subscribe();
        assert_eq!(snapshot.len(), 3);

        registry
            .set_output("sensor", Value::float(PRESSURE, Quantity::from_milli(10_500)))
            .unwrap();
        registry
            .set_observed_input("pump", Value::integer(ACTIVE_COUNT, 4))
            .unwrap();
        // Desired inputs are not observed values.
        registry.set_input("pump", Value::integer(ACTIVE_COUNT, 5)).unwrap();

        let events = drain(&mut handle).await;
        let paths: Vec<_> = events.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["m1.sensor.pressure", "m1.pump.activeCount"]);
        assert_eq!(events[0].value.as_deref(), Some("10.5"));
    }

    #[tokio::test]
    async fn test_module_lifecycle_events() {
        let h = harness();
        let registry = &h.registry;
        let mut handle = registry.subscribe().handle;

        let module = Module::new("m1", "pump", "alarm", "sensor");
        assert_eq!(registry.put_module(module.clone()).unwrap(), PutOutcome::Created);
        assert_eq!(registry.put_module(module).unwrap(), PutOutcome::Unchanged);
        registry
            .put_module(Module::new("m1", "pump2", "alarm", "sensor"))
            .unwrap();
        registry.delete(ResourceKind::Module, "m1").unwrap();

        let types: Vec<_> = drain(&mut handle).await.into_iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::ModuleCreated, EventType::ModuleUpdated, EventType::ModuleDeleted]
        );
    }

    #[tokio::test]
    async fn test_module_delete_keeps_devices() {
        let h = harness();
        let registry = &h.registry;
        seed(registry);

        registry.delete(ResourceKind::Module, "m1").unwrap();
        let pump = registry.get_device("pump").unwrap();
        assert!(pump.owner_references.is_empty());
        assert_eq!(registry.module_of("pump"), None);
        assert_eq!(registry.list_devices().len(), 3);
        assert!(registry.snapshot().is_empty());

        let err = registry.delete(ResourceKind::Module, "m1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_module_update_unlinks_dropped_devices() {
        let h = harness();
        let registry = &h.registry;
        seed(registry);

        registry
            .put_module(Module::new("m1", "pump2", "alarm", "sensor"))
            .unwrap();
        assert!(registry.get_device("pump").unwrap().owner_references.is_empty());
        assert_eq!(registry.module_of("alarm").as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_replace_status_semantic_compare() {
        let h = harness();
        let registry = &h.registry;
        seed(registry);

        let mut status = registry.get_device("sensor").unwrap().status;
        assert!(!registry.replace_status("sensor", status.clone()).unwrap());

        status.outputs = vec![Value::float(PRESSURE, Quantity::from_milli(9_000))];
        assert!(registry.replace_status("sensor", status).unwrap());
        assert_eq!(
            registry.get_device("sensor").unwrap().output(PRESSURE).unwrap().value,
            Quantity::from_i64(9)
        );
    }

    #[tokio::test]
    async fn test_change_notifications_only_on_change() {
        let h = harness();
        let registry = &h.registry;
        let mut changes = registry.changes().subscribe();

        registry.put_device("pump", DeviceSpec::default(), None).unwrap();
        registry.put_device("pump", DeviceSpec::default(), None).unwrap();
        registry.delete(ResourceKind::Device, "pump").unwrap();

        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Add);
        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Delete);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_then_live_exactly_once() {
        let h = std::sync::Arc::new(harness());
        seed(&h.registry);

        let writer = {
            let h = h.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let pressure = Quantity::from_milli(10_000 + i);
                    h.registry
                        .set_output("sensor", Value::float(PRESSURE, pressure))
                        .unwrap();
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let mut subscriptions = Vec::new();
        for _ in 0..5 {
            subscriptions.push(h.registry.subscribe());
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let sensor = h.registry.get_device("sensor").unwrap();
        let final_pressure = sensor.output(PRESSURE).unwrap().value.to_string();
        for Subscription { snapshot, mut handle } in subscriptions {
            let live = drain(&mut handle).await;
            let mut seen: Vec<String> = snapshot
                .iter()
                .chain(live.iter())
                .filter(|e| e.path == "m1.sensor.pressure")
                .filter_map(|e| e.value.clone())
                .collect();
            let unique: std::collections::HashSet<_> = seen.iter().cloned().collect();
            assert_eq!(unique.len(), seen.len(), "a value was delivered twice");
            assert_eq!(seen.pop(), Some(final_pressure.clone()));
            // Every path the registry holds is present in the union.
            let paths: std::collections::HashSet<_> =
                snapshot.iter().chain(live.iter()).map(|e| e.path.clone()).collect();
            let expected: std::collections::HashSet<_> =
                h.registry.snapshot().into_iter().map(|e| e.path).collect();
            assert_eq!(paths, expected);
        }
    }
}
