//! Module and Device records and the closed resource union.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::value::{self, ACTIVE_COUNT, ALARM, PRESSURE, Value};
use crate::quantity::Quantity;

/// Resource kinds known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Module,
    Device,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Module => "Module",
            ResourceKind::Device => "Device",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Module" | "module" | "modules" => Ok(ResourceKind::Module),
            "Device" | "device" | "devices" => Ok(ResourceKind::Device),
            other => Err(CoreError::invalid_resource(format!(
                "unknown resource kind '{other}'"
            ))),
        }
    }
}

/// Back-reference from a device to the resource owning it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: ResourceKind,
    pub name: String,
}

impl OwnerReference {
    pub fn module(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Module,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSpec {
    #[serde(default)]
    pub inputs: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(default)]
    pub observed_inputs: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
}

impl DeviceStatus {
    /// Same contents regardless of list order.
    pub fn same_as(&self, other: &DeviceStatus) -> bool {
        value::same_values(&self.observed_inputs, &other.observed_inputs)
            && value::same_values(&self.outputs, &other.outputs)
    }

    pub fn is_empty(&self) -> bool {
        self.observed_inputs.is_empty() && self.outputs.is_empty()
    }
}

/// An actuator/sensor record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub spec: DeviceSpec,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: DeviceSpec::default(),
            status: DeviceStatus::default(),
            owner_references: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<Value>) -> Self {
        self.spec.inputs = inputs;
        self
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        value::find_value(&self.spec.inputs, name)
    }

    pub fn observed_input(&self, name: &str) -> Option<&Value> {
        value::find_value(&self.status.observed_inputs, name)
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        value::find_value(&self.status.outputs, name)
    }

    /// Desired inputs whose observed counterpart is missing or different.
    pub fn pending_inputs(&self) -> Vec<Value> {
        self.spec
            .inputs
            .iter()
            .filter(|v| self.observed_input(&v.name) != Some(*v))
            .cloned()
            .collect()
    }

    pub fn is_converged(&self) -> bool {
        self.pending_inputs().is_empty()
    }

    /// Name of the first module owning this device.
    pub fn owner_module(&self) -> Option<&str> {
        self.owner_references
            .iter()
            .find(|r| r.kind == ResourceKind::Module)
            .map(|r| r.name.as_str())
    }

    pub fn has_owner(&self, owner: &OwnerReference) -> bool {
        self.owner_references.contains(owner)
    }

    /// Set-add an owner reference. Returns `true` if it was not present.
    pub fn add_owner_reference(&mut self, owner: OwnerReference) -> bool {
        if self.has_owner(&owner) {
            return false;
        }
        self.owner_references.push(owner);
        true
    }

    /// Returns `true` if the reference was present.
    pub fn remove_owner_reference(&mut self, owner: &OwnerReference) -> bool {
        let before = self.owner_references.len();
        self.owner_references.retain(|r| r != owner);
        before != self.owner_references.len()
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        value::validate_values(&self.spec.inputs, "spec.inputs")?;
        value::validate_values(&self.status.observed_inputs, "status.observedInputs")?;
        value::validate_values(&self.status.outputs, "status.outputs")
    }
}

/// Role a device plays within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Pump,
    WaterAlarm,
    PressureSensor,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 3] = [
        DeviceRole::Pump,
        DeviceRole::WaterAlarm,
        DeviceRole::PressureSensor,
    ];

    /// Initial status a backend assigns to a freshly linked device of this role.
    pub fn default_status(&self) -> DeviceStatus {
        match self {
            DeviceRole::Pump => DeviceStatus {
                observed_inputs: vec![Value::integer(ACTIVE_COUNT, 1)],
                outputs: Vec::new(),
            },
            DeviceRole::WaterAlarm => DeviceStatus {
                observed_inputs: Vec::new(),
                outputs: vec![Value::boolean(ALARM, false)],
            },
            DeviceRole::PressureSensor => DeviceStatus {
                observed_inputs: Vec::new(),
                outputs: vec![Value::float(PRESSURE, Quantity::from_i64(10))],
            },
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceRole::Pump => "pump",
            DeviceRole::WaterAlarm => "waterAlarm",
            DeviceRole::PressureSensor => "pressureSensor",
        };
        f.write_str(s)
    }
}

/// The three device references of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDevices {
    pub pump: String,
    pub water_alarm: String,
    pub pressure_sensor: String,
}

impl ModuleDevices {
    pub fn device(&self, role: DeviceRole) -> &str {
        match role {
            DeviceRole::Pump => &self.pump,
            DeviceRole::WaterAlarm => &self.water_alarm,
            DeviceRole::PressureSensor => &self.pressure_sensor,
        }
    }

    /// `(role, device name)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceRole, &str)> {
        DeviceRole::ALL.into_iter().map(|role| (role, self.device(role)))
    }

    pub fn role_of(&self, device: &str) -> Option<DeviceRole> {
        self.iter().find(|(_, d)| *d == device).map(|(role, _)| role)
    }

    pub fn contains(&self, device: &str) -> bool {
        self.role_of(device).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub devices: ModuleDevices,
}

/// A logical grouping of a pump, a water alarm and a pressure sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub spec: ModuleSpec,
}

impl Module {
    pub fn new(
        name: impl Into<String>,
        pump: impl Into<String>,
        water_alarm: impl Into<String>,
        pressure_sensor: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            spec: ModuleSpec {
                devices: ModuleDevices {
                    pump: pump.into(),
                    water_alarm: water_alarm.into(),
                    pressure_sensor: pressure_sensor.into(),
                },
            },
        }
    }

    pub fn devices(&self) -> &ModuleDevices {
        &self.spec.devices
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference::module(&self.name)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        for (role, device) in self.spec.devices.iter() {
            if device.is_empty() {
                return Err(CoreError::invalid_resource(format!(
                    "module '{}' is missing its {role} device",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Closed union over the resource kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    Module(Module),
    Device(Device),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Module(_) => ResourceKind::Module,
            Resource::Device(_) => ResourceKind::Device,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Module(m) => &m.name,
            Resource::Device(d) => &d.name,
        }
    }

    pub fn as_module(&self) -> Option<&Module> {
        match self {
            Resource::Module(m) => Some(m),
            Resource::Device(_) => None,
        }
    }

    pub fn as_device(&self) -> Option<&Device> {
        match self {
            Resource::Device(d) => Some(d),
            Resource::Module(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Resource::Module(m) => m.validate(),
            Resource::Device(d) => d.validate(),
        }
    }
}

impl From<Module> for Resource {
    fn from(module: Module) -> Self {
        Resource::Module(module)
    }
}

impl From<Device> for Resource {
    fn from(device: Device) -> Self {
        Resource::Device(device)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_resource("name must not be empty"));
    }
    // Names are used as path segments in value paths (`module.device.value`).
    if name.contains(['.', '/']) || name.chars().any(char::is_whitespace) {
        return Err(CoreError::invalid_resource(format!(
            "name '{name}' must not contain '.', '/' or whitespace"
        )));
    }
    Ok(())
}
