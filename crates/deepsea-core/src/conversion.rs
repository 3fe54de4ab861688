//! Conversion between device API versions.
//!
//! `v1alpha1` carries a type tag and a single decimal (`{name, type, value}`);
//! `v1` has one optional field per type (`{name, float?, integer?, boolean?}`).
//! All conversions are pure.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::quantity::Quantity;
use crate::resource::{Device, DeviceSpec, DeviceStatus, OwnerReference};
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V1alpha1,
    V1,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1alpha1 => "v1alpha1",
            ApiVersion::V1 => "v1",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1alpha1" => Ok(ApiVersion::V1alpha1),
            "v1" => Ok(ApiVersion::V1),
            other => Err(CoreError::conversion(format!(
                "unsupported api version '{other}'"
            ))),
        }
    }
}

/// A `v1` value: exactly one of the typed fields is set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueV1 {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integer: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
}

impl TryFrom<&Value> for ValueV1 {
    type Error = CoreError;

    fn try_from(value: &Value) -> Result<Self> {
        let mut out = ValueV1 {
            name: value.name.clone(),
            ..Default::default()
        };
        match value.value_type {
            ValueType::Float => out.float = Some(value.value.clone()),
            ValueType::Integer => {
                let n = value
                    .value
                    .to_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| {
                        CoreError::conversion(format!(
                            "value '{}' = {} does not fit a 32-bit integer",
                            value.name, value.value
                        ))
                    })?;
                out.integer = Some(n);
            }
            ValueType::Boolean => out.boolean = Some(!value.value.is_zero()),
        }
        Ok(out)
    }
}

impl TryFrom<&ValueV1> for Value {
    type Error = CoreError;

    fn try_from(value: &ValueV1) -> Result<Self> {
        match (&value.float, value.integer, value.boolean) {
            (Some(f), None, None) => Ok(Value::float(&value.name, f.clone())),
            (None, Some(i), None) => Ok(Value::integer(&value.name, i64::from(i))),
            (None, None, Some(b)) => Ok(Value::boolean(&value.name, b)),
            _ => Err(CoreError::conversion(format!(
                "value '{}' must set exactly one of float, integer, boolean",
                value.name
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSpecV1 {
    #[serde(default)]
    pub inputs: Vec<ValueV1>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusV1 {
    #[serde(default)]
    pub observed_inputs: Vec<ValueV1>,
    #[serde(default)]
    pub outputs: Vec<ValueV1>,
}

/// A device in the `v1` representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceV1 {
    pub name: String,
    #[serde(default)]
    pub spec: DeviceSpecV1,
    #[serde(default)]
    pub status: DeviceStatusV1,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

fn values_to_v1(values: &[Value]) -> Result<Vec<ValueV1>> {
    values.iter().map(ValueV1::try_from).collect()
}

fn values_from_v1(values: &[ValueV1]) -> Result<Vec<Value>> {
    values.iter().map(Value::try_from).collect()
}

impl TryFrom<&Device> for DeviceV1 {
    type Error = CoreError;

    fn try_from(device: &Device) -> Result<Self> {
        Ok(DeviceV1 {
            name: device.name.clone(),
            spec: DeviceSpecV1 {
                inputs: values_to_v1(&device.spec.inputs)?,
            },
            status: DeviceStatusV1 {
                observed_inputs: values_to_v1(&device.status.observed_inputs)?,
                outputs: values_to_v1(&device.status.outputs)?,
            },
            owner_references: device.owner_references.clone(),
        })
    }
}

impl TryFrom<&DeviceV1> for Device {
    type Error = CoreError;

    fn try_from(device: &DeviceV1) -> Result<Self> {
        Ok(Device {
            name: device.name.clone(),
            spec: DeviceSpec {
                inputs: values_from_v1(&device.spec.inputs)?,
            },
            status: DeviceStatus {
                observed_inputs: values_from_v1(&device.status.observed_inputs)?,
                outputs: values_from_v1(&device.status.outputs)?,
            },
            owner_references: device.owner_references.clone(),
        })
    }
}

/// A device tagged with the API version it is expressed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionedDevice {
    V1alpha1(Device),
    V1(DeviceV1),
}

impl VersionedDevice {
    pub fn version(&self) -> ApiVersion {
        match self {
            VersionedDevice::V1alpha1(_) => ApiVersion::V1alpha1,
            VersionedDevice::V1(_) => ApiVersion::V1,
        }
    }
}

/// Convert a device to `target`. Converting to the version already held is an error.
pub fn convert(device: VersionedDevice, target: ApiVersion) -> Result<VersionedDevice> {
    match (device, target) {
        (VersionedDevice::V1alpha1(d), ApiVersion::V1) => {
            Ok(VersionedDevice::V1(DeviceV1::try_from(&d)?))
        }
        (VersionedDevice::V1(d), ApiVersion::V1alpha1) => {
            Ok(VersionedDevice::V1alpha1(Device::try_from(&d)?))
        }
        (device, target) => Err(CoreError::conversion(format!(
            "device is already at version {target}, cannot convert from {}",
            device.version()
        ))),
    }
}
