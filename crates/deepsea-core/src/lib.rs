pub mod conversion;
pub mod error;
pub mod events;
pub mod physics;
pub mod pressure;
pub mod quantity;
pub mod resource;
pub mod value;

pub use conversion::{ApiVersion, DeviceV1, ValueV1, VersionedDevice, convert};
pub use error::{CoreError, Result};
pub use physics::PressureModel;
pub use pressure::{MAX_PUMPS, PumpSchedule, PumpZone, compute_pump_setpoint};
pub use quantity::Quantity;
pub use resource::{
    Device, DeviceRole, DeviceSpec, DeviceStatus, Module, ModuleDevices, ModuleSpec,
    OwnerReference, Resource, ResourceKind,
};
pub use value::{Value, ValueType, known_value_type};
