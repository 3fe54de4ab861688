//! The simulated physical backend contract.

use async_trait::async_trait;
use deepsea_core::{Device, DeviceStatus, Module, Value};

use crate::error::StorageError;

/// The physical side the control plane reconciles against.
///
/// The backend owns the observed truth of every device: which inputs the
/// actuators actually run with and what the sensors read. Implementations must
/// be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use deepsea_storage::{DeviceBackend, StorageError};
///
/// async fn pressure(
///     backend: &dyn DeviceBackend,
///     sensor: &str,
/// ) -> Result<Option<Value>, StorageError> {
///     let device = backend.get_device(sensor).await?;
///     Ok(device.and_then(|d| d.output("pressure").cloned()))
/// }
/// ```
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Reads a device. Returns `None` if the backend has never seen it.
    async fn get_device(&self, name: &str) -> Result<Option<Device>, StorageError>;

    /// Lists every device the backend knows.
    async fn list_devices(&self) -> Result<Vec<Device>, StorageError>;

    /// Registers a device. First write wins: an already known device is left
    /// untouched and `false` is returned.
    async fn register_device(&self, device: &Device) -> Result<bool, StorageError>;

    /// Applies desired inputs to the actuators.
    ///
    /// Returns the device status after the inputs took effect.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the device is not registered.
    async fn apply_inputs(
        &self,
        name: &str,
        inputs: &[Value],
    ) -> Result<DeviceStatus, StorageError>;

    /// Records a sensor output.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the device is not registered.
    async fn set_output(&self, name: &str, output: Value) -> Result<DeviceStatus, StorageError>;

    /// Reads a module registration.
    async fn get_module(&self, name: &str) -> Result<Option<Module>, StorageError>;

    /// Registers or re-registers a module and links its devices.
    ///
    /// Devices that were not yet linked get the default status of their role.
    /// Returns `false` if the same module was already registered.
    async fn register_module(&self, module: &Module) -> Result<bool, StorageError>;
}
