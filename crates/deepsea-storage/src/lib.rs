//! # deepsea-storage
//!
//! Desired-state storage and the simulated physical backend.
//!
//! ## Overview
//!
//! - [`ResourceRegistry`] owns every Module and Device record behind a single
//!   exclusive lock and publishes value events and change notifications in
//!   mutation order.
//! - [`DeviceBackend`] is the contract of the physical side the controllers
//!   reconcile against; [`InMemoryBackend`] simulates it in process memory.
//!
//! ## Example
//!
//! ```ignore
//! use deepsea_core::events::{ChangeBroadcaster, EventBus};
//! use deepsea_storage::ResourceRegistry;
//!
//! let (bus, dispatcher) = EventBus::new(256);
//! tokio::spawn(dispatcher.run(shutdown_rx));
//! let registry = ResourceRegistry::new(bus, ChangeBroadcaster::new());
//!
//! registry.put_module(Module::new("m1", "pump", "alarm", "sensor"))?;
//! ```

mod backend;
mod error;
mod registry;
mod traits;

pub use backend::InMemoryBackend;
pub use error::{ErrorCategory, StorageError};
pub use registry::{PutOutcome, ResourceRegistry, Subscription, ValueList};
pub use traits::DeviceBackend;

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared backend trait object.
pub type DynBackend = std::sync::Arc<dyn DeviceBackend>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        DeviceBackend, DynBackend, InMemoryBackend, PutOutcome, ResourceRegistry, StorageError,
        StorageResult, Subscription, ValueList,
    };
}
