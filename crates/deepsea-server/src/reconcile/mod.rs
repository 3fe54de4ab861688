//! Reconcile controllers.
//!
//! Change notifications from the registry are turned into resource keys on a
//! rate-limited [`WorkQueue`]; a [`Controller`] runs a fixed pool of workers
//! that hand each key to a [`Reconciler`]:
//! - [`DeviceReconciler`]: owner-reference linking, pump control, write-through
//! - [`ModuleReconciler`]: device linking and backend registration

mod controller;
mod device;
mod error;
mod module;
mod queue;

pub use controller::{Controller, Reconciler};
pub use device::{DeviceReconciler, DeviceState};
pub use error::ReconcileError;
pub use module::ModuleReconciler;
pub use queue::{RateLimiter, WorkQueue};
