pub mod config;
pub mod handlers;
pub mod observability;
pub mod reconcile;
pub mod runtime;
pub mod server;
pub mod simulation;
pub mod sync;
pub mod websocket;

pub use config::{AppConfig, ControllerConfig, EventsConfig, ServerConfig, SimulationConfig};
pub use handlers::AppState;
pub use observability::{apply_logging_level, init_tracing};
pub use reconcile::{Controller, DeviceReconciler, ModuleReconciler, ReconcileError, WorkQueue};
pub use runtime::Runtime;
pub use server::{DeepseaServer, ServerBuilder, build_app};
pub use simulation::PhysicalSimulator;
pub use sync::{DeviceSynchronizer, ModuleSynchronizer};
