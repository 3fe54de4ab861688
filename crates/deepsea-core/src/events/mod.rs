//! Event infrastructure.
//!
//! Two independent streams leave the registry:
//!
//! ```text
//!                  ┌──────────────────────┐
//!                  │   ResourceRegistry   │
//!                  └──────────────────────┘
//!                     │               │
//!      ChangeNotification         EventMessage
//!                     ▼               ▼
//!        ┌────────────────────┐  ┌──────────────────┐
//!        │ ChangeBroadcaster  │  │ EventBus         │
//!        │ (tokio broadcast)  │  │ (one dispatcher) │
//!        └────────────────────┘  └──────────────────┘
//!             │         │           │     │     │
//!             ▼         ▼           ▼     ▼     ▼
//!        controllers  ...          bounded subscriber queues
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: `EventMessage`, `ChangeNotification`
//! - [`broadcaster`]: change notifications for controllers
//! - [`bus`]: ordered fan-out with slow-consumer eviction

pub mod broadcaster;
pub mod bus;
pub mod types;

pub use broadcaster::ChangeBroadcaster;
pub use bus::{DEFAULT_QUEUE_CAPACITY, EventBus, EventDispatcher, SubscriberHandle, SubscriberId};
pub use types::{ChangeKind, ChangeNotification, EventMessage, EventType, value_path};
