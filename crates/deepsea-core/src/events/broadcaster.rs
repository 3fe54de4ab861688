//! Change-notification stream.
//!
//! The `ChangeBroadcaster` carries create/update/delete notifications from the
//! registry to the controllers. It uses tokio's broadcast channel; a receiver
//! that falls behind observes `RecvError::Lagged` and must resync on its own.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::ChangeNotification;
use crate::resource::Resource;

/// Default buffer size for the broadcast channel.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for registry change notifications.
///
/// Cheap to clone; every clone sends into the same channel.
///
/// # Example
///
/// ```
/// use deepsea_core::events::ChangeBroadcaster;
/// use deepsea_core::resource::Device;
///
/// let broadcaster = ChangeBroadcaster::new();
/// let mut receiver = broadcaster.subscribe();
///
/// broadcaster.send_added(Device::new("pump"));
/// let notification = receiver.try_recv().unwrap();
/// assert_eq!(notification.name, "pump");
/// ```
#[derive(Clone)]
pub struct ChangeBroadcaster {
    sender: broadcast::Sender<ChangeNotification>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send a notification to all subscribers.
    ///
    /// Returns the number of subscribers that received it, 0 if there are none.
    pub fn send(&self, notification: ChangeNotification) -> usize {
        self.sender.send(notification).unwrap_or_default()
    }

    pub fn send_added(&self, new: impl Into<Resource>) -> usize {
        self.send(ChangeNotification::added(new))
    }

    pub fn send_updated(&self, old: impl Into<Resource>, new: impl Into<Resource>) -> usize {
        self.send(ChangeNotification::updated(old, new))
    }

    pub fn send_deleted(&self, old: impl Into<Resource>) -> usize {
        self.send(ChangeNotification::deleted(old))
    }

    /// Subscribe to notifications sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
