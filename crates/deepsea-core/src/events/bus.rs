//! Subscriber fan-out for outbound event messages.
//!
//! All commands (register, unregister, publish) travel over one unbounded
//! channel to a single `EventDispatcher` task, so every live subscriber sees
//! events in exactly the order `publish` was called. Each subscriber owns a
//! bounded queue; a full queue gets the subscriber evicted instead of slowing
//! down publishers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use indexmap::IndexMap;
use tokio::sync::{mpsc, watch};

use super::types::EventMessage;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Identifier of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum BusCommand {
    Register {
        id: SubscriberId,
        queue: mpsc::Sender<EventMessage>,
    },
    Unregister(SubscriberId),
    Publish(EventMessage),
}

/// Handle for publishing events and registering subscribers.
#[derive(Clone)]
pub struct EventBus {
    commands: mpsc::UnboundedSender<BusCommand>,
    next_id: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
    queue_capacity: usize,
}

impl EventBus {
    /// Create a bus and the dispatcher that must be spawned to drive it.
    pub fn new(queue_capacity: usize) -> (Self, EventDispatcher) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let live = Arc::new(AtomicUsize::new(0));
        let bus = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            live: live.clone(),
            queue_capacity: queue_capacity.max(1),
        };
        let dispatcher = EventDispatcher {
            commands: receiver,
            subscribers: IndexMap::new(),
            live,
        };
        (bus, dispatcher)
    }

    /// Register a new subscriber.
    ///
    /// The subscriber receives every event published after this call. Dropping
    /// the returned handle unregisters it.
    pub fn register(&self) -> SubscriberHandle {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (queue, receiver) = mpsc::channel(self.queue_capacity);
        if self.commands.send(BusCommand::Register { id, queue }).is_err() {
            tracing::debug!(subscriber = %id, "event dispatcher stopped, subscriber starts closed");
        }
        SubscriberHandle {
            id,
            receiver,
            commands: self.commands.clone(),
        }
    }

    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.commands.send(BusCommand::Unregister(id));
    }

    /// Queue an event for delivery. Never blocks.
    ///
    /// Returns `false` if the dispatcher has stopped.
    pub fn publish(&self, event: EventMessage) -> bool {
        self.commands.send(BusCommand::Publish(event)).is_ok()
    }

    /// Number of subscribers the dispatcher currently delivers to.
    pub fn subscriber_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

/// A registered subscriber's end of its queue.
///
/// `recv` returns `None` once the subscriber has been evicted or the bus shut down.
pub struct SubscriberHandle {
    id: SubscriberId,
    receiver: mpsc::Receiver<EventMessage>,
    commands: mpsc::UnboundedSender<BusCommand>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<EventMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<EventMessage, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(BusCommand::Unregister(self.id));
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle").field("id", &self.id).finish()
    }
}

/// Serializes delivery to every subscriber.
pub struct EventDispatcher {
    commands: mpsc::UnboundedReceiver<BusCommand>,
    subscribers: IndexMap<SubscriberId, mpsc::Sender<EventMessage>>,
    live: Arc<AtomicUsize>,
}

impl EventDispatcher {
    /// Run until shutdown is signalled or every `EventBus` handle is dropped.
    ///
    /// All subscriber queues are closed on exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Event dispatcher started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let remaining = self.subscribers.len();
        self.subscribers.clear();
        self.live.store(0, Ordering::Relaxed);
        tracing::info!(subscribers = remaining, "Event dispatcher stopped");
    }

    fn handle(&mut self, command: BusCommand) {
        match command {
            BusCommand::Register { id, queue } => {
                self.subscribers.insert(id, queue);
                tracing::debug!(
                    subscriber = %id,
                    total = self.subscribers.len(),
                    "Subscriber registered"
                );
            }
            BusCommand::Unregister(id) => {
                if self.subscribers.shift_remove(&id).is_some() {
                    tracing::debug!(
                        subscriber = %id,
                        total = self.subscribers.len(),
                        "Subscriber unregistered"
                    );
                }
            }
            BusCommand::Publish(event) => self.deliver(event),
        }
        self.live.store(self.subscribers.len(), Ordering::Relaxed);
    }

    fn deliver(&mut self, event: EventMessage) {
        self.subscribers.retain(|id, queue| match queue.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscriber = %id, "Subscriber queue full, evicting slow consumer");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = %id, "Subscriber queue closed");
                false
            }
        });
    }
}
