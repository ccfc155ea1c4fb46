//! Push event bus
//!
//! Fan-out of `DeviceEvent`s. Each subscriber owns a bounded queue; callback
//! subscribers get a dedicated delivery thread draining it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use super::{DeviceEvent, PushEvent};
use crate::error::Result;
use crate::protocol::Message;

/// Handle returned by every subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type EventFilter = Box<dyn Fn(&DeviceEvent) -> bool + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    filter: Option<EventFilter>,
    tx: Sender<DeviceEvent>,
}

impl Subscriber {
    fn wants(&self, event: &DeviceEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }
}

/// Non-blocking publisher with per-subscriber ordering
pub struct PushEventBus {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl PushEventBus {
    /// Create a bus whose subscriber queues hold `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to every event through a channel
    pub fn subscribe(&self) -> (SubscriptionId, Receiver<DeviceEvent>) {
        self.register(None)
    }

    /// Subscribe through a channel to the events `filter` accepts
    pub fn subscribe_where<P>(&self, filter: P) -> (SubscriptionId, Receiver<DeviceEvent>)
    where
        P: Fn(&DeviceEvent) -> bool + Send + Sync + 'static,
    {
        self.register(Some(Box::new(filter)))
    }

    /// Subscribe a callback to every event
    pub fn subscribe_fn<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(DeviceEvent) + Send + 'static,
    {
        let (id, rx) = self.register(None);
        self.spawn_delivery(id, rx, handler)?;
        Ok(id)
    }

    /// Subscribe a callback to the events `filter` accepts
    ///
    /// Filtered-out events never occupy the subscriber's queue.
    pub fn subscribe_filtered<P, F>(&self, filter: P, handler: F) -> Result<SubscriptionId>
    where
        P: Fn(&DeviceEvent) -> bool + Send + Sync + 'static,
        F: Fn(DeviceEvent) + Send + 'static,
    {
        let (id, rx) = self.register(Some(Box::new(filter)));
        self.spawn_delivery(id, rx, handler)?;
        Ok(id)
    }

    /// Remove a subscriber; its delivery thread exits after draining
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver an event to every interested subscriber without blocking
    pub fn publish(&self, event: DeviceEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for sub in subscribers.iter().filter(|s| s.wants(&event)) {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!("Subscriber {:?} queue full, dropping {:?}", sub.id, event);
                    }
                    Err(TrySendError::Disconnected(_)) => closed.push(sub.id),
                }
            }
        }

        if !closed.is_empty() {
            self.subscribers.write().retain(|s| !closed.contains(&s.id));
            tracing::debug!("Removed {} closed subscriber(s)", closed.len());
        }
    }

    /// Publish an unsolicited frame, plus a volume event for knob pushes
    pub fn publish_push(&self, msg: &Message) {
        if let Some(volume) = msg.volume() {
            self.publish(DeviceEvent::VolumeChanged(volume));
        }
        self.publish(DeviceEvent::Push(PushEvent::from(msg)));
    }

    fn register(&self, filter: Option<EventFilter>) -> (SubscriptionId, Receiver<DeviceEvent>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = channel::bounded(self.capacity);
        self.subscribers.write().push(Subscriber { id, filter, tx });
        (id, rx)
    }

    fn spawn_delivery<F>(&self, id: SubscriptionId, rx: Receiver<DeviceEvent>, handler: F) -> Result<()>
    where
        F: Fn(DeviceEvent) + Send + 'static,
    {
        let spawned = thread::Builder::new()
            .name(format!("k17-event-{}", id.0))
            .spawn(move || {
                for event in rx.iter() {
                    handler(event);
                }
            });

        if let Err(e) = spawned {
            self.unsubscribe(id);
            return Err(e.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for PushEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
