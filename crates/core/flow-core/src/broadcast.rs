/*!
# Event Broadcaster

Fans lifecycle events out to subscribers. Each subscriber owns a bounded
queue; the emitter never blocks — when a queue is full the oldest event is
dropped and counted. Subscribers register and unregister at any time;
per-execution emission order is preserved for every subscriber.
*/

use crate::event::FlowEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

/// Default per-subscriber queue capacity
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// What a subscriber wants to see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Every event
    All,
    /// Only events for one execution
    Execution(String),
}

impl SubscriptionFilter {
    fn matches(&self, event: &FlowEvent) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Execution(id) => event.execution_id == *id,
        }
    }
}

struct SubscriberQueue {
    filter: SubscriptionFilter,
    capacity: usize,
    queue: Mutex<VecDeque<FlowEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn push(&self, event: FlowEvent) {
        let mut queue = self.queue.lock().expect("subscriber queue poisoned");
        if queue.len() == self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<FlowEvent> {
        self.queue
            .lock()
            .expect("subscriber queue poisoned")
            .pop_front()
    }
}

/// Handle a subscriber reads events from
pub struct Subscription {
    id: Uuid,
    inner: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Subscription id, used for `unsubscribe`
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, suspending until one arrives or the subscription closes
    pub async fn recv(&self) -> Option<FlowEvent> {
        loop {
            if let Some(event) = self.inner.pop() {
                return Some(event);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Next event without waiting
    pub fn try_recv(&self) -> Option<FlowEvent> {
        self.inner.pop()
    }

    /// Events lost to queue overflow
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Broadcasts executor events to registered subscribers
pub struct EventBroadcaster {
    subscribers: RwLock<HashMap<Uuid, Arc<SubscriberQueue>>>,
    capacity: usize,
}

impl EventBroadcaster {
    /// Broadcaster with the default queue capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Broadcaster with a specific per-subscriber capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = Uuid::new_v4();
        let inner = Arc::new(SubscriberQueue {
            filter,
            capacity: self.capacity,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.subscribers
            .write()
            .expect("subscriber map poisoned")
            .insert(id, inner.clone());
        Subscription { id, inner }
    }

    /// Remove a subscriber; absent ids are a no-op
    pub fn unsubscribe(&self, id: Uuid) {
        let removed = self
            .subscribers
            .write()
            .expect("subscriber map poisoned")
            .remove(&id);
        if let Some(queue) = removed {
            queue.closed.store(true, Ordering::Release);
            // notify_one leaves a permit when no receiver is parked yet,
            // so a concurrent recv cannot miss the close
            queue.notify.notify_one();
        }
    }

    /// Deliver an event to every matching subscriber without blocking.
    ///
    /// The subscriber list lock is held only long enough to snapshot it.
    pub fn emit(&self, event: FlowEvent) {
        let targets: Vec<Arc<SubscriberQueue>> = {
            let subscribers = self.subscribers.read().expect("subscriber map poisoned");
            subscribers
                .values()
                .filter(|q| q.filter.matches(&event))
                .cloned()
                .collect()
        };

        for target in targets {
            target.push(event.clone());
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("subscriber map poisoned")
            .len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
