//! Ordered buffer sitting between the watch stream and the reconciliation loop.
//!
//! Many producers can publish, exactly one consumer drains. By default the
//! queue has no depth bound: a slow consumer makes memory grow instead of
//! stalling the watch stream. A bound can be configured together with the
//! policy applied when the queue is full.

use std::{
    collections::VecDeque,
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{Notify, Semaphore};
use tracing::warn;

use crate::errors::QueueError;

/// What happens when a bounded queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room for the new one
    #[default]
    DropOldest,
    /// Suspend the producer until the consumer frees a slot
    Block,
    /// Refuse the new event
    FailFast,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            "block" => Ok(OverflowPolicy::Block),
            "fail-fast" => Ok(OverflowPolicy::FailFast),
            _ => Err(format!("unknown overflow policy: {s}")),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
            OverflowPolicy::Block => write!(f, "block"),
            OverflowPolicy::FailFast => write!(f, "fail-fast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueConfig {
    /// Maximum number of queued events, `None` means unbounded
    pub capacity: Option<usize>,
    /// Ignored when the queue is unbounded
    pub overflow: OverflowPolicy,
}

struct State<T> {
    items: VecDeque<T>,
    completed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    item_ready: Notify,
    /// Free slots, only used by bounded queues with the `Block` policy
    slots: Option<Semaphore>,
    config: QueueConfig,
    dropped: AtomicU64,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.completed {
            return Err(QueueError::Closed);
        }

        if let Some(capacity) = self.config.capacity {
            if state.items.len() >= capacity {
                match self.config.overflow {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(capacity, dropped, "event queue full, dropping oldest event");
                    }
                    OverflowPolicy::FailFast => return Err(QueueError::Full(capacity)),
                    // the semaphore already reserved a slot
                    OverflowPolicy::Block => {}
                }
            }
        }

        state.items.push_back(item);
        drop(state);
        self.item_ready.notify_one();
        Ok(())
    }
}

/// Create a new queue, returning its two ends
pub fn event_queue<T>(config: QueueConfig) -> (EventPublisher<T>, EventConsumer<T>) {
    let slots = match (config.capacity, config.overflow) {
        (Some(capacity), OverflowPolicy::Block) => Some(Semaphore::new(capacity)),
        _ => None,
    };
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::new(),
            completed: false,
        }),
        item_ready: Notify::new(),
        slots,
        config,
        dropped: AtomicU64::new(0),
    });

    (
        EventPublisher {
            shared: shared.clone(),
        },
        EventConsumer { shared },
    )
}

/// Producer side of the queue, can be cloned freely
pub struct EventPublisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventPublisher<T> {
    fn clone(&self) -> Self {
        EventPublisher {
            shared: self.shared.clone(),
        }
    }
}

impl<T> EventPublisher<T> {
    /// Enqueue an event. This only suspends when the queue is bounded and
    /// configured with the `Block` overflow policy.
    pub async fn publish(&self, item: T) -> Result<(), QueueError> {
        if let Some(slots) = &self.shared.slots {
            let permit = slots.acquire().await.map_err(|_| QueueError::Closed)?;
            permit.forget();
        }
        self.shared.push(item)
    }

    /// Like [`publish`](Self::publish), but a full `Block` queue is reported
    /// as an error instead of suspending
    pub fn try_publish(&self, item: T) -> Result<(), QueueError> {
        if let Some(slots) = &self.shared.slots {
            let permit = slots.try_acquire().map_err(|e| match e {
                tokio::sync::TryAcquireError::Closed => QueueError::Closed,
                tokio::sync::TryAcquireError::NoPermits => {
                    QueueError::Full(self.shared.config.capacity.unwrap_or_default())
                }
            })?;
            permit.forget();
        }
        self.shared.push(item)
    }

    /// Mark the queue as complete. Further publications fail, the consumer
    /// drains what is left and then gets `None`.
    pub fn complete(&self) {
        self.shared.lock().completed = true;
        if let Some(slots) = &self.shared.slots {
            slots.close();
        }
        self.shared.item_ready.notify_one();
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().completed
    }

    /// Number of events evicted by the `DropOldest` policy
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer side of the queue. There's only one of them.
pub struct EventConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> EventConsumer<T> {
    /// Wait for the next event. Returns `None` once the queue has been
    /// completed and all the events published before have been consumed.
    pub async fn consume(&mut self) -> Option<T> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    if let Some(slots) = &self.shared.slots {
                        slots.add_permits(1);
                    }
                    return Some(item);
                }
                if state.completed {
                    return None;
                }
            }
            // a notification sent between the check above and this point is
            // stored as a permit, it cannot be lost
            self.shared.item_ready.notified().await;
        }
    }
}
