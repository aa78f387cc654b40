//! Progress event model and the in-process progress bus
//!
//! The bus multiplexes `ProgressEvent`s from stage runners to any number of
//! WebSocket subscribers. Publishing never blocks and never back-pressures a
//! runner: each subscription owns a bounded queue, and when a slow subscriber
//! overflows its queue the oldest *non-terminal* event is dropped. Terminal
//! events (progress 100) are never dropped, so every subscriber observes the
//! outcome of every stage it is watching.
//!
//! Delivery guarantees:
//! - events for the same (file_id, stage) arrive in publish order,
//! - a terminal event is always delivered to live subscribers,
//! - no subscriber can delay another subscriber.

use crate::model::{FileId, StageKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

/// Broadcast message describing a stage's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub file_id: FileId,
    pub stage: StageKind,
    /// 0-100; 100 marks the terminal event for this stage run
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// X-Request-ID of the request that started this stage run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ProgressEvent {
    pub fn new(
        file_id: FileId,
        stage: StageKind,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        ProgressEvent {
            file_id,
            stage,
            progress: progress.min(100),
            message: message.into(),
            error: None,
            request_id: None,
        }
    }

    pub fn failed(
        file_id: FileId,
        stage: StageKind,
        message: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        ProgressEvent {
            file_id,
            stage,
            progress: 100,
            message: message.into(),
            error: Some(error.into()),
            request_id: None,
        }
    }

    /// Tag the event with the request that initiated the stage run
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Terminal events carry progress 100 and end a stage run
    pub fn is_terminal(&self) -> bool {
        self.progress >= 100
    }
}

/// State shared between one subscription and the bus
struct SubscriptionShared {
    queue: Mutex<VecDeque<ProgressEvent>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SubscriptionShared {
    fn new() -> Self {
        SubscriptionShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue one event, applying the overflow policy
    fn push(&self, event: ProgressEvent, capacity: usize) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let mut queue = self.queue.lock().expect("subscription queue poisoned");
        if queue.len() >= capacity {
            // Drop the oldest non-terminal event. Terminal events are kept
            // even if the queue momentarily exceeds its capacity.
            if let Some(pos) = queue.iter().position(|e| !e.is_terminal()) {
                let dropped = queue.remove(pos);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(dropped) = dropped {
                    warn!(
                        file_id = %dropped.file_id,
                        stage = %dropped.stage,
                        progress = dropped.progress,
                        "Progress subscriber overflow, dropping event"
                    );
                }
            } else if !event.is_terminal() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    file_id = %event.file_id,
                    stage = %event.stage,
                    progress = event.progress,
                    "Progress subscriber overflow, dropping incoming event"
                );
                return;
            }
        }
        queue.push_back(event);
        drop(queue);

        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct SubscriberSlot {
    id: u64,
    filter: Option<FileId>,
    shared: Arc<SubscriptionShared>,
}

struct BusInner {
    subscribers: Vec<SubscriberSlot>,
    next_id: u64,
    closed: bool,
}

/// In-process publish/subscribe channel for [`ProgressEvent`]s
///
/// Cloning is cheap; all clones share the subscriber table.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<Mutex<BusInner>>,
    capacity: usize,
}

impl ProgressBus {
    /// Create a bus whose subscriptions buffer at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        ProgressBus {
            inner: Arc::new(Mutex::new(BusInner {
                subscribers: Vec::new(),
                next_id: 0,
                closed: false,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Publish one event to every matching subscription
    ///
    /// Never blocks and never fails; with no subscribers this is a no-op.
    pub fn publish(&self, event: ProgressEvent) {
        let inner = self.inner.lock().expect("progress bus poisoned");
        if inner.closed {
            return;
        }
        for slot in &inner.subscribers {
            if slot.filter.map_or(true, |f| f == event.file_id) {
                slot.shared.push(event.clone(), self.capacity);
            }
        }
    }

    /// Subscribe to events, optionally filtered to one file
    pub fn subscribe(&self, filter: Option<FileId>) -> Subscription {
        let shared = Arc::new(SubscriptionShared::new());
        let mut inner = self.inner.lock().expect("progress bus poisoned");
        if inner.closed {
            shared.close();
            return Subscription {
                id: u64::MAX,
                shared,
                bus: Arc::clone(&self.inner),
            };
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(SubscriberSlot {
            id,
            filter,
            shared: Arc::clone(&shared),
        });
        Subscription {
            id,
            shared,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Number of live subscriptions (diagnostics)
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("progress bus poisoned")
            .subscribers
            .len()
    }

    /// Close the bus: all subscriptions terminate, later publishes are no-ops
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("progress bus poisoned");
        inner.closed = true;
        for slot in inner.subscribers.drain(..) {
            slot.shared.close();
        }
    }
}

/// One subscriber's view of the bus
///
/// Dropping the subscription detaches it from the bus.
pub struct Subscription {
    id: u64,
    shared: Arc<SubscriptionShared>,
    bus: Arc<Mutex<BusInner>>,
}

impl Subscription {
    /// Receive the next event; `None` once the subscription or bus is closed
    /// and the queue has drained
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let mut queue = self.shared.queue.lock().expect("subscription queue poisoned");
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking receive; `None` when the queue is currently empty
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.shared
            .queue
            .lock()
            .expect("subscription queue poisoned")
            .pop_front()
    }

    /// Events dropped on this subscription due to overflow
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Detach from the bus and release resources
    pub fn close(&self) {
        self.shared.close();
        let mut inner = self.bus.lock().expect("progress bus poisoned");
        inner.subscribers.retain(|slot| slot.id != self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
