//! In-process typed publish/subscribe with bounded fan-out.
//!
//! Subscribers are identified by opaque handle and looked up in a
//! registry owned by the bus; nothing holds references back into
//! sessions. Two consumption modes:
//!
//! - pull: [`Subscription::recv`] awaits the next matching event from a
//!   bounded per-subscriber queue. On overflow the oldest event is
//!   dropped and a `SubscriberOverflow` error event is delivered to that
//!   subscriber (and only that subscriber).
//! - callback: invoked inline at publish; a callback that exceeds the
//!   configured budget logs a warning but is not terminated.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::warn;

use deltaform_core::errors::CoreError;
use deltaform_core::events::{DeltaEvent, ErrorInfo, EventKind};
use deltaform_core::path::Path;

/// Opaque identifier for a callback subscriber.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriberHandle(u64);

/// What a subscriber wants to see.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Kinds to deliver; `None` means all.
    pub kinds: Option<Vec<EventKind>>,
    /// Only path-scoped events (`added`/`removed`/`changed`) under this
    /// prefix; session-level events always pass.
    pub path_prefix: Option<Path>,
    /// Pull-mode only: publishers that opt into back-pressure wait for
    /// queue room instead of dropping.
    pub backpressure: bool,
}

impl SubscriptionFilter {
    fn matches(&self, path: Option<&Path>, event: &DeltaEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if matches!(
                event.kind,
                EventKind::PathAdded | EventKind::PathRemoved | EventKind::ValueChanged
            ) {
                match path {
                    Some(p) => {
                        if !prefix.is_prefix_of(p) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }
}

struct SubscriberState {
    filter: SubscriptionFilter,
    queue: Mutex<VecDeque<DeltaEvent>>,
    notify: Notify,
    space: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

type Callback = Arc<dyn Fn(&DeltaEvent) + Send + Sync>;

struct BusInner {
    subscribers: RwLock<HashMap<u64, Arc<SubscriberState>>>,
    callbacks: RwLock<HashMap<u64, (SubscriptionFilter, Callback)>>,
    next_id: AtomicU64,
    queue_cap: usize,
    callback_budget: Duration,
    emitted: AtomicU64,
}

/// The engine-wide event bus. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(queue_cap: usize, callback_budget: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                callbacks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_cap,
                callback_budget,
                emitted: AtomicU64::new(0),
            }),
        }
    }

    /// Register a pull-mode subscriber.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriberState {
            filter,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            space: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let _ = self.inner.subscribers.write().insert(id, state.clone());
        Subscription {
            id,
            state,
            bus: self.clone(),
        }
    }

    /// Register a callback subscriber; returns its handle.
    pub fn subscribe_fn(&self, filter: SubscriptionFilter, callback: Callback) -> SubscriberHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.callbacks.write().insert(id, (filter, callback));
        SubscriberHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriberHandle) {
        let _ = self.inner.callbacks.write().remove(&handle.0);
    }

    /// Fan an event out to every matching subscriber. Never blocks: full
    /// pull queues drop their oldest event.
    pub fn publish(&self, path: Option<&Path>, event: &DeltaEvent) {
        let _ = self.inner.emitted.fetch_add(1, Ordering::Relaxed);

        for state in self.matching_subscribers(path, event) {
            self.push_dropping(&state, event.clone());
        }
        self.run_callbacks(path, event);
    }

    /// Like [`publish`](Self::publish), but waits for queue room on
    /// subscribers that opted into back-pressure.
    pub async fn publish_with_backpressure(&self, path: Option<&Path>, event: &DeltaEvent) {
        let _ = self.inner.emitted.fetch_add(1, Ordering::Relaxed);

        for state in self.matching_subscribers(path, event) {
            if state.filter.backpressure {
                self.push_waiting(&state, event.clone()).await;
            } else {
                self.push_dropping(&state, event.clone());
            }
        }
        self.run_callbacks(path, event);
    }

    fn matching_subscribers(
        &self,
        path: Option<&Path>,
        event: &DeltaEvent,
    ) -> Vec<Arc<SubscriberState>> {
        self.inner
            .subscribers
            .read()
            .values()
            .filter(|s| !s.closed.load(Ordering::Relaxed) && s.filter.matches(path, event))
            .cloned()
            .collect()
    }

    fn push_dropping(&self, state: &SubscriberState, event: DeltaEvent) {
        let mut queue = state.queue.lock();
        if queue.len() >= self.inner.queue_cap {
            // Drop oldest until there is room for the overflow notice and
            // the event itself.
            let mut dropped = 0u64;
            while queue.len() + 2 > self.inner.queue_cap && queue.pop_front().is_some() {
                dropped += 1;
            }
            let total = state.dropped.fetch_add(dropped, Ordering::Relaxed) + dropped;
            queue.push_back(overflow_event(&event, total));
        }
        queue.push_back(event);
        drop(queue);
        state.notify.notify_one();
    }

    async fn push_waiting(&self, state: &SubscriberState, event: DeltaEvent) {
        loop {
            let space = state.space.notified();
            {
                let mut queue = state.queue.lock();
                if queue.len() < self.inner.queue_cap {
                    queue.push_back(event);
                    drop(queue);
                    state.notify.notify_one();
                    return;
                }
            }
            if state.closed.load(Ordering::Relaxed) {
                return;
            }
            space.await;
        }
    }

    fn run_callbacks(&self, path: Option<&Path>, event: &DeltaEvent) {
        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .read()
            .values()
            .filter(|(filter, _)| filter.matches(path, event))
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            let started = Instant::now();
            callback(event);
            let elapsed = started.elapsed();
            if elapsed > self.inner.callback_budget {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = self.inner.callback_budget.as_millis() as u64,
                    "slow event subscriber callback"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len() + self.inner.callbacks.read().len()
    }

    pub fn emit_count(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }

    fn remove_subscriber(&self, id: u64) {
        if let Some(state) = self.inner.subscribers.write().remove(&id) {
            state.closed.store(true, Ordering::Relaxed);
            state.space.notify_waiters();
            state.notify.notify_waiters();
        }
    }
}

fn overflow_event(trigger: &DeltaEvent, total_dropped: u64) -> DeltaEvent {
    let error = CoreError::SubscriberOverflow {
        dropped: total_dropped,
    };
    DeltaEvent {
        session_id: trigger.session_id.clone(),
        seq: trigger.seq,
        timestamp_ms: trigger.timestamp_ms,
        kind: EventKind::Error,
        path: String::new(),
        value: None,
        old_value: None,
        error: Some(ErrorInfo::from(&error)),
    }
}

/// A pull-mode subscription. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: u64,
    state: Arc<SubscriberState>,
    bus: EventBus,
}

impl Subscription {
    /// Await the next matching event. Returns `None` once the
    /// subscription is closed and its queue drained.
    pub async fn recv(&mut self) -> Option<DeltaEvent> {
        loop {
            let notified = self.state.notify.notified();
            if let Some(event) = self.pop() {
                return Some(event);
            }
            if self.state.closed.load(Ordering::Relaxed) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking pop.
    pub fn try_recv(&mut self) -> Option<DeltaEvent> {
        self.pop()
    }

    fn pop(&self) -> Option<DeltaEvent> {
        let event = self.state.queue.lock().pop_front();
        if event.is_some() {
            self.state.space.notify_one();
        }
        event
    }

    /// Events this subscriber has lost to overflow.
    pub fn dropped_count(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove_subscriber(self.id);
    }
}
