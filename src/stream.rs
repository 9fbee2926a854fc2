//! Change Stream Broker (spec §4.J): scoped pub/sub over post-commit
//! events, with monotonic tokens, bounded ring-buffer replay for resumable
//! subscriptions, and per-subscriber backpressure that never blocks the
//! publisher. Modeled on the teacher's `StateCommitStreamBus` — a
//! `Mutex`-guarded subscriber map plus one bounded queue per subscriber —
//! generalized from the teacher's field-indexed filter to the DN-scope
//! filter spec §4.J names.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use futures_util::future::poll_fn;
use futures_util::task::AtomicWaker;

use crate::dn::{is_descendant_or_equal, is_immediate_child, Dn};
use crate::error::{token_too_old, Result};
use crate::storage::Scope;

/// Default bound on a subscriber's pending-event queue (spec §4.J).
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;
/// Default size of the replay ring (spec §4.J: "e.g. 1024").
pub const DEFAULT_REPLAY_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    ModifyDn,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub token: u64,
    /// GeneralizedTime (`YYYYMMDDhhmmssZ`), stamped by the broker at publish.
    pub timestamp: String,
    pub operation: ChangeOp,
    pub dn: Dn,
    pub entry_json: Option<String>,
}

/// `watch`/`watchWithResume` filter (spec §6, §4.J): a DN scope, plus an
/// optional operation restriction.
#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    pub base_dn: Dn,
    pub scope: Scope,
    pub operations: Vec<ChangeOp>,
}

impl SubscriptionFilter {
    pub fn everything() -> Self {
        Self {
            base_dn: Dn::root(),
            scope: Scope::Subtree,
            operations: Vec::new(),
        }
    }

    fn matches(&self, event: &ChangeEvent) -> bool {
        let dn_matches = match self.scope {
            Scope::Base => event.dn == self.base_dn,
            Scope::One => is_immediate_child(&event.dn, &self.base_dn),
            Scope::Subtree => is_descendant_or_equal(&event.dn, &self.base_dn),
        };
        if !dn_matches {
            return false;
        }
        self.operations.is_empty() || self.operations.contains(&event.operation)
    }
}

struct SubscriberQueue {
    events: Mutex<VecDeque<ChangeEvent>>,
    dropped: AtomicU64,
    capacity: usize,
    waker: AtomicWaker,
}

impl SubscriberQueue {
    fn push(&self, event: ChangeEvent) {
        let mut events = self.events.lock().unwrap();
        if events.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(dropped = self.dropped.load(Ordering::Relaxed), "change stream: subscriber queue full, dropping event");
            return;
        }
        events.push_back(event);
        drop(events);
        self.waker.wake();
    }

    fn try_pop(&self) -> Option<ChangeEvent> {
        self.events.lock().unwrap().pop_front()
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    queue: Arc<SubscriberQueue>,
}

/// A live subscription handle. Dropping it is equivalent to `unsubscribe`.
pub struct Subscription {
    id: u64,
    queue: Arc<SubscriberQueue>,
    broker: Arc<BrokerInner>,
    closed: AtomicBool,
}

impl Subscription {
    /// Non-blocking poll; `None` means no event is currently queued (the
    /// caller may retry later — the broker never wakes a parked receiver
    /// itself, matching spec §5's "subscriber receive blocks on an empty
    /// channel" at the caller's discretion).
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.queue.try_pop()
    }

    /// Awaits the next event, parking on the subscriber's waker when the
    /// queue is empty (spec §5: "subscriber receive blocks on an empty
    /// channel"). Resolves to `None` once the subscription is closed and
    /// drained.
    pub async fn next(&self) -> Option<ChangeEvent> {
        poll_fn(|cx| {
            if let Some(event) = self.queue.try_pop() {
                return Poll::Ready(Some(event));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Poll::Ready(None);
            }
            self.queue.waker.register(cx.waker());
            if let Some(event) = self.queue.try_pop() {
                return Poll::Ready(Some(event));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Poll::Ready(None);
            }
            Poll::Pending
        })
        .await
    }

    /// Number of events dropped for this subscriber because its queue was
    /// full at publish time (spec §4.J, §7: "not signaled to publishers").
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.broker.unsubscribe(self.id);
        self.queue.waker.wake();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

struct RingBuffer {
    events: VecDeque<ChangeEvent>,
    capacity: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, event: ChangeEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn min_token(&self) -> Option<u64> {
        self.events.front().map(|e| e.token)
    }

    fn after(&self, since_token: u64) -> Vec<ChangeEvent> {
        self.events
            .iter()
            .filter(|e| e.token > since_token)
            .cloned()
            .collect()
    }
}

struct BrokerInner {
    next_token: AtomicU64,
    state: Mutex<BrokerState>,
}

struct BrokerState {
    ring: RingBuffer,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
}

impl BrokerInner {
    fn unsubscribe(&self, id: u64) {
        self.state.lock().unwrap().subscribers.remove(&id);
    }
}

/// The single process-wide broker. `Engine` owns one `Arc<Broker>`.
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(replay_buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                next_token: AtomicU64::new(1),
                state: Mutex::new(BrokerState {
                    ring: RingBuffer::new(replay_buffer_size),
                    subscribers: HashMap::new(),
                    next_id: 1,
                }),
            }),
        }
    }

    /// Assigns the next token, stamps the timestamp, appends to the ring
    /// (overwriting the oldest entry if full), then attempts non-blocking
    /// delivery to every matching subscriber. Never blocks (spec §4.J,
    /// §5: "Broker publish is non-blocking").
    pub fn publish(&self, operation: ChangeOp, dn: Dn, entry_json: Option<String>) -> u64 {
        let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst);
        let event = ChangeEvent {
            token,
            timestamp: crate::timeutil::generalized_time_now(),
            operation,
            dn,
            entry_json,
        };

        let mut state = self.inner.state.lock().unwrap();
        state.ring.push(event.clone());
        for subscriber in state.subscribers.values() {
            if subscriber.filter.matches(&event) {
                subscriber.queue.push(event.clone());
            }
        }
        token
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.subscribe_inner(filter, DEFAULT_SUBSCRIBER_BUFFER)
    }

    fn subscribe_inner(&self, filter: SubscriptionFilter, buffer: usize) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            events: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            capacity: buffer,
            waker: AtomicWaker::new(),
        });
        let mut state = self.inner.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(
            id,
            Subscriber {
                filter,
                queue: Arc::clone(&queue),
            },
        );
        Subscription {
            id,
            queue,
            broker: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }
    }

    /// Replays every ring event with `token > since_token` matching
    /// `filter` before returning the live subscription. Fails
    /// `TokenTooOld` if the ring has already overwritten the requested
    /// starting point (spec §4.J, §8 scenario S6).
    pub fn subscribe_with_resume(
        &self,
        filter: SubscriptionFilter,
        since_token: u64,
    ) -> Result<Subscription> {
        let replay = {
            let state = self.inner.state.lock().unwrap();
            if let Some(ring_min) = state.ring.min_token() {
                if since_token < ring_min.saturating_sub(1) {
                    return Err(token_too_old(format!(
                        "requested token {since_token} precedes ring minimum {ring_min}"
                    )));
                }
            }
            state.ring.after(since_token)
        };
        let subscription = self.subscribe_inner(filter.clone(), DEFAULT_SUBSCRIBER_BUFFER);
        for event in replay {
            if filter.matches(&event) {
                subscription.queue.push(event);
            }
        }
        Ok(subscription)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_BUFFER_SIZE)
    }
}
