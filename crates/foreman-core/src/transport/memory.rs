//! In-memory transport for development and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use super::{Subscription, Transport, TransportError};
use crate::domain::{DeliveryTag, Job, QueueName};

/// Per-queue snapshot for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCounts {
    /// Payloads waiting for a subscriber.
    pub ready: usize,

    /// Deliveries handed out but not yet settled.
    pub in_flight: usize,

    /// Deliveries permanently removed.
    pub acked: usize,

    /// Negative acknowledgments (each redelivery attempt counts once).
    pub requeued: usize,
}

/// Per-queue buffer plus settlement tallies.
#[derive(Default)]
struct QueueState {
    ready: VecDeque<serde_json::Value>,
    acked: usize,
    requeued: usize,
}

/// Shared transport state.
///
/// Design:
/// - One lock guards everything; `recv` does not hold it across awaits.
/// - `in_flight` is the single source of truth for unsettled deliveries:
///   settling removes the entry, so a second settle of the same tag fails
///   with `UnknownDelivery`.
struct TransportState {
    queues: HashMap<QueueName, QueueState>,
    in_flight: HashMap<DeliveryTag, (QueueName, serde_json::Value)>,
    notifies: HashMap<QueueName, Arc<Notify>>,
    closed: bool,
}

impl TransportState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            in_flight: HashMap::new(),
            notifies: HashMap::new(),
            closed: false,
        }
    }

    fn notify_for(&mut self, queue: &QueueName) -> Arc<Notify> {
        Arc::clone(self.notifies.entry(queue.clone()).or_default())
    }
}

/// In-memory queue client.
///
/// Redelivers requeued jobs without bound; a redelivered job carries a fresh
/// tag. Intended for development and tests, not durability.
pub struct InMemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::new())),
        }
    }

    /// Close the transport: further publishes and subscriptions fail, and
    /// subscriptions return `None` once their queue is drained.
    pub async fn close(&self) {
        let notifies: Vec<Arc<Notify>> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.notifies.values().cloned().collect()
        };
        for notify in notifies {
            notify.notify_waiters();
        }
    }

    /// Snapshot of one queue's counters.
    pub async fn counts(&self, queue: &QueueName) -> TransportCounts {
        let state = self.state.lock().await;
        let in_flight = state
            .in_flight
            .values()
            .filter(|(origin, _)| origin == queue)
            .count();
        match state.queues.get(queue) {
            Some(q) => TransportCounts {
                ready: q.ready.len(),
                in_flight,
                acked: q.acked,
                requeued: q.requeued,
            },
            None => TransportCounts {
                in_flight,
                ..TransportCounts::default()
            },
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn subscribe(
        &self,
        queue: &QueueName,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TransportError::Closed);
        }
        let notify = state.notify_for(queue);
        Ok(Box::new(InMemorySubscription {
            queue: queue.clone(),
            state: Arc::clone(&self.state),
            notify,
        }))
    }

    async fn publish(
        &self,
        queue: &QueueName,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        let notify = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.queues.entry(queue.clone()).or_default().ready.push_back(payload);
            state.notify_for(queue)
        };
        // Wake outside the lock.
        notify.notify_waiters();
        Ok(())
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let (queue, _payload) = state
            .in_flight
            .remove(&tag)
            .ok_or(TransportError::UnknownDelivery(tag))?;
        state.queues.entry(queue).or_default().acked += 1;
        Ok(())
    }

    async fn requeue(&self, tag: DeliveryTag) -> Result<(), TransportError> {
        let notify = {
            let mut state = self.state.lock().await;
            let (queue, payload) = state
                .in_flight
                .remove(&tag)
                .ok_or(TransportError::UnknownDelivery(tag))?;
            let q = state.queues.entry(queue.clone()).or_default();
            q.ready.push_back(payload);
            q.requeued += 1;
            state.notify_for(&queue)
        };
        notify.notify_waiters();
        Ok(())
    }
}

/// Competing consumer over the shared state.
struct InMemorySubscription {
    queue: QueueName,
    state: Arc<Mutex<TransportState>>,
    notify: Arc<Notify>,
}

impl InMemorySubscription {
    /// Pop one ready payload and move it in flight, issuing a fresh tag.
    /// Returns `Ok(None)` when nothing is ready; `Err(Closed)` when the
    /// transport is closed and the queue is drained.
    async fn try_take(&self) -> Result<Option<Job>, TransportError> {
        let mut state = self.state.lock().await;
        let closed = state.closed;
        let Some(q) = state.queues.get_mut(&self.queue) else {
            return if closed { Err(TransportError::Closed) } else { Ok(None) };
        };
        if let Some(payload) = q.ready.pop_front() {
            let tag = DeliveryTag::new();
            state
                .in_flight
                .insert(tag, (self.queue.clone(), payload.clone()));
            return Ok(Some(Job::new(self.queue.clone(), tag, payload)));
        }
        if closed { Err(TransportError::Closed) } else { Ok(None) }
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn recv(&mut self) -> Option<Job> {
        loop {
            // Register for a wakeup before re-checking the queue, so a
            // publish between the check and the await is never missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take().await {
                Ok(Some(job)) => return Some(job),
                Ok(None) => notified.await,
                Err(_closed) => return None,
            }
        }
    }
}
