//! Transport port: the publish/subscribe client the runtime consumes.
//!
//! The core depends on four operations and their contract:
//! - `subscribe` opens a competing consumer on a queue,
//! - `publish` enqueues a payload,
//! - `ack` permanently removes a delivery,
//! - `requeue` makes a delivery eligible for redelivery.
//!
//! Retry bounds and backoff for requeued jobs belong to the transport, not
//! to this crate. Settlement operations can themselves fail; that failure is
//! a transport fault, a different thing from a task failure.

mod memory;

pub use memory::{InMemoryTransport, TransportCounts};

use async_trait::async_trait;

use crate::domain::{DeliveryTag, Job, QueueName};

/// Transport-level fault. The only error a worker run can surface.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The tag was already settled, or never issued by this transport.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(DeliveryTag),

    /// The transport has been closed; no publishes or subscriptions accepted.
    #[error("transport is closed")]
    Closed,
}

/// A competing consumer on one queue.
///
/// Each received job is delivered to exactly one subscription. The delivery
/// stays in flight until its tag is settled through the transport.
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next delivery, waiting until one is available.
    /// Returns `None` once the transport is closed and drained.
    async fn recv(&mut self) -> Option<Job>;
}

/// Queue client port (interface).
///
/// This trait is the seam for swapping the in-memory implementation for a
/// real broker client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a consumer on `queue`. Multiple subscriptions compete for
    /// deliveries.
    async fn subscribe(
        &self,
        queue: &QueueName,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Enqueue a payload on `queue`.
    async fn publish(
        &self,
        queue: &QueueName,
        payload: serde_json::Value,
    ) -> Result<(), TransportError>;

    /// Permanently remove the delivery identified by `tag`.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError>;

    /// Make the delivery identified by `tag` eligible for redelivery.
    async fn requeue(&self, tag: DeliveryTag) -> Result<(), TransportError>;
}
