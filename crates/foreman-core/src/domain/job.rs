//! Job and delivery metadata.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque acknowledgment handle for one delivery attempt.
///
/// Issued by the transport when a job is handed to a subscriber; valid until
/// the delivery is settled (acked or requeued). A redelivered job carries a
/// fresh tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryTag(Ulid);

impl DeliveryTag {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for DeliveryTag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery-{}", self.0)
    }
}

/// One unit of work delivered from a queue.
///
/// Design:
/// - Immutable once constructed; fields are private and exposed by accessor.
/// - Owned by the worker processing it until the delivery is settled.
/// - The payload is an opaque JSON value; the registered handler decides its
///   shape and raises `FatalTaskError` when a required field is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    queue: QueueName,
    tag: DeliveryTag,
    payload: serde_json::Value,
}

impl Job {
    pub fn new(queue: QueueName, tag: DeliveryTag, payload: serde_json::Value) -> Self {
        Self {
            queue,
            tag,
            payload,
        }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn tag(&self) -> DeliveryTag {
        self.tag
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
