//! Task handlers and the queue-name registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Job, QueueName, TaskError};

/// A handler for the jobs of one queue.
///
/// The handler owns payload validation: a missing required field is exactly
/// the kind of failure it raises as `FatalTaskError`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), TaskError>;
}

/// Adapter so a plain async function can be registered as a handler.
///
/// # Example
/// ```ignore
/// let handler = task_fn(|job: Job| async move {
///     let name = job.payload()["name"].as_str().ok_or_else(|| {
///         TaskError::fatal("name field is required")
///     })?;
///     println!("Hello, {name}!");
///     Ok(())
/// });
/// ```
pub fn task_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    FnHandler { f }
}

pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn handle(&self, job: &Job) -> Result<(), TaskError> {
        (self.f)(job.clone()).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate handler for queue {0}")]
    AlreadyRegistered(QueueName),
}

/// Registry of handlers (queue name -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Handed to the server wholesale via `set_all_tasks` and read-only from
///   then on. No locks needed at runtime.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<QueueName, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a queue.
    pub fn register(
        &mut self,
        queue: QueueName,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&queue) {
            return Err(RegistryError::AlreadyRegistered(queue));
        }
        self.handlers.insert(queue, handler);
        Ok(())
    }

    pub fn get(&self, queue: &QueueName) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(queue)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueueName, &Arc<dyn TaskHandler>)> {
        self.handlers.iter()
    }

    pub fn queues(&self) -> Vec<QueueName> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
