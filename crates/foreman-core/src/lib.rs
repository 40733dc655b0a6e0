//! foreman-core
//!
//! A message-queue task-worker runtime: a server subscribes to named queues,
//! dispatches each delivery to a registered task handler, and settles every
//! delivery exactly once based on how the handler finished.
//!
//! # Module layout
//! - **domain**: queue names, jobs, the error taxonomy, run records
//! - **transport**: the publish/subscribe port plus an in-memory
//!   implementation for development and tests
//! - **registry**: task handlers and the queue-to-handler map
//! - **reporter**: the error-reporting hook
//! - **worker**: one job in flight, execution always settles
//! - **server**: subscriptions, the bounded worker pool, graceful shutdown
//!
//! # Failure model
//! A handler failure is routine: fatal failures are reported and acked
//! (never retried), transient failures are reported and requeued. Only a
//! transport fault during settlement surfaces as an error from a worker
//! run.

pub mod domain;
pub mod registry;
pub mod reporter;
pub mod server;
pub mod transport;
pub mod worker;
