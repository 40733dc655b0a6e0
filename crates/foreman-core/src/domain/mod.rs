//! Domain model (queue names, jobs, errors, run records).

pub mod error;
pub mod job;
pub mod run;

pub use error::{Disposition, FatalTaskError, TaskError};
pub use job::{DeliveryTag, Job, QueueName};
pub use run::{RunOutcome, RunState, Settlement, WorkerRun};
