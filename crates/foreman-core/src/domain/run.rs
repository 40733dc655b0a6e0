//! Worker run state machine and the per-attempt record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{DeliveryTag, QueueName};

/// Worker state for one run.
///
/// State transitions:
/// - Idle -> Running (job assigned, handler invoked)
/// - Running -> Settling (handler returned or failed)
/// - Settling -> Done (delivery acked or requeued)
///
/// A worker stuck in Settling means the settlement call against the
/// transport failed; the pool discards such a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No job assigned yet (also the state between sequential runs).
    Idle,

    /// Handler is executing. The only suspension point of a run.
    Running,

    /// Handler settled; the delivery is being acked or requeued.
    Settling,

    /// The delivery has been settled. Terminal per run.
    Done,
}

impl RunState {
    /// Is this run finished (delivery settled)?
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done)
    }

    /// May a new job be assigned in this state?
    pub fn accepts_job(self) -> bool {
        matches!(self, RunState::Idle | RunState::Done)
    }
}

/// The action taken against the delivery handle, exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// Permanently removed from the queue.
    Acked,

    /// Negative-acknowledged; eligible for redelivery.
    Requeued,
}

/// How one execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    FatallyFailed,
    TransientlyFailed,
}

/// Record of one execution attempt.
///
/// Created when a delivery is assigned to a worker and returned once the
/// delivery has been settled. All three outcomes are ordinary completions of
/// the run; a record is never produced for a run whose settlement failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRun {
    pub queue: QueueName,
    pub tag: DeliveryTag,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub settlement: Settlement,
}
