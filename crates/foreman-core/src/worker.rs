//! Worker: one job in flight, execution always settles.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{Disposition, Job, RunOutcome, RunState, Settlement, WorkerRun};
use crate::registry::TaskHandler;
use crate::reporter::ErrorReporter;
use crate::transport::{Transport, TransportError};

/// Executes one job at a time against a handler and settles the delivery.
///
/// Design:
/// - Task failure is routine and fully handled inside settling: fatal
///   failures are reported and acked, transient failures are reported and
///   requeued, and `run` resolves `Ok` in all three outcomes.
/// - Only a settlement fault against the transport makes `run` fail. That
///   error propagates to the pool, which treats the connection as broken.
/// - `run` takes `&mut self`, so one worker can never execute two jobs
///   concurrently; sequential reuse is allowed once a run reaches Done.
pub struct Worker {
    handler: Arc<dyn TaskHandler>,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn ErrorReporter>,
    state: RunState,
}

impl Worker {
    pub fn new(
        handler: Arc<dyn TaskHandler>,
        transport: Arc<dyn Transport>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            handler,
            transport,
            reporter,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute `job` to settlement.
    ///
    /// Resolves once the delivery has been acked or requeued:
    /// - handler success: ack.
    /// - fatal failure: report, then ack. Retrying a permanently malformed
    ///   job can never succeed, so it is treated as processed to stop
    ///   infinite redelivery. Reporting happens first so the failure is
    ///   visible even if the process dies between the two calls.
    /// - transient failure: report, then requeue for redelivery.
    ///
    /// Exactly one settlement call and at most one reporter call happen per
    /// run. A worker left in `Settling` state had a transport fault and
    /// must be discarded.
    pub async fn run(&mut self, job: Job) -> Result<WorkerRun, TransportError> {
        debug_assert!(self.state.accepts_job());
        let started_at = Utc::now();

        self.state = RunState::Running;
        let result = self.handler.handle(&job).await;

        self.state = RunState::Settling;
        let (outcome, settlement) = match result {
            Ok(()) => {
                self.transport.ack(job.tag()).await?;
                (RunOutcome::Succeeded, Settlement::Acked)
            }
            Err(error) => {
                self.reporter.report(&error, &job);
                match error.disposition() {
                    Disposition::Fatal => {
                        self.transport.ack(job.tag()).await?;
                        (RunOutcome::FatallyFailed, Settlement::Acked)
                    }
                    Disposition::Transient => {
                        self.transport.requeue(job.tag()).await?;
                        (RunOutcome::TransientlyFailed, Settlement::Requeued)
                    }
                }
            }
        };

        self.state = RunState::Done;
        tracing::debug!(
            queue = %job.queue(),
            tag = %job.tag(),
            outcome = ?outcome,
            settlement = ?settlement,
            "run settled"
        );
        Ok(WorkerRun {
            queue: job.queue().clone(),
            tag: job.tag(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            settlement,
        })
    }
}
