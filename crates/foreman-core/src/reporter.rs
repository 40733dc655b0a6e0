//! Error-reporting hook.

use crate::domain::{Disposition, Job, TaskError};

/// Monitoring hook, invoked once per failed attempt (fatal and transient
/// alike), never for success.
///
/// Reporting is best-effort and fire-and-forget: the signature is
/// infallible, and the worker settles the delivery regardless of what the
/// reporter does.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &TaskError, job: &Job);
}

/// Default reporter: structured log events.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &TaskError, job: &Job) {
        match error.disposition() {
            Disposition::Fatal => {
                tracing::error!(
                    queue = %job.queue(),
                    tag = %job.tag(),
                    error = %error,
                    "task failed permanently, job will not be retried"
                );
            }
            Disposition::Transient => {
                tracing::warn!(
                    queue = %job.queue(),
                    tag = %job.tag(),
                    error = %error,
                    "task failed, job will be requeued"
                );
            }
        }
    }
}
