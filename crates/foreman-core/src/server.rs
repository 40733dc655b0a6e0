//! Server: queue subscriptions, a bounded worker pool per queue, graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::QueueName;
use crate::registry::{TaskHandler, TaskRegistry};
use crate::reporter::{ErrorReporter, LogReporter};
use crate::transport::{Subscription, Transport, TransportError};
use crate::worker::Worker;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Consumer slots opened per queue. Values below 1 are treated as 1.
    pub concurrency: usize,

    /// How long `stop` waits for in-flight runs before abandoning them.
    pub shutdown_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no task handlers registered; call set_all_tasks before start")]
    NoTasksRegistered,

    #[error("server already started")]
    AlreadyStarted,

    #[error("server not started")]
    NotStarted,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Running consumer slots.
/// - `shutdown_tx` flips to `true` to stop taking new deliveries.
/// - `joins` lets `stop` wait for slots to drain.
struct ConsumerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

/// Task-worker server.
///
/// Owns the queue-to-handler registration, opens a bounded number of
/// consumer slots per queue, and runs each delivery through a fresh
/// `Worker`. Within one slot, settlement of a job happens before the next
/// delivery is accepted; slots across queues run independently.
pub struct Server {
    transport: Arc<dyn Transport>,
    registry: Arc<TaskRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    options: ServerOptions,
    group: Option<ConsumerGroup>,
}

impl Server {
    pub fn new(transport: Arc<dyn Transport>, options: ServerOptions) -> Self {
        Self {
            transport,
            registry: Arc::new(TaskRegistry::new()),
            reporter: Arc::new(LogReporter),
            options,
            group: None,
        }
    }

    /// Replace the error-reporting hook (defaults to `LogReporter`).
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Install the whole queue-to-handler registration. Fluent; must happen
    /// before `start`, and the mapping is read-only afterwards.
    pub fn set_all_tasks(mut self, registry: TaskRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Open subscriptions and spawn consumer slots.
    ///
    /// Fails fast when nothing is registered or when already running.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if self.group.is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        if self.registry.is_empty() {
            return Err(ServerError::NoTasksRegistered);
        }

        let concurrency = self.options.concurrency.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(self.registry.len() * concurrency);

        for (queue, handler) in self.registry.iter() {
            for slot in 0..concurrency {
                let subscription = self.transport.subscribe(queue).await?;
                let join = tokio::spawn(consumer_loop(
                    queue.clone(),
                    slot,
                    subscription,
                    Arc::clone(handler),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.reporter),
                    shutdown_rx.clone(),
                ));
                joins.push(join);
            }
        }

        tracing::info!(
            queues = self.registry.len(),
            concurrency,
            "server started"
        );
        self.group = Some(ConsumerGroup { shutdown_tx, joins });
        Ok(())
    }

    /// Stop accepting deliveries and wait for in-flight runs.
    ///
    /// Runs still executing when `shutdown_timeout` elapses are abandoned,
    /// never aborted: killing a run mid-settlement would leave its delivery
    /// handle in an ambiguous state, and the transport's
    /// redelivery-on-disconnect behavior covers the abandoned deliveries.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        let Some(group) = self.group.take() else {
            return Err(ServerError::NotStarted);
        };

        // Ignore send error: slots may have exited already.
        let _ = group.shutdown_tx.send(true);

        let drain = async {
            for join in group.joins {
                let _ = join.await;
            }
        };
        match tokio::time::timeout(self.options.shutdown_timeout, drain).await {
            Ok(()) => tracing::info!("server stopped"),
            Err(_) => tracing::warn!(
                timeout = ?self.options.shutdown_timeout,
                "shutdown timeout elapsed, abandoning in-flight runs"
            ),
        }
        Ok(())
    }

    /// Is the server currently consuming deliveries?
    pub fn is_running(&self) -> bool {
        self.group.is_some()
    }
}

/// One consumer slot: receive a delivery, run it to settlement, repeat.
///
/// The slot exits on shutdown, when the subscription closes, or when a
/// settlement fault marks the connection as broken.
async fn consumer_loop(
    queue: QueueName,
    slot: usize,
    mut subscription: Box<dyn Subscription>,
    handler: Arc<dyn TaskHandler>,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn ErrorReporter>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // recv may wait indefinitely, so race it against shutdown.
        let job = tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender means the server is gone; stop consuming.
                if changed.is_err() {
                    break;
                }
                continue;
            }
            job = subscription.recv() => job,
        };
        let Some(job) = job else {
            tracing::debug!(queue = %queue, slot, "subscription closed");
            break;
        };

        let mut worker = Worker::new(
            Arc::clone(&handler),
            Arc::clone(&transport),
            Arc::clone(&reporter),
        );
        if let Err(error) = worker.run(job).await {
            tracing::error!(
                queue = %queue,
                slot,
                error = %error,
                "settlement failed, consumer slot treats connection as broken"
            );
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use super::*;
    use crate::domain::{Job, TaskError};
    use crate::registry::task_fn;
    use crate::transport::{InMemoryTransport, TransportCounts};

    struct CollectingReporter {
        errors: Mutex<Vec<String>>,
    }

    impl CollectingReporter {
        fn new() -> Self {
            Self {
                errors: Mutex::new(Vec::new()),
            }
        }

        fn reported(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }
    }

    impl ErrorReporter for CollectingReporter {
        fn report(&self, error: &TaskError, _job: &Job) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    fn q(name: &str) -> QueueName {
        QueueName::new(name)
    }

    /// Poll one queue's counters until `pred` holds.
    async fn wait_for_counts(
        transport: &InMemoryTransport,
        queue: &QueueName,
        pred: impl Fn(&TransportCounts) -> bool,
    ) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if pred(&transport.counts(queue).await) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached within deadline"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn start_without_tasks_fails_fast() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut server = Server::new(transport, ServerOptions::default());
        assert!(matches!(
            server.start().await,
            Err(ServerError::NoTasksRegistered)
        ));
    }

    #[tokio::test]
    async fn start_twice_fails_and_stop_requires_start() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut registry = TaskRegistry::new();
        registry
            .register(q("one"), Arc::new(task_fn(|_job: Job| async { Ok(()) })))
            .unwrap();

        let mut server =
            Server::new(transport, ServerOptions::default()).set_all_tasks(registry);
        assert!(matches!(server.stop().await, Err(ServerError::NotStarted)));

        server.start().await.unwrap();
        assert!(server.is_running());
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyStarted)
        ));

        server.stop().await.unwrap();
        assert!(!server.is_running());
    }

    /// The basic failing-task scenario: a job without the required field is
    /// fatally rejected, acknowledged once, reported once, and never run a
    /// second time.
    #[tokio::test]
    async fn fatal_job_is_acked_reported_and_never_rerun() {
        let transport = Arc::new(InMemoryTransport::new());
        let reporter = Arc::new(CollectingReporter::new());
        let invocations = Arc::new(AtomicUsize::new(0));
        let emitted = Arc::new(AtomicUsize::new(0));

        let handler = {
            let invocations = Arc::clone(&invocations);
            let emitted = Arc::clone(&emitted);
            task_fn(move |job: Job| {
                let invocations = Arc::clone(&invocations);
                let emitted = Arc::clone(&emitted);
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    if job.payload().get("message").is_none() {
                        return Err(TaskError::fatal("message field is required"));
                    }
                    emitted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let mut registry = TaskRegistry::new();
        registry.register(q("one"), Arc::new(handler)).unwrap();

        let mut server = Server::new(Arc::clone(&transport) as Arc<dyn Transport>, ServerOptions::default())
            .with_reporter(reporter.clone())
            .set_all_tasks(registry);
        server.start().await.unwrap();

        transport
            .publish(&q("one"), serde_json::json!({"eventName": "will-never-emit"}))
            .await
            .unwrap();

        wait_for_counts(&transport, &q("one"), |c| c.acked == 1).await;

        let reported = reporter.reported();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("message"));
        assert!(reported[0].contains("required"));

        // Give a potential (wrong) redelivery a chance to surface.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(emitted.load(Ordering::SeqCst), 0);

        let counts = transport.counts(&q("one")).await;
        assert_eq!(counts.acked, 1);
        assert_eq!(counts.requeued, 0);
        assert_eq!(counts.ready, 0);

        server.stop().await.unwrap();
    }

    /// Transient failures are requeued by the core and redelivered by the
    /// transport until the handler succeeds.
    #[tokio::test]
    async fn transient_failure_is_requeued_and_retried() {
        let transport = Arc::new(InMemoryTransport::new());
        let reporter = Arc::new(CollectingReporter::new());

        let remaining_failures = Arc::new(AtomicU32::new(1));
        let handler = {
            let remaining_failures = Arc::clone(&remaining_failures);
            task_fn(move |_job: Job| {
                let remaining_failures = Arc::clone(&remaining_failures);
                async move {
                    if remaining_failures.load(Ordering::SeqCst) > 0 {
                        remaining_failures.fetch_sub(1, Ordering::SeqCst);
                        return Err(TaskError::transient("intentional failure"));
                    }
                    Ok(())
                }
            })
        };

        let mut registry = TaskRegistry::new();
        registry.register(q("one"), Arc::new(handler)).unwrap();

        let mut server = Server::new(Arc::clone(&transport) as Arc<dyn Transport>, ServerOptions::default())
            .with_reporter(reporter.clone())
            .set_all_tasks(registry);
        server.start().await.unwrap();

        transport
            .publish(&q("one"), serde_json::json!({"n": 1}))
            .await
            .unwrap();

        wait_for_counts(&transport, &q("one"), |c| c.acked == 1).await;

        let counts = transport.counts(&q("one")).await;
        assert_eq!(counts.requeued, 1);
        assert_eq!(counts.acked, 1);
        assert_eq!(reporter.reported(), vec!["intentional failure"]);

        server.stop().await.unwrap();
    }

    /// `stop` does not resolve while a run is still executing; the in-flight
    /// job settles before the server finishes stopping.
    #[tokio::test]
    async fn stop_waits_for_the_in_flight_run() {
        let transport = Arc::new(InMemoryTransport::new());

        let handler = task_fn(|_job: Job| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        });
        let mut registry = TaskRegistry::new();
        registry.register(q("one"), Arc::new(handler)).unwrap();

        let mut server = Server::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            ServerOptions {
                concurrency: 1,
                shutdown_timeout: Duration::from_secs(5),
            },
        )
        .set_all_tasks(registry);
        server.start().await.unwrap();

        transport
            .publish(&q("one"), serde_json::json!({}))
            .await
            .unwrap();

        wait_for_counts(&transport, &q("one"), |c| c.in_flight == 1).await;

        server.stop().await.unwrap();

        // The run settled before stop resolved.
        let counts = transport.counts(&q("one")).await;
        assert_eq!(counts.acked, 1);
        assert_eq!(counts.in_flight, 0);
    }

    /// Slots within one queue run concurrently up to the configured bound.
    #[tokio::test]
    async fn pool_slots_process_deliveries_concurrently() {
        let transport = Arc::new(InMemoryTransport::new());

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handler = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            task_fn(move |_job: Job| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let mut registry = TaskRegistry::new();
        registry.register(q("one"), Arc::new(handler)).unwrap();

        let mut server = Server::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            ServerOptions {
                concurrency: 2,
                shutdown_timeout: Duration::from_secs(5),
            },
        )
        .set_all_tasks(registry);
        server.start().await.unwrap();

        for n in 0..4 {
            transport
                .publish(&q("one"), serde_json::json!({"n": n}))
                .await
                .unwrap();
        }

        wait_for_counts(&transport, &q("one"), |c| c.acked == 4).await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        server.stop().await.unwrap();
    }

    /// Queues are independent: a slow handler on one queue does not block
    /// deliveries on another.
    #[tokio::test]
    async fn queues_do_not_block_each_other() {
        let transport = Arc::new(InMemoryTransport::new());

        let slow = task_fn(|_job: Job| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        });
        let fast_done = Arc::new(AtomicUsize::new(0));
        let fast = {
            let fast_done = Arc::clone(&fast_done);
            task_fn(move |_job: Job| {
                let fast_done = Arc::clone(&fast_done);
                async move {
                    fast_done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let mut registry = TaskRegistry::new();
        registry.register(q("slow"), Arc::new(slow)).unwrap();
        registry.register(q("fast"), Arc::new(fast)).unwrap();

        let mut server = Server::new(Arc::clone(&transport) as Arc<dyn Transport>, ServerOptions::default())
            .set_all_tasks(registry);
        server.start().await.unwrap();

        transport
            .publish(&q("slow"), serde_json::json!({}))
            .await
            .unwrap();
        transport
            .publish(&q("fast"), serde_json::json!({}))
            .await
            .unwrap();

        // The fast queue settles while the slow handler is still running.
        wait_for_counts(&transport, &q("fast"), |c| c.acked == 1).await;
        assert_eq!(transport.counts(&q("slow")).await.acked, 0);
        assert_eq!(fast_done.load(Ordering::SeqCst), 1);

        server.stop().await.unwrap();
    }
}
