use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Duration, sleep};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foreman_core::domain::{FatalTaskError, Job, QueueName, TaskError};
use foreman_core::registry::{TaskHandler, TaskRegistry};
use foreman_core::server::{Server, ServerOptions};
use foreman_core::transport::{InMemoryTransport, Transport};

#[derive(Debug, Deserialize)]
struct MailPayload {
    message: String,
}

/// Demo handler: rejects payloads without a `message` field as fatal, fails
/// transiently `n` times, then succeeds.
struct MailHandler {
    remaining_failures: AtomicU32,
}

impl MailHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskHandler for MailHandler {
    async fn handle(&self, job: &Job) -> Result<(), TaskError> {
        let payload: MailPayload = serde_json::from_value(job.payload().clone())
            .map_err(|e| FatalTaskError::with_source("message field is required", e))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskError::transient(format!(
                "intentional failure (left={left})"
            )));
        }

        tracing::info!(message = %payload.message, "mail sent");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman_cli=info,foreman_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let queue = QueueName::new("demo:mail");
    let transport = Arc::new(InMemoryTransport::new());

    let mut registry = TaskRegistry::new();
    registry
        .register(queue.clone(), Arc::new(MailHandler::new(2)))
        .expect("fresh registry");

    let mut server = Server::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        ServerOptions {
            concurrency: 2,
            shutdown_timeout: Duration::from_secs(10),
        },
    )
    .set_all_tasks(registry);

    server.start().await.expect("server starts");

    // One job that succeeds after two transient failures, one that is
    // permanently malformed (no `message` field).
    transport
        .publish(&queue, serde_json::json!({ "message": "hello from foreman" }))
        .await
        .expect("publish");
    transport
        .publish(&queue, serde_json::json!({ "eventName": "will-never-emit" }))
        .await
        .expect("publish");

    // Wait until both deliveries have settled for good: three transient
    // attempts end in one ack, the malformed job is acked on first sight.
    loop {
        let counts = transport.counts(&queue).await;
        if counts.acked == 2 && counts.in_flight == 0 && counts.ready == 0 {
            tracing::info!(?counts, "all jobs settled");
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    server.stop().await.expect("graceful stop");
}
