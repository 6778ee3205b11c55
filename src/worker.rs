use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;

use crate::domain::CanonicalRecord;
use crate::domain::CanonicalTask;
use crate::domain::CanonicalEmail;
use crate::domain::CanonicalDoc;
use crate::domain::Envelope;
use crate::domain::Source;
use crate::error::RetryPolicy;
use crate::handlers::EventHandler;
use crate::identity::IdentityCache;
use crate::queue::Queue;
use crate::sink::Sink;

/// C8: the main dispatcher loop. `leased → handled → committed` on the happy
/// path, `leased → failed → (retry | dead)` otherwise — structurally the
/// teacher's `delivery::try_send_email` generalized to N sources and batch
/// leases.
pub struct Worker {
    queue: Arc<Queue>,
    sink: Arc<Sink>,
    identity: Arc<IdentityCache>,
    handlers: HashMap<Source, Arc<dyn EventHandler>>,
    process_after: HashMap<Source, Option<DateTime<Utc>>>,
    batch_size: i64,
    lease_duration: Duration,
    max_attempts: i32,
    retry_delay: Duration,
}

pub struct WorkerConfig {
    pub batch_size: i64,
    pub lease_duration: Duration,
    pub max_attempts: i32,
    pub retry_delay: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<Queue>,
        sink: Arc<Sink>,
        identity: Arc<IdentityCache>,
        handlers: HashMap<Source, Arc<dyn EventHandler>>,
        process_after: HashMap<Source, Option<DateTime<Utc>>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            identity,
            handlers,
            process_after,
            batch_size: config.batch_size,
            lease_duration: config.lease_duration,
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
        }
    }

    /// Runs forever at `poll_interval` until `shutdown` fires. Lets the
    /// current batch finish before exiting (`spec.md` §4.8 "Graceful
    /// shutdown") — there's no mid-batch cancellation point.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                tracing::info!("worker shutting down");
                return;
            }
            let mut did_work = false;
            for source in self.handlers.keys().copied().collect::<Vec<_>>() {
                match self.run_once(source).await {
                    Ok(n) if n > 0 => did_work = true,
                    Ok(_) => {}
                    Err(e) => tracing::error!(%source, error = %e, "dispatch cycle failed"),
                }
            }
            if !did_work {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    /// One lease-and-dispatch cycle for a single source. Returns the number
    /// of envelopes that reached a terminal state (completed or failed).
    #[tracing::instrument(skip(self), fields(%source))]
    pub async fn run_once(&self, source: Source) -> Result<usize, anyhow::Error> {
        let envelopes = self.queue.lease(source, self.batch_size, self.lease_duration).await?;
        if envelopes.is_empty() {
            return Ok(0);
        }

        let handler = self
            .handlers
            .get(&source)
            .ok_or_else(|| anyhow::anyhow!("no handler registered for source {source}"))?;
        let process_after = self.process_after.get(&source).copied().flatten();

        let mut succeeded: Vec<&Envelope> = Vec::new();
        let mut tasks = Vec::new();
        let mut emails = Vec::new();
        let mut docs = Vec::new();

        for envelope in &envelopes {
            match handler.handle(envelope, &self.identity, process_after).await {
                Ok(records) => {
                    succeeded.push(envelope);
                    for record in records {
                        match record {
                            CanonicalRecord::Task(t) => tasks.push(t),
                            CanonicalRecord::Email(e) => emails.push(e),
                            CanonicalRecord::Doc(d) => docs.push(d),
                        }
                    }
                }
                Err(err) => {
                    let policy = RetryPolicy::from(&err);
                    self.queue
                        .fail(
                            &envelope.id,
                            &err.to_string(),
                            self.max_attempts,
                            self.retry_delay,
                            policy == RetryPolicy::Permanent,
                        )
                        .await?;
                }
            }
        }

        if succeeded.is_empty() {
            return Ok(envelopes.len() - succeeded.len());
        }

        match self.commit_batch(&succeeded, &tasks, &emails, &docs).await {
            Ok(()) => {}
            Err(e) => {
                // sink write failed for the whole batch — treat every
                // succeeded envelope as a transient failure so it re-leases
                // (§4.7 "at-least-once re-delivery on a mid-crash").
                tracing::warn!(error = %e, "sink commit failed, failing batch for retry");
                for envelope in &succeeded {
                    self.queue
                        .fail(&envelope.id, &e.to_string(), self.max_attempts, self.retry_delay, false)
                        .await?;
                }
            }
        }

        Ok(envelopes.len())
    }

    async fn commit_batch(
        &self,
        succeeded: &[&Envelope],
        tasks: &[CanonicalTask],
        emails: &[CanonicalEmail],
        docs: &[CanonicalDoc],
    ) -> Result<(), anyhow::Error> {
        let mut tx = self.sink.pool().begin().await?;

        for chunk in tasks.chunks(10) {
            self.sink.upsert_tasks(&mut tx, chunk).await?;
        }
        for chunk in emails.chunks(10) {
            self.sink.upsert_emails(&mut tx, chunk).await?;
        }
        for chunk in docs.chunks(10) {
            self.sink.upsert_docs(&mut tx, chunk).await?;
        }

        for envelope in succeeded {
            Queue::complete_in(&mut tx, &envelope.id).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
