use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Duration as ChronoDuration;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::checkpoint::Checkpoint;
use crate::checkpoint::CheckpointStore;
use crate::clients::UpstreamClient;
use crate::domain::Envelope;
use crate::domain::Source;
use crate::error::ClientError;
use crate::queue::Queue;

/// C5: periodic poller/backfiller. One instance per source; `run_once` is
/// also what the `backfill` CLI subcommand drives for a manual one-shot
/// cycle. Same loop shape as the teacher's
/// `idempotency::expiry::expire_keys_loop` — `loop { tick; sleep }`.
pub struct Poller {
    source: Source,
    client: Arc<dyn UpstreamClient>,
    queue: Arc<Queue>,
    checkpoints: Arc<CheckpointStore>,
    overlap: ChronoDuration,
    default_seed: DateTime<Utc>,
    process_after: Option<DateTime<Utc>>,
    /// Guards against two pollers for the same source ever running
    /// concurrently (`spec.md` §5 "at most one poller per source").
    guard: Mutex<()>,
    cycle_page_cap: u32,
}

pub struct PollerConfig {
    pub source: Source,
    pub overlap: ChronoDuration,
    pub default_seed: DateTime<Utc>,
    pub process_after: Option<DateTime<Utc>>,
    pub cycle_page_cap: u32,
}

impl Poller {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        queue: Arc<Queue>,
        checkpoints: Arc<CheckpointStore>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source: config.source,
            client,
            queue,
            checkpoints,
            overlap: config.overlap,
            default_seed: config.default_seed,
            process_after: config.process_after,
            guard: Mutex::new(()),
            cycle_page_cap: config.cycle_page_cap,
        }
    }

    /// Runs forever at `interval`, stopping when `shutdown` resolves.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(source = %self.source, error = %e, "poll cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(source = %self.source, "poller shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One full poll cycle: `spec.md` §4.5 steps 1–7. Returns the number of
    /// descriptors enqueued.
    #[tracing::instrument(skip(self), fields(source = %self.source))]
    pub async fn run_once(&self) -> Result<usize, anyhow::Error> {
        let Ok(_permit) = self.guard.try_lock() else {
            tracing::debug!(source = %self.source, "poll cycle already in progress, skipping");
            return Ok(0);
        };

        let ckpt = self.checkpoints.get(self.source).await?;
        let last_event_time = ckpt
            .as_ref()
            .map(|c| c.last_event_time)
            .unwrap_or(self.default_seed);
        let since = last_event_time - self.overlap;

        let mut cursor: Option<String> = None;
        let mut pages = 0u32;
        let mut enqueued = 0usize;
        let mut high_water = last_event_time;

        loop {
            let page = match self.client.list_updated_since(since, cursor.clone()).await {
                Ok(page) => page,
                Err(ClientError::Transient(e)) => {
                    // §4.5 step 7: a transient error aborts the cycle without
                    // advancing the checkpoint.
                    tracing::warn!(source = %self.source, error = %e, "transient error, aborting cycle");
                    return Ok(enqueued);
                }
                Err(e) => return Err(e.into()),
            };

            if page.items.is_empty() {
                break;
            }

            let mut page_max = high_water;
            for item in &page.items {
                let envelope = Envelope::from_poller_descriptor(self.source, &item.external_id, item.updated_at);
                self.queue.enqueue(&envelope).await?;
                enqueued += 1;
                if item.updated_at > page_max {
                    page_max = item.updated_at;
                }
            }
            high_water = page_max;

            pages += 1;
            cursor = page.next_cursor;
            if page.exhausted || cursor.is_none() || pages >= self.cycle_page_cap {
                break;
            }
        }

        if high_water > last_event_time {
            self.checkpoints
                .set(&Checkpoint {
                    source: self.source,
                    last_event_time: high_water,
                    last_cursor: cursor,
                })
                .await?;
        }

        Ok(enqueued)
    }

    pub fn process_after(&self) -> Option<DateTime<Utc>> { self.process_after }

    pub fn source(&self) -> Source { self.source }
}
