// 📡 Change Feed Processor - Poll the store's change stream, hand batches to the orchestrator
//
// At-least-once: a batch is acknowledged only after every event in it was
// handled. A crash between handling and acknowledging redelivers the batch,
// which the orchestrator absorbs idempotently.

use crate::db::ChangeFeed;
use crate::error::StoreError;
use crate::provisioning::{BatchReport, ProvisioningOrchestrator};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

pub struct FeedProcessor {
    feed: Arc<dyn ChangeFeed>,
    orchestrator: Arc<ProvisioningOrchestrator>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl FeedProcessor {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        orchestrator: Arc<ProvisioningOrchestrator>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        FeedProcessor {
            feed,
            orchestrator,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Handle one batch of pending events; empty report when the feed is idle
    pub async fn drain_once(&self) -> Result<BatchReport, StoreError> {
        let feed = &self.feed;
        let max = self.batch_size;
        let events = self
            .retry
            .run("change_feed.next_batch", move || feed.next_batch(max))
            .await?;

        if events.is_empty() {
            return Ok(BatchReport::default());
        }

        debug!(events = events.len(), "change batch received");
        let report = self.orchestrator.handle_batch(&events).await;

        if let Some(through) = report.last_sequence() {
            self.retry
                .run("change_feed.acknowledge", move || feed.acknowledge(through))
                .await?;
            debug!(through, "change batch acknowledged");
        }

        Ok(report)
    }

    /// Keep draining until the feed is empty; returns every batch report
    pub async fn drain_all(&self) -> Result<Vec<BatchReport>, StoreError> {
        let mut reports = Vec::new();
        loop {
            let report = self.drain_once().await?;
            if report.is_empty() {
                return Ok(reports);
            }
            reports.push(report);
        }
    }

    /// Poll on a fixed interval until `shutdown` flips to true
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_ms = poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "change feed poller started"
        );
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_all().await {
                        error!(error = %e, "change feed poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("change feed poller stopping");
                        return;
                    }
                }
            }
        }
    }
}
