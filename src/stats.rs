use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::ClickStats;
use crate::store::{LinkStore, StoreError};

#[derive(Default)]
struct Counts {
    clicks: ClickStats, // running totals, seeded from the store
    dirty: ClickStats,  // clicks not yet flushed
}

/// ClickCounter buffers link clicks in memory and flushes them to the store
/// periodically. Unflushed clicks are lost if the process dies; the loss is
/// bounded by the flush interval.
pub struct ClickCounter {
    store: Arc<dyn LinkStore>,
    counts: Mutex<Counts>,
}

impl ClickCounter {
    /// Seeds the in-memory totals from the store.
    pub async fn new(store: Arc<dyn LinkStore>) -> Result<Self, StoreError> {
        let clicks = store.load_stats().await?;
        Ok(Self {
            store,
            counts: Mutex::new(Counts {
                clicks,
                dirty: ClickStats::new(),
            }),
        })
    }

    /// Records one click against a link's canonical short name.
    pub async fn record(&self, short: &str) {
        let mut counts = self.counts.lock().await;
        *counts.clicks.entry(short.to_string()).or_insert(0) += 1;
        *counts.dirty.entry(short.to_string()).or_insert(0) += 1;
    }

    pub async fn clicks_for(&self, short: &str) -> i64 {
        self.counts.lock().await.clicks.get(short).copied().unwrap_or(0)
    }

    /// Current totals, most-visited first, ties by short name.
    pub async fn snapshot(&self) -> Vec<(String, i64)> {
        let counts = self.counts.lock().await;
        let mut all: Vec<(String, i64)> = counts
            .clicks
            .iter()
            .map(|(short, clicks)| (short.clone(), *clicks))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all
    }

    /// Writes pending clicks to the store. The pending batch is kept on
    /// failure so the next flush retries it.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let mut counts = self.counts.lock().await;
        if counts.dirty.is_empty() {
            return Ok(());
        }
        self.store.save_stats(&counts.dirty).await?;
        counts.dirty.clear();
        Ok(())
    }

    /// Drops a deleted link's counts from memory and storage.
    pub async fn forget(&self, short: &str) -> Result<(), StoreError> {
        {
            let mut counts = self.counts.lock().await;
            counts.clicks.remove(short);
            counts.dirty.remove(short);
        }
        self.store.delete_stats(short).await
    }

    /// Flushes pending clicks on a fixed interval for the life of the
    /// process. Failures are logged and retried on the next tick.
    pub async fn run_flush_loop(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!("flushing click stats");
            if let Err(e) = self.flush().await {
                warn!("flushing click stats: {e}");
            }
        }
    }
}
