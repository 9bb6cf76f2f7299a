use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::fetch::PageFetcher;
use crate::importer::{self, Halt, ImporterConfig, RunSummary};

/// Owns one import pipeline: a fetcher plus its scheduler configuration.
/// Runs on demand or on a recurring period.
pub struct ImportJob {
    cfg: ImporterConfig,
    fetcher: PageFetcher,
    running: AtomicBool,
}

impl ImportJob {
    pub fn new(cfg: ImporterConfig, fetcher: PageFetcher) -> Self {
        Self {
            cfg,
            fetcher,
            running: AtomicBool::new(false),
        }
    }

    /// Run one import from the stored checkpoint. Returns None when a run is
    /// already in flight: overlapping invocations are skipped, not queued.
    pub async fn run(&self, conn: &Connection) -> Result<Option<RunSummary>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Import already running, skipping this trigger");
            return Ok(None);
        }

        let result = importer::run_import(conn, &self.cfg, |page| {
            let fetcher = self.fetcher.clone();
            async move { fetcher.fetch_page(page).await }
        })
        .await;
        self.running.store(false, Ordering::SeqCst);

        let summary = result?;
        log_summary(&summary);
        Ok(Some(summary))
    }

    /// Re-run the import every `period`, forever. The first run fires
    /// immediately; a failed run is logged and the schedule keeps going.
    pub async fn schedule(&self, conn: &Connection, period: Duration) -> Result<()> {
        info!("Scheduling import every {}s", period.as_secs());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(error) = self.run(conn).await {
                warn!("Scheduled import failed: {:#}", error);
            }
        }
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Run finished: {} pages, {} bills imported, {} fragments failed, checkpoint at {}",
        summary.pages.len(),
        summary.bills_succeeded(),
        summary.fragments_failed(),
        summary.checkpoint
    );
    match &summary.halt {
        Some(Halt::EndOfData { page }) => {
            info!("Reached end of available data at page {}", page)
        }
        Some(Halt::PageError { page, error }) => {
            warn!("Run halted by page {}: {}", page, error)
        }
        None => {}
    }
}
