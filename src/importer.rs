use std::collections::{BTreeSet, VecDeque};
use std::future::Future;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::db;
use crate::extract::{self, FragmentOutcome};
use crate::fetch::FetchError;

/// Pages enqueued per refill once the pending queue drains.
const FRAME_SIZE: u32 = 15;

#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Concurrent page workers.
    pub pool_size: usize,
    /// Cap on pages dispatched in one run; None means run until end of data
    /// or a hard error.
    pub max_pages: Option<u32>,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            max_pages: None,
        }
    }
}

/// Why a run stopped scheduling new pages.
#[derive(Debug)]
pub enum Halt {
    /// A page came back with zero fragments: the crawl caught up with the
    /// available data. The empty page is not committed, so the next run
    /// probes it again.
    EndOfData { page: u32 },
    /// Transport or HTTP failure. Recovery is a fresh run from checkpoint.
    PageError { page: u32, error: FetchError },
}

/// One failed fragment with whatever the pipeline had accumulated.
#[derive(Debug)]
pub struct FailedFragment {
    pub file: Option<String>,
    pub stage: &'static str,
    pub error: String,
}

#[derive(Debug)]
pub struct PageResult {
    pub page: u32,
    pub succeeded: usize,
    pub failed: Vec<FailedFragment>,
}

#[derive(Debug)]
pub struct RunSummary {
    /// Per-page results in completion order.
    pub pages: Vec<PageResult>,
    pub halt: Option<Halt>,
    /// Contiguous high-water mark committed by this run.
    pub checkpoint: u32,
}

impl RunSummary {
    pub fn bills_succeeded(&self) -> usize {
        self.pages.iter().map(|p| p.succeeded).sum()
    }

    pub fn fragments_failed(&self) -> usize {
        self.pages.iter().map(|p| p.failed.len()).sum()
    }
}

// ── Checkpoint tracking ──

/// Tracks out-of-order page completions and yields the checkpoint only when
/// every lower-numbered page has also completed, so a fast page 7 can never
/// push the checkpoint past a still-running page 6.
struct CheckpointTracker {
    committed: u32,
    done: BTreeSet<u32>,
}

impl CheckpointTracker {
    fn new(committed: u32) -> Self {
        Self {
            committed,
            done: BTreeSet::new(),
        }
    }

    /// Record `page` as committed; returns the new contiguous high-water mark
    /// if it advanced.
    fn complete(&mut self, page: u32) -> Option<u32> {
        self.done.insert(page);
        let mut advanced = None;
        while self.done.remove(&(self.committed + 1)) {
            self.committed += 1;
            advanced = Some(self.committed);
        }
        advanced
    }
}

// ── Scheduler ──

/// Run-scoped scheduler state. Nothing here is ambient: a new run starts
/// clean even after a halted one.
struct RunState {
    pending: VecDeque<u32>,
    next_page: u32,
    enqueued: u32,
    halted: bool,
}

impl RunState {
    fn refill(&mut self, max_pages: Option<u32>) {
        let mut added = 0;
        while added < FRAME_SIZE {
            if max_pages.is_some_and(|max| self.enqueued >= max) {
                return;
            }
            self.pending.push_back(self.next_page);
            self.next_page += 1;
            self.enqueued += 1;
            added += 1;
        }
        debug!(
            "Queue empty, enqueued pages up to {}",
            self.next_page - 1
        );
    }
}

/// Drive one import run: seed the pool at checkpoint + 1, fetch and extract
/// pages concurrently, persist and checkpoint completions sequentially here.
///
/// Fetching is injected so the scheduler can be exercised without a network;
/// `fetch` returns the raw per-bill fragments of one page.
pub async fn run_import<F, Fut>(
    conn: &Connection,
    cfg: &ImporterConfig,
    fetch: F,
) -> Result<RunSummary>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<Vec<String>, FetchError>> + Send + 'static,
{
    let start = db::get_checkpoint(conn)? + 1;
    info!("Starting import at page {}", start);

    let progress = match cfg.max_pages {
        Some(n) => {
            let pb = ProgressBar::new(n as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                    .progress_chars("=> "),
            );
            Some(pb)
        }
        None => None,
    };

    let mut state = RunState {
        pending: VecDeque::new(),
        next_page: start,
        enqueued: 0,
        halted: false,
    };
    let mut tracker = CheckpointTracker::new(start - 1);
    let mut pool: JoinSet<(u32, Result<Vec<FragmentOutcome>, FetchError>)> = JoinSet::new();
    let mut pages = Vec::new();
    let mut halt = None;

    loop {
        // Refill a frame when the queue drains, continuing monotonically
        // from the highest page ever enqueued.
        if state.pending.is_empty() && !state.halted {
            state.refill(cfg.max_pages);
        }

        // Dispatch in increasing page order up to pool capacity. Completion
        // order is whatever the workers make of it.
        while pool.len() < cfg.pool_size && !state.halted {
            let Some(page) = state.pending.pop_front() else {
                break;
            };
            let fut = fetch(page);
            pool.spawn(async move {
                let outcome = match fut.await {
                    Ok(fragments) => Ok(extract::process_fragments(&fragments)),
                    Err(error) => Err(error),
                };
                (page, outcome)
            });
        }

        // Pool drained with nothing left to dispatch: the run is over.
        let Some(joined) = pool.join_next().await else {
            break;
        };
        let (page, outcome) = joined?;

        match outcome {
            Ok(outcomes) => {
                let result = persist_page(conn, page, outcomes);
                info!(
                    "Page {} committed: {} bills succeeded, {} fragments failed",
                    page,
                    result.succeeded,
                    result.failed.len()
                );
                if let Some(committed) = tracker.complete(page) {
                    db::set_checkpoint(conn, committed)?;
                }
                pages.push(result);
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
            }
            Err(FetchError::Empty { page }) => {
                info!("Page {} has no fragments, treating as end of data", page);
                state.halted = true;
                state.pending.clear();
                halt.get_or_insert(Halt::EndOfData { page });
            }
            Err(error) => {
                warn!("Page {} failed, halting the run: {}", page, error);
                state.halted = true;
                state.pending.clear();
                halt.get_or_insert(Halt::PageError { page, error });
            }
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    Ok(RunSummary {
        pages,
        halt,
        checkpoint: tracker.committed,
    })
}

/// Persist every fragment outcome of one page. Referenced entities go first
/// (inside `persist_bill`); a persistence failure isolates to its fragment.
fn persist_page(conn: &Connection, page: u32, outcomes: Vec<FragmentOutcome>) -> PageResult {
    let mut succeeded = 0;
    let mut failed = Vec::new();

    for outcome in outcomes {
        match outcome {
            FragmentOutcome::Extracted(bill) => match db::persist_bill(conn, &bill) {
                Ok(()) => succeeded += 1,
                Err(error) => {
                    warn!(
                        "Failed to persist bill {} from page {}: {:#}",
                        bill.file, page, error
                    );
                    failed.push(FailedFragment {
                        file: Some(bill.file),
                        stage: "persist",
                        error: error.to_string(),
                    });
                }
            },
            FragmentOutcome::Failed {
                draft,
                stage,
                error,
            } => {
                warn!(
                    "Fragment on page {} failed at stage {}: {} (file: {})",
                    page,
                    stage,
                    error,
                    draft.file.as_deref().unwrap_or("unknown")
                );
                failed.push(FailedFragment {
                    file: draft.file,
                    stage,
                    error: error.to_string(),
                });
            }
        }
    }

    PageResult {
        page,
        succeeded,
        failed,
    }
}

// ── Tests ──
