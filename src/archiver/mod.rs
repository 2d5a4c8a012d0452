//! Batch orchestration
//!
//! ```text
//!            ┌──────────────┐ claim_batch(N)
//!   ┌───────▶│   JobQueue   │───────────────┐
//!   │        └──────────────┘               ▼
//!   │  enqueue_all / add_assets_all   ┌──────────┐  one tokio task per job
//!   │  complete_all / requeue         │  fetch   │  (RetryPolicy)
//!   │                                 └────┬─────┘
//!   │                                      ▼
//!   │                           ┌────────────────────┐  packed_{first id}
//!   │                           │ PackedBatchWriter  │───▶ VolumeAllocator
//!   │                           └─────────┬──────────┘
//!   │                                     ▼
//!   │        ┌──────────────────────────────────────┐
//!   └────────│ DiscoveryPolicy (blocking pool, 1/job) │
//!            └──────────────────────────────────────┘
//! ```
//!
//! A batch is only reconciled in the queue after its archive is on disk, so a
//! crash at any point leaves jobs either untouched, in FETCHING (operator
//! reset), or completed with their bodies archived.

pub mod orchestrator;
pub mod seeds;

pub use orchestrator::{Archiver, BatchSettings};
pub use seeds::{load_seeds, read_seeds};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters updated as batches are processed
#[derive(Debug, Default)]
pub struct ArchiveStats {
    pub batches: AtomicU64,
    pub jobs_fetched: AtomicU64,
    pub completed: AtomicU64,
    pub remote_errors: AtomicU64,
    pub requeued: AtomicU64,
    pub bytes_archived: AtomicU64,
    pub children_enqueued: AtomicU64,
    pub assets_added: AtomicU64,
}

impl ArchiveStats {
    pub fn record_batch(&self, jobs: u64, bytes: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.jobs_fetched.fetch_add(jobs, Ordering::Relaxed);
        self.bytes_archived.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_completed(&self, count: u64, remote_errors: u64) {
        self.completed.fetch_add(count, Ordering::Relaxed);
        self.remote_errors.fetch_add(remote_errors, Ordering::Relaxed);
    }

    pub fn record_requeued(&self, count: u64) {
        self.requeued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_discovered(&self, children: u64, assets: u64) {
        self.children_enqueued.fetch_add(children, Ordering::Relaxed);
        self.assets_added.fetch_add(assets, Ordering::Relaxed);
    }

    /// Point-in-time copy for display
    pub fn snapshot(&self) -> ArchiveProgress {
        ArchiveProgress {
            batches: self.batches.load(Ordering::Relaxed),
            jobs_fetched: self.jobs_fetched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            bytes_archived: self.bytes_archived.load(Ordering::Relaxed),
            children_enqueued: self.children_enqueued.load(Ordering::Relaxed),
            assets_added: self.assets_added.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ArchiveStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveProgress {
    pub batches: u64,
    pub jobs_fetched: u64,
    pub completed: u64,
    pub remote_errors: u64,
    pub requeued: u64,
    pub bytes_archived: u64,
    pub children_enqueued: u64,
    pub assets_added: u64,
}

/// Result of a crawl run
#[derive(Debug, Clone)]
pub struct ArchiveResult {
    pub batches: u64,
    pub jobs_fetched: u64,
    pub completed: u64,
    /// Completed with a non-200 status
    pub remote_errors: u64,
    pub requeued: u64,
    pub bytes_archived: u64,
    /// New child jobs actually inserted (duplicates excluded)
    pub children_enqueued: u64,
    /// New asset urls actually inserted (duplicates excluded)
    pub assets_added: u64,
    pub duration: Duration,
    /// False when interrupted before the queue drained
    pub completed_run: bool,
}

impl ArchiveResult {
    fn new(progress: ArchiveProgress, duration: Duration, completed_run: bool) -> Self {
        Self {
            batches: progress.batches,
            jobs_fetched: progress.jobs_fetched,
            completed: progress.completed,
            remote_errors: progress.remote_errors,
            requeued: progress.requeued,
            bytes_archived: progress.bytes_archived,
            children_enqueued: progress.children_enqueued,
            assets_added: progress.assets_added,
            duration,
            completed_run,
        }
    }
}
