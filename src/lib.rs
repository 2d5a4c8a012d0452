//! lobi-archiver - Crash-Resumable Crawl-and-Archive Daemon
//!
//! Crawls a group/user JSON API breadth-first by priority and stores every
//! fetched body in packed batch archives spread across several volumes.
//! All crawl state lives in a SQLite job queue, so a stopped or crashed run
//! resumes where it left off.
//!
//! # Features
//!
//! - **Persistent Priority Queue**: Jobs are claimed atomically in
//!   `cost DESC, id ASC` order and deduplicated by path at insert time.
//!
//! - **Bulk Writes Under Contention**: Discovered jobs and assets are inserted
//!   in 80-row statements, retried with jittered backoff while the database
//!   is locked.
//!
//! - **Multi-Volume Storage**: Archives fill volumes in order, keeping a
//!   configurable margin free on each, and never fall back to a volume that
//!   was once full.
//!
//! - **Safe Resumption**: A batch is reconciled in the queue only after its
//!   archive is on disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Remote API (HTTPS)                          │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ GET, retried on timeout / 502
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Archiver loop                            │
//! │  claim N ──▶ fetch N concurrently ──▶ pack ──▶ classify ──▶ reconcile
//! └──────┬───────────────────────────────────┬──────────────┬───────┘
//!        │                                   │              │
//!        ▼                                   ▼              ▼
//! ┌──────────────┐                 ┌──────────────────┐  ┌──────────────┐
//! │  JobQueue    │                 │ VolumeAllocator  │  │ Discovery    │
//! │  (SQLite)    │                 │ /vol1 /vol2 ...  │  │ Policy       │
//! │  queue/asset │                 │ packed_{id}      │  │ (LobiPolicy) │
//! └──────────────┘                 └──────────────────┘  └──────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Fresh crawl seeded from a list of group uids
//! lobi-archiver --db lobi.db --volume /mnt/a:1GB --volume /mnt/b --seeds groups.txt
//!
//! # Resume after a stop
//! lobi-archiver --db lobi.db --volume /mnt/a:1GB --volume /mnt/b
//!
//! # After a crash: reset stranded jobs, then resume
//! lobi-archiver recover --db lobi.db
//! ```

pub mod archive;
pub mod archiver;
pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod progress;
pub mod storage;

pub use archiver::{ArchiveResult, Archiver, BatchSettings};
pub use config::{ArchiveConfig, CliArgs, Command};
pub use error::{ArchiverError, Result};
