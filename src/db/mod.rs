//! Database module for the persistent job queue
//!
//! The crawl frontier lives in SQLite so that a crashed or interrupted run can
//! be resumed from the file alone.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                Archiver loop                 │
//! │ claim -> fetch -> classify -> reconcile      │
//! └──────────────────────┬───────────────────────┘
//!                        │ spawn_blocking
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │                   JobQueue                   │
//! │  - UPDATE ... RETURNING claims (atomic)      │
//! │  - 80-row INSERT ... ON CONFLICT DO NOTHING  │
//! │  - randomized backoff on SQLITE_BUSY         │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │   SQLite file (queue, asset, archive_info)   │
//! └──────────────────────────────────────────────┘
//! ```

pub mod queue;
pub mod schema;

pub use queue::{Job, JobQueue, JobRecord, JobState, QueueCounts, BULK_INSERT_CHUNK};
pub use schema::{create_database, keys};
