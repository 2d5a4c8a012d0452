//! Persistent job queue backed by SQLite
//!
//! Every discovered resource becomes one row in `queue`, keyed by its unique
//! request path. Rows move QUEUED -> FETCHING when claimed and FETCHING ->
//! COMPLETED (or back to QUEUED) when the batch is reconciled. Because the
//! state lives in the database, a restarted process resumes from whatever is
//! still QUEUED.
//!
//! # Write contention
//!
//! Every write is wrapped in [`retry_on_contention`]: a `SQLITE_BUSY` or
//! `SQLITE_LOCKED` failure sleeps a random 10-30ms and tries again, without
//! limit. Contention between writers always clears eventually, so it is never
//! surfaced to the caller.

use crate::db::schema::{self, keys};
use crate::error::{is_contention, DbError, DbResult};
use rand::Rng;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, ToSql};
use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Rows per multi-value INSERT statement
pub const BULK_INSERT_CHUNK: usize = 80;

/// Contention backoff bounds in milliseconds (inclusive min, exclusive max)
const CONTENTION_BACKOFF_MIN_MS: u64 = 10;
const CONTENTION_BACKOFF_MAX_MS: u64 = 30;

const CLAIM_SQL: &str = "UPDATE queue SET state = 'FETCHING' \
     WHERE id IN (SELECT id FROM queue WHERE state = 'QUEUED' ORDER BY cost DESC, id ASC LIMIT ?1) \
     RETURNING id, path, cost";

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Fetching,
    Completed,
}

impl JobState {
    /// Value stored in the `state` column
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Fetching => "FETCHING",
            JobState::Completed => "COMPLETED",
        }
    }

    /// Parse a `state` column value
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobState::Queued),
            "FETCHING" => Some(JobState::Fetching),
            "COMPLETED" => Some(JobState::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A claimed job, as handed to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Store-assigned id
    pub id: i64,

    /// Request path relative to the API base URL
    pub path: String,

    /// Priority class
    pub cost: i32,
}

/// Full row of the queue table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: i64,
    pub path: String,
    pub state: JobState,
    pub cost: i32,

    /// HTTP status recorded on completion
    pub code: Option<i32>,

    /// Packed archive unit referenced on completion
    pub batch_ref: Option<String>,
}

/// Row counts by state, plus the asset ledger size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub queued: u64,
    pub fetching: u64,
    pub completed: u64,
    pub assets: u64,
}

impl QueueCounts {
    /// Total jobs in any state
    pub fn total_jobs(&self) -> u64 {
        self.queued + self.fetching + self.completed
    }
}

/// A row that can be bound into a bulk INSERT
trait BulkRow {
    fn values(&self) -> Vec<&dyn ToSql>;
}

impl BulkRow for (String, i32) {
    fn values(&self) -> Vec<&dyn ToSql> {
        vec![&self.0 as &dyn ToSql, &self.1 as &dyn ToSql]
    }
}

impl BulkRow for &str {
    fn values(&self) -> Vec<&dyn ToSql> {
        vec![self as &dyn ToSql]
    }
}

/// SQLite-backed job queue and asset ledger
pub struct JobQueue {
    conn: Connection,
}

impl JobQueue {
    /// Open (or create) the queue database at `path`
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path).map_err(|e| DbError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory queue (tests, benchmarks)
    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open an existing queue database without writing to it
    ///
    /// Used for inspection while a crawl may be running; nothing is created
    /// and no metadata is stamped.
    pub fn open_read_only(path: &Path) -> DbResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DbError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        conn.busy_timeout(Duration::ZERO)?;

        let queue = Self { conn };
        queue.check_schema_version()?;
        Ok(queue)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        // Contention goes through our own randomized backoff instead of
        // SQLite's internal busy handler.
        conn.busy_timeout(Duration::ZERO)?;
        retry_on_contention("create_database", || schema::create_database(&conn))?;

        let queue = Self { conn };
        if !queue.check_schema_version()? {
            queue.set_info(keys::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        }
        queue.set_info(keys::ARCHIVER_VERSION, env!("CARGO_PKG_VERSION"))?;

        Ok(queue)
    }

    /// Fail on a foreign schema version; `false` when none is recorded yet
    fn check_schema_version(&self) -> DbResult<bool> {
        match self.info(keys::SCHEMA_VERSION)? {
            Some(v) if v != schema::SCHEMA_VERSION.to_string() => Err(DbError::Schema(format!(
                "database has schema version {}, expected {}",
                v,
                schema::SCHEMA_VERSION
            ))),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Store run metadata
    pub fn set_info(&self, key: &str, value: &str) -> DbResult<()> {
        retry_on_contention("set_info", || schema::set_archive_info(&self.conn, key, value))
    }

    /// Read run metadata
    pub fn info(&self, key: &str) -> DbResult<Option<String>> {
        schema::get_archive_info(&self.conn, key)
    }

    /// Enqueue a single path
    pub fn enqueue(&self, path: &str, cost: i32) -> DbResult<usize> {
        self.enqueue_all(&[(path.to_string(), cost)])
    }

    /// Enqueue many `(path, cost)` entries as QUEUED jobs
    ///
    /// Paths already present in any state are skipped. Returns the number of
    /// rows actually inserted.
    pub fn enqueue_all(&self, entries: &[(String, i32)]) -> DbResult<usize> {
        self.bulk_insert("queue", &["path", "cost"], entries)
    }

    /// Record a single asset url
    pub fn add_asset(&self, url: &str) -> DbResult<usize> {
        self.add_assets_all([url])
    }

    /// Record asset urls, skipping empty strings and urls already known
    pub fn add_assets_all<I, S>(&self, urls: I) -> DbResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owned: Vec<S> = urls.into_iter().collect();
        let rows: Vec<&str> = owned
            .iter()
            .map(|u| u.as_ref())
            .filter(|u| !u.is_empty())
            .collect();
        self.bulk_insert("asset", &["url"], &rows)
    }

    /// Atomically move up to `n` QUEUED jobs to FETCHING and return them
    ///
    /// Selection and transition happen in one UPDATE ... RETURNING statement,
    /// so concurrent claimers can never receive the same job. Jobs come back
    /// ordered by cost descending, then id ascending.
    pub fn claim_batch(&self, n: usize) -> DbResult<Vec<Job>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut jobs = retry_on_contention("claim_batch", || {
            let mut stmt = self.conn.prepare_cached(CLAIM_SQL)?;
            let rows = stmt.query_map([n as i64], |row| {
                Ok(Job {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    cost: row.get(2)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        // RETURNING order is unspecified
        jobs.sort_by(|a, b| b.cost.cmp(&a.cost).then(a.id.cmp(&b.id)));

        debug!(requested = n, claimed = jobs.len(), "Claimed batch");
        Ok(jobs)
    }

    /// Put a job back in the QUEUED state
    ///
    /// Idempotent. A COMPLETED job is left untouched.
    pub fn requeue(&self, job: &Job) -> DbResult<()> {
        retry_on_contention("requeue", || {
            let mut stmt = self.conn.prepare_cached(
                "UPDATE queue SET state = 'QUEUED' WHERE id = ?1 AND state <> 'COMPLETED'",
            )?;
            stmt.execute([job.id])
        })?;
        Ok(())
    }

    /// Requeue every job in `jobs`
    pub fn requeue_all(&self, jobs: &[Job]) -> DbResult<()> {
        for job in jobs {
            self.requeue(job)?;
        }
        Ok(())
    }

    /// Mark jobs COMPLETED with their status codes and the batch reference
    pub fn complete_all(&self, results: &[(Job, i32)], batch_ref: &str) -> DbResult<()> {
        if results.is_empty() {
            return Ok(());
        }

        retry_on_contention("complete_all", || {
            let tx = self.conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE queue SET state = 'COMPLETED', code = ?1, batch_ref = ?2 WHERE id = ?3",
                )?;
                for (job, code) in results {
                    stmt.execute(params![code, batch_ref, job.id])?;
                }
            }
            tx.commit()
        })?;
        Ok(())
    }

    /// Reset every FETCHING job to QUEUED
    ///
    /// Operator recovery after a crash. Returns the number of rows reset.
    pub fn reset_fetching(&self) -> DbResult<usize> {
        let reset = retry_on_contention("reset_fetching", || {
            self.conn.execute(
                "UPDATE queue SET state = 'QUEUED' WHERE state = 'FETCHING'",
                [],
            )
        })?;
        Ok(reset)
    }

    /// Count jobs by state and assets
    pub fn counts(&self) -> DbResult<QueueCounts> {
        let mut counts = QueueCounts::default();

        let mut stmt = self
            .conn
            .prepare_cached("SELECT state, COUNT(*) FROM queue GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            match JobState::from_db_str(&state) {
                Some(JobState::Queued) => counts.queued = count as u64,
                Some(JobState::Fetching) => counts.fetching = count as u64,
                Some(JobState::Completed) => counts.completed = count as u64,
                None => {
                    return Err(DbError::CorruptRow {
                        table: "queue",
                        reason: format!("unknown state '{}'", state),
                    })
                }
            }
        }

        let assets: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM asset", [], |row| row.get(0))?;
        counts.assets = assets as u64;

        Ok(counts)
    }

    /// Look up one job by id
    pub fn job(&self, id: i64) -> DbResult<Option<JobRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, path, state, cost, code, batch_ref FROM queue WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i32>(3)?,
                        row.get::<_, Option<i32>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, path, state, cost, code, batch_ref)) = row else {
            return Ok(None);
        };

        let state = JobState::from_db_str(&state).ok_or_else(|| DbError::CorruptRow {
            table: "queue",
            reason: format!("unknown state '{}' for id {}", state, id),
        })?;

        Ok(Some(JobRecord {
            id,
            path,
            state,
            cost,
            code,
            batch_ref,
        }))
    }

    /// Look up one job by its path
    pub fn job_by_path(&self, path: &str) -> DbResult<Option<JobRecord>> {
        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM queue WHERE path = ?1", [path], |row| {
                row.get(0)
            })
            .optional()?;
        match id {
            Some(id) => self.job(id),
            None => Ok(None),
        }
    }

    /// Check whether an asset url has been recorded
    pub fn has_asset(&self, url: &str) -> DbResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM asset WHERE url = ?1", [url], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert rows in fixed-size chunks, skipping unique-key conflicts
    ///
    /// Full chunks share one cached statement; the remainder gets its own.
    fn bulk_insert<R: BulkRow>(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[R],
    ) -> DbResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let full = rows.len() / BULK_INSERT_CHUNK * BULK_INSERT_CHUNK;

        if full > 0 {
            let sql = build_bulk_insert_sql(table, columns, BULK_INSERT_CHUNK);
            for chunk in rows[..full].chunks(BULK_INSERT_CHUNK) {
                inserted += self.execute_chunk(&sql, chunk)?;
            }
        }

        let remains = &rows[full..];
        if !remains.is_empty() {
            let sql = build_bulk_insert_sql(table, columns, remains.len());
            inserted += self.execute_chunk(&sql, remains)?;
        }

        Ok(inserted)
    }

    fn execute_chunk<R: BulkRow>(&self, sql: &str, chunk: &[R]) -> DbResult<usize> {
        let values: Vec<&dyn ToSql> = chunk.iter().flat_map(|row| row.values()).collect();
        retry_on_contention("bulk_insert", || {
            let mut stmt = self.conn.prepare_cached(sql)?;
            stmt.execute(values.as_slice())
        })
    }
}

/// Build `INSERT INTO t (a, b) VALUES (?, ?), ... ON CONFLICT DO NOTHING`
fn build_bulk_insert_sql(table: &str, columns: &[&str], rows: usize) -> String {
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING",
        table,
        columns.join(", "),
        vec![row; rows].join(", ")
    )
}

/// Run `op` until it succeeds or fails with something other than contention
pub(crate) fn retry_on_contention<T, F>(operation: &str, mut op: F) -> DbResult<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_contention(&e) => {
                let delay = rand::thread_rng()
                    .gen_range(CONTENTION_BACKOFF_MIN_MS..CONTENTION_BACKOFF_MAX_MS);
                warn!(operation, delay_ms = delay, "Job queue write contention, retrying");
                thread::sleep(Duration::from_millis(delay));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(items: &[(&str, i32)]) -> Vec<(String, i32)> {
        items.iter().map(|(p, c)| (p.to_string(), *c)).collect()
    }

    #[test]
    fn test_bulk_insert_sql() {
        let sql = build_bulk_insert_sql("queue", &["path", "cost"], 3);
        assert_eq!(
            sql,
            "INSERT INTO queue (path, cost) VALUES (?, ?), (?, ?), (?, ?) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_enqueue_dedup_same_call() {
        let queue = JobQueue::open_in_memory().unwrap();
        let inserted = queue
            .enqueue_all(&entries(&[("a", 1), ("a", 5), ("b", 2)]))
            .unwrap();
        assert_eq!(inserted, 2);

        let counts = queue.counts().unwrap();
        assert_eq!(counts.queued, 2);
        assert_eq!(queue.job_by_path("a").unwrap().unwrap().cost, 1);
    }

    #[test]
    fn test_enqueue_dedup_separate_calls() {
        let queue = JobQueue::open_in_memory().unwrap();
        assert_eq!(queue.enqueue("a", 1).unwrap(), 1);
        assert_eq!(queue.enqueue("a", 1).unwrap(), 0);
        assert_eq!(queue.counts().unwrap().queued, 1);
    }

    #[test]
    fn test_enqueue_skips_completed_path() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue("a", 1).unwrap();
        let jobs = queue.claim_batch(1).unwrap();
        queue.complete_all(&[(jobs[0].clone(), 200)], "packed_1").unwrap();

        assert_eq!(queue.enqueue("a", 9).unwrap(), 0);
        let record = queue.job_by_path("a").unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.cost, 1);
    }

    #[test]
    fn test_enqueue_large_list_crosses_chunks() {
        let queue = JobQueue::open_in_memory().unwrap();
        let list: Vec<(String, i32)> = (0..(BULK_INSERT_CHUNK * 2 + 7))
            .map(|i| (format!("api/user/{}", i), 1))
            .collect();

        assert_eq!(queue.enqueue_all(&list).unwrap(), list.len());
        assert_eq!(queue.counts().unwrap().queued, list.len() as u64);

        // Re-submitting the whole list inserts nothing
        assert_eq!(queue.enqueue_all(&list).unwrap(), 0);
    }

    #[test]
    fn test_enqueue_empty_is_noop() {
        let queue = JobQueue::open_in_memory().unwrap();
        assert_eq!(queue.enqueue_all(&[]).unwrap(), 0);
    }

    #[test]
    fn test_claim_all_available() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue
            .enqueue_all(&entries(&[("a", 1), ("b", 1), ("c", 1)]))
            .unwrap();

        let jobs = queue.claim_batch(10).unwrap();
        assert_eq!(jobs.len(), 3);

        let counts = queue.counts().unwrap();
        assert_eq!(counts.queued, 0);
        assert_eq!(counts.fetching, 3);

        assert!(queue.claim_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_claim_partial() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue
            .enqueue_all(&entries(&[("a", 1), ("b", 1), ("c", 1), ("d", 1)]))
            .unwrap();

        assert_eq!(queue.claim_batch(3).unwrap().len(), 3);
        assert_eq!(queue.counts().unwrap().queued, 1);
        assert_eq!(queue.claim_batch(3).unwrap().len(), 1);
    }

    #[test]
    fn test_claim_ordering() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue
            .enqueue_all(&entries(&[
                ("low-1", 1),
                ("high-1", 7),
                ("mid-1", 4),
                ("high-2", 7),
                ("low-2", 1),
                ("mid-2", 4),
            ]))
            .unwrap();

        let jobs = queue.claim_batch(4).unwrap();
        let paths: Vec<&str> = jobs.iter().map(|j| j.path.as_str()).collect();
        assert_eq!(paths, vec!["high-1", "high-2", "mid-1", "mid-2"]);

        let rest = queue.claim_batch(4).unwrap();
        let paths: Vec<&str> = rest.iter().map(|j| j.path.as_str()).collect();
        assert_eq!(paths, vec!["low-1", "low-2"]);
    }

    #[test]
    fn test_claim_zero() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue("a", 1).unwrap();
        assert!(queue.claim_batch(0).unwrap().is_empty());
        assert_eq!(queue.counts().unwrap().queued, 1);
    }

    #[test]
    fn test_complete_all() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue_all(&entries(&[("a", 2), ("b", 1)])).unwrap();
        let jobs = queue.claim_batch(2).unwrap();

        queue
            .complete_all(&[(jobs[0].clone(), 200), (jobs[1].clone(), 404)], "packed_1")
            .unwrap();

        let a = queue.job(jobs[0].id).unwrap().unwrap();
        assert_eq!(a.state, JobState::Completed);
        assert_eq!(a.code, Some(200));
        assert_eq!(a.batch_ref.as_deref(), Some("packed_1"));

        let b = queue.job(jobs[1].id).unwrap().unwrap();
        assert_eq!(b.code, Some(404));

        // Completed jobs are never claimed again
        assert!(queue.claim_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_requeue() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue("a", 3).unwrap();
        let job = queue.claim_batch(1).unwrap().remove(0);

        queue.requeue(&job).unwrap();
        queue.requeue(&job).unwrap();

        let record = queue.job(job.id).unwrap().unwrap();
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.cost, 3);
        assert_eq!(record.path, "a");
        assert_eq!(record.code, None);
        assert_eq!(record.batch_ref, None);

        assert_eq!(queue.claim_batch(1).unwrap()[0].id, job.id);
    }

    #[test]
    fn test_requeue_leaves_completed() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue("a", 3).unwrap();
        let job = queue.claim_batch(1).unwrap().remove(0);
        queue.complete_all(&[(job.clone(), 200)], "packed_1").unwrap();

        queue.requeue(&job).unwrap();
        assert_eq!(queue.job(job.id).unwrap().unwrap().state, JobState::Completed);
    }

    #[test]
    fn test_reset_fetching() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue
            .enqueue_all(&entries(&[("a", 1), ("b", 1), ("c", 1)]))
            .unwrap();
        let jobs = queue.claim_batch(2).unwrap();
        queue.complete_all(&[(jobs[0].clone(), 200)], "packed_1").unwrap();

        assert_eq!(queue.reset_fetching().unwrap(), 1);
        let counts = queue.counts().unwrap();
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.fetching, 0);
        assert_eq!(counts.completed, 1);
    }

    #[test]
    fn test_assets_dedup_across_calls() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.add_assets_all(["u1", "u2", "", "u1"]).unwrap();
        queue
            .add_assets_all(vec!["u2".to_string(), "u3".to_string()])
            .unwrap();

        assert_eq!(queue.counts().unwrap().assets, 3);
        assert!(queue.has_asset("u3").unwrap());
        assert!(!queue.has_asset("").unwrap());
    }

    #[test]
    fn test_reopen_resumes_state() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");

        {
            let queue = JobQueue::open(&db_path).unwrap();
            queue.enqueue_all(&entries(&[("a", 1), ("b", 1)])).unwrap();
            queue.claim_batch(1).unwrap();
        }

        let queue = JobQueue::open(&db_path).unwrap();
        let counts = queue.counts().unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.fetching, 1);
        assert_eq!(
            queue.info(keys::SCHEMA_VERSION).unwrap(),
            Some(schema::SCHEMA_VERSION.to_string())
        );
    }

    #[test]
    fn test_ids_are_monotonic() {
        let queue = JobQueue::open_in_memory().unwrap();
        queue.enqueue_all(&entries(&[("a", 1), ("b", 1)])).unwrap();
        let first = queue.job_by_path("a").unwrap().unwrap().id;
        let second = queue.job_by_path("b").unwrap().unwrap().id;
        assert!(second > first);
    }

    /// Hold the write lock on `path` from a separate connection
    fn lock_writer(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("BEGIN IMMEDIATE; INSERT INTO asset (url) VALUES ('held');")
            .unwrap();
        conn
    }

    #[test]
    fn test_concurrent_claimers_never_share_jobs() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");

        let list: Vec<(String, i32)> = (0..500).map(|i| (format!("api/user/{}", i), i % 7)).collect();
        JobQueue::open(&db_path).unwrap().enqueue_all(&list).unwrap();

        let claimers: Vec<_> = (0..2)
            .map(|_| {
                let db_path = db_path.clone();
                thread::spawn(move || {
                    let queue = JobQueue::open(&db_path).unwrap();
                    let mut ids = Vec::new();
                    loop {
                        let jobs = queue.claim_batch(7).unwrap();
                        if jobs.is_empty() {
                            break;
                        }
                        ids.extend(jobs.iter().map(|j| j.id));
                    }
                    ids
                })
            })
            .collect();

        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for claimer in claimers {
            for id in claimer.join().unwrap() {
                assert!(seen.insert(id), "job {} claimed twice", id);
                total += 1;
            }
        }
        assert_eq!(total, list.len());

        let counts = JobQueue::open(&db_path).unwrap().counts().unwrap();
        assert_eq!(counts.queued, 0);
        assert_eq!(counts.fetching, list.len() as u64);
    }

    #[test]
    fn test_enqueue_waits_out_a_held_write_lock() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        let queue = JobQueue::open(&db_path).unwrap();

        let holder = lock_writer(&db_path);
        let writer = thread::spawn(move || {
            let inserted = queue.enqueue_all(&entries(&[("a", 1), ("b", 2)])).unwrap();
            (queue, inserted)
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!writer.is_finished());

        holder.execute_batch("COMMIT").unwrap();
        let (queue, inserted) = writer.join().unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(queue.counts().unwrap().queued, 2);
        assert!(queue.has_asset("held").unwrap());
    }

    #[test]
    fn test_open_waits_out_a_held_write_lock() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        JobQueue::open(&db_path).unwrap();

        let holder = lock_writer(&db_path);
        let opener = {
            let db_path = db_path.clone();
            thread::spawn(move || JobQueue::open(&db_path).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!opener.is_finished());

        holder.execute_batch("COMMIT").unwrap();
        opener.join().unwrap().unwrap();
    }

    #[test]
    fn test_read_only_open_leaves_metadata_alone() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        {
            let queue = JobQueue::open(&db_path).unwrap();
            queue.enqueue("a", 1).unwrap();
            queue.set_info(keys::ARCHIVER_VERSION, "0.0.1").unwrap();
        }

        let queue = JobQueue::open_read_only(&db_path).unwrap();
        assert_eq!(queue.counts().unwrap().queued, 1);
        assert_eq!(
            queue.info(keys::ARCHIVER_VERSION).unwrap().as_deref(),
            Some("0.0.1")
        );
        assert!(queue.enqueue("b", 1).is_err());
    }

    #[test]
    fn test_read_only_open_while_writer_holds_lock() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        JobQueue::open(&db_path).unwrap().enqueue("a", 1).unwrap();

        let _holder = lock_writer(&db_path);
        let queue = JobQueue::open_read_only(&db_path).unwrap();
        assert_eq!(queue.counts().unwrap().queued, 1);
        assert!(!queue.has_asset("held").unwrap());
    }

    #[test]
    fn test_read_only_open_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = JobQueue::open_read_only(&dir.path().join("missing.db"));
        assert!(matches!(result, Err(DbError::OpenFailed { .. })));
    }

    #[test]
    fn test_retry_on_contention_retries_busy() {
        let mut attempts = 0;
        let value = retry_on_contention("test", || {
            attempts += 1;
            if attempts < 3 {
                Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    None,
                ))
            } else {
                Ok(7)
            }
        })
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_retry_on_contention_propagates_other_errors() {
        let result: DbResult<()> =
            retry_on_contention("test", || Err(rusqlite::Error::QueryReturnedNoRows));
        assert!(matches!(
            result,
            Err(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        ));
    }
}
