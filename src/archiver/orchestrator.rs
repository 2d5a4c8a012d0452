//! The crawl loop: claim, fetch, pack, classify, reconcile

use crate::archive::{batch_ref, PackedBatchWriter};
use crate::archiver::{ArchiveResult, ArchiveStats};
use crate::config::ArchiveConfig;
use crate::db::{keys, Job, JobQueue};
use crate::discovery::{paths, Discovery, DiscoveryPolicy, LobiPolicy};
use crate::error::{ArchiverError, DbError, DbResult, Result, StorageError, TransientParse};
use crate::fetch::{FetchResponse, Fetcher, HttpFetcher, RetryPolicy};
use crate::progress::{BatchTimings, ThroughputMeter};
use crate::storage::{FsSpaceProbe, VolumeAllocator};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Knobs of the batch loop
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    /// Jobs claimed per iteration
    pub batch_size: usize,

    /// Fetch retry delays
    pub retry: RetryPolicy,

    /// Batches per throughput report
    pub measure_window: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            measure_window: 100,
        }
    }
}

impl From<&ArchiveConfig> for BatchSettings {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            retry: config.retry,
            measure_window: config.measure_window,
        }
    }
}

/// What one batch iteration did
enum BatchOutcome {
    /// Nothing left to claim
    Drained,
    Processed { jobs: usize, timings: BatchTimings },
}

/// Drives the crawl until the queue drains or shutdown is requested
pub struct Archiver {
    queue: Arc<Mutex<JobQueue>>,
    allocator: Arc<VolumeAllocator>,
    fetcher: Arc<dyn Fetcher>,
    policy: Arc<dyn DiscoveryPolicy>,
    settings: BatchSettings,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ArchiveStats>,
}

impl Archiver {
    /// Assemble an archiver from its collaborators
    pub fn new(
        queue: JobQueue,
        allocator: VolumeAllocator,
        fetcher: Arc<dyn Fetcher>,
        policy: Arc<dyn DiscoveryPolicy>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(queue)),
            allocator: Arc::new(allocator),
            fetcher,
            policy,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ArchiveStats::default()),
        }
    }

    /// Open the queue, prepare volumes and build the HTTP client
    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        let queue = JobQueue::open(&config.db_path)?;

        let mut volumes = Vec::with_capacity(config.volumes.len());
        for spec in &config.volumes {
            let volume = spec.prepare().map_err(|source| StorageError::VolumeSetup {
                root: spec.root.clone(),
                source,
            })?;
            info!(
                root = %volume.root.display(),
                margin = volume.margin,
                "Archive volume"
            );
            volumes.push(volume);
        }
        let allocator = VolumeAllocator::new(volumes, Box::new(FsSpaceProbe))?;

        let fetcher = HttpFetcher::new(&config.base_url, config.timeout)?;
        queue.set_info(keys::BASE_URL, &config.base_url)?;

        Ok(Self::new(
            queue,
            allocator,
            Arc::new(fetcher),
            Arc::new(LobiPolicy::new(config.follow_users)),
            BatchSettings::from(config),
        ))
    }

    /// Get shutdown flag for signal handlers
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Live counters, for progress display
    pub fn stats(&self) -> Arc<ArchiveStats> {
        Arc::clone(&self.stats)
    }

    /// Queue a group-info job for each uid; returns how many were new
    pub async fn seed(&self, uids: Vec<String>) -> Result<usize> {
        let entries: Vec<(String, i32)> = uids.iter().map(|uid| paths::group_info(uid)).collect();
        let total = entries.len();
        let inserted = self.with_queue(move |q| q.enqueue_all(&entries)).await?;
        info!(seeds = total, new = inserted, "Seed groups queued");
        Ok(inserted)
    }

    /// Run batches until the queue drains or shutdown is requested
    pub async fn run(&self) -> Result<ArchiveResult> {
        let start_time = Instant::now();
        let started_at = Utc::now().to_rfc3339();

        let stranded = self.with_queue(|q| q.counts()).await?.fetching;
        if stranded > 0 {
            warn!(
                jobs = stranded,
                "Jobs left in FETCHING by an earlier run will not be claimed; run 'recover' to reset them"
            );
        }

        self.with_queue(move |q| {
            q.set_info(keys::START_TIME, &started_at)?;
            q.set_info(keys::STATUS, "running")
        })
        .await?;

        info!(batch_size = self.settings.batch_size, "Starting crawl");

        let mut meter = ThroughputMeter::new(self.settings.measure_window);
        let mut drained = false;

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.run_batch().await {
                Ok(BatchOutcome::Drained) => {
                    drained = true;
                    break;
                }
                Ok(BatchOutcome::Processed { jobs, timings }) => {
                    if let Some(report) = meter.record(&timings, jobs) {
                        report.log();
                    }
                }
                Err(e) => {
                    self.finish("failed").await;
                    return Err(e);
                }
            }
        }

        let status = if drained { "completed" } else { "interrupted" };
        self.finish(status).await;

        let progress = self.stats.snapshot();
        let duration = start_time.elapsed();

        info!(
            batches = progress.batches,
            jobs = progress.jobs_fetched,
            bytes = progress.bytes_archived,
            requeued = progress.requeued,
            duration_secs = duration.as_secs(),
            status,
            "Crawl finished"
        );

        Ok(ArchiveResult::new(progress, duration, drained))
    }

    /// Record the end of a run; failures here are only logged
    async fn finish(&self, status: &'static str) {
        let ended_at = Utc::now().to_rfc3339();
        let result = self
            .with_queue(move |q| {
                q.set_info(keys::END_TIME, &ended_at)?;
                q.set_info(keys::STATUS, status)
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to record run status");
        }
    }

    async fn run_batch(&self) -> Result<BatchOutcome> {
        let started = Instant::now();
        let batch_size = self.settings.batch_size;
        let jobs = self.with_queue(move |q| q.claim_batch(batch_size)).await?;
        if jobs.is_empty() {
            info!("Queue drained");
            return Ok(BatchOutcome::Drained);
        }
        let claim = started.elapsed();

        let batch = batch_ref(jobs[0].id);
        debug!(batch = %batch, jobs = jobs.len(), "Claimed batch");

        let phase = Instant::now();
        let responses = self.fetch_all(&jobs).await?;
        let request = phase.elapsed();

        let phase = Instant::now();
        let bytes = self.persist(&jobs, &responses, &batch).await?;
        let save = phase.elapsed();
        self.stats.record_batch(jobs.len() as u64, bytes as u64);

        let phase = Instant::now();
        let count = jobs.len();
        self.reconcile(jobs, responses, batch).await?;
        let handle = phase.elapsed();

        Ok(BatchOutcome::Processed {
            jobs: count,
            timings: BatchTimings {
                claim,
                request,
                save,
                handle,
            },
        })
    }

    /// Fetch every job concurrently, one task per job
    async fn fetch_all(&self, jobs: &[Job]) -> Result<Vec<FetchResponse>> {
        let handles: Vec<_> = jobs
            .iter()
            .map(|job| {
                let fetcher = Arc::clone(&self.fetcher);
                let retry = self.settings.retry;
                let path = job.path.clone();
                tokio::spawn(async move { retry.fetch(&*fetcher, &path).await })
            })
            .collect();

        let mut responses = Vec::with_capacity(handles.len());
        let mut failure = None;
        for handle in handles {
            match handle.await {
                Ok(resp) => responses.push(resp),
                Err(e) => failure = Some(e),
            }
        }

        if let Some(e) = failure {
            self.requeue_batch(jobs).await?;
            return Err(ArchiverError::Task(format!("fetch task failed: {}", e)));
        }
        Ok(responses)
    }

    /// Pack successful bodies and write the batch archive
    ///
    /// On failure every job of the batch is requeued before the error is
    /// returned.
    async fn persist(&self, jobs: &[Job], responses: &[FetchResponse], batch: &str) -> Result<usize> {
        let mut writer = PackedBatchWriter::new();
        for (job, resp) in jobs.iter().zip(responses) {
            if !resp.is_success() {
                continue;
            }
            if let Err(e) = writer.push(job.id, &resp.body) {
                self.requeue_batch(jobs).await?;
                return Err(e.into());
            }
        }

        let records = writer.records();
        let bytes = writer.finish();
        let size = bytes.len();

        let allocator = Arc::clone(&self.allocator);
        let key = batch.to_string();
        let saved = tokio::task::spawn_blocking(move || allocator.save(&key, &bytes))
            .await
            .map_err(|e| ArchiverError::Task(e.to_string()))?;

        if !saved {
            error!(batch, bytes = size, jobs = jobs.len(), "Failed to save batch archive");
            self.requeue_batch(jobs).await?;
            return Err(StorageError::SaveFailed {
                batch_ref: batch.to_string(),
                bytes: size,
                job_ids: jobs.iter().map(|j| j.id).collect(),
                status_codes: responses.iter().map(|r| r.status).collect(),
            }
            .into());
        }

        debug!(batch, records, bytes = size, "Batch archived");
        Ok(size)
    }

    /// Classify, then record children, assets and outcomes in the queue
    async fn reconcile(&self, jobs: Vec<Job>, responses: Vec<FetchResponse>, batch: String) -> Result<()> {
        let outcomes = self.classify_all(&jobs, responses).await?;

        let mut children = Vec::new();
        let mut assets = Vec::new();
        let mut completions = Vec::with_capacity(jobs.len());
        let mut requeue = Vec::new();
        let mut remote_errors = 0u64;

        for (job, outcome) in jobs.into_iter().zip(outcomes) {
            match outcome {
                Ok(found) => {
                    if found.code != 200 {
                        remote_errors += 1;
                    }
                    children.extend(found.children);
                    assets.extend(found.assets);
                    completions.push((job, found.code));
                }
                Err(e) => {
                    warn!(job = job.id, error = %e, "Unreadable body, requeueing (upstream restarting?)");
                    requeue.push(job);
                }
            }
        }

        let completed = completions.len() as u64;
        let requeued = requeue.len() as u64;

        let (new_children, new_assets) = self
            .with_queue(move |q| {
                let new_children = q.enqueue_all(&children)?;
                let new_assets = q.add_assets_all(&assets)?;
                q.complete_all(&completions, &batch)?;
                for job in &requeue {
                    q.requeue(job)?;
                }
                Ok((new_children, new_assets))
            })
            .await?;

        self.stats.record_completed(completed, remote_errors);
        self.stats.record_requeued(requeued);
        self.stats
            .record_discovered(new_children as u64, new_assets as u64);
        Ok(())
    }

    /// Run the discovery policy for each 200 response on the blocking pool
    ///
    /// Results come back in batch order. Non-200 responses complete with
    /// their status and are never classified.
    async fn classify_all(
        &self,
        jobs: &[Job],
        responses: Vec<FetchResponse>,
    ) -> Result<Vec<std::result::Result<Discovery, TransientParse>>> {
        let mut slots: Vec<Option<std::result::Result<Discovery, TransientParse>>> =
            Vec::with_capacity(jobs.len());
        let mut pending = Vec::new();

        for (i, (job, resp)) in jobs.iter().zip(responses).enumerate() {
            if resp.is_success() {
                let policy = Arc::clone(&self.policy);
                let path = job.path.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    policy.classify(&resp.body, &path, resp.status)
                });
                pending.push((i, handle));
                slots.push(None);
            } else {
                slots.push(Some(Ok(Discovery::completed(resp.status))));
            }
        }

        for (i, handle) in pending {
            let outcome = handle
                .await
                .map_err(|e| ArchiverError::Task(format!("classification failed: {}", e)))?;
            slots[i] = Some(outcome);
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| ArchiverError::Task("missing classification".into())))
            .collect()
    }

    async fn requeue_batch(&self, jobs: &[Job]) -> Result<()> {
        let jobs = jobs.to_vec();
        let count = jobs.len() as u64;
        self.with_queue(move |q| q.requeue_all(&jobs)).await?;
        self.stats.record_requeued(count);
        Ok(())
    }

    /// Run a queue operation on the blocking pool
    async fn with_queue<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&JobQueue) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let result = tokio::task::spawn_blocking(move || {
            let guard = queue.lock().map_err(|_| DbError::Poisoned)?;
            op(&guard)
        })
        .await
        .map_err(|e| ArchiverError::Task(e.to_string()))?;
        Ok(result?)
    }
}
