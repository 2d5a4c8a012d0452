//! Progress reporting for the archiver
//!
//! Provides a live spinner fed from [`ArchiveStats`](crate::archiver::ArchiveStats),
//! start/end banners, and the windowed throughput report logged every
//! `measure_window` batches.

use crate::archiver::{ArchiveProgress, ArchiveResult};
use crate::db::QueueCounts;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

/// Progress reporter that displays crawl status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ArchiveProgress, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            progress.jobs_fetched as f64 / secs
        } else {
            0.0
        };

        let msg = format!(
            "Batches: {} | Jobs: {} | Archived: {} | New jobs: {} | Assets: {} | Requeued: {} | Rate: {:.0}/s",
            format_number(progress.batches),
            format_number(progress.jobs_fetched),
            format_size(progress.bytes_archived, BINARY),
            format_number(progress.children_enqueued),
            format_number(progress.assets_added),
            format_number(progress.requeued),
            rate,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall time spent in each phase of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTimings {
    pub claim: Duration,
    pub request: Duration,
    pub save: Duration,
    pub handle: Duration,
}

impl BatchTimings {
    pub fn total(&self) -> Duration {
        self.claim + self.request + self.save + self.handle
    }
}

/// Accumulates batch timings and emits a report once per window
#[derive(Debug)]
pub struct ThroughputMeter {
    window: usize,
    batches: usize,
    requests: u64,
    totals: BatchTimings,
}

impl ThroughputMeter {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            batches: 0,
            requests: 0,
            totals: BatchTimings::default(),
        }
    }

    /// Add one batch; returns the report when the window fills, then resets
    pub fn record(&mut self, timings: &BatchTimings, requests: usize) -> Option<ThroughputReport> {
        self.batches += 1;
        self.requests += requests as u64;
        self.totals.claim += timings.claim;
        self.totals.request += timings.request;
        self.totals.save += timings.save;
        self.totals.handle += timings.handle;

        if self.batches < self.window {
            return None;
        }

        let per_loop = |d: Duration| millis(d) / self.batches as f64;
        let report = ThroughputReport {
            ms_per_request: if self.requests > 0 {
                millis(self.totals.request) / self.requests as f64
            } else {
                0.0
            },
            loop_ms: per_loop(self.totals.total()),
            claim_ms: per_loop(self.totals.claim),
            request_ms: per_loop(self.totals.request),
            save_ms: per_loop(self.totals.save),
            handle_ms: per_loop(self.totals.handle),
        };

        self.batches = 0;
        self.requests = 0;
        self.totals = BatchTimings::default();
        Some(report)
    }
}

/// Averages over one measurement window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Batch fetch time divided by requests in the window
    pub ms_per_request: f64,
    pub loop_ms: f64,
    pub claim_ms: f64,
    pub request_ms: f64,
    pub save_ms: f64,
    pub handle_ms: f64,
}

impl ThroughputReport {
    pub fn log(&self) {
        info!(
            ms_per_req = round2(self.ms_per_request),
            loop_ms = round2(self.loop_ms),
            claim_ms = round2(self.claim_ms),
            request_ms = round2(self.request_ms),
            save_ms = round2(self.save_ms),
            handle_ms = round2(self.handle_ms),
            "Throughput"
        );
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the crawl results
pub fn print_summary(result: &ArchiveResult, counts: Option<&QueueCounts>, db_path: &str) {
    let secs = result.duration.as_secs_f64();
    let rate = if secs > 0.0 {
        result.jobs_fetched as f64 / secs
    } else {
        0.0
    };

    let title = if result.completed_run {
        style("Crawl Complete").green().bold()
    } else {
        style("Crawl Interrupted").yellow().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Batches:").bold(), format_number(result.batches));
    println!(
        "  {} {} ({} completed)",
        style("Jobs fetched:").bold(),
        format_number(result.jobs_fetched),
        format_number(result.completed)
    );
    println!(
        "  {} {}",
        style("Archived:").bold(),
        format_size(result.bytes_archived, BINARY)
    );
    println!(
        "  {} {} jobs, {} assets",
        style("Discovered:").bold(),
        format_number(result.children_enqueued),
        format_number(result.assets_added)
    );
    println!(
        "  {} {:.1}s ({:.0} jobs/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    if result.remote_errors > 0 {
        println!(
            "  {} {}",
            style("Remote errors:").yellow().bold(),
            format_number(result.remote_errors)
        );
    }
    if result.requeued > 0 {
        println!(
            "  {} {}",
            style("Requeued:").yellow().bold(),
            format_number(result.requeued)
        );
    }
    if let Some(counts) = counts {
        println!(
            "  {} {} queued, {} fetching",
            style("Remaining:").bold(),
            format_number(counts.queued),
            format_number(counts.fetching)
        );
    }
    println!("  {} {}", style("Database:").bold(), db_path);
    println!();
}

/// Print a header at the start of the crawl
pub fn print_header(base_url: &str, batch_size: usize, volumes: &[String], db_path: &str) {
    println!();
    println!(
        "{} {}",
        style("lobi-archiver").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), base_url);
    println!("  {} {}", style("Batch size:").bold(), batch_size);
    println!("  {} {}", style("Database:").bold(), db_path);
    for volume in volumes {
        println!("  {} {}", style("Volume:").bold(), volume);
    }
    println!();
}

/// Print queue counts and run metadata for `status`
pub fn print_status(counts: &QueueCounts, info: &[(&str, Option<String>)]) {
    println!();
    println!("{}", style("Archive Status").cyan().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Queued:").bold(), format_number(counts.queued));
    println!("  {} {}", style("Fetching:").bold(), format_number(counts.fetching));
    println!("  {} {}", style("Completed:").bold(), format_number(counts.completed));
    println!("  {} {}", style("Assets:").bold(), format_number(counts.assets));
    for (key, value) in info {
        if let Some(value) = value {
            println!("  {} {}", style(format!("{}:", key)).bold(), value);
        }
    }
    if counts.fetching > 0 {
        println!();
        println!(
            "  {}",
            style("Jobs are stuck in FETCHING; run 'recover' before resuming").yellow()
        );
    }
    println!();
}
