//! lobi-archiver - Crash-Resumable Crawl-and-Archive Daemon
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use lobi_archiver::archive;
use lobi_archiver::archiver::{load_seeds, Archiver};
use lobi_archiver::config::{self, ArchiveConfig, CliArgs, Command};
use lobi_archiver::db::{keys, JobQueue};
use lobi_archiver::progress::{print_header, print_status, print_summary, ProgressReporter};
use lobi_archiver::storage::{locate_in_volume, locate_partial_in_volume};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match args.command.clone() {
        Some(Command::Status { db }) => run_status(&db),
        Some(Command::Recover {
            db,
            volumes,
            archive,
        }) => run_recover(&db, &volumes, archive.as_deref()),
        Some(Command::Inspect { file, preview }) => run_inspect(&file, preview),
        None => {
            let config = ArchiveConfig::from_args(args).context("Invalid configuration")?;
            run_crawl(config)
        }
    }
}

/// Crawl until the queue drains or Ctrl-C
fn run_crawl(config: ArchiveConfig) -> Result<()> {
    if config.show_progress {
        let volumes: Vec<String> = config
            .volumes
            .iter()
            .map(|v| format!("{} (margin {})", v.root.display(), v.margin))
            .collect();
        print_header(
            &config.base_url,
            config.batch_size,
            &volumes,
            &config.db_path.display().to_string(),
        );
    }

    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(run_crawl_inner(config))
}

async fn run_crawl_inner(config: ArchiveConfig) -> Result<()> {
    let archiver = Archiver::from_config(&config).context("Failed to initialize archiver")?;

    // Setup signal handler for graceful shutdown
    let shutdown_flag = archiver.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing current batch...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    match &config.seeds {
        Some(path) => {
            info!(path = %path.display(), "Seed file found, queueing groups");
            let uids = load_seeds(path)?;
            archiver.seed(uids).await.context("Failed to queue seeds")?;
        }
        None => info!("No seed file, resuming"),
    }

    // Create progress reporter
    let progress = if config.show_progress {
        Some(Arc::new(ProgressReporter::new()))
    } else {
        None
    };

    let ticker = progress.as_ref().map(|p| {
        let p = Arc::clone(p);
        let stats = archiver.stats();
        let started = Instant::now();
        p.set_status("Claiming first batch...");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(250));
            loop {
                interval.tick().await;
                p.update(&stats.snapshot(), started.elapsed());
            }
        })
    });

    // Run the crawl
    let outcome = archiver.run().await;

    if let Some(ticker) = ticker {
        ticker.abort();
    }

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            if let Some(ref p) = progress {
                p.finish("Crawl failed");
            }
            return Err(e).context("Crawl failed");
        }
    };

    // Finish progress
    if let Some(ref p) = progress {
        if result.completed_run {
            p.finish("Crawl completed");
        } else {
            p.finish("Crawl interrupted");
        }
    }

    let queue = JobQueue::open(&config.db_path)?;
    let counts = queue.counts()?;
    if config.show_progress {
        print_summary(&result, Some(&counts), &config.db_path.display().to_string());
    }

    if !result.completed_run {
        info!(queued = counts.queued, "Crawl was interrupted before the queue drained");
    }

    Ok(())
}

/// Print queue counts and run metadata
fn run_status(db: &Path) -> Result<()> {
    if !db.exists() {
        bail!("Database '{}' does not exist", db.display());
    }
    let queue = JobQueue::open_read_only(db).context("Failed to open database")?;
    let counts = queue.counts()?;

    let fields = [
        ("Status", keys::STATUS),
        ("Base URL", keys::BASE_URL),
        ("Started", keys::START_TIME),
        ("Ended", keys::END_TIME),
        ("Archiver", keys::ARCHIVER_VERSION),
    ];
    let mut info = Vec::with_capacity(fields.len());
    for (label, key) in fields {
        info.push((label, queue.info(key)?));
    }

    print_status(&counts, &info);
    Ok(())
}

/// Operator recovery after a crash or a failed save
fn run_recover(db: &Path, volumes: &[String], archive: Option<&str>) -> Result<()> {
    if !db.exists() {
        bail!("Database '{}' does not exist", db.display());
    }

    if let Some(name) = archive {
        if volumes.is_empty() {
            bail!("--archive needs at least one --volume to search");
        }
        let specs = config::parse_volumes(volumes)?;
        let mut removed = 0usize;
        let mut kept = 0usize;
        for spec in &specs {
            let partial = locate_partial_in_volume(&spec.root, name);
            kept += locate_in_volume(&spec.root, name)
                .len()
                .saturating_sub(partial.len());
            for path in partial {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove '{}'", path.display()))?;
                info!(path = %path.display(), "Removed partial archive");
                removed += 1;
            }
        }
        if kept > 0 {
            info!(archive = name, copies = kept, "Kept complete copies of the archive");
        }
        if removed == 0 {
            warn!(archive = name, "No partial copy of the archive found on any volume");
        }
    }

    let queue = JobQueue::open(db).context("Failed to open database")?;
    let reset = queue.reset_fetching()?;
    queue.set_info(keys::STATUS, "recovered")?;
    info!(jobs = reset, "Reset FETCHING jobs to QUEUED");
    println!("Reset {} job(s) to QUEUED", reset);
    Ok(())
}

/// List the records of a packed archive
fn run_inspect(file: &Path, preview: bool) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read '{}'", file.display()))?;
    let records = archive::decode(&bytes).context("Failed to decode archive")?;

    println!("{}: {} record(s), {} bytes", file.display(), records.len(), bytes.len());
    for record in &records {
        if preview {
            let head = &record.body[..record.body.len().min(80)];
            println!(
                "  job {:>10}  {:>8} bytes  {}",
                record.job_id,
                record.body.len(),
                String::from_utf8_lossy(head)
            );
        } else {
            println!("  job {:>10}  {:>8} bytes", record.job_id, record.body.len());
        }
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("lobi_archiver=debug,warn")
    } else {
        EnvFilter::new("lobi_archiver=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
