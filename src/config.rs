//! Configuration types for lobi-archiver
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Volume specification parsing (`ROOT[:MARGIN]`)

use crate::error::ConfigError;
use crate::fetch::RetryPolicy;
use crate::storage::{Margin, Volume};
use clap::Parser;
use reqwest::Url;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Batch size limits
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 1000;

/// Jobs claimed per orchestrator iteration
pub const DEFAULT_BATCH_SIZE: usize = 140;

/// Upstream API root
pub const DEFAULT_BASE_URL: &str = "https://web.lobi.co/";

/// Headroom kept free on a volume when its spec names none
pub const DEFAULT_MARGIN: Margin = Margin::Percent(1.0);

/// Crash-resumable crawler that archives a group/user API into packed batches
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lobi-archiver",
    version,
    about = "Crash-resumable crawler that archives a group/user API into packed batches",
    long_about = "Crawls the group/user API breadth-first by priority, packing every batch of \
                  fetched bodies into one archive file spread across several volumes.\n\n\
                  Progress lives in a SQLite job queue: restart without --seeds to resume.\n\
                  After a crash, run 'recover' before resuming.",
    after_help = "EXAMPLES:\n    \
        lobi-archiver --db lobi.db --volume /mnt/a --volume /mnt/b:1GB --seeds groups.txt\n    \
        lobi-archiver --db lobi.db --volume /mnt/a --volume /mnt/b:1GB      # resume\n    \
        lobi-archiver status --db lobi.db\n    \
        lobi-archiver recover --db lobi.db --volume /mnt/a --volume /mnt/b --archive packed_4201\n    \
        lobi-archiver inspect /mnt/a/17/packed_4201",
    args_conflicts_with_subcommands = true
)]
pub struct CliArgs {
    /// Subcommand (status, recover, inspect); crawling when absent
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Job queue database
    #[arg(long, default_value = "lobi.db", value_name = "FILE", env = "LOBI_ARCHIVER_DB")]
    pub db: PathBuf,

    /// Archive volume as ROOT[:MARGIN], e.g. /mnt/a:1GB or /mnt/b:1% (repeatable, filled in order)
    #[arg(long = "volume", value_name = "ROOT[:MARGIN]", action = clap::ArgAction::Append)]
    pub volumes: Vec<String>,

    /// Jobs claimed and fetched concurrently per batch
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "NUM")]
    pub batch_size: usize,

    /// API base URL request paths are resolved against
    #[arg(long, default_value = DEFAULT_BASE_URL, value_name = "URL")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "8", value_name = "SECS")]
    pub timeout: u64,

    /// Delay before retrying after a 502 Bad Gateway
    #[arg(long, default_value = "3000", value_name = "MS")]
    pub bad_gateway_delay: u64,

    /// Delay before retrying after a timeout or transport error
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub retry_delay: u64,

    /// Batches per throughput report
    #[arg(long, default_value = "100", value_name = "BATCHES")]
    pub measure_window: usize,

    /// Newline-separated group uids to seed a fresh crawl with
    #[arg(long, value_name = "FILE")]
    pub seeds: Option<PathBuf>,

    /// Expand contact and follower lists into further users (reaches the whole user base)
    #[arg(long)]
    pub follow_users: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Subcommands
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Show job counts and run metadata
    Status {
        /// Job queue database
        #[arg(long, default_value = "lobi.db", value_name = "FILE", env = "LOBI_ARCHIVER_DB")]
        db: PathBuf,
    },

    /// Reset jobs stranded in FETCHING after a crash
    Recover {
        /// Job queue database
        #[arg(long, default_value = "lobi.db", value_name = "FILE", env = "LOBI_ARCHIVER_DB")]
        db: PathBuf,

        /// Archive volume roots to search for a partial archive (repeatable)
        #[arg(long = "volume", value_name = "ROOT[:MARGIN]", action = clap::ArgAction::Append)]
        volumes: Vec<String>,

        /// Archive name whose unreadable copies are deleted before resetting,
        /// e.g. packed_4201; copies that decode are kept
        #[arg(long, value_name = "NAME")]
        archive: Option<String>,
    },

    /// List the records of a packed archive file
    Inspect {
        /// Archive file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Also print the first bytes of each body
        #[arg(long)]
        preview: bool,
    },
}

/// A `--volume` argument before its margin is resolved against the filesystem
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub root: PathBuf,
    pub margin: Margin,
}

impl VolumeSpec {
    /// Parse `ROOT` or `ROOT:MARGIN`
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidVolume {
            spec: spec.to_string(),
            reason,
        };

        let (root, margin) = match spec.rsplit_once(':') {
            Some((root, margin)) => (root, Margin::parse(margin).map_err(invalid)?),
            None => (spec, DEFAULT_MARGIN),
        };

        if root.trim().is_empty() {
            return Err(invalid("empty root directory".to_string()));
        }

        Ok(Self {
            root: PathBuf::from(root),
            margin,
        })
    }

    /// Create the root if needed and turn the margin into bytes
    pub fn prepare(&self) -> io::Result<Volume> {
        fs::create_dir_all(&self.root)?;
        let margin = self.margin.resolve(&self.root)?;
        Ok(Volume::new(self.root.clone(), margin))
    }
}

/// Parse every `--volume` argument
pub fn parse_volumes(specs: &[String]) -> Result<Vec<VolumeSpec>, ConfigError> {
    specs.iter().map(|s| VolumeSpec::parse(s)).collect()
}

/// Validated runtime configuration for a crawl
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Job queue database path
    pub db_path: PathBuf,

    /// Archive volumes in fill order
    pub volumes: Vec<VolumeSpec>,

    /// Jobs per batch
    pub batch_size: usize,

    /// Normalized base URL (always ends with `/`)
    pub base_url: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Fetch retry delays
    pub retry: RetryPolicy,

    /// Batches per throughput report
    pub measure_window: usize,

    /// Seed file; `None` resumes
    pub seeds: Option<PathBuf>,

    /// Expand contact/follower lists
    pub follow_users: bool,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl ArchiveConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        // Validate batch size
        if args.batch_size < MIN_BATCH_SIZE || args.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        if args.measure_window == 0 {
            return Err(ConfigError::InvalidMeasureWindow);
        }

        if args.volumes.is_empty() {
            return Err(ConfigError::NoVolumes);
        }
        let volumes = parse_volumes(&args.volumes)?;

        let base_url = normalize_base_url(&args.base_url)?;

        // Validate seed file
        if let Some(ref seeds) = args.seeds {
            if !seeds.is_file() {
                return Err(ConfigError::InvalidSeedFile {
                    path: seeds.clone(),
                    reason: "File does not exist".to_string(),
                });
            }
        }

        validate_db_path(&args.db)?;

        Ok(Self {
            db_path: args.db,
            volumes,
            batch_size: args.batch_size,
            base_url,
            timeout: Duration::from_secs(args.timeout),
            retry: RetryPolicy {
                retry_delay: Duration::from_millis(args.retry_delay),
                bad_gateway_delay: Duration::from_millis(args.bad_gateway_delay),
            },
            measure_window: args.measure_window,
            seeds: args.seeds,
            follow_users: args.follow_users,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}

/// Check that the database's parent directory exists
pub fn validate_db_path(db: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = db.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ConfigError::InvalidDbPath {
                path: db.to_path_buf(),
                reason: format!("Parent directory '{}' does not exist", parent.display()),
            });
        }
    }
    Ok(())
}

/// Parse the base URL, adding the trailing slash relative joins need
fn normalize_base_url(url: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidBaseUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    let mut normalized = parsed.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}
