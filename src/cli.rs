//! Command-line interface definitions
//!
//! This module organizes CLI arguments by **functional usage** - each group
//! contains the options needed by a specific component or subsystem.

use crate::bridge::BridgeOptions;
use crate::glob::GlobOptions;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Async path queries and lazy glob traversal on compio
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// What to do
    #[command(subcommand)]
    pub command: Command,

    /// Syscall bridge configuration (pool bound, retries, paging)
    #[command(flatten)]
    pub bridge: BridgeConfig,

    /// Output and logging configuration
    #[command(flatten)]
    pub output: OutputConfig,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print paths under ROOT matching PATTERN, one per line
    Glob {
        /// Glob pattern relative to ROOT (`*`, `?`, `[...]`, `**`)
        #[arg(value_name = "PATTERN")]
        pattern: String,

        /// Directory to search from
        #[arg(value_name = "ROOT", default_value = ".")]
        root: PathBuf,

        /// Glob traversal options
        #[command(flatten)]
        glob: GlobConfig,
    },

    /// Print metadata of each PATH
    Stat {
        /// Paths to inspect
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,

        /// Describe symlinks themselves instead of their targets
        #[arg(long)]
        no_follow: bool,
    },

    /// List the children of DIR
    Ls {
        /// Directory to list
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Include names starting with `.`
        #[arg(short, long)]
        all: bool,
    },

    /// Print the contents of FILE
    Cat {
        /// File to print
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

// ============================================================================
// FUNCTIONAL GROUPS: Organized by what component consumes them
// ============================================================================

/// Syscall bridge configuration
///
/// Used by: `SyscallBridge::new()` through `Fs::new()`
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Bridge Options")]
pub struct BridgeConfig {
    /// Maximum blocking filesystem calls in flight (0 = 4 per CPU core)
    #[arg(long, global = true, default_value = "0")]
    pub max_in_flight: usize,

    /// Retries after "too many open files" and similar transient errors
    #[arg(long, global = true, default_value = "4")]
    pub retry_attempts: u32,

    /// Delay before the first retry in milliseconds (doubles each retry)
    #[arg(long, global = true, default_value = "5")]
    pub retry_backoff_ms: u64,

    /// Directory entries fetched per readdir dispatch
    #[arg(long, global = true, default_value = "64")]
    pub dir_page_size: usize,
}

impl BridgeConfig {
    /// Validate bridge configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_in_flight` is greater than 10000
    /// - `dir_page_size` is 0 or greater than 65536
    /// - `retry_attempts` is greater than 16
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight > 10_000 {
            anyhow::bail!(
                "Max in flight must be between 0 (auto) and 10000, got: {}",
                self.max_in_flight
            );
        }

        if self.dir_page_size == 0 || self.dir_page_size > 65_536 {
            anyhow::bail!(
                "Directory page size must be between 1 and 65536, got: {}",
                self.dir_page_size
            );
        }

        if self.retry_attempts > 16 {
            anyhow::bail!(
                "Retry attempts must be <= 16, got: {}",
                self.retry_attempts
            );
        }

        Ok(())
    }

    /// Convert to the options struct used by `SyscallBridge`
    ///
    /// Creates validated `BridgeOptions` with proper `NonZeroUsize` guarantees.
    #[must_use]
    pub fn to_options(&self) -> BridgeOptions {
        let options = if self.max_in_flight == 0 {
            BridgeOptions::default()
        } else {
            BridgeOptions::new(self.max_in_flight)
        };
        options
            .with_retry(
                self.retry_attempts,
                Duration::from_millis(self.retry_backoff_ms),
            )
            .with_dir_page_size(self.dir_page_size)
    }
}

/// Glob traversal configuration
///
/// Used by: `FsOps::glob_with()`
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Glob Options")]
pub struct GlobConfig {
    /// Report unreadable directories instead of skipping them
    #[arg(long)]
    pub strict: bool,

    /// Visit entries in name order instead of listing order
    #[arg(long)]
    pub sorted: bool,

    /// Match names case-insensitively
    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    /// Stop after this many matches
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

impl GlobConfig {
    /// Convert to the options struct used by the glob selector
    #[must_use]
    pub fn to_options(&self) -> GlobOptions {
        let options = GlobOptions::new().strict(self.strict).sorted(self.sorted);
        if self.ignore_case {
            options.case_sensitive(false)
        } else {
            options
        }
    }
}

/// Output and logging configuration
///
/// Used by: `main()`, logging initialization
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Output Options")]
pub struct OutputConfig {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl OutputConfig {
    /// Maximum tracing level for the chosen verbosity
    #[must_use]
    pub const fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

// ============================================================================
// IMPLEMENTATION: Convenience methods and validation
// ============================================================================

impl Args {
    /// Validate command-line arguments
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - Bridge options are out of bounds
    /// - Both --quiet and --verbose options are used
    /// - A glob limit of zero is given
    pub fn validate(&self) -> Result<()> {
        self.bridge.validate()?;

        if self.output.quiet && self.output.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        if let Command::Glob { glob, .. } = &self.command {
            if glob.limit == Some(0) {
                anyhow::bail!("Glob limit must be greater than 0");
            }
        }

        Ok(())
    }
}
