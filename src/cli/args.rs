//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the ring scenario runner
#[derive(Debug, Parser)]
#[command(name = "chord-ring-sim")]
#[command(about = "Build a Chord-style ring, store records, churn membership and verify nothing is lost", long_about = None)]
pub struct CliArgs {
    /// JSON scenario file; flags given on the command line take precedence
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Node names, joined in order through the first one
    #[arg(short, long, value_delimiter = ',', value_name = "NAMES")]
    pub nodes: Vec<String>,

    /// Keep node namespaces as directories under DIR (in memory if omitted)
    #[arg(short, long, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Record to store, as NAME=VALUE (repeatable)
    #[arg(long = "store", value_name = "NAME=VALUE")]
    pub records: Vec<String>,

    /// File to seed across the ring and leech back
    #[arg(long, value_name = "FILE")]
    pub seed_file: Option<PathBuf>,

    /// Base name for seeded parts (defaults to the file stem)
    #[arg(long, value_name = "NAME")]
    pub seed_name: Option<String>,

    /// Number of parts to split a seeded file into
    #[arg(short, long)]
    pub parts: Option<usize>,

    /// Where to write the seed manifest
    #[arg(long, value_name = "FILE")]
    pub manifest_out: Option<PathBuf>,

    /// Node to remove after storing (repeatable)
    #[arg(short, long = "leave", value_name = "NAME")]
    pub leaves: Vec<String>,

    /// Random join/leave rounds to run after the scripted leaves
    #[arg(long)]
    pub churn: Option<usize>,

    /// Seed for the churn random number generator
    #[arg(long)]
    pub rng_seed: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
