//! Command line argument parsing for the segrank CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::segment::partition::{DEFAULT_MAX_SCORE, DEFAULT_MIN_LEAF_WIDTH};

/// segrank - leaderboard rank estimation over a segment tree
#[derive(Parser, Debug, Clone)]
#[command(name = "segrank")]
#[command(about = "Build, inspect and query segment-tree rank indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct SegrankArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl SegrankArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the partition a domain and leaf width produce
    Layout(LayoutArgs),

    /// Rebuild an index directory from a JSONL file of members
    Load(LoadArgs),

    /// Estimate the rank of a score
    Rank(RankArgs),

    /// Move one member between scores
    Move(MoveArgs),

    /// Show index statistics
    Stats(StatsArgs),

    /// Check the counters for corruption
    Verify(VerifyArgs),

    /// Write a snapshot and truncate the journal
    Checkpoint(CheckpointArgs),
}

/// Partition parameters shared by commands that create an index.
#[derive(Parser, Debug, Clone)]
pub struct DomainArgs {
    /// Upper bound of the score domain [0, MAX_SCORE]
    #[arg(long, default_value_t = DEFAULT_MAX_SCORE)]
    pub max_score: i64,

    /// Minimum leaf width in score units
    #[arg(long, default_value_t = DEFAULT_MIN_LEAF_WIDTH)]
    pub min_leaf_width: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct LayoutArgs {
    #[command(flatten)]
    pub domain: DomainArgs,

    /// List every leaf interval
    #[arg(long)]
    pub leaves: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct LoadArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Members file, one {"member": ..., "score": ...} object per line
    #[arg(value_name = "MEMBERS_FILE")]
    pub members_file: PathBuf,

    /// Leaderboard configuration file (JSON); overrides the domain flags
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub domain: DomainArgs,

    /// Replace the configuration of an existing index
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RankArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Score to rank
    #[arg(value_name = "SCORE", allow_negative_numbers = true)]
    pub score: f64,
}

#[derive(Parser, Debug, Clone)]
pub struct MoveArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Previous score; omit for a new member
    #[arg(long, allow_negative_numbers = true)]
    pub from: Option<f64>,

    /// New score; omit to remove the member
    #[arg(long, allow_negative_numbers = true)]
    pub to: Option<f64>,
}

#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Include every leaf with its counter
    #[arg(long)]
    pub leaves: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct CheckpointArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable format
    Human,
    /// JSON format
    Json,
}
