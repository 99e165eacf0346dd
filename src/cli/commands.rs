//! Command implementations for the segrank CLI.
//!
//! An index directory holds `ranking.json` next to the counter snapshot and
//! journal of a [`FileCounterStore`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::{Result, SegrankError};
use crate::ranking::{RankCoordinator, RankingConfig};
use crate::segment::index::SegmentIndex;
use crate::segment::partition::{Partition, PartitionConfig};
use crate::storage::file::{FileCounterStore, FileCounterStoreConfig};
use crate::storage::memory::{MemoryProfileStore, MemoryScoreStore};
use crate::storage::traits::{CounterStore, ExactScoreStore};
use crate::util::score::round_score;

/// Name of the leaderboard configuration inside an index directory.
pub const CONFIG_FILE: &str = "ranking.json";

/// One line of a members file.
#[derive(Debug, Deserialize)]
struct MemberRecord {
    member: String,
    score: f64,
}

/// An index directory opened for reading and writing.
struct OpenIndex {
    config: RankingConfig,
    store: Arc<FileCounterStore>,
    index: SegmentIndex,
}

/// Execute a CLI command.
pub fn execute_command(args: SegrankArgs) -> Result<()> {
    match &args.command {
        Command::Layout(layout_args) => show_layout(layout_args, &args),
        Command::Load(load_args) => load_members(load_args, &args),
        Command::Rank(rank_args) => estimate_rank(rank_args, &args),
        Command::Move(move_args) => move_member(move_args, &args),
        Command::Stats(stats_args) => show_stats(stats_args, &args),
        Command::Verify(verify_args) => verify_index(verify_args, &args),
        Command::Checkpoint(checkpoint_args) => checkpoint(checkpoint_args, &args),
    }
}

fn show_layout(args: &LayoutArgs, cli_args: &SegrankArgs) -> Result<()> {
    let partition = Partition::build(args.domain.max_score, args.domain.min_leaf_width)?;
    let leaves = args.leaves.then(|| {
        partition
            .boundaries()
            .iter()
            .map(|key| key.to_string())
            .collect::<Vec<_>>()
    });

    output_result(
        "Partition layout",
        &LayoutResult {
            max_score: partition.max_score(),
            min_leaf_width: partition.min_leaf_width(),
            leaf_count: partition.leaf_count(),
            node_count: partition.node_count(),
            depth: partition.depth(),
            leaves,
        },
        cli_args,
    )
}

fn load_members(args: &LoadArgs, cli_args: &SegrankArgs) -> Result<()> {
    let start_time = Instant::now();
    let config_path = args.index_path.join(CONFIG_FILE);

    let config = match &args.config {
        Some(path) => RankingConfig::from_json_file(path)?,
        None => RankingConfig::builder()
            .index(PartitionConfig::new(
                args.domain.max_score,
                args.domain.min_leaf_width,
            ))
            .build()?,
    };

    if config_path.exists() && !args.force {
        let existing = RankingConfig::from_json_file(&config_path)?;
        if existing.index != config.index {
            return Err(SegrankError::config(format!(
                "{} was built for a different domain; use --force to replace it",
                args.index_path.display()
            )));
        }
    }

    let store = Arc::new(FileCounterStore::open(FileCounterStoreConfig::new(
        &args.index_path,
    ))?);
    config.save_json_file(&config_path)?;

    let partition = Partition::with_config(config.index.clone())?;
    let exact = Arc::new(MemoryScoreStore::new());
    let reader = BufReader::new(File::open(&args.members_file)?);
    let mut lines_skipped = 0;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<MemberRecord>(&line) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("line {}: {e}", line_num + 1);
                lines_skipped += 1;
                continue;
            }
        };
        if let Err(e) = partition.check_domain(record.score) {
            log::warn!("line {}: {e}", line_num + 1);
            lines_skipped += 1;
            continue;
        }
        exact.upsert(&record.member, record.score)?;
    }

    let coordinator = RankCoordinator::new(
        config.clone(),
        store.clone(),
        exact,
        Arc::new(MemoryProfileStore::new()),
    )?;
    let report = coordinator.rebuild()?;

    output_result(
        "Members loaded",
        &LoadResult {
            path: args.index_path.display().to_string(),
            leaderboard: config.leaderboard,
            members_loaded: report.members_scanned,
            lines_skipped,
            counters_written: report.counters_written,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

fn estimate_rank(args: &RankArgs, cli_args: &SegrankArgs) -> Result<()> {
    let opened = open_index(&args.index_path)?;
    let outranking = opened.index.estimate_rank(args.score)?;

    let descent = opened.index.partition().descend(args.score)?;
    let leaf = opened.index.partition().key(descent.leaf());

    output_result(
        "Rank estimate",
        &RankEstimate {
            score: round_score(args.score),
            rank: outranking + 1,
            outranking,
            leaf: leaf.to_string(),
            leaf_count: opened.index.count(&leaf)?,
            indexed_members: opened.index.total_members()?,
        },
        cli_args,
    )
}

fn move_member(args: &MoveArgs, cli_args: &SegrankArgs) -> Result<()> {
    if args.from.is_none() && args.to.is_none() {
        return Err(SegrankError::invalid_argument(
            "at least one of --from and --to is required",
        ));
    }

    let opened = open_index(&args.index_path)?;
    opened.index.move_score(args.from, args.to)?;

    output_result(
        "Member moved",
        &MoveResult {
            from: args.from,
            to: args.to,
            indexed_members: opened.index.total_members()?,
            last_seq: opened.store.last_seq(),
        },
        cli_args,
    )
}

fn show_stats(args: &StatsArgs, cli_args: &SegrankArgs) -> Result<()> {
    let opened = open_index(&args.index_path)?;
    let leaves = if args.leaves {
        Some(opened.index.leaf_counts()?)
    } else {
        None
    };

    output_result(
        "Index statistics",
        &StoreStats {
            leaderboard: opened.config.leaderboard.clone(),
            index: opened.index.stats()?,
            last_seq: opened.store.last_seq(),
            journal_records: opened.store.journal_records(),
            snapshot: opened.store.snapshot_info()?,
            leaves,
        },
        cli_args,
    )
}

fn verify_index(args: &VerifyArgs, cli_args: &SegrankArgs) -> Result<()> {
    let opened = open_index(&args.index_path)?;
    let report = opened.index.inspect()?;

    let message = if report.is_healthy() {
        "Index is healthy"
    } else {
        "Index is corrupted; run `segrank load` to rebuild it"
    };
    output_result(message, &report, cli_args)?;

    // Report first, then fail with the corruption error.
    opened.index.verify().map(|_| ())
}

fn checkpoint(args: &CheckpointArgs, cli_args: &SegrankArgs) -> Result<()> {
    let opened = open_index(&args.index_path)?;
    opened.store.checkpoint()?;

    output_result(
        "Checkpoint written",
        &CheckpointResult {
            path: args.index_path.display().to_string(),
            last_seq: opened.store.last_seq(),
            counters: opened.store.len()?,
        },
        cli_args,
    )
}

fn open_index(path: &Path) -> Result<OpenIndex> {
    let config_path = path.join(CONFIG_FILE);
    if !config_path.exists() {
        return Err(SegrankError::not_found(format!(
            "no index at {}; run `segrank load` first",
            path.display()
        )));
    }

    let config = RankingConfig::from_json_file(&config_path)?;
    let store = Arc::new(FileCounterStore::open(FileCounterStoreConfig::new(path))?);
    let counters: Arc<dyn CounterStore> = store.clone();
    let index = SegmentIndex::build(&config.index, counters)?;

    Ok(OpenIndex {
        config,
        store,
        index,
    })
}
