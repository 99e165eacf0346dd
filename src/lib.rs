//! # segrank
//!
//! Approximate leaderboard ranks from a segment tree over a bounded score domain.
//!
//! ## Features
//!
//! - Static interval partition with externally stored counters
//! - Atomic member moves folded into one counter batch
//! - Exact ranks inside the retained window, interpolated estimates outside it
//! - Parallel full-scan rebuilds with an atomic keyspace swap
//! - Durable counter store with a checksummed snapshot and journal

pub mod cli;
pub mod error;
pub mod ranking;
pub mod segment;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::error::{Result, SegrankError};
    pub use crate::ranking::{RankCoordinator, RankResult, RankingConfig};
    pub use crate::segment::{IntervalKey, PartitionConfig, SegmentIndex};
    pub use crate::storage::{CounterStore, ExactScoreStore, ProfileStore};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
