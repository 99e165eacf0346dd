//! Leaderboard-level orchestration.
//!
//! A [`RankCoordinator`] ties one segment index to the exact score store and
//! the profile store of a leaderboard. It answers rank queries, applies
//! score-change events and runs rebuilds.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use segrank::ranking::{RankCoordinator, RankingConfig};
//! use segrank::storage::memory::{MemoryCounterStore, MemoryProfileStore, MemoryScoreStore};
//!
//! let config = RankingConfig::builder().max_score(1000).build().unwrap();
//! let coordinator = RankCoordinator::new(
//!     config,
//!     Arc::new(MemoryCounterStore::new()),
//!     Arc::new(MemoryScoreStore::new()),
//!     Arc::new(MemoryProfileStore::new()),
//! )
//! .unwrap();
//!
//! coordinator.on_score_change("alice", 420.0).unwrap();
//! let result = coordinator.report("alice").unwrap();
//! assert_eq!(result.rank, 1);
//! assert!(result.exact);
//! ```

pub mod config;
pub mod coordinator;

pub use config::{RankingConfig, RankingConfigBuilder};
pub use coordinator::{
    CoordinatorStats, InitOutcome, RankCoordinator, RankResult, RankedMember, RankingPage,
    ScoreChange,
};
