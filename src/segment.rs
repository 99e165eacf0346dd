//! Segment tree over a bounded score domain.
//!
//! [`partition`] fixes the tree shape, [`index`] reads counters and estimates
//! ranks, [`update`] moves members between intervals, and [`rebuild`]
//! recomputes every counter from a full scan.

pub mod index;
pub mod partition;
pub mod rebuild;
pub mod update;

pub use index::{IndexStats, LeafCount, SegmentIndex, VerifyReport};
pub use partition::{IntervalKey, Partition, PartitionConfig};
pub use rebuild::RebuildReport;
pub use update::{MoveBatch, ScoreMove};
