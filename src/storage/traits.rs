//! Collaborator traits consumed by the rank engine.

use std::fmt::Debug;

use crate::error::{Result, SegrankError};
use crate::segment::partition::IntervalKey;

/// One counter adjustment inside an atomic batch.
pub type CounterDelta = (IntervalKey, i64);

/// Storage for the per-interval membership counters of a segment index.
///
/// Implementations must apply [`CounterStore::apply_batch`] indivisibly:
/// every concurrent reader sees either none or all of a batch. Reads of
/// individual counters need no cross-key isolation.
pub trait CounterStore: Send + Sync + Debug {
    /// Short name used in error messages and logs.
    fn name(&self) -> &str;

    /// Apply every delta, or none of them, in one step.
    fn apply_batch(&self, deltas: &[CounterDelta]) -> Result<()>;

    /// Read one counter; absent counters read as zero.
    fn get(&self, key: &IntervalKey) -> Result<i64>;

    /// Read several counters, in the order of `keys`.
    fn get_many(&self, keys: &[IntervalKey]) -> Result<Vec<i64>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Every stored counter.
    fn entries(&self) -> Result<Vec<(IntervalKey, i64)>>;

    /// Atomically replace the whole keyspace with `entries`.
    fn replace_all(&self, entries: Vec<(IntervalKey, i64)>) -> Result<()>;

    /// Number of stored counters.
    fn len(&self) -> Result<usize>;

    /// Whether no counter has ever been stored.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush pending writes to durable storage.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// The authoritative ordered store of `(member, score)` pairs.
///
/// Order is by score descending; implementations break ties with a stable
/// secondary key of their choosing so the order is total.
pub trait ExactScoreStore: Send + Sync + Debug {
    /// Set a member's score and return the previous one.
    fn upsert(&self, member: &str, score: f64) -> Result<Option<f64>>;

    /// Zero-based rank and score of a member, if retained.
    fn rank(&self, member: &str) -> Result<Option<(u64, f64)>>;

    /// Members at positions `[start, end)` in rank order.
    fn range(&self, start: usize, end: usize) -> Result<Vec<(String, f64)>>;

    /// Number of retained members.
    fn size(&self) -> Result<u64>;

    /// Remove a member and return its score.
    fn remove(&self, member: &str) -> Result<Option<f64>>;
}

/// Side record of member scores that survives eviction from the exact store.
pub trait ProfileStore: Send + Sync + Debug {
    /// The member's last known score.
    fn get_score(&self, member: &str) -> Result<Option<f64>>;

    /// Drop the member's score record and return it.
    fn forget(&self, member: &str) -> Result<Option<f64>>;

    /// Every known `(member, score)`; used by rebuilds that cover evicted members.
    ///
    /// Stores that cannot enumerate their members fail here rather than
    /// report an empty set.
    fn scores(&self) -> Result<Vec<(String, f64)>> {
        Err(SegrankError::unsupported("profile enumeration"))
    }
}
