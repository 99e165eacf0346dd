//! The move protocol: the only way member counts change.
//!
//! A move decrements every node on the old score's path and increments every
//! node on the new score's path. Both paths are folded into one net batch and
//! handed to the counter store's atomic multi-key primitive, so concurrent
//! readers never observe half a move and concurrent moves commute.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segment::index::SegmentIndex;
use crate::segment::partition::{IntervalKey, Partition};
use crate::storage::traits::CounterDelta;

/// One member's score transition. `None` means "not ranked".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreMove {
    pub old: Option<f64>,
    pub new: Option<f64>,
}

impl ScoreMove {
    pub fn new(old: Option<f64>, new: Option<f64>) -> Self {
        ScoreMove { old, new }
    }

    pub fn insert(score: f64) -> Self {
        ScoreMove::new(None, Some(score))
    }

    pub fn remove(score: f64) -> Self {
        ScoreMove::new(Some(score), None)
    }
}

/// Net counter deltas for a set of moves, keyed by interval.
#[derive(Debug, Clone, Default)]
pub struct MoveBatch {
    deltas: BTreeMap<IntervalKey, i64>,
}

impl MoveBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one move into the batch, validating both scores against `partition`.
    pub fn add(&mut self, partition: &Partition, score_move: &ScoreMove) -> Result<()> {
        // Derive both paths before touching the batch so a bad score leaves it unchanged.
        let old_path = score_move
            .old
            .map(|score| partition.path_keys(score))
            .transpose()?;
        let new_path = score_move
            .new
            .map(|score| partition.path_keys(score))
            .transpose()?;

        for key in old_path.into_iter().flatten() {
            *self.deltas.entry(key).or_insert(0) -= 1;
        }
        for key in new_path.into_iter().flatten() {
            *self.deltas.entry(key).or_insert(0) += 1;
        }
        Ok(())
    }

    /// Deltas with the cancelled entries dropped, in key order.
    pub fn into_deltas(self) -> Vec<CounterDelta> {
        self.deltas
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.deltas.values().all(|delta| *delta == 0)
    }
}

impl SegmentIndex {
    /// Move one member from `old` to `new` in a single atomic batch.
    ///
    /// `old = None` is a first-time insert, `new = None` a removal. Scores
    /// are validated before anything is written; a move that nets to zero
    /// (same leaf) writes nothing.
    pub fn move_score(&self, old: Option<f64>, new: Option<f64>) -> Result<()> {
        self.apply_moves(&[ScoreMove::new(old, new)])
    }

    /// Count a new member at `score`.
    pub fn insert_member(&self, score: f64) -> Result<()> {
        self.move_score(None, Some(score))
    }

    /// Stop counting a member at `score`.
    pub fn remove_member(&self, score: f64) -> Result<()> {
        self.move_score(Some(score), None)
    }

    /// Apply several moves as one indivisible batch.
    pub fn apply_moves(&self, moves: &[ScoreMove]) -> Result<()> {
        let mut batch = MoveBatch::new();
        for score_move in moves {
            batch.add(self.partition(), score_move)?;
        }
        if batch.is_noop() {
            log::trace!("{} moves cancel out; nothing to write", moves.len());
            return Ok(());
        }

        let deltas = batch.into_deltas();
        log::trace!("applying {} counter deltas for {} moves", deltas.len(), moves.len());
        self.write_batch(&deltas)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::SegrankError;
    use crate::segment::partition::PartitionConfig;
    use crate::storage::memory::MemoryCounterStore;
    use crate::storage::traits::CounterStore;

    fn reference_index() -> SegmentIndex {
        let counters: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        SegmentIndex::build(&PartitionConfig::new(1000, 100), counters).unwrap()
    }

    fn snapshot(index: &SegmentIndex) -> Vec<(IntervalKey, i64)> {
        let mut entries: Vec<_> = index
            .counters()
            .entries()
            .unwrap()
            .into_iter()
            .filter(|(_, count)| *count != 0)
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn test_move_between_leaves() {
        let index = reference_index();
        for score in [50.0, 150.0, 150.0, 950.0] {
            index.insert_member(score).unwrap();
        }

        index.move_score(Some(150.0), Some(250.0)).unwrap();

        assert_eq!(index.count(&IntervalKey::new(101, 200)).unwrap(), 1);
        assert_eq!(index.count(&IntervalKey::new(201, 300)).unwrap(), 1);
        assert_eq!(index.count(&IntervalKey::new(0, 200)).unwrap(), 2);
        assert_eq!(index.count(&IntervalKey::new(0, 300)).unwrap(), 3);
        assert_eq!(index.total_members().unwrap(), 4);
        assert!(index.verify().unwrap().is_healthy());
    }

    #[test]
    fn test_noop_move_writes_nothing() {
        let index = reference_index();
        index.insert_member(420.0).unwrap();
        let before = snapshot(&index);

        index.move_score(Some(420.0), Some(420.0)).unwrap();
        index.move_score(Some(420.0), Some(450.0)).unwrap();
        index.move_score(Some(450.0), Some(420.0)).unwrap();
        index.move_score(None, None).unwrap();

        assert_eq!(snapshot(&index), before);
    }

    #[test]
    fn test_invalid_move_is_rejected_whole() {
        let index = reference_index();
        index.insert_member(150.0).unwrap();
        let before = snapshot(&index);

        let err = index.move_score(Some(150.0), Some(5000.0)).unwrap_err();
        assert!(matches!(err, SegrankError::DomainViolation { .. }));
        let err = index.move_score(Some(-3.0), Some(10.0)).unwrap_err();
        assert!(matches!(err, SegrankError::DomainViolation { .. }));

        assert_eq!(snapshot(&index), before);
    }

    #[test]
    fn test_remove_then_insert_round_trip() {
        let index = reference_index();
        index.insert_member(12.3456).unwrap();
        index.remove_member(12.34559).unwrap();
        assert!(snapshot(&index).is_empty());
    }

    #[test]
    fn test_batch_cancels_shared_ancestors() {
        let partition = Partition::build(1000, 100).unwrap();
        let mut batch = MoveBatch::new();
        batch
            .add(&partition, &ScoreMove::new(Some(150.0), Some(250.0)))
            .unwrap();
        let deltas = batch.into_deltas();

        // [0,1000], [0,500] and [0,300] appear on both paths and cancel.
        assert!(!deltas.iter().any(|(key, _)| *key == IntervalKey::new(0, 1000)));
        assert!(deltas.contains(&(IntervalKey::new(101, 200), -1)));
        assert!(deltas.contains(&(IntervalKey::new(0, 200), -1)));
        assert!(deltas.contains(&(IntervalKey::new(201, 300), 1)));
    }

    #[test]
    fn test_order_of_moves_does_not_matter() {
        let moves = vec![
            ScoreMove::insert(10.0),
            ScoreMove::insert(990.0),
            ScoreMove::new(Some(10.0), Some(505.5)),
            ScoreMove::insert(333.0),
            ScoreMove::remove(990.0),
            ScoreMove::insert(0.0),
        ];

        let forward = reference_index();
        for m in &moves {
            forward.move_score(m.old, m.new).unwrap();
        }

        let batched = reference_index();
        batched.apply_moves(&moves).unwrap();

        // Inserts first, then the rest reversed: counters only depend on the multiset.
        let reordered = reference_index();
        let (inserts, others): (Vec<&ScoreMove>, Vec<&ScoreMove>) = moves.iter().partition(|m| m.old.is_none());
        for m in inserts.iter().chain(others.iter().rev()) {
            reordered.move_score(m.old, m.new).unwrap();
        }

        assert_eq!(snapshot(&forward), snapshot(&batched));
        assert_eq!(snapshot(&forward), snapshot(&reordered));
    }
}
