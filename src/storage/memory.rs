//! In-memory collaborator implementations for embedding and testing.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::Result;
use crate::segment::partition::IntervalKey;
use crate::storage::traits::{CounterDelta, CounterStore, ExactScoreStore, ProfileStore};
use crate::util::score::OrderedScore;

/// An in-memory counter store.
///
/// Batches are applied under the write lock, which makes them atomic with
/// respect to every reader and writer of the same store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: RwLock<AHashMap<IntervalKey, i64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every counter.
    pub fn clear(&self) {
        self.counters.write().clear();
    }
}

impl CounterStore for MemoryCounterStore {
    fn name(&self) -> &str {
        "memory-counters"
    }

    fn apply_batch(&self, deltas: &[CounterDelta]) -> Result<()> {
        let mut counters = self.counters.write();
        for (key, delta) in deltas {
            *counters.entry(*key).or_insert(0) += delta;
        }
        Ok(())
    }

    fn get(&self, key: &IntervalKey) -> Result<i64> {
        Ok(self.counters.read().get(key).copied().unwrap_or(0))
    }

    fn get_many(&self, keys: &[IntervalKey]) -> Result<Vec<i64>> {
        let counters = self.counters.read();
        Ok(keys
            .iter()
            .map(|key| counters.get(key).copied().unwrap_or(0))
            .collect())
    }

    fn entries(&self) -> Result<Vec<(IntervalKey, i64)>> {
        Ok(self
            .counters
            .read()
            .iter()
            .map(|(key, count)| (*key, *count))
            .collect())
    }

    fn replace_all(&self, entries: Vec<(IntervalKey, i64)>) -> Result<()> {
        let fresh: AHashMap<IntervalKey, i64> = entries.into_iter().collect();
        *self.counters.write() = fresh;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.counters.read().len())
    }
}

#[derive(Debug, Default)]
struct ScoreBoard {
    scores: AHashMap<String, f64>,
    order: BTreeSet<(Reverse<OrderedScore>, String)>,
}

impl ScoreBoard {
    fn insert(&mut self, member: &str, score: f64) -> Option<f64> {
        let previous = self.scores.insert(member.to_string(), score);
        if let Some(old) = previous {
            self.order.remove(&(Reverse(OrderedScore(old)), member.to_string()));
        }
        self.order.insert((Reverse(OrderedScore(score)), member.to_string()));
        previous
    }

    fn remove(&mut self, member: &str) -> Option<f64> {
        let previous = self.scores.remove(member)?;
        self.order
            .remove(&(Reverse(OrderedScore(previous)), member.to_string()));
        Some(previous)
    }
}

/// An ordered in-memory exact score store.
///
/// Members are ordered by score descending, then by member id ascending.
/// Rank lookups walk the ordered set, so they are linear in the rank; this
/// store is meant for tests, tools and small leaderboards.
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    board: RwLock<ScoreBoard>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the best `n` members and return the evicted ones, best first.
    ///
    /// This is what a janitor pass does to the authoritative store.
    pub fn retain_top(&self, n: usize) -> Vec<(String, f64)> {
        let mut board = self.board.write();
        let mut evicted = Vec::new();
        while board.order.len() > n {
            let Some((Reverse(OrderedScore(score)), member)) = board.order.pop_last() else {
                break;
            };
            board.scores.remove(&member);
            evicted.push((member, score));
        }
        evicted.reverse();
        if !evicted.is_empty() {
            log::debug!("evicted {} members below the top {n}", evicted.len());
        }
        evicted
    }

    /// The retained score of a member.
    pub fn score(&self, member: &str) -> Option<f64> {
        self.board.read().scores.get(member).copied()
    }
}

impl ExactScoreStore for MemoryScoreStore {
    fn upsert(&self, member: &str, score: f64) -> Result<Option<f64>> {
        Ok(self.board.write().insert(member, score))
    }

    fn rank(&self, member: &str) -> Result<Option<(u64, f64)>> {
        let board = self.board.read();
        let Some(score) = board.scores.get(member).copied() else {
            return Ok(None);
        };
        let key = (Reverse(OrderedScore(score)), member.to_string());
        let rank = board.order.range(..&key).count() as u64;
        Ok(Some((rank, score)))
    }

    fn range(&self, start: usize, end: usize) -> Result<Vec<(String, f64)>> {
        let board = self.board.read();
        Ok(board
            .order
            .iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .map(|(Reverse(OrderedScore(score)), member)| (member.clone(), *score))
            .collect())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.board.read().scores.len() as u64)
    }

    fn remove(&self, member: &str) -> Result<Option<f64>> {
        Ok(self.board.write().remove(member))
    }
}

/// An in-memory profile score record.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    scores: RwLock<AHashMap<String, f64>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a member's score.
    pub fn set_score(&self, member: &str, score: f64) {
        self.scores.write().insert(member.to_string(), score);
    }

    pub fn len(&self) -> usize {
        self.scores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.read().is_empty()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get_score(&self, member: &str) -> Result<Option<f64>> {
        Ok(self.scores.read().get(member).copied())
    }

    fn forget(&self, member: &str) -> Result<Option<f64>> {
        Ok(self.scores.write().remove(member))
    }

    fn scores(&self) -> Result<Vec<(String, f64)>> {
        Ok(self
            .scores
            .read()
            .iter()
            .map(|(member, score)| (member.clone(), *score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_batch_and_defaults() {
        let store = MemoryCounterStore::new();
        let a = IntervalKey::new(0, 100);
        let b = IntervalKey::new(101, 200);

        assert!(store.is_empty().unwrap());
        assert_eq!(store.get(&a).unwrap(), 0);

        store.apply_batch(&[(a, 2), (b, 1), (a, -1)]).unwrap();
        assert_eq!(store.get_many(&[a, b]).unwrap(), vec![1, 1]);
        assert_eq!(store.len().unwrap(), 2);

        store.replace_all(vec![(b, 7)]).unwrap();
        assert_eq!(store.get(&a).unwrap(), 0);
        assert_eq!(store.entries().unwrap(), vec![(b, 7)]);

        store.clear();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_score_store_order_and_ties() {
        let store = MemoryScoreStore::new();
        assert_eq!(store.upsert("carol", 50.0).unwrap(), None);
        store.upsert("alice", 90.0).unwrap();
        store.upsert("bob", 50.0).unwrap();
        store.upsert("dave", 10.0).unwrap();

        assert_eq!(store.rank("alice").unwrap(), Some((0, 90.0)));
        // Ties break by member id.
        assert_eq!(store.rank("bob").unwrap(), Some((1, 50.0)));
        assert_eq!(store.rank("carol").unwrap(), Some((2, 50.0)));
        assert_eq!(store.rank("erin").unwrap(), None);

        assert_eq!(store.upsert("dave", 95.0).unwrap(), Some(10.0));
        assert_eq!(store.rank("dave").unwrap(), Some((0, 95.0)));

        let page = store.range(1, 3).unwrap();
        assert_eq!(page, vec![("alice".to_string(), 90.0), ("bob".to_string(), 50.0)]);
        assert!(store.range(10, 20).unwrap().is_empty());
        assert!(store.range(3, 1).unwrap().is_empty());

        assert_eq!(store.remove("bob").unwrap(), Some(50.0));
        assert_eq!(store.remove("bob").unwrap(), None);
        assert_eq!(store.size().unwrap(), 3);
        assert_eq!(store.rank("carol").unwrap(), Some((2, 50.0)));
    }

    #[test]
    fn test_retain_top_evicts_lowest() {
        let store = MemoryScoreStore::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            store.upsert(member, score).unwrap();
        }

        let evicted = store.retain_top(2);
        assert_eq!(evicted, vec![("b".to_string(), 2.0), ("a".to_string(), 1.0)]);
        assert_eq!(store.size().unwrap(), 2);
        assert_eq!(store.score("a"), None);
        assert!(store.retain_top(5).is_empty());
    }

    #[test]
    fn test_profile_store() {
        let profiles = MemoryProfileStore::new();
        assert!(profiles.is_empty());
        profiles.set_score("m1", 12.5);
        assert_eq!(profiles.get_score("m1").unwrap(), Some(12.5));
        assert_eq!(profiles.get_score("m2").unwrap(), None);
        assert_eq!(profiles.scores().unwrap().len(), 1);
        assert_eq!(profiles.forget("m1").unwrap(), Some(12.5));
        assert_eq!(profiles.forget("m1").unwrap(), None);
        assert_eq!(profiles.len(), 0);
    }
}
