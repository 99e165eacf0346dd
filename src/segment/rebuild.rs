//! Full-scan (re)initialisation of the index counters.
//!
//! A rebuild recomputes every counter off-line from a list of scores and
//! swaps the result into the counter store with one bulk overwrite, so
//! readers see either the old keyspace or the new one. [`SegmentIndex::apply_scan`]
//! is the incremental flavour that adds each score to the live counters; it
//! is not idempotent and must only run against a zeroed index.

use std::time::Instant;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segment::index::SegmentIndex;
use crate::segment::partition::{IntervalKey, Partition};
use crate::storage::traits::ExactScoreStore;

/// Summary of a completed rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildReport {
    pub members_scanned: u64,
    pub counters_written: usize,
    pub indexed_members: i64,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Count how many scores fall under every node, in parallel.
///
/// Fails with `DomainViolation` on the first score outside the partition's domain.
pub fn accumulate_counts(
    partition: &Partition,
    scores: &[f64],
) -> Result<AHashMap<IntervalKey, i64>> {
    scores
        .par_iter()
        .try_fold(AHashMap::new, |mut acc, score| -> Result<AHashMap<IntervalKey, i64>> {
            for key in partition.path_keys(*score)? {
                *acc.entry(key).or_insert(0) += 1;
            }
            Ok(acc)
        })
        .try_reduce(AHashMap::new, |mut merged, part| -> Result<AHashMap<IntervalKey, i64>> {
            for (key, count) in part {
                *merged.entry(key).or_insert(0) += count;
            }
            Ok(merged)
        })
}

/// Read every `(member, score)` from the exact store, `page_size` entries per call.
pub fn scan_exact_store(
    store: &dyn ExactScoreStore,
    page_size: usize,
) -> Result<Vec<(String, f64)>> {
    let page_size = page_size.max(1);
    let mut members = Vec::new();
    let mut start = 0;

    loop {
        let page = store.range(start, start + page_size)?;
        let fetched = page.len();
        members.extend(page);
        if fetched < page_size {
            break;
        }
        start += fetched;
    }

    log::debug!("scanned {} members from exact score store", members.len());
    Ok(members)
}

impl SegmentIndex {
    /// Recompute every counter from `scores` and swap the result in.
    ///
    /// Every partition key is written, zeros included, so a rebuilt store is
    /// never mistaken for an uninitialised one.
    pub fn rebuild_from_scores(&self, scores: &[f64]) -> Result<RebuildReport> {
        let started = Instant::now();
        let counts = accumulate_counts(self.partition(), scores)?;

        let entries: Vec<(IntervalKey, i64)> = self
            .partition()
            .keys()
            .into_iter()
            .map(|key| (key, counts.get(&key).copied().unwrap_or(0)))
            .collect();
        let counters_written = entries.len();

        self.counters()
            .replace_all(entries)
            .map_err(|e| e.into_store_error(self.counters().name()))?;

        let report = RebuildReport {
            members_scanned: scores.len() as u64,
            counters_written,
            indexed_members: scores.len() as i64,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };
        log::info!(
            "rebuilt index from {} members into {} counters in {}ms",
            report.members_scanned,
            report.counters_written,
            report.duration_ms
        );
        Ok(report)
    }

    /// Add `+1` along the path of every score against the live counters.
    ///
    /// Running this twice without a [`SegmentIndex::reset`] in between counts
    /// every member twice.
    pub fn apply_scan<I>(&self, scores: I) -> Result<u64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut applied = 0u64;
        for score in scores {
            self.apply_delta(score, 1)?;
            applied += 1;
        }
        log::debug!("applied {applied} scores to live counters");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::SegrankError;
    use crate::segment::partition::PartitionConfig;
    use crate::storage::memory::{MemoryCounterStore, MemoryScoreStore};
    use crate::storage::traits::CounterStore;

    fn reference_index() -> SegmentIndex {
        let counters: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        SegmentIndex::build(&PartitionConfig::new(1000, 100), counters).unwrap()
    }

    #[test]
    fn test_rebuild_matches_incremental_inserts() {
        let scores: Vec<f64> = (0..5000).map(|i| ((i * 7919) % 100_001) as f64 / 100.0).collect();

        let rebuilt = reference_index();
        let report = rebuilt.rebuild_from_scores(&scores).unwrap();
        assert_eq!(report.members_scanned, 5000);
        assert_eq!(report.counters_written, 19);

        let incremental = reference_index();
        for score in &scores {
            incremental.insert_member(*score).unwrap();
        }

        assert_eq!(rebuilt.leaf_counts().unwrap(), incremental.leaf_counts().unwrap());
        assert_eq!(rebuilt.total_members().unwrap(), 5000);
        assert!(rebuilt.verify().unwrap().is_healthy());
    }

    #[test]
    fn test_rebuild_replaces_stale_counters() {
        let index = reference_index();
        for _ in 0..3 {
            index.insert_member(700.0).unwrap();
        }

        index.rebuild_from_scores(&[10.0, 20.0]).unwrap();
        assert_eq!(index.count(&IntervalKey::new(601, 700)).unwrap(), 0);
        assert_eq!(index.count(&IntervalKey::new(0, 100)).unwrap(), 2);
        assert_eq!(index.total_members().unwrap(), 2);
    }

    #[test]
    fn test_rebuild_rejects_out_of_domain_scores() {
        let index = reference_index();
        index.insert_member(500.0).unwrap();

        let err = index.rebuild_from_scores(&[10.0, 5000.0]).unwrap_err();
        assert!(matches!(err, SegrankError::DomainViolation { .. }));
        // The previous keyspace is untouched.
        assert_eq!(index.total_members().unwrap(), 1);
    }

    #[test]
    fn test_apply_scan_double_counts_without_reset() {
        let index = reference_index();
        let scores = [10.0, 510.0, 990.0];

        assert_eq!(index.apply_scan(scores).unwrap(), 3);
        assert_eq!(index.apply_scan(scores).unwrap(), 3);
        assert_eq!(index.total_members().unwrap(), 6);

        index.reset().unwrap();
        index.apply_scan(scores).unwrap();
        assert_eq!(index.total_members().unwrap(), 3);
    }

    #[test]
    fn test_scan_exact_store_pages() {
        let store = MemoryScoreStore::new();
        for i in 0..25 {
            store.upsert(&format!("member-{i}"), i as f64).unwrap();
        }

        let members = scan_exact_store(&store, 10).unwrap();
        assert_eq!(members.len(), 25);
        assert_eq!(members[0], ("member-24".to_string(), 24.0));
        assert_eq!(members[24], ("member-0".to_string(), 0.0));

        let members = scan_exact_store(&store, 25).unwrap();
        assert_eq!(members.len(), 25);
    }
}
