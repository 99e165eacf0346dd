//! The segment index: a partition plus externally stored counters.

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegrankError};
use crate::segment::partition::{IntervalKey, Partition, PartitionConfig, SegmentNode};
use crate::storage::traits::{CounterDelta, CounterStore};
use crate::util::score::SCORE_SCALE;

/// Order-statistics index over a static partition of the score domain.
///
/// The tree shape is shared read-only behind an `Arc`; the counters live in a
/// [`CounterStore`] and only change through atomic batches. Cloning the index
/// is cheap and every clone observes the same counters.
#[derive(Debug, Clone)]
pub struct SegmentIndex {
    partition: Arc<Partition>,
    counters: Arc<dyn CounterStore>,
}

/// A leaf interval together with its current counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafCount {
    pub interval: String,
    pub lower: i64,
    pub upper: i64,
    pub count: i64,
}

/// An internal node whose counter differs from the sum of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumMismatch {
    pub interval: String,
    pub count: i64,
    pub children_sum: i64,
}

/// Outcome of a counter self-check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    pub checked_nodes: usize,
    pub negative_counters: Vec<(String, i64)>,
    pub broken_sums: Vec<SumMismatch>,
    /// Stored keys that are not part of this partition.
    pub foreign_keys: Vec<String>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.negative_counters.is_empty() && self.broken_sums.is_empty()
    }

    fn summary(&self) -> String {
        format!(
            "{} negative counters, {} broken sums across {} nodes",
            self.negative_counters.len(),
            self.broken_sums.len(),
            self.checked_nodes
        )
    }
}

/// Shape and population figures for an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub min_score: i64,
    pub max_score: i64,
    pub min_leaf_width: i64,
    pub node_count: usize,
    pub leaf_count: usize,
    pub depth: u32,
    pub stored_counters: usize,
    pub indexed_members: i64,
}

impl SegmentIndex {
    /// Wrap an existing partition and counter store.
    pub fn new(partition: Arc<Partition>, counters: Arc<dyn CounterStore>) -> Self {
        SegmentIndex {
            partition,
            counters,
        }
    }

    /// Build the partition for `config` over `counters`.
    pub fn build(config: &PartitionConfig, counters: Arc<dyn CounterStore>) -> Result<Self> {
        let partition = Partition::with_config(config.clone())?;
        Ok(Self::new(Arc::new(partition), counters))
    }

    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    pub fn counters(&self) -> &Arc<dyn CounterStore> {
        &self.counters
    }

    /// Nodes visited on the way to the leaf holding `score`, root first.
    pub fn path_to(&self, score: f64) -> Result<Vec<&SegmentNode>> {
        self.partition.path_to(score)
    }

    /// Add `delta` to every counter on the path to `score`, atomically.
    pub fn apply_delta(&self, score: f64, delta: i64) -> Result<()> {
        let keys = self.partition.path_keys(score)?;
        if delta == 0 {
            return Ok(());
        }
        let deltas: Vec<CounterDelta> = keys.into_iter().map(|key| (key, delta)).collect();
        self.write_batch(&deltas)
    }

    /// Current counter of one interval; absent counters read as zero.
    pub fn count(&self, key: &IntervalKey) -> Result<i64> {
        self.counters
            .get(key)
            .map_err(|e| e.into_store_error(self.counters.name()))
    }

    /// Number of members counted by the root.
    pub fn total_members(&self) -> Result<i64> {
        let root = self.partition.key(self.partition.root());
        self.count(&root)
    }

    /// Estimate how many members strictly outrank `score`.
    ///
    /// Every left turn of the descent adds the skipped right sibling's
    /// counter. Inside the leaf, members are assumed uniformly spread over
    /// the leaf's integer width:
    /// `floor((upper - score) * count / (upper - lower + 1))`.
    pub fn estimate_rank(&self, score: f64) -> Result<u64> {
        let descent = self.partition.descend(score)?;
        let leaf = self.partition.key(descent.leaf());

        let mut keys: Vec<IntervalKey> = descent
            .outranking
            .iter()
            .map(|id| self.partition.key(*id))
            .collect();
        keys.push(leaf);
        let counts = self.read_counters(&keys)?;

        let (leaf_count, siblings) = counts
            .split_last()
            .ok_or_else(|| SegrankError::other("empty descent"))?;
        let above: i64 = siblings.iter().map(|c| clamp_count(*c)).sum();
        let leaf_count = clamp_count(*leaf_count);

        let offset = (leaf.upper * SCORE_SCALE - descent.fixed_score) as i128;
        let numerator = offset * leaf_count as i128;
        let denominator = leaf.width() as i128 * SCORE_SCALE as i128;
        let in_leaf = numerator.div_euclid(denominator).clamp(0, leaf_count as i128) as i64;

        log::trace!(
            "estimate_rank({score}): leaf {leaf} count {leaf_count}, above {above}, in-leaf {in_leaf}"
        );
        Ok((above + in_leaf) as u64)
    }

    /// Every leaf with its counter, in ascending score order.
    pub fn leaf_counts(&self) -> Result<Vec<LeafCount>> {
        let keys = self.partition.boundaries();
        let counts = self.read_counters(&keys)?;
        Ok(keys
            .into_iter()
            .zip(counts)
            .map(|(key, count)| LeafCount {
                interval: key.to_string(),
                lower: key.lower,
                upper: key.upper,
                count,
            })
            .collect())
    }

    /// Check counters for negative values and broken sums, without failing.
    pub fn inspect(&self) -> Result<VerifyReport> {
        let stored: AHashMap<IntervalKey, i64> = self
            .counters
            .entries()
            .map_err(|e| e.into_store_error(self.counters.name()))?
            .into_iter()
            .collect();
        let count_of = |key: &IntervalKey| stored.get(key).copied().unwrap_or(0);

        let mut report = VerifyReport {
            checked_nodes: self.partition.node_count(),
            ..Default::default()
        };

        for node in self.partition.nodes() {
            let count = count_of(&node.key);
            if count < 0 {
                report.negative_counters.push((node.key.to_string(), count));
            }
            if let Some((left, right)) = node.children() {
                let children_sum =
                    count_of(&self.partition.key(left)) + count_of(&self.partition.key(right));
                if children_sum != count {
                    report.broken_sums.push(SumMismatch {
                        interval: node.key.to_string(),
                        count,
                        children_sum,
                    });
                }
            }
        }

        let mut foreign: Vec<IntervalKey> = stored
            .keys()
            .filter(|key| !self.partition.contains_key(key))
            .copied()
            .collect();
        foreign.sort();
        report.foreign_keys = foreign.iter().map(|key| key.to_string()).collect();

        Ok(report)
    }

    /// Self-check; fails with `IndexCorruption` when an invariant is broken.
    ///
    /// Estimates keep working on a corrupted index, they just undercount or
    /// overcount until the next rebuild.
    pub fn verify(&self) -> Result<VerifyReport> {
        let report = self.inspect()?;
        if !report.foreign_keys.is_empty() {
            log::warn!(
                "{} stored counters do not belong to this partition",
                report.foreign_keys.len()
            );
        }
        if report.is_healthy() {
            Ok(report)
        } else {
            log::error!("index self-check failed: {}; rebuild recommended", report.summary());
            Err(SegrankError::corruption(report.summary()))
        }
    }

    /// Shape and population figures.
    pub fn stats(&self) -> Result<IndexStats> {
        let stored_counters = self
            .counters
            .len()
            .map_err(|e| e.into_store_error(self.counters.name()))?;
        Ok(IndexStats {
            min_score: 0,
            max_score: self.partition.max_score(),
            min_leaf_width: self.partition.min_leaf_width(),
            node_count: self.partition.node_count(),
            leaf_count: self.partition.leaf_count(),
            depth: self.partition.depth(),
            stored_counters,
            indexed_members: self.total_members()?,
        })
    }

    /// Overwrite every counter with zero.
    pub fn reset(&self) -> Result<()> {
        let zeroed = self.partition.keys().into_iter().map(|key| (key, 0)).collect();
        self.counters
            .replace_all(zeroed)
            .map_err(|e| e.into_store_error(self.counters.name()))?;
        log::info!("reset {} counters to zero", self.partition.node_count());
        Ok(())
    }

    pub(crate) fn read_counters(&self, keys: &[IntervalKey]) -> Result<Vec<i64>> {
        let counts = self
            .counters
            .get_many(keys)
            .map_err(|e| e.into_store_error(self.counters.name()))?;
        if counts.len() != keys.len() {
            return Err(SegrankError::store_unavailable(
                self.counters.name(),
                format!("returned {} counters for {} keys", counts.len(), keys.len()),
            ));
        }
        Ok(counts)
    }

    pub(crate) fn write_batch(&self, deltas: &[CounterDelta]) -> Result<()> {
        self.counters
            .apply_batch(deltas)
            .map_err(|e| e.into_store_error(self.counters.name()))
    }
}

fn clamp_count(count: i64) -> i64 {
    if count < 0 {
        log::warn!("read negative counter {count}; treating as zero");
        0
    } else {
        count
    }
}
