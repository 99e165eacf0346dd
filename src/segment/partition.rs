//! Static interval partition of the score domain.
//!
//! The partition is an arena of immutable-shape nodes. Leaves split the
//! integer domain `[0, max_score]` into runs of at least `min_leaf_width`
//! units; internal nodes are built by halving the leaf sequence. The shape
//! depends only on the configuration, so two processes building the same
//! configuration agree on every [`IntervalKey`] and can share one external
//! counter store.

use std::fmt;
use std::str::FromStr;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegrankError};
use crate::util::score::{MAX_SCORE, SCORE_DECIMAL_PLACES, SCORE_SCALE, format_bound, to_fixed};

/// Default minimum width of a leaf interval, in score units.
pub const DEFAULT_MIN_LEAF_WIDTH: i64 = 100;

/// Default upper bound of the score domain.
pub const DEFAULT_MAX_SCORE: i64 = 1_000_000;

/// Default ceiling on the number of leaves a partition may have.
pub const DEFAULT_MAX_LEAVES: usize = 1 << 22;

/// Parameters that fully determine a partition's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Upper bound of the domain `[0, max_score]`.
    pub max_score: i64,

    /// Minimum number of integer score units per leaf.
    pub min_leaf_width: i64,

    /// Reject partitions with more leaves than this.
    pub max_leaves: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        PartitionConfig {
            max_score: DEFAULT_MAX_SCORE,
            min_leaf_width: DEFAULT_MIN_LEAF_WIDTH,
            max_leaves: DEFAULT_MAX_LEAVES,
        }
    }
}

impl PartitionConfig {
    /// Create a configuration with the default leaf ceiling.
    pub fn new(max_score: i64, min_leaf_width: i64) -> Self {
        PartitionConfig {
            max_score,
            min_leaf_width,
            ..Default::default()
        }
    }

    /// Validate the configuration and return the resulting leaf count.
    pub fn validate(&self) -> Result<usize> {
        if self.max_score <= 0 {
            return Err(SegrankError::config(format!(
                "max_score must be positive, got {}",
                self.max_score
            )));
        }
        if self.min_leaf_width <= 0 {
            return Err(SegrankError::config(format!(
                "min_leaf_width must be positive, got {}",
                self.min_leaf_width
            )));
        }
        if self.max_score > MAX_SCORE {
            return Err(SegrankError::config(format!(
                "max_score {} exceeds the fixed-point limit {MAX_SCORE}",
                self.max_score
            )));
        }

        let units = self.max_score + 1;
        if units < self.min_leaf_width {
            return Err(SegrankError::config(format!(
                "domain [0, {}] is narrower than one leaf of width {}",
                self.max_score, self.min_leaf_width
            )));
        }

        let leaves = units / self.min_leaf_width;
        if leaves as u128 > self.max_leaves as u128 {
            return Err(SegrankError::config(format!(
                "partition would need {leaves} leaves, limit is {}",
                self.max_leaves
            )));
        }
        Ok(leaves as usize)
    }
}

/// Identity of a node: its closed integer interval.
///
/// The canonical string form is `"lower-upper"` with both bounds printed to
/// four decimal places, e.g. `"0.0000-100.0000"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntervalKey {
    pub lower: i64,
    pub upper: i64,
}

impl IntervalKey {
    pub fn new(lower: i64, upper: i64) -> Self {
        IntervalKey { lower, upper }
    }

    /// Number of integer score units covered.
    pub fn width(&self) -> i64 {
        self.upper - self.lower + 1
    }

    /// Whether `other` lies entirely inside this interval.
    pub fn covers(&self, other: &IntervalKey) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }
}

impl fmt::Display for IntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_bound(self.lower), format_bound(self.upper))
    }
}

impl FromStr for IntervalKey {
    type Err = SegrankError;

    fn from_str(s: &str) -> Result<Self> {
        let (lower, upper) = s
            .split_once('-')
            .ok_or_else(|| SegrankError::codec(format!("malformed interval key '{s}'")))?;
        let key = IntervalKey::new(parse_bound(lower, s)?, parse_bound(upper, s)?);
        if key.lower > key.upper {
            return Err(SegrankError::codec(format!("inverted interval key '{s}'")));
        }
        Ok(key)
    }
}

fn parse_bound(text: &str, key: &str) -> Result<i64> {
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    let fraction_ok = fraction.len() <= SCORE_DECIMAL_PLACES as usize
        && fraction.bytes().all(|b| b == b'0');
    match whole.parse::<i64>() {
        Ok(value) if fraction_ok => Ok(value),
        _ => Err(SegrankError::codec(format!(
            "interval key '{key}' has a non-integer bound '{text}'"
        ))),
    }
}

/// Index of a node inside a [`Partition`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node of the partition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentNode {
    pub key: IntervalKey,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    pub depth: u32,
}

impl SegmentNode {
    pub fn is_leaf(&self) -> bool {
        self.left.is_none()
    }

    /// Both children of an internal node.
    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        match (self.left, self.right) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }
}

/// Result of a root-to-leaf descent.
#[derive(Debug, Clone)]
pub struct Descent {
    /// Nodes visited, root first, leaf last.
    pub path: Vec<NodeId>,

    /// Right siblings skipped by every left turn; their members strictly outrank the score.
    pub outranking: Vec<NodeId>,

    /// The score in fixed-point ten-thousandths.
    pub fixed_score: i64,
}

impl Descent {
    pub fn leaf(&self) -> NodeId {
        // A descent always visits at least the root.
        self.path[self.path.len() - 1]
    }
}

/// The immutable partition tree.
#[derive(Debug, Clone)]
pub struct Partition {
    config: PartitionConfig,
    nodes: Vec<SegmentNode>,
    leaves: Vec<NodeId>,
    by_key: AHashMap<IntervalKey, NodeId>,
    depth: u32,
    leaf_base_width: i64,
    wide_leaves: i64,
}

impl Partition {
    /// Build a partition of `[0, max_score]` with leaves at least `min_leaf_width` wide.
    pub fn build(max_score: i64, min_leaf_width: i64) -> Result<Self> {
        Self::with_config(PartitionConfig::new(max_score, min_leaf_width))
    }

    /// Build a partition from a full configuration.
    pub fn with_config(config: PartitionConfig) -> Result<Self> {
        let leaf_count = config.validate()?;
        let units = config.max_score + 1;

        let mut partition = Partition {
            leaf_base_width: units / leaf_count as i64,
            wide_leaves: units % leaf_count as i64,
            config,
            nodes: Vec::with_capacity(leaf_count * 2 - 1),
            leaves: Vec::with_capacity(leaf_count),
            by_key: AHashMap::with_capacity(leaf_count * 2 - 1),
            depth: 0,
        };
        partition.build_range(0, leaf_count, 0);

        log::debug!(
            "built partition of [0, {}]: {} leaves, {} nodes, depth {}",
            partition.config.max_score,
            partition.leaves.len(),
            partition.nodes.len(),
            partition.depth
        );
        Ok(partition)
    }

    /// Start of leaf `i`; the first `wide_leaves` leaves get one extra unit.
    fn leaf_start(&self, i: usize) -> i64 {
        let i = i as i64;
        i * self.leaf_base_width + i.min(self.wide_leaves)
    }

    /// Build the subtree over leaves `[first, end)` and return its root.
    fn build_range(&mut self, first: usize, end: usize, depth: u32) -> NodeId {
        let key = IntervalKey::new(self.leaf_start(first), self.leaf_start(end) - 1);
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SegmentNode {
            key,
            left: None,
            right: None,
            depth,
        });
        self.by_key.insert(key, id);
        self.depth = self.depth.max(depth);

        if end - first == 1 {
            self.leaves.push(id);
            return id;
        }

        let mid = first + (end - first).div_ceil(2);
        let left = self.build_range(first, mid, depth + 1);
        let right = self.build_range(mid, end, depth + 1);
        let node = &mut self.nodes[id.index()];
        node.left = Some(left);
        node.right = Some(right);
        id
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn max_score(&self) -> i64 {
        self.config.max_score
    }

    pub fn min_leaf_width(&self) -> i64 {
        self.config.min_leaf_width
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &SegmentNode {
        &self.nodes[id.index()]
    }

    pub fn key(&self, id: NodeId) -> IntervalKey {
        self.nodes[id.index()].key
    }

    /// All nodes in pre-order (every parent precedes its children).
    pub fn nodes(&self) -> &[SegmentNode] {
        &self.nodes
    }

    /// Leaves in ascending score order.
    pub fn leaves(&self) -> impl Iterator<Item = &SegmentNode> + '_ {
        self.leaves.iter().map(|id| self.node(*id))
    }

    pub fn leaf_ids(&self) -> &[NodeId] {
        &self.leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Leaf intervals in ascending order.
    pub fn boundaries(&self) -> Vec<IntervalKey> {
        self.leaves().map(|node| node.key).collect()
    }

    /// Every interval key in the partition, in pre-order.
    pub fn keys(&self) -> Vec<IntervalKey> {
        self.nodes.iter().map(|node| node.key).collect()
    }

    pub fn node_for_key(&self, key: &IntervalKey) -> Option<NodeId> {
        self.by_key.get(key).copied()
    }

    pub fn contains_key(&self, key: &IntervalKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Round `score` and check it against the domain.
    pub fn check_domain(&self, score: f64) -> Result<i64> {
        let max = self.config.max_score;
        match to_fixed(score) {
            Some(fixed) if (0..=max * SCORE_SCALE).contains(&fixed) => Ok(fixed),
            _ => Err(SegrankError::domain_violation(score, 0, max)),
        }
    }

    /// Descend from the root to the leaf holding `score`.
    ///
    /// At each internal node the descent goes left iff the score is at most
    /// the left child's upper bound.
    pub fn descend(&self, score: f64) -> Result<Descent> {
        let fixed_score = self.check_domain(score)?;
        let mut path = Vec::with_capacity(self.depth as usize + 1);
        let mut outranking = Vec::with_capacity(self.depth as usize);
        let mut current = self.root();

        loop {
            path.push(current);
            let Some((left, right)) = self.node(current).children() else {
                break;
            };
            if fixed_score <= self.node(left).key.upper * SCORE_SCALE {
                outranking.push(right);
                current = left;
            } else {
                current = right;
            }
        }

        Ok(Descent {
            path,
            outranking,
            fixed_score,
        })
    }

    /// Nodes visited by the descent for `score`, root first.
    pub fn path_to(&self, score: f64) -> Result<Vec<&SegmentNode>> {
        let descent = self.descend(score)?;
        Ok(descent.path.iter().map(|id| self.node(*id)).collect())
    }

    /// Interval keys on the path to `score`, root first.
    pub fn path_keys(&self, score: f64) -> Result<Vec<IntervalKey>> {
        let descent = self.descend(score)?;
        Ok(descent.path.iter().map(|id| self.key(*id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_partition_leaves() {
        let partition = Partition::build(1000, 100).unwrap();

        let leaves = partition.boundaries();
        assert_eq!(leaves.len(), 10);
        assert_eq!(leaves[0], IntervalKey::new(0, 100));
        for (i, leaf) in leaves.iter().enumerate().skip(1) {
            let i = i as i64;
            assert_eq!(*leaf, IntervalKey::new(i * 100 + 1, (i + 1) * 100));
        }
        assert_eq!(partition.node_count(), 19);
        assert_eq!(partition.depth(), 4);
        assert_eq!(partition.key(partition.root()), IntervalKey::new(0, 1000));
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = Partition::build(123_457, 97).unwrap();
        let b = Partition::build(123_457, 97).unwrap();
        assert_eq!(a.keys(), b.keys());
        assert_eq!(a.boundaries(), b.boundaries());
    }

    #[test]
    fn test_leaves_partition_domain() {
        for (max_score, width) in [(1000, 100), (999, 100), (99, 100), (1_000_000, 100), (7, 1), (5000, 333)] {
            let partition = Partition::build(max_score, width).unwrap();
            let leaves = partition.boundaries();

            assert_eq!(leaves[0].lower, 0);
            assert_eq!(leaves[leaves.len() - 1].upper, max_score);
            for pair in leaves.windows(2) {
                assert_eq!(pair[0].upper + 1, pair[1].lower);
            }
            for leaf in &leaves {
                assert!(leaf.width() >= width, "leaf {leaf} narrower than {width}");
                assert!(leaf.width() < 2 * width);
            }
        }
    }

    #[test]
    fn test_depth_is_logarithmic() {
        let partition = Partition::build(1_000_000, 100).unwrap();
        // 10000 leaves
        assert_eq!(partition.leaf_count(), 10_000);
        assert_eq!(partition.depth(), 14);
        assert_eq!(partition.node_count(), 2 * 10_000 - 1);
    }

    #[test]
    fn test_internal_nodes_cover_children() {
        let partition = Partition::build(10_000, 100).unwrap();
        for node in partition.nodes() {
            if let Some((left, right)) = node.children() {
                let (l, r) = (partition.key(left), partition.key(right));
                assert_eq!(l.lower, node.key.lower);
                assert_eq!(r.upper, node.key.upper);
                assert_eq!(l.upper + 1, r.lower);
            }
        }
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(matches!(Partition::build(0, 100), Err(SegrankError::Config(_))));
        assert!(matches!(Partition::build(-5, 100), Err(SegrankError::Config(_))));
        assert!(matches!(Partition::build(1000, 0), Err(SegrankError::Config(_))));
        assert!(matches!(Partition::build(50, 100), Err(SegrankError::Config(_))));

        let config = PartitionConfig {
            max_score: 1_000_000,
            min_leaf_width: 1,
            max_leaves: 1024,
        };
        assert!(matches!(Partition::with_config(config), Err(SegrankError::Config(_))));
    }

    #[test]
    fn test_largest_domain_accepts_its_own_scores() {
        let partition = Partition::build(MAX_SCORE, 10_000_000).unwrap();
        assert!(partition.path_to(MAX_SCORE as f64).is_ok());
        assert!(partition.path_to(5.0e11).is_ok());
        assert!(partition.path_to(0.0).is_ok());

        assert!(matches!(
            Partition::build(MAX_SCORE + 1, 10_000_000),
            Err(SegrankError::Config(_))
        ));
        assert!(matches!(
            Partition::build(10_000_000_000_000, 10_000_000),
            Err(SegrankError::Config(_))
        ));
    }

    #[test]
    fn test_path_to_descends_by_left_upper() {
        let partition = Partition::build(1000, 100).unwrap();

        let path = partition.path_to(150.0).unwrap();
        assert_eq!(path[0].key, IntervalKey::new(0, 1000));
        assert_eq!(path.last().unwrap().key, IntervalKey::new(101, 200));
        assert!(path.last().unwrap().is_leaf());
        for pair in path.windows(2) {
            assert!(pair[0].key.covers(&pair[1].key));
        }

        // Fractional scores just above a boundary go right.
        let leaf = partition.path_to(100.5).unwrap().last().unwrap().key;
        assert_eq!(leaf, IntervalKey::new(101, 200));
        let leaf = partition.path_to(100.0).unwrap().last().unwrap().key;
        assert_eq!(leaf, IntervalKey::new(0, 100));
        let leaf = partition.path_to(0.0).unwrap().last().unwrap().key;
        assert_eq!(leaf, IntervalKey::new(0, 100));
        let leaf = partition.path_to(1000.0).unwrap().last().unwrap().key;
        assert_eq!(leaf, IntervalKey::new(901, 1000));
    }

    #[test]
    fn test_path_to_rejects_out_of_domain() {
        let partition = Partition::build(1000, 100).unwrap();
        for score in [5000.0, -0.5, 1000.0001, f64::NAN, f64::INFINITY] {
            match partition.path_to(score) {
                Err(SegrankError::DomainViolation { min, max, .. }) => {
                    assert_eq!((min, max), (0, 1000));
                }
                other => panic!("score {score} should be rejected, got {other:?}"),
            }
        }
        // Rounds into the domain.
        assert!(partition.path_to(1000.00004).is_ok());
    }

    #[test]
    fn test_descent_collects_right_siblings() {
        let partition = Partition::build(1000, 100).unwrap();
        let descent = partition.descend(150.0).unwrap();
        let outranking: Vec<IntervalKey> = descent
            .outranking
            .iter()
            .map(|id| partition.key(*id))
            .collect();
        let covered: i64 = outranking.iter().map(|k| k.width()).sum();
        assert_eq!(covered, 800);
        assert!(outranking.iter().all(|k| k.lower > 200));
    }

    #[test]
    fn test_interval_key_string_form() {
        let key = IntervalKey::new(0, 100);
        assert_eq!(key.to_string(), "0.0000-100.0000");
        assert_eq!("0.0000-100.0000".parse::<IntervalKey>().unwrap(), key);
        assert_eq!("101-200".parse::<IntervalKey>().unwrap(), IntervalKey::new(101, 200));
        assert!("1.5000-2.0000".parse::<IntervalKey>().is_err());
        assert!("200-100".parse::<IntervalKey>().is_err());
        assert!("garbage".parse::<IntervalKey>().is_err());
    }
}
