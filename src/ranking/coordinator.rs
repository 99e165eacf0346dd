//! Rank queries and score changes over the exact store and the segment index.
//!
//! The exact store answers for members inside its retained window. Members
//! the janitor evicted are answered approximately from the segment index,
//! using the score their profile still carries.

use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegrankError};
use crate::ranking::config::RankingConfig;
use crate::segment::index::{IndexStats, SegmentIndex, VerifyReport};
use crate::segment::rebuild::{RebuildReport, scan_exact_store};
use crate::storage::traits::{CounterStore, ExactScoreStore, ProfileStore};

const EXACT_STORE: &str = "exact-scores";
const PROFILE_STORE: &str = "profiles";

/// A member's position on the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankResult {
    pub member: String,
    /// 1-based rank.
    pub rank: u64,
    pub score: f64,
    /// `false` when the rank was estimated from the segment index.
    pub exact: bool,
}

/// A committed score change; `old_score` is `None` for a first write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub member: String,
    pub old_score: Option<f64>,
    pub new_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMember {
    pub rank: u64,
    pub member: String,
    pub score: f64,
}

/// One page of the exact window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingPage {
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    /// Members reachable through paging, at most `keep_top_n`.
    pub total: u64,
    pub members: Vec<RankedMember>,
}

/// What [`RankCoordinator::initialize`] did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InitOutcome {
    /// Persisted counters were found and kept.
    Reused { stored_counters: usize },
    /// The counter store was empty and a full rebuild ran.
    Rebuilt(RebuildReport),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub leaderboard: String,
    pub exact_members: u64,
    pub keep_top_n: usize,
    pub index: IndexStats,
}

/// Entry point for rank queries and score-change events of one leaderboard.
#[derive(Debug)]
pub struct RankCoordinator {
    config: RankingConfig,
    index: SegmentIndex,
    exact: Arc<dyn ExactScoreStore>,
    profiles: Arc<dyn ProfileStore>,
    // Score changes hold it shared; removals, rebuild and reset hold it exclusively.
    gate: RwLock<()>,
}

impl RankCoordinator {
    pub fn new(
        config: RankingConfig,
        counters: Arc<dyn CounterStore>,
        exact: Arc<dyn ExactScoreStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Result<Self> {
        config.validate()?;
        let index = SegmentIndex::build(&config.index, counters)?;
        log::debug!(
            "leaderboard {}: {} leaves over [0, {}]",
            config.leaderboard,
            index.partition().leaf_count(),
            config.index.max_score
        );
        Ok(RankCoordinator {
            config,
            index,
            exact,
            profiles,
            gate: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn index(&self) -> &SegmentIndex {
        &self.index
    }

    /// Rebuild from the exact store when the counter store holds nothing yet.
    pub fn initialize(&self) -> Result<InitOutcome> {
        let counters = self.index.counters();
        let stored_counters = counters
            .len()
            .map_err(|e| e.into_store_error(counters.name()))?;

        if stored_counters == 0 {
            log::info!(
                "leaderboard {}: no persisted counters, rebuilding",
                self.config.leaderboard
            );
            return Ok(InitOutcome::Rebuilt(self.rebuild()?));
        }

        log::info!(
            "leaderboard {}: reusing {stored_counters} persisted counters",
            self.config.leaderboard
        );
        Ok(InitOutcome::Reused { stored_counters })
    }

    /// Rank of `member`: exact from the retained window, estimated otherwise.
    ///
    /// A failing exact store is reported as such, never masked by an
    /// estimate. `NotFound` means no collaborator knows the member.
    pub fn report(&self, member: &str) -> Result<RankResult> {
        let exact = self
            .exact
            .rank(member)
            .map_err(|e| e.into_store_error(EXACT_STORE))?;
        if let Some((rank0, score)) = exact {
            return Ok(RankResult {
                member: member.to_string(),
                rank: rank0 + 1,
                score,
                exact: true,
            });
        }

        let score = self
            .profile_score(member)?
            .ok_or_else(|| SegrankError::not_found(format!("member {member}")))?;
        let estimate = self.index.estimate_rank(score)?;
        log::debug!("member {member} outside the exact window, estimated rank {}", estimate + 1);

        Ok(RankResult {
            member: member.to_string(),
            rank: estimate + 1,
            score,
            exact: false,
        })
    }

    /// Commit `new_score` for `member` and move it in the index.
    ///
    /// The previous score comes from the exact store, or from the profile
    /// store when the member was evicted; profile records must therefore be
    /// updated after this call returns. If the index update fails after the
    /// score write committed, the write stays and `StaleIndex` is returned.
    pub fn on_score_change(&self, member: &str, new_score: f64) -> Result<ScoreChange> {
        self.index.partition().check_domain(new_score)?;
        let _gate = self.gate.read();

        let previous = self
            .exact
            .upsert(member, new_score)
            .map_err(|e| e.into_store_error(EXACT_STORE))?;
        let old_score = match previous {
            Some(score) => Some(score),
            None => self
                .profile_score(member)
                .map_err(|e| self.stale(member, e))?,
        };

        self.index
            .move_score(old_score, Some(new_score))
            .map_err(|e| self.stale(member, e))?;

        log::trace!("member {member}: {old_score:?} -> {new_score}");
        Ok(ScoreChange {
            member: member.to_string(),
            old_score,
            new_score,
        })
    }

    /// Remove `member` from the exact store and its profile record, and stop
    /// counting it.
    ///
    /// Returns the score the member was counted at. Removals run exclusively
    /// so a member is decremented at most once; removing it again is
    /// `NotFound`.
    pub fn remove_member(&self, member: &str) -> Result<f64> {
        let _gate = self.gate.write();

        let removed = self
            .exact
            .remove(member)
            .map_err(|e| e.into_store_error(EXACT_STORE))?;
        // Until the profile record is gone a retry finds the member there and
        // decrements it, so nothing is counted yet on failure.
        let forgotten = self
            .profiles
            .forget(member)
            .map_err(|e| e.into_store_error(PROFILE_STORE))?;
        let score = removed
            .or(forgotten)
            .ok_or_else(|| SegrankError::not_found(format!("member {member}")))?;

        self.index
            .remove_member(score)
            .map_err(|e| self.stale(member, e))?;
        log::debug!("removed member {member} at score {score}");
        Ok(score)
    }

    /// One page of the exact window, best first. Pages past `keep_top_n` are empty.
    pub fn top(&self, page: usize, page_size: usize) -> Result<RankingPage> {
        if page == 0 || page_size == 0 {
            return Err(SegrankError::invalid_argument(format!(
                "page {page} of size {page_size}"
            )));
        }

        let window = self.config.keep_top_n;
        let total = self
            .exact
            .size()
            .map_err(|e| e.into_store_error(EXACT_STORE))?
            .min(window as u64);

        let start = (page - 1).saturating_mul(page_size);
        let end = start.saturating_add(page_size).min(window);
        let entries = if start < end {
            self.exact
                .range(start, end)
                .map_err(|e| e.into_store_error(EXACT_STORE))?
        } else {
            Vec::new()
        };

        let members = entries
            .into_iter()
            .enumerate()
            .map(|(offset, (member, score))| RankedMember {
                rank: (start + offset) as u64 + 1,
                member,
                score,
            })
            .collect();

        Ok(RankingPage {
            page,
            page_size,
            total,
            members,
        })
    }

    /// Recompute every counter from a full scan, pausing score changes.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let _gate = self.gate.write();

        let mut members = scan_exact_store(self.exact.as_ref(), self.config.rebuild_page_size)
            .map_err(|e| e.into_store_error(EXACT_STORE))?;

        if self.config.rebuild_includes_profiles {
            let known: AHashSet<String> = members.iter().map(|(member, _)| member.clone()).collect();
            let evicted: Vec<(String, f64)> = self
                .profiles
                .scores()
                .map_err(|e| e.into_store_error(PROFILE_STORE))?
                .into_iter()
                .filter(|(member, _)| !known.contains(member))
                .collect();
            log::debug!("adding {} profile-only members to the rebuild", evicted.len());
            members.extend(evicted);
        }

        let scores: Vec<f64> = members.iter().map(|(_, score)| *score).collect();
        let report = self.index.rebuild_from_scores(&scores)?;
        log::info!(
            "leaderboard {}: rebuilt from {} members",
            self.config.leaderboard,
            report.members_scanned
        );
        Ok(report)
    }

    /// Zero every counter, pausing score changes.
    pub fn reset(&self) -> Result<()> {
        let _gate = self.gate.write();
        self.index.reset()
    }

    pub fn stats(&self) -> Result<CoordinatorStats> {
        let exact_members = self
            .exact
            .size()
            .map_err(|e| e.into_store_error(EXACT_STORE))?;
        Ok(CoordinatorStats {
            leaderboard: self.config.leaderboard.clone(),
            exact_members,
            keep_top_n: self.config.keep_top_n,
            index: self.index.stats()?,
        })
    }

    pub fn verify(&self) -> Result<VerifyReport> {
        self.index.verify()
    }

    fn profile_score(&self, member: &str) -> Result<Option<f64>> {
        self.profiles
            .get_score(member)
            .map_err(|e| e.into_store_error(PROFILE_STORE))
    }

    fn stale(&self, member: &str, err: SegrankError) -> SegrankError {
        log::error!(
            "leaderboard {}: score for {member} committed but index not updated: {err}",
            self.config.leaderboard
        );
        SegrankError::stale_index(member, err.to_string())
    }
}
