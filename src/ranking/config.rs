//! Leaderboard configuration.
//!
//! ```
//! use segrank::ranking::config::RankingConfig;
//!
//! let config = RankingConfig::builder()
//!     .leaderboard("weekly")
//!     .max_score(1000)
//!     .min_leaf_width(100)
//!     .keep_top_n(50)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.index.max_score, 1000);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegrankError};
use crate::segment::partition::PartitionConfig;

/// Members kept in the exact window by default.
pub const DEFAULT_KEEP_TOP_N: usize = 10_000;

/// Members fetched per `range` call during a rebuild scan.
pub const DEFAULT_REBUILD_PAGE_SIZE: usize = 1_000;

/// Configuration for one leaderboard served by a [`crate::ranking::RankCoordinator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Name used in logs and CLI output.
    pub leaderboard: String,

    /// Shape of the segment index.
    pub index: PartitionConfig,

    /// Size of the exact window the janitor retains; pages beyond it are refused.
    pub keep_top_n: usize,

    pub rebuild_page_size: usize,

    /// Also count members known only to the profile store when rebuilding.
    pub rebuild_includes_profiles: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        RankingConfig {
            leaderboard: "default".to_string(),
            index: PartitionConfig::default(),
            keep_top_n: DEFAULT_KEEP_TOP_N,
            rebuild_page_size: DEFAULT_REBUILD_PAGE_SIZE,
            rebuild_includes_profiles: false,
        }
    }
}

impl RankingConfig {
    /// Create a new builder for RankingConfig.
    pub fn builder() -> RankingConfigBuilder {
        RankingConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.leaderboard.trim().is_empty() {
            return Err(SegrankError::config("leaderboard name must not be empty"));
        }
        if self.keep_top_n == 0 {
            return Err(SegrankError::config("keep_top_n must be positive"));
        }
        if self.rebuild_page_size == 0 {
            return Err(SegrankError::config("rebuild_page_size must be positive"));
        }
        self.index.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RankingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            SegrankError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Write the configuration as pretty JSON.
    pub fn save_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Builder for RankingConfig.
#[derive(Debug, Default)]
pub struct RankingConfigBuilder {
    config: RankingConfig,
}

impl RankingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaderboard(mut self, name: impl Into<String>) -> Self {
        self.config.leaderboard = name.into();
        self
    }

    pub fn index(mut self, index: PartitionConfig) -> Self {
        self.config.index = index;
        self
    }

    pub fn max_score(mut self, max_score: i64) -> Self {
        self.config.index.max_score = max_score;
        self
    }

    pub fn min_leaf_width(mut self, width: i64) -> Self {
        self.config.index.min_leaf_width = width;
        self
    }

    pub fn keep_top_n(mut self, n: usize) -> Self {
        self.config.keep_top_n = n;
        self
    }

    pub fn rebuild_page_size(mut self, size: usize) -> Self {
        self.config.rebuild_page_size = size;
        self
    }

    pub fn rebuild_includes_profiles(mut self, include: bool) -> Self {
        self.config.rebuild_includes_profiles = include;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<RankingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
