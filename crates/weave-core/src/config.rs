use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::WeaveError;
use crate::types::{AlgorithmKind, WeightColumn};

/// Top-level configuration loaded from `.weave.toml`.
///
/// Supports layered resolution: CLI flags > config file > defaults.
///
/// # Examples
///
/// ```
/// use weave_core::WeaveConfig;
///
/// let config = WeaveConfig::default();
/// assert_eq!(config.history.max_changeset_size, 50);
/// assert_eq!(config.coupling.min_support, 3);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeaveConfig {
    /// Commit stream and materialization settings.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Percentile ranks and floors used by the threshold engine.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Co-change coupling filters.
    #[serde(default)]
    pub coupling: CouplingConfig,
    /// Community detection defaults.
    #[serde(default)]
    pub clustering: ClusteringConfig,
    /// Snapshot comparison cut-offs.
    #[serde(default)]
    pub comparison: ComparisonConfig,
    /// Snapshot and run storage.
    #[serde(default)]
    pub store: StoreConfig,
}

impl WeaveConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Io`] if the file cannot be read,
    /// [`WeaveError::Toml`] if the content is not valid TOML, or
    /// [`WeaveError::Config`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, WeaveError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Examples
    ///
    /// ```
    /// use weave_core::WeaveConfig;
    ///
    /// let toml = r#"
    /// [coupling]
    /// min_support = 5
    /// "#;
    /// let config = WeaveConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.coupling.min_support, 5);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, WeaveError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), WeaveError> {
        if self.history.max_changeset_size == 0 {
            return Err(WeaveError::Config(
                "history.max_changeset_size must be at least 1".into(),
            ));
        }
        if self.history.batch_size == 0 {
            return Err(WeaveError::Config(
                "history.batch_size must be at least 1".into(),
            ));
        }
        for (name, rank) in [
            ("hot30_percentile", self.thresholds.hot30_percentile),
            ("hot90_percentile", self.thresholds.hot90_percentile),
            ("hot_rate_percentile", self.thresholds.hot_rate_percentile),
            ("stable_days_percentile", self.thresholds.stable_days_percentile),
            ("stable90_percentile", self.thresholds.stable90_percentile),
            ("stable_rate_percentile", self.thresholds.stable_rate_percentile),
        ] {
            if !(0.0..=1.0).contains(&rank) {
                return Err(WeaveError::Config(format!(
                    "thresholds.{name} must be within [0, 1], got {rank}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.coupling.min_coupling) {
            return Err(WeaveError::Config(format!(
                "coupling.min_coupling must be within [0, 1], got {}",
                self.coupling.min_coupling
            )));
        }
        if self.clustering.resolution <= 0.0 {
            return Err(WeaveError::Config(format!(
                "clustering.resolution must be positive, got {}",
                self.clustering.resolution
            )));
        }
        let cmp = &self.comparison;
        if !(0.0 < cmp.drift_threshold && cmp.drift_threshold <= cmp.stable_threshold && cmp.stable_threshold <= 1.0) {
            return Err(WeaveError::Config(format!(
                "comparison thresholds must satisfy 0 < drift ({}) <= stable ({}) <= 1",
                cmp.drift_threshold, cmp.stable_threshold
            )));
        }
        Ok(())
    }
}

/// Commit stream and materialization settings.
///
/// # Examples
///
/// ```
/// use weave_core::HistoryConfig;
///
/// let config = HistoryConfig::default();
/// assert!(config.since_days.is_none());
/// assert_eq!(config.batch_size, 500);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Only read commits from the last N days (default: full history).
    pub since_days: Option<u64>,
    /// Branch to walk (default: HEAD).
    pub branch: Option<String>,
    /// Changesets touching more files are excluded from coupling (default: 50).
    #[serde(default = "default_max_changeset_size")]
    pub max_changeset_size: usize,
    /// Commits folded between cancellation checks (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fixed reference time (unix seconds) for windows and ages.
    pub as_of: Option<i64>,
}

fn default_max_changeset_size() -> usize {
    50
}

fn default_batch_size() -> usize {
    500
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            since_days: None,
            branch: None,
            max_changeset_size: default_max_changeset_size(),
            batch_size: default_batch_size(),
            as_of: None,
        }
    }
}

/// Percentile ranks and guard values for the six repository thresholds.
///
/// Hot thresholds are floored, stable thresholds on activity are capped.
///
/// # Examples
///
/// ```
/// use weave_core::ThresholdConfig;
///
/// let config = ThresholdConfig::default();
/// assert_eq!(config.hot30_percentile, 0.95);
/// assert_eq!(config.hot30_floor, 3.0);
/// assert_eq!(config.stable90_ceiling, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub hot30_percentile: f64,
    pub hot30_floor: f64,
    pub hot90_percentile: f64,
    pub hot90_floor: f64,
    pub hot_rate_percentile: f64,
    pub hot_rate_floor: f64,
    pub stable_days_percentile: f64,
    pub stable_days_floor: f64,
    pub stable90_percentile: f64,
    pub stable90_ceiling: f64,
    pub stable_rate_percentile: f64,
    pub stable_rate_ceiling: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            hot30_percentile: 0.95,
            hot30_floor: 3.0,
            hot90_percentile: 0.90,
            hot90_floor: 6.0,
            hot_rate_percentile: 0.90,
            hot_rate_floor: 3.0,
            stable_days_percentile: 0.75,
            stable_days_floor: 180.0,
            stable90_percentile: 0.25,
            stable90_ceiling: 1.0,
            stable_rate_percentile: 0.50,
            stable_rate_ceiling: 1.0,
        }
    }
}

/// Co-change coupling filters.
///
/// # Examples
///
/// ```
/// use weave_core::CouplingConfig;
///
/// let config = CouplingConfig::default();
/// assert_eq!(config.min_support, 3);
/// assert_eq!(config.min_coupling, 0.1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// Minimum co-change count for a pair (default: 3).
    #[serde(default = "default_min_support")]
    pub min_support: u32,
    /// Minimum Dice coupling for a pair (default: 0.1).
    #[serde(default = "default_min_coupling")]
    pub min_coupling: f64,
}

fn default_min_support() -> u32 {
    3
}

fn default_min_coupling() -> f64 {
    0.1
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            min_support: default_min_support(),
            min_coupling: default_min_coupling(),
        }
    }
}

/// Community detection defaults.
///
/// # Examples
///
/// ```
/// use weave_core::{AlgorithmKind, ClusteringConfig, WeightColumn};
///
/// let config = ClusteringConfig::default();
/// assert_eq!(config.algorithm, AlgorithmKind::Louvain);
/// assert_eq!(config.weight_column, WeightColumn::Coupling);
/// assert_eq!(config.top_n, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default)]
    pub algorithm: AlgorithmKind,
    #[serde(default)]
    pub weight_column: WeightColumn,
    /// Edges below this weight are dropped before clustering (default: 0.3).
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
    /// Louvain resolution; higher values give smaller communities (default: 1.0).
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Entries kept in each per-cluster top list (default: 5).
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_min_weight() -> f64 {
    0.3
}

fn default_resolution() -> f64 {
    1.0
}

fn default_top_n() -> usize {
    5
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::default(),
            weight_column: WeightColumn::default(),
            min_weight: default_min_weight(),
            resolution: default_resolution(),
            top_n: default_top_n(),
        }
    }
}

/// Overlap-ratio cut-offs for snapshot comparison.
///
/// # Examples
///
/// ```
/// use weave_core::ComparisonConfig;
///
/// let config = ComparisonConfig::default();
/// assert_eq!(config.stable_threshold, 0.7);
/// assert_eq!(config.drift_threshold, 0.3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Overlap ratio at or above which a match is stable.
    pub stable_threshold: f64,
    /// Overlap ratio at or above which a match is drifted; below it the base
    /// cluster is dissolved.
    pub drift_threshold: f64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            stable_threshold: 0.7,
            drift_threshold: 0.3,
        }
    }
}

/// Snapshot and run storage.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use weave_core::StoreConfig;
///
/// assert_eq!(StoreConfig::default().path, PathBuf::from(".weave/weave.db"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path, relative to the repository root.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".weave/weave.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}
