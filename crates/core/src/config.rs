//! Unified configuration for a Sculpin server.
//!
//! One structure covers per-collection index defaults, query defaults and
//! the HTTP server. Every section falls back to its defaults so a config
//! file only needs to mention what it changes.

use crate::Metric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Master configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SculpinConfig {
    /// Defaults applied to newly created collections.
    #[serde(default)]
    pub collection: CollectionSettings,

    /// Query defaults and limits.
    #[serde(default)]
    pub query: QuerySettings,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSettings,
}

/// Index settings for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// Distance metric used to rank candidates.
    pub metric: Metric,

    /// Number of IVF partitions (k-means clusters).
    pub num_partitions: usize,

    /// Minimum number of live vectors before the index is trained
    /// automatically. Never lower than `num_partitions`.
    pub train_threshold: usize,

    /// Fraction of the trained size that may be inserted or deleted before
    /// the index is considered stale and retrained.
    pub retrain_ratio: f64,

    /// Train and retrain without an explicit rebuild call.
    pub auto_index: bool,

    /// Maximum Lloyd iterations.
    pub max_iterations: usize,

    /// Training stops once no centroid moves more than this (squared L2).
    pub convergence_threshold: f32,

    /// Cap on vectors sampled for training (None = use all).
    pub training_sample_size: Option<usize>,

    /// Random seed for centroid initialization.
    pub seed: Option<u64>,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            metric: Metric::L2,
            num_partitions: 16,
            train_threshold: 256,
            retrain_ratio: 0.5,
            auto_index: true,
            max_iterations: 25,
            convergence_threshold: 1e-4,
            training_sample_size: Some(20_000),
            seed: None,
        }
    }
}

impl CollectionSettings {
    /// Number of live vectors at which automatic training kicks in.
    pub fn effective_train_threshold(&self) -> usize {
        self.train_threshold.max(self.num_partitions)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_partitions == 0 {
            return Err("num_partitions must be > 0".to_string());
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be > 0".to_string());
        }
        if !(self.retrain_ratio > 0.0) {
            return Err("retrain_ratio must be > 0".to_string());
        }
        if !(self.convergence_threshold >= 0.0) {
            return Err("convergence_threshold must be >= 0".to_string());
        }
        if matches!(self.training_sample_size, Some(n) if n < self.num_partitions) {
            return Err("training_sample_size must be >= num_partitions".to_string());
        }
        Ok(())
    }
}

/// Query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Partitions probed when a request does not say.
    pub default_nprobe: usize,

    /// Results returned when a request does not say.
    pub default_top_k: usize,

    /// Upper bound on `top_k` accepted from callers.
    pub max_top_k: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_nprobe: 4,
            default_top_k: 10,
            max_top_k: 1000,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind.
    pub bind_addr: String,

    /// Directory for persisted collections (None = in memory only).
    pub data_dir: Option<PathBuf>,

    /// Maximum request body size.
    pub body_limit_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: None,
            body_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

impl SculpinConfig {
    /// Load a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.collection.validate()?;

        if self.query.default_nprobe == 0 {
            return Err("default_nprobe must be > 0".to_string());
        }
        if self.query.max_top_k == 0 || self.query.default_top_k > self.query.max_top_k {
            return Err("default_top_k must be in [1, max_top_k]".to_string());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("body_limit_bytes must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SculpinConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.collection.effective_train_threshold(), 256);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SculpinConfig =
            serde_json::from_str(r#"{"collection": {"num_partitions": 64}}"#).unwrap();
        assert_eq!(config.collection.num_partitions, 64);
        assert_eq!(config.collection.max_iterations, 25);
        assert_eq!(config.query.default_nprobe, 4);
        assert!(config.server.data_dir.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = SculpinConfig::default();
        config.collection.num_partitions = 0;
        assert!(config.validate().is_err());

        let mut config = SculpinConfig::default();
        config.collection.training_sample_size = Some(4);
        assert!(config.validate().is_err());

        let mut config = SculpinConfig::default();
        config.query.default_top_k = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_train_threshold_never_below_partitions() {
        let settings = CollectionSettings {
            num_partitions: 500,
            train_threshold: 10,
            ..Default::default()
        };
        assert_eq!(settings.effective_train_threshold(), 500);
    }
}
