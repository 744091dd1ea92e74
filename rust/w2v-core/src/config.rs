// rust/w2v-core/src/config.rs

//! Configuration management for the CBOW shard cluster.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TrainerError};

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct W2vConfig {
    pub cluster: ClusterConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub driver: DriverConfig,
}

/// Cluster shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of parameter shards.
    pub shard_count: u16,
    /// Worker threads consuming each shard's inbox.
    pub workers_per_shard: usize,
}

/// Embedding table dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of rows in every embedding matrix.
    pub vocab_size: usize,
    /// Full vector length, split column-wise across shards.
    pub vector_length: usize,
    /// Seed for syn0 initialisation.
    pub seed: u64,
}

// Numeric training parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // Default learning rate.
    pub alpha: f64,
    // Default number of negative samples per request.
    pub negative: usize,
    // Sigmoid table domain is [-max_exp, max_exp].
    pub max_exp: f32,
    // Number of entries in the sigmoid table.
    pub exp_table_size: usize,
}

/// Driver bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Log progress every N finished rounds.
    pub progress_log_interval: u64,
    /// Chains older than this are considered dead and evicted.
    pub chain_timeout_ms: u64,
    /// How often the eviction sweep runs.
    pub eviction_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            workers_per_shard: 2,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 1000,
            vector_length: 100,
            seed: 42,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            alpha: 0.025,
            negative: 5,
            max_exp: 6.0,
            exp_table_size: 1000,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            progress_log_interval: 100_000,
            chain_timeout_ms: 30_000,
            eviction_interval_ms: 5_000,
        }
    }
}

impl DriverConfig {
    pub fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

impl FromStr for W2vConfig {
    type Err = TrainerError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| TrainerError::config_with_source("failed to parse TOML config", e))
    }
}

impl W2vConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainerError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `W2V_` and use underscores
    // to separate nested fields. For example:
    // - `W2V_CLUSTER_SHARD_COUNT` overrides `cluster.shard_count`
    // - `W2V_TRAINING_ALPHA` overrides `training.alpha`
    // - `W2V_DRIVER_CHAIN_TIMEOUT_MS` overrides `driver.chain_timeout_ms`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Cluster overrides
        if let Ok(val) = std::env::var("W2V_CLUSTER_SHARD_COUNT") {
            if let Ok(v) = val.parse() {
                self.cluster.shard_count = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_CLUSTER_WORKERS_PER_SHARD") {
            if let Ok(v) = val.parse() {
                self.cluster.workers_per_shard = v;
            }
        }

        // Model overrides
        if let Ok(val) = std::env::var("W2V_MODEL_VOCAB_SIZE") {
            if let Ok(v) = val.parse() {
                self.model.vocab_size = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_MODEL_VECTOR_LENGTH") {
            if let Ok(v) = val.parse() {
                self.model.vector_length = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_MODEL_SEED") {
            if let Ok(v) = val.parse() {
                self.model.seed = v;
            }
        }

        // Training overrides
        if let Ok(val) = std::env::var("W2V_TRAINING_ALPHA") {
            if let Ok(v) = val.parse() {
                self.training.alpha = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_TRAINING_NEGATIVE") {
            if let Ok(v) = val.parse() {
                self.training.negative = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_TRAINING_MAX_EXP") {
            if let Ok(v) = val.parse() {
                self.training.max_exp = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_TRAINING_EXP_TABLE_SIZE") {
            if let Ok(v) = val.parse() {
                self.training.exp_table_size = v;
            }
        }

        // Driver overrides
        if let Ok(val) = std::env::var("W2V_DRIVER_PROGRESS_LOG_INTERVAL") {
            if let Ok(v) = val.parse() {
                self.driver.progress_log_interval = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_DRIVER_CHAIN_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.driver.chain_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("W2V_DRIVER_EVICTION_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.driver.eviction_interval_ms = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.shard_count == 0 {
            return Err(TrainerError::config(
                "cluster.shard_count must be greater than 0",
            ));
        }
        if self.cluster.workers_per_shard == 0 {
            return Err(TrainerError::config(
                "cluster.workers_per_shard must be greater than 0",
            ));
        }

        if self.model.vocab_size == 0 {
            return Err(TrainerError::config(
                "model.vocab_size must be greater than 0",
            ));
        }
        if self.model.vector_length < self.cluster.shard_count as usize {
            return Err(TrainerError::config(
                "model.vector_length must be at least cluster.shard_count",
            ));
        }

        if !(self.training.alpha > 0.0) {
            return Err(TrainerError::config("training.alpha must be positive"));
        }
        if !(self.training.max_exp > 0.0) {
            return Err(TrainerError::config("training.max_exp must be positive"));
        }
        if self.training.exp_table_size < 2 {
            return Err(TrainerError::config(
                "training.exp_table_size must be at least 2",
            ));
        }

        if self.driver.progress_log_interval == 0 {
            return Err(TrainerError::config(
                "driver.progress_log_interval must be greater than 0",
            ));
        }
        if self.driver.eviction_interval_ms == 0 {
            return Err(TrainerError::config(
                "driver.eviction_interval_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = W2vConfig::default();

        assert_eq!(config.cluster.shard_count, 4);
        assert_eq!(config.cluster.workers_per_shard, 2);
        assert_eq!(config.model.vocab_size, 1000);
        assert_eq!(config.model.vector_length, 100);
        assert!((config.training.alpha - 0.025).abs() < f64::EPSILON);
        assert_eq!(config.training.negative, 5);
        assert_eq!(config.training.max_exp, 6.0);
        assert_eq!(config.training.exp_table_size, 1000);
        assert_eq!(config.driver.progress_log_interval, 100_000);
        assert_eq!(config.driver.chain_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_validates() {
        assert!(W2vConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: W2vConfig = "".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [cluster]
            shard_count = 8

            [training]
            alpha = 0.05
        "#;
        let config: W2vConfig = toml.parse().unwrap();

        assert_eq!(config.cluster.shard_count, 8);
        assert_eq!(config.cluster.workers_per_shard, 2);
        assert!((config.training.alpha - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.training.negative, 5);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<W2vConfig, _> = "shard_count = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [model]
            vocab_size = 64
            vector_length = 16
            "#
        )
        .unwrap();

        let config = W2vConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model.vocab_size, 64);
        assert_eq!(config.model.vector_length, 16);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cluster]\nshard_count = 0").unwrap();

        assert!(W2vConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(W2vConfig::from_file("/nonexistent/w2v.toml").is_err());
    }

    #[test]
    fn test_validate_vector_shorter_than_cluster() {
        let mut config = W2vConfig::default();
        config.cluster.shard_count = 8;
        config.model.vector_length = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vector_length"));
    }

    #[test]
    fn test_validate_non_positive_alpha() {
        let mut config = W2vConfig::default();
        config.training.alpha = 0.0;
        assert!(config.validate().is_err());

        config.training.alpha = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tiny_exp_table() {
        let mut config = W2vConfig::default();
        config.training.exp_table_size = 1;
        assert!(config.validate().is_err());
    }

    fn clear_w2v_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("W2V_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Env vars are process-global, so all override cases live in one test.
    #[test]
    fn test_env_overrides() {
        clear_w2v_env_vars();

        std::env::set_var("W2V_CLUSTER_SHARD_COUNT", "16");
        std::env::set_var("W2V_TRAINING_ALPHA", "0.1");
        std::env::set_var("W2V_DRIVER_CHAIN_TIMEOUT_MS", "250");

        let config = W2vConfig::default().with_env_overrides();

        assert_eq!(config.cluster.shard_count, 16);
        assert!((config.training.alpha - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.driver.chain_timeout_ms, 250);

        clear_w2v_env_vars();

        std::env::set_var("W2V_MODEL_VECTOR_LENGTH", "not_a_number");
        let config = W2vConfig::default().with_env_overrides();
        assert_eq!(config.model.vector_length, 100);

        clear_w2v_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = W2vConfig::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: W2vConfig = toml_str.parse().unwrap();

        assert_eq!(original.cluster.shard_count, parsed.cluster.shard_count);
        assert_eq!(original.model.vector_length, parsed.model.vector_length);
        assert_eq!(
            original.driver.chain_timeout_ms,
            parsed.driver.chain_timeout_ms
        );
    }
}
