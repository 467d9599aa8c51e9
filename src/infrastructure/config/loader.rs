//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::SchedulerConfig;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid thread_pool_max_workers: {0}, must be between 1 and 128")]
    InvalidMaxWorkers(usize),

    #[error("invalid top_k: must be at least 1")]
    InvalidTopK,

    #[error("invalid consume_batch: must be at least 1")]
    InvalidConsumeBatch,

    #[error("invalid consume_interval_seconds: {0}, must be positive")]
    InvalidConsumeInterval(f64),

    #[error("invalid filter_similarity_threshold: {0}, must be within [0, 1]")]
    InvalidSimilarityThreshold(f32),

    #[error("act_mem_dump_path cannot be empty")]
    EmptyDumpPath,

    #[error("database url cannot be empty")]
    EmptyDatabaseUrl,
}

/// Loads [`SchedulerConfig`] with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `memloom.yaml` in the working directory
    /// 3. Environment variables (`MEMLOOM_*` prefix, `__` for nesting)
    pub fn load() -> Result<SchedulerConfig> {
        let config: SchedulerConfig = Figment::new()
            .merge(Serialized::defaults(SchedulerConfig::default()))
            .merge(Yaml::file("memloom.yaml"))
            .merge(Env::prefixed("MEMLOOM_").split("__"))
            .extract()
            .context("failed to extract configuration")?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<SchedulerConfig> {
        let config: SchedulerConfig = Figment::new()
            .merge(Serialized::defaults(SchedulerConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "failed to load config from {}",
                path.as_ref().display()
            ))?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &SchedulerConfig) -> Result<(), ConfigError> {
        if config.thread_pool_max_workers == 0 || config.thread_pool_max_workers > 128 {
            return Err(ConfigError::InvalidMaxWorkers(config.thread_pool_max_workers));
        }
        if config.top_k == 0 {
            return Err(ConfigError::InvalidTopK);
        }
        if config.consume_batch == 0 {
            return Err(ConfigError::InvalidConsumeBatch);
        }
        if config.consume_interval_seconds <= 0.0 {
            return Err(ConfigError::InvalidConsumeInterval(
                config.consume_interval_seconds,
            ));
        }
        if !(0.0..=1.0).contains(&config.filter_similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                config.filter_similarity_threshold,
            ));
        }
        if config.act_mem_dump_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDumpPath);
        }
        if config.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        Ok(())
    }
}
