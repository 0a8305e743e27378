//! Configuration module for the tuning engine

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::utils::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Rolling-origin backtesting knobs
    #[serde(default)]
    pub backtest: BacktestConfig,

    /// Evaluation-pool and timeout settings
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Backtesting knobs shared by every evaluation. These are engine
/// constants, not members of the search grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Number of periods in the initial training window
    #[serde(default = "default_initial_periods")]
    pub initial_periods: usize,

    /// Periods to advance the origin between rolls
    #[serde(default = "default_step_periods")]
    pub step_periods: usize,

    /// Periods forecast ahead of each origin
    #[serde(default = "default_horizon_periods")]
    pub horizon_periods: usize,

    /// Minimum monthly periods a category must have before tuning is attempted
    #[serde(default = "default_min_periods")]
    pub min_periods: usize,
}

/// Evaluation-pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on concurrent evaluations (further capped by CPU count)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Wall-clock budget for one grid combination, in seconds
    #[serde(default = "default_combination_timeout_secs")]
    pub combination_timeout_secs: u64,

    /// Wall-clock budget for a whole job, in seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_initial_periods() -> usize {
    12
}

fn default_step_periods() -> usize {
    1
}

fn default_horizon_periods() -> usize {
    1
}

fn default_min_periods() -> usize {
    13
}

fn default_max_workers() -> usize {
    4
}

fn default_combination_timeout_secs() -> u64 {
    300
}

fn default_job_timeout_secs() -> u64 {
    3600
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_periods: default_initial_periods(),
            step_periods: default_step_periods(),
            horizon_periods: default_horizon_periods(),
            min_periods: default_min_periods(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            combination_timeout_secs: default_combination_timeout_secs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            backtest: BacktestConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl TuningConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: TuningConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let bt = &self.backtest;
        if bt.initial_periods == 0 || bt.step_periods == 0 || bt.horizon_periods == 0 {
            return Err(Error::ConfigError(
                "backtest window lengths must all be at least 1 period".to_string(),
            ));
        }
        // One full roll must fit inside the minimum accepted history.
        if bt.min_periods < bt.initial_periods + bt.horizon_periods {
            return Err(Error::ConfigError(format!(
                "min_periods ({}) must cover at least one backtest roll ({} initial + {} horizon)",
                bt.min_periods, bt.initial_periods, bt.horizon_periods
            )));
        }
        if self.pool.max_workers == 0 {
            return Err(Error::ConfigError("max_workers must be at least 1".to_string()));
        }
        if self.pool.combination_timeout_secs == 0 || self.pool.job_timeout_secs == 0 {
            return Err(Error::ConfigError("timeouts must be at least 1 second".to_string()));
        }
        Ok(())
    }
}
