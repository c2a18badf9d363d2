use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{sflog_debug, Error, Result};

/// Default budget ceiling in USD when none is configured.
pub const DEFAULT_BUDGET_USD: f64 = 10.0;

/// Default concurrency cap for ungrouped steps.
pub const DEFAULT_MAX_PARALLEL_STEPS: usize = 3;

/// Engine configuration loaded from ~/.stepflow/stepflow.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cumulative spend ceiling for a workflow run, in USD.
    #[serde(default = "default_budget")]
    pub budget_usd: f64,
    /// Concurrency cap for ungrouped steps.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_steps: usize,
    /// Budget fractions at which the cost ledger fires alerts.
    pub alert_thresholds: Option<Vec<f64>>,
    /// Path for persisting the cost ledger across runs, relative to
    /// the stepflow dir unless absolute.
    pub ledger_path: Option<String>,
}

fn default_budget() -> f64 {
    DEFAULT_BUDGET_USD
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL_STEPS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            budget_usd: DEFAULT_BUDGET_USD,
            max_parallel_steps: DEFAULT_MAX_PARALLEL_STEPS,
            alert_thresholds: None,
            ledger_path: None,
        }
    }
}

impl Config {
    pub fn stepflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".stepflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::stepflow_dir()?.join("stepflow.toml"))
    }

    /// Resolve the configured ledger path against the stepflow dir.
    pub fn ledger_file(&self) -> Result<Option<PathBuf>> {
        match &self.ledger_path {
            None => Ok(None),
            Some(p) => {
                let path = PathBuf::from(p);
                if path.is_absolute() {
                    Ok(Some(path))
                } else {
                    Ok(Some(Self::stepflow_dir()?.join(path)))
                }
            }
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        sflog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            sflog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        sflog_debug!(
            "Config loaded: budget_usd={}, max_parallel_steps={}",
            config.budget_usd,
            config.max_parallel_steps
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::stepflow_dir()?;
        if !dir.exists() {
            sflog_debug!("Creating stepflow directory: {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        sflog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
