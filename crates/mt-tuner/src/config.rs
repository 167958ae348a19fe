//! Tuner-level configuration: seeding and where run artifacts go.

use mt_types::{recursive_merge, ConfigError, MissPolicy, TuneResult};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::run_dir::next_run_dir;

pub const ENV_SEED: &str = "MT_TUNER_SEED";
pub const ENV_LOG_DIR: &str = "MT_TUNER_LOG_DIR";
pub const ENV_RUN_NAME: &str = "MT_TUNER_RUN_NAME";

/// Settings shared by every search a tuner runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Seeds the config generator and, offset by trial index, each trial.
    pub seed: u64,

    /// Parent directory for run artifacts. Without one the best model is
    /// kept in memory and nothing is written to disk.
    pub log_dir: Option<PathBuf>,

    /// Run sub-directory name; a fresh numbered directory is used if unset.
    pub run_name: Option<String>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            seed: 123,
            log_dir: None,
            run_name: None,
        }
    }
}

impl TunerConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> TuneResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Merge an override document into this config. Unknown keys are
    /// reported and skipped; their paths are returned.
    pub fn apply_override(&mut self, overlay: &serde_json::Value) -> TuneResult<Vec<String>> {
        let mut current = serde_json::to_value(&*self)?;
        let skipped = recursive_merge(&mut current, overlay, MissPolicy::Report)?;
        *self = serde_json::from_value(current)?;
        Ok(skipped)
    }

    /// Apply `MT_TUNER_*` environment overrides.
    pub fn apply_env(&mut self) -> TuneResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> TuneResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = var(ENV_SEED) {
            self.seed = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_SEED.to_string(),
                message: format!("expected an unsigned integer, got '{raw}'"),
            })?;
        }
        if let Some(dir) = var(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = var(ENV_RUN_NAME) {
            self.run_name = Some(name);
        }
        Ok(())
    }

    /// Directory for this run's artifacts, or `None` when `log_dir` is unset.
    pub fn resolve_run_dir(&self) -> io::Result<Option<PathBuf>> {
        let Some(log_dir) = &self.log_dir else {
            return Ok(None);
        };
        let name = match &self.run_name {
            Some(name) => name.clone(),
            None => next_run_dir(log_dir)?,
        };
        Ok(Some(log_dir.join(name)))
    }
}
