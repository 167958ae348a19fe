//! Running statistics recorded at each new best trial.

use chrono::{DateTime, Utc};
use mt_types::{Config, PersistenceError, PersistenceResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// File name of the serialized run statistics inside a run directory.
pub const RUN_STATS_FILE: &str = "run_stats.json";

/// Snapshot taken when a trial strictly improves on the best score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatsEntry {
    /// 1-based index of the improving trial.
    pub trial_index: usize,
    /// Seconds since the search started.
    pub elapsed_seconds: f64,
    pub best_score: f64,
    pub best_config: Config,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only tuning history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunStats {
    entries: Vec<RunStatsEntry>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: RunStatsEntry) {
        self.entries.push(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[RunStatsEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&RunStatsEntry> {
        self.entries.last()
    }

    pub fn best_scores_strictly_increasing(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| pair[1].best_score > pair[0].best_score)
    }

    pub fn write_json(&self, path: &Path) -> PersistenceResult<()> {
        let io_err = |source: std::io::Error| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| {
            PersistenceError::Serialization {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.flush().map_err(io_err)
    }
}
