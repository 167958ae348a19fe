//! # mt-tuner
//!
//! Random-search hyperparameter tuning for multitask model training.
//!
//! Provides search space definitions, a seeded configuration generator,
//! the `Trainable` contract models implement, best-model stores (in memory
//! or spilled to a run directory), run statistics, and the `Tuner` search
//! loop that ties them together.

mod config;
mod run_dir;
mod search;
mod stats;
mod store;
mod trial;
mod tuner;

pub use config::{TunerConfig, ENV_LOG_DIR, ENV_RUN_NAME, ENV_SEED};
pub use run_dir::next_run_dir;
pub use search::{ConfigGenerator, ParameterDef, ParameterKind, SearchSpace};
pub use stats::{RunStats, RunStatsEntry, RUN_STATS_FILE};
pub use store::{FileStore, InMemoryStore, ModelStore, BEST_MODEL_FILE};
pub use trial::{
    merge_options, prepare_trial, resolve_seed, run_trial, Trainable, TrialContext, TrialOptions,
    TrialResult,
};
pub use tuner::{SearchOptions, SearchOutcome, SearchReport, TrialSummary, Tuner, TunerState};

pub use mt_types::{
    BoxError, Config, ConfigError, ConfigGenerationError, ParameterValue, PersistenceError,
    TrialError, TrialStage, TuneError, TuneResult,
};
