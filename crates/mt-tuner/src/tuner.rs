//! Random-search tuner.

use chrono::Utc;
use mt_types::{Config, ConfigError, PersistenceError, TuneError, TuneResult};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TunerConfig;
use crate::search::{ConfigGenerator, SearchSpace};
use crate::stats::{RunStats, RunStatsEntry, RUN_STATS_FILE};
use crate::store::{FileStore, InMemoryStore, ModelStore};
use crate::trial::{prepare_trial, run_trial, Trainable, TrialOptions, TrialResult};

/// Lifecycle of a single `search` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunerState {
    Idle,
    Running,
    Summarizing,
    Done,
}

/// Per-search knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Upper bound on the number of trials.
    pub max_search: Option<usize>,
    /// Shuffle the discrete grid before truncating it.
    pub shuffle: bool,
    /// Print per-trial lines and the summary block to stdout.
    pub verbose: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_search: None,
            shuffle: true,
            verbose: true,
        }
    }
}

impl SearchOptions {
    pub fn with_max_search(mut self, max_search: usize) -> Self {
        self.max_search = Some(max_search);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }
}

/// Score of one evaluated trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSummary {
    pub index: usize,
    pub config: Config,
    pub score: f64,
}

/// Summary of a finished search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub run_id: Uuid,
    /// 1-based index of the best trial.
    pub best_index: usize,
    pub best_config: Config,
    pub best_score: f64,
    pub trials: usize,
    pub elapsed_seconds: f64,
}

impl fmt::Display for SearchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(f, "[SUMMARY]")?;
        writeln!(f, "Best model: [{}]", self.best_index)?;
        writeln!(f, "Best config: {}", self.best_config)?;
        writeln!(f, "Best score: {}", self.best_score)?;
        write!(f, "{rule}")
    }
}

/// Best model plus the report of the search that produced it.
#[derive(Debug)]
pub struct SearchOutcome<M> {
    pub model: M,
    pub report: SearchReport,
}

/// Trains one model per sampled config and keeps the best scorer.
///
/// Run statistics and the best-model slot belong to the tuner instance and
/// are reset at the start of every `search`.
pub struct Tuner<M, S = InMemoryStore<M>> {
    config: TunerConfig,
    store: S,
    run_stats: RunStats,
    trials: Vec<TrialSummary>,
    state: TunerState,
    _model: PhantomData<fn() -> M>,
}

impl<M: Trainable> Tuner<M, InMemoryStore<M>> {
    /// Keep the best model in memory for the whole search.
    pub fn in_memory(config: TunerConfig) -> Self {
        Self::with_store(config, InMemoryStore::new())
    }
}

impl<M> Tuner<M, FileStore>
where
    M: Trainable + Serialize + DeserializeOwned,
{
    /// Persist each new best model under the resolved run directory.
    pub fn persistent(config: TunerConfig) -> TuneResult<Self> {
        let run_dir = config.resolve_run_dir()?.ok_or_else(|| ConfigError::InvalidValue {
            key: "log_dir".to_string(),
            message: "persistent tuning needs a log directory".to_string(),
        })?;
        let store = FileStore::new(run_dir)?;
        Ok(Self::with_store(config, store))
    }
}

impl<M> Tuner<M, Box<dyn ModelStore<M>>>
where
    M: Trainable + Serialize + DeserializeOwned + 'static,
{
    /// Spill to disk when `log_dir` is configured, otherwise keep in memory.
    pub fn from_config(config: TunerConfig) -> TuneResult<Self> {
        let store: Box<dyn ModelStore<M>> = match config.resolve_run_dir()? {
            Some(run_dir) => Box::new(FileStore::new(run_dir)?),
            None => Box::new(InMemoryStore::<M>::new()),
        };
        Ok(Self::with_store(config, store))
    }
}

impl<M: Trainable, S: ModelStore<M>> Tuner<M, S> {
    pub fn with_store(config: TunerConfig, store: S) -> Self {
        Self {
            config,
            store,
            run_stats: RunStats::new(),
            trials: Vec::new(),
            state: TunerState::Idle,
            _model: PhantomData,
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn state(&self) -> TunerState {
        self.state
    }

    pub fn run_stats(&self) -> &RunStats {
        &self.run_stats
    }

    /// Every trial evaluated by the latest search, in order.
    pub fn trials(&self) -> &[TrialSummary] {
        &self.trials
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluate configs from `space` in order and return the best model.
    ///
    /// Any failure aborts the search without producing a model and leaves
    /// the tuner `Idle`.
    pub fn search(
        &mut self,
        space: &SearchSpace,
        inputs: &M::Inputs,
        labels: &M::Labels,
        options: &TrialOptions<'_, M>,
        search: &SearchOptions,
    ) -> TuneResult<SearchOutcome<M>> {
        let outcome = self.run_search(space, inputs, labels, options, search);
        if outcome.is_err() {
            self.state = TunerState::Idle;
        }
        outcome
    }

    fn run_search(
        &mut self,
        space: &SearchSpace,
        inputs: &M::Inputs,
        labels: &M::Labels,
        options: &TrialOptions<'_, M>,
        search: &SearchOptions,
    ) -> TuneResult<SearchOutcome<M>> {
        let base_seed = self.config.seed;
        let mut rng = ChaCha8Rng::seed_from_u64(base_seed);
        let configs = ConfigGenerator::new(space, search.max_search, search.shuffle, &mut rng)?;

        self.state = TunerState::Running;
        self.run_stats.clear();
        self.trials.clear();
        self.store.clear()?;

        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let mut best: Option<(usize, Config, f64)> = None;
        info!(
            %run_id,
            grid_size = ?space.grid_size(),
            max_search = ?search.max_search,
            seed = base_seed,
            "Starting random search"
        );

        for (i, config) in configs.enumerate() {
            let (config, ctx) = prepare_trial(config, base_seed, i)?;
            if search.verbose {
                println!("[{}] Testing {}", i + 1, config);
            }
            debug!(trial = i + 1, seed = ctx.seed, config = %config, "Starting trial");

            let TrialResult {
                config,
                score,
                model,
                ..
            } = run_trial(ctx, config, inputs, labels, options)?;
            self.trials.push(TrialSummary {
                index: i,
                config: config.clone(),
                score,
            });

            let improved = best
                .as_ref()
                .map_or(true, |(_, _, best_score)| score > *best_score);
            if !improved {
                continue;
            }

            self.store.save(model)?;
            self.run_stats.record(RunStatsEntry {
                trial_index: i + 1,
                elapsed_seconds: start.elapsed().as_secs_f64(),
                best_score: score,
                best_config: config.clone(),
                recorded_at: Utc::now(),
            });
            info!(trial = i + 1, score, config = %config, "New best model");
            best = Some((i + 1, config, score));
        }

        self.state = TunerState::Summarizing;
        let (best_index, best_config, best_score) = best.ok_or(TuneError::EmptySearchSpace)?;
        let report = SearchReport {
            run_id,
            best_index,
            best_config,
            best_score,
            trials: self.trials.len(),
            elapsed_seconds: start.elapsed().as_secs_f64(),
        };

        if let Some(run_dir) = self.store.run_dir() {
            self.run_stats.write_json(&run_dir.join(RUN_STATS_FILE))?;
        }
        if search.verbose {
            println!("{report}");
        }
        info!(
            %run_id,
            best_index = report.best_index,
            best_score = report.best_score,
            best_config = %report.best_config,
            trials = report.trials,
            "Random search complete"
        );

        let model = self.store.take_best()?.ok_or(PersistenceError::NoBestModel)?;
        self.state = TunerState::Done;
        Ok(SearchOutcome { model, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BEST_MODEL_FILE;
    use mt_types::{BoxError, ParameterValue, TrialStage};
    use serde_json::json;
    use tempfile::TempDir;

    use crate::trial::TrialContext;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct StubInit {
        lr: f64,
        dropout: f64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct StubTrain {
        epochs: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct StubModel {
        lr: f64,
        dropout: f64,
        index: usize,
        seed: u64,
        epochs: i64,
    }

    enum StubScore {
        Lr,
        Constant(f64),
        ByIndex(Vec<f64>),
        FailAt(usize),
        /// Scores by index and deletes the directory at the given trial.
        RemoveDirAt(usize, std::path::PathBuf),
    }

    impl Trainable for StubModel {
        type InitArgs = ();
        type InitOptions = StubInit;
        type TrainArgs = ();
        type TrainOptions = StubTrain;
        type ScoreOptions = StubScore;
        type Inputs = ();
        type Labels = ();

        fn construct(_args: &(), options: StubInit, ctx: &TrialContext) -> Result<Self, BoxError> {
            Ok(Self {
                lr: options.lr,
                dropout: options.dropout,
                index: ctx.index,
                seed: ctx.seed,
                epochs: 0,
            })
        }

        fn train(&mut self, _args: &(), options: &StubTrain, _ctx: &TrialContext) -> Result<(), BoxError> {
            self.epochs = options.epochs;
            Ok(())
        }

        fn score(&self, _inputs: &(), _labels: &(), options: &StubScore) -> Result<f64, BoxError> {
            match options {
                StubScore::Lr => Ok(self.lr),
                StubScore::Constant(v) => Ok(*v),
                StubScore::ByIndex(scores) => Ok(scores[self.index]),
                StubScore::FailAt(i) if *i == self.index => Err("scorer crashed".into()),
                StubScore::FailAt(_) => Ok(self.index as f64),
                StubScore::RemoveDirAt(i, dir) => {
                    if *i == self.index {
                        std::fs::remove_dir_all(dir)?;
                    }
                    Ok(self.index as f64)
                }
            }
        }
    }

    fn options(score: StubScore) -> TrialOptions<'static, StubModel> {
        TrialOptions {
            init_args: &(),
            init: StubInit::default(),
            train_args: &(),
            train: StubTrain { epochs: 5 },
            score,
        }
    }

    fn quiet() -> SearchOptions {
        SearchOptions::default().with_shuffle(false).quiet()
    }

    fn run(
        tuner: &mut Tuner<StubModel>,
        space: &SearchSpace,
        score: StubScore,
        search: SearchOptions,
    ) -> TuneResult<SearchOutcome<StubModel>> {
        tuner.search(space, &(), &(), &options(score), &search)
    }

    fn lr_dropout_space() -> SearchSpace {
        SearchSpace::from_json(&json!({"lr": [0.1, 0.01], "dropout": [0.0, 0.5]})).unwrap()
    }

    #[test]
    fn lr_dropout_scenario_picks_highest_lr() {
        let mut tuner = Tuner::in_memory(TunerConfig::new(7));
        let outcome = run(&mut tuner, &lr_dropout_space(), StubScore::Lr, quiet()).unwrap();

        let seen: Vec<(f64, f64)> = tuner
            .trials()
            .iter()
            .map(|t| {
                (
                    t.config.get("lr").and_then(ParameterValue::as_f64).unwrap(),
                    t.config.get("dropout").and_then(ParameterValue::as_f64).unwrap(),
                )
            })
            .collect();
        assert_eq!(seen, vec![(0.1, 0.0), (0.1, 0.5), (0.01, 0.0), (0.01, 0.5)]);

        assert_eq!(outcome.report.best_index, 1);
        assert_eq!(outcome.report.best_score, 0.1);
        assert_eq!(outcome.report.trials, 4);
        assert_eq!(outcome.model.lr, 0.1);
        assert_eq!(outcome.model.dropout, 0.0);
        assert_eq!(outcome.model.epochs, 5);
        assert_eq!(tuner.state(), TunerState::Done);
    }

    #[test]
    fn same_seed_same_trials() {
        let space = SearchSpace::new()
            .add_choice("dropout", vec![json!(0.0), json!(0.25), json!(0.5)])
            .add_log_uniform("lr", 1e-4, 1e-1);

        for shuffle in [false, true] {
            let search = SearchOptions::default()
                .with_shuffle(shuffle)
                .with_max_search(6)
                .quiet();
            let mut first = Tuner::in_memory(TunerConfig::new(11));
            let mut second = Tuner::in_memory(TunerConfig::new(11));
            run(&mut first, &space, StubScore::Lr, search).unwrap();
            run(&mut second, &space, StubScore::Lr, search).unwrap();

            assert_eq!(first.trials().len(), 6);
            assert_eq!(first.trials(), second.trials());
        }
    }

    #[test]
    fn best_is_maximum_and_stats_increase() {
        let scores = vec![0.3, 0.7, 0.5, 0.9, 0.2];
        let space = SearchSpace::new().add_int("layer", 0, 4);
        let mut tuner = Tuner::in_memory(TunerConfig::default());
        let outcome = run(&mut tuner, &space, StubScore::ByIndex(scores.clone()), quiet()).unwrap();

        let max = tuner.trials().iter().map(|t| t.score).fold(f64::MIN, f64::max);
        assert_eq!(outcome.report.best_score, max);
        assert_eq!(outcome.report.best_index, 4);
        assert_eq!(outcome.model.index, 3);

        let recorded: Vec<f64> = tuner.run_stats().entries().iter().map(|e| e.best_score).collect();
        assert_eq!(recorded, vec![0.3, 0.7, 0.9]);
        assert!(tuner.run_stats().best_scores_strictly_increasing());
        let indices: Vec<usize> = tuner.run_stats().entries().iter().map(|e| e.trial_index).collect();
        assert_eq!(indices, vec![1, 2, 4]);
    }

    #[test]
    fn ties_keep_the_first_best() {
        let space = SearchSpace::new().add_int("layer", 0, 3);
        let mut tuner = Tuner::in_memory(TunerConfig::default());
        let outcome = run(&mut tuner, &space, StubScore::Constant(0.5), quiet()).unwrap();

        assert_eq!(outcome.report.best_index, 1);
        assert_eq!(outcome.model.index, 0);
        assert_eq!(tuner.run_stats().len(), 1);
    }

    #[test]
    fn max_search_limits_trials() {
        let space = SearchSpace::new().add_int("layer", 0, 9);
        let mut tuner = Tuner::in_memory(TunerConfig::default());
        let search = SearchOptions::default().with_max_search(3).quiet();
        let outcome = run(&mut tuner, &space, StubScore::Lr, search).unwrap();

        assert_eq!(tuner.trials().len(), 3);
        assert_eq!(outcome.report.trials, 3);
    }

    #[test]
    fn zero_configs_is_an_error() {
        let mut tuner = Tuner::in_memory(TunerConfig::default());
        let search = SearchOptions::default().with_max_search(0).quiet();
        let err = run(&mut tuner, &lr_dropout_space(), StubScore::Lr, search).unwrap_err();

        assert!(matches!(err, TuneError::EmptySearchSpace));
        assert!(tuner.trials().is_empty());
        assert_eq!(tuner.state(), TunerState::Idle);
    }

    #[test]
    fn seeds_follow_base_seed_unless_explicit() {
        let space = SearchSpace::new().add_choice("seed", vec![json!(null), json!(null), json!(42)]);
        let mut tuner = Tuner::in_memory(TunerConfig::new(7));
        run(&mut tuner, &space, StubScore::Constant(1.0), quiet()).unwrap();

        let seeds: Vec<Option<u64>> = tuner.trials().iter().map(|t| t.config.seed().unwrap()).collect();
        assert_eq!(seeds, vec![Some(7), Some(8), Some(42)]);
    }

    #[test]
    fn trial_failure_aborts_search() {
        let space = SearchSpace::new().add_int("layer", 0, 4);
        let mut tuner = Tuner::in_memory(TunerConfig::default());
        let err = run(&mut tuner, &space, StubScore::FailAt(2), quiet()).unwrap_err();

        match err {
            TuneError::Trial(trial) => {
                assert_eq!(trial.index, 2);
                assert_eq!(trial.stage, TrialStage::Score);
            }
            other => panic!("expected trial error, got {other:?}"),
        }
        assert_eq!(tuner.trials().len(), 2);
        assert_eq!(tuner.state(), TunerState::Idle);
    }

    #[test]
    fn malformed_space_fails_before_any_trial() {
        let space = SearchSpace::new().add_choice("dropout", vec![]);
        let mut tuner = Tuner::in_memory(TunerConfig::default());
        let err = run(&mut tuner, &space, StubScore::Lr, quiet()).unwrap_err();

        assert!(matches!(err, TuneError::ConfigGeneration(_)));
        assert!(tuner.trials().is_empty());
    }

    #[test]
    fn persistent_tuner_loads_best_from_disk() {
        let dir = TempDir::new().unwrap();
        let config = TunerConfig::new(3).with_log_dir(dir.path()).with_run_name("sweep");
        let mut tuner: Tuner<StubModel, FileStore> = Tuner::persistent(config).unwrap();

        let outcome = tuner
            .search(&lr_dropout_space(), &(), &(), &options(StubScore::Lr), &quiet())
            .unwrap();

        let run_dir = dir.path().join("sweep");
        assert_eq!(outcome.model.lr, 0.1);
        assert_eq!(outcome.model.seed, 3);
        assert!(!run_dir.join(BEST_MODEL_FILE).exists());

        let stats: RunStats =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join(RUN_STATS_FILE)).unwrap()).unwrap();
        assert_eq!(&stats, tuner.run_stats());
    }

    #[test]
    fn losing_the_run_dir_mid_search_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("sweep");
        let config = TunerConfig::new(3).with_log_dir(dir.path()).with_run_name("sweep");
        let mut tuner: Tuner<StubModel, FileStore> = Tuner::persistent(config).unwrap();

        let space = SearchSpace::new().add_int("layer", 0, 3);
        let err = tuner
            .search(
                &space,
                &(),
                &(),
                &options(StubScore::RemoveDirAt(1, run_dir.clone())),
                &quiet(),
            )
            .unwrap_err();

        assert!(matches!(err, TuneError::Persistence(PersistenceError::Io { .. })));
        assert_eq!(tuner.state(), TunerState::Idle);
        assert_eq!(tuner.trials().len(), 2);
        assert_eq!(tuner.run_stats().len(), 1);
        assert!(!run_dir.exists());
    }

    #[test]
    fn persistent_tuner_needs_log_dir() {
        let result: TuneResult<Tuner<StubModel, FileStore>> = Tuner::persistent(TunerConfig::default());
        assert!(matches!(result, Err(TuneError::Config(_))));
    }

    #[test]
    fn from_config_chooses_store_by_log_dir() {
        let mut in_memory: Tuner<StubModel, Box<dyn ModelStore<StubModel>>> =
            Tuner::from_config(TunerConfig::default()).unwrap();
        assert!(in_memory.store().run_dir().is_none());
        let outcome = in_memory
            .search(&lr_dropout_space(), &(), &(), &options(StubScore::Lr), &quiet())
            .unwrap();
        assert_eq!(outcome.report.best_score, 0.1);

        let dir = TempDir::new().unwrap();
        let on_disk: Tuner<StubModel, Box<dyn ModelStore<StubModel>>> =
            Tuner::from_config(TunerConfig::default().with_log_dir(dir.path())).unwrap();
        assert_eq!(on_disk.store().run_dir(), Some(dir.path().join("1").as_path()));
    }

    #[test]
    fn tuner_is_reusable_and_resets_stats() {
        let mut tuner = Tuner::in_memory(TunerConfig::default());
        run(&mut tuner, &lr_dropout_space(), StubScore::Lr, quiet()).unwrap();
        run(&mut tuner, &SearchSpace::new().add_int("layer", 0, 1), StubScore::Constant(0.2), quiet()).unwrap();

        assert_eq!(tuner.trials().len(), 2);
        assert_eq!(tuner.run_stats().len(), 1);
        assert_eq!(tuner.run_stats().entries()[0].best_score, 0.2);
    }

    #[test]
    fn summary_block_format() {
        let report = SearchReport {
            run_id: Uuid::nil(),
            best_index: 2,
            best_config: Config::new().with("lr", 0.1),
            best_score: 0.75,
            trials: 4,
            elapsed_seconds: 1.5,
        };
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "=".repeat(60));
        assert_eq!(lines[1], "[SUMMARY]");
        assert_eq!(lines[2], "Best model: [2]");
        assert_eq!(lines[3], "Best config: {lr: 0.1}");
        assert_eq!(lines[4], "Best score: 0.75");
    }
}
