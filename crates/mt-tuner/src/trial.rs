//! The `Trainable` contract and single-trial execution.

use mt_types::{
    recursive_merge, BoxError, Config, ConfigGenerationError, MissPolicy, TrialError, TrialStage,
    SEED_KEY,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-trial facts handed to the model collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialContext {
    /// Trial sequence number (0-indexed).
    pub index: usize,
    /// Resolved seed for this trial.
    pub seed: u64,
}

/// A model type the tuner can build, train and score once per trial.
///
/// Init and train options are typed structs. Before each trial the config's
/// hyperparameters are merged into them by field name, so every tunable knob
/// must appear as a (serialized) field of one of the two option types.
pub trait Trainable: Sized {
    /// Positional construction arguments (e.g. task definitions); not tuned.
    type InitArgs: ?Sized;
    /// Tunable construction options.
    type InitOptions: Serialize + DeserializeOwned;
    /// Positional training arguments (e.g. training data); not tuned.
    type TrainArgs: ?Sized;
    /// Tunable training options.
    type TrainOptions: Serialize + DeserializeOwned;
    /// Options passed untouched to `score`.
    type ScoreOptions;
    /// Dev-set inputs.
    type Inputs: ?Sized;
    /// Dev-set gold labels.
    type Labels: ?Sized;

    /// Build a fresh, untrained instance.
    fn construct(
        args: &Self::InitArgs,
        options: Self::InitOptions,
        ctx: &TrialContext,
    ) -> Result<Self, BoxError>;

    /// Run the model's own training loop to completion.
    fn train(
        &mut self,
        args: &Self::TrainArgs,
        options: &Self::TrainOptions,
        ctx: &TrialContext,
    ) -> Result<(), BoxError>;

    /// Scalar fitness on the dev set; higher is better.
    fn score(
        &self,
        inputs: &Self::Inputs,
        labels: &Self::Labels,
        options: &Self::ScoreOptions,
    ) -> Result<f64, BoxError>;
}

/// Base arguments and options shared by every trial of a search.
pub struct TrialOptions<'a, M: Trainable> {
    pub init_args: &'a M::InitArgs,
    pub init: M::InitOptions,
    pub train_args: &'a M::TrainArgs,
    pub train: M::TrainOptions,
    pub score: M::ScoreOptions,
}

/// Result of a single trial.
#[derive(Debug)]
pub struct TrialResult<M> {
    pub index: usize,
    pub config: Config,
    pub score: f64,
    pub model: M,
}

/// Explicit seeds win; otherwise `base_seed + index`. A seed entry that is
/// present but not a non-negative integer is an error.
pub fn resolve_seed(config: &Config, base_seed: u64, index: usize) -> Result<u64, ConfigGenerationError> {
    Ok(config
        .seed()?
        .unwrap_or_else(|| base_seed.wrapping_add(index as u64)))
}

/// Give `config` a concrete seed and build the matching trial context.
pub fn prepare_trial(
    config: Config,
    base_seed: u64,
    index: usize,
) -> Result<(Config, TrialContext), TrialError> {
    let seed = resolve_seed(&config, base_seed, index)
        .map_err(|e| TrialError::new(index, TrialStage::Construct, e))?;
    Ok((config.with_seed(seed), TrialContext { index, seed }))
}

/// Overlay the fields of `base` named in `config`. Returns the merged
/// options and the config keys `T` does not recognise.
pub fn merge_options<T>(base: &T, config: &Config) -> Result<(T, Vec<String>), BoxError>
where
    T: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(base)?;
    let skipped = recursive_merge(&mut merged, &config.to_json(), MissPolicy::Ignore)?;
    Ok((serde_json::from_value(merged)?, skipped))
}

/// Construct, train and score one model for `config`.
pub fn run_trial<M: Trainable>(
    ctx: TrialContext,
    config: Config,
    inputs: &M::Inputs,
    labels: &M::Labels,
    options: &TrialOptions<'_, M>,
) -> Result<TrialResult<M>, TrialError> {
    let index = ctx.index;

    let (init, init_unused) = merge_options(&options.init, &config)
        .map_err(|e| TrialError::new(index, TrialStage::Construct, e))?;
    let (train, train_unused) = merge_options(&options.train, &config)
        .map_err(|e| TrialError::new(index, TrialStage::Train, e))?;

    let unused: Vec<&String> = init_unused
        .iter()
        .filter(|key| key.as_str() != SEED_KEY && train_unused.contains(*key))
        .collect();
    if !unused.is_empty() {
        warn!(trial = index, keys = ?unused, "Hyperparameters not recognized by init or train options");
    }

    let mut model = M::construct(options.init_args, init, &ctx)
        .map_err(|e| TrialError::new(index, TrialStage::Construct, e))?;
    model
        .train(options.train_args, &train, &ctx)
        .map_err(|e| TrialError::new(index, TrialStage::Train, e))?;
    let score = model
        .score(inputs, labels, &options.score)
        .map_err(|e| TrialError::new(index, TrialStage::Score, e))?;

    if score.is_nan() {
        return Err(TrialError::new(index, TrialStage::Score, "model produced a NaN score"));
    }
    debug!(trial = index, seed = ctx.seed, score, "Trial finished");

    Ok(TrialResult {
        index,
        config,
        score,
        model,
    })
}
