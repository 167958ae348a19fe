use mt_tuner::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Two overlapping square clusters labelled 0 and 1.
struct Dataset {
    xs: Vec<[f64; 2]>,
    ys: Vec<f64>,
}

fn make_dataset(n: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for i in 0..n {
        let label = (i % 2) as f64;
        let center = if label > 0.5 { 1.0 } else { -1.0 };
        xs.push([
            center + rng.gen_range(-1.5..1.5),
            center + rng.gen_range(-1.5..1.5),
        ]);
        ys.push(label);
    }
    Dataset { xs, ys }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InitOptions {
    init_scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainOptions {
    lr: f64,
    epochs: usize,
    l2: f64,
}

struct ScoreOptions {
    threshold: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogisticRegression {
    weights: [f64; 2],
    bias: f64,
}

impl LogisticRegression {
    fn predict(&self, x: &[f64; 2]) -> f64 {
        let z = self.weights[0] * x[0] + self.weights[1] * x[1] + self.bias;
        1.0 / (1.0 + (-z).exp())
    }
}

impl Trainable for LogisticRegression {
    type InitArgs = ();
    type InitOptions = InitOptions;
    type TrainArgs = Dataset;
    type TrainOptions = TrainOptions;
    type ScoreOptions = ScoreOptions;
    type Inputs = [[f64; 2]];
    type Labels = [f64];

    fn construct(_args: &(), options: InitOptions, ctx: &TrialContext) -> Result<Self, BoxError> {
        let mut rng = ChaCha8Rng::seed_from_u64(ctx.seed);
        let scale = options.init_scale;
        Ok(Self {
            weights: [rng.gen_range(-scale..=scale), rng.gen_range(-scale..=scale)],
            bias: 0.0,
        })
    }

    fn train(&mut self, data: &Dataset, options: &TrainOptions, _ctx: &TrialContext) -> Result<(), BoxError> {
        if options.lr.is_nan() || options.lr <= 0.0 {
            return Err(format!("learning rate must be positive, got {}", options.lr).into());
        }
        let n = data.xs.len() as f64;
        for _ in 0..options.epochs {
            let mut grad = [0.0; 3];
            for (x, y) in data.xs.iter().zip(&data.ys) {
                let err = self.predict(x) - y;
                grad[0] += err * x[0];
                grad[1] += err * x[1];
                grad[2] += err;
            }
            self.weights[0] -= options.lr * (grad[0] / n + options.l2 * self.weights[0]);
            self.weights[1] -= options.lr * (grad[1] / n + options.l2 * self.weights[1]);
            self.bias -= options.lr * grad[2] / n;
        }
        Ok(())
    }

    fn score(&self, inputs: &[[f64; 2]], labels: &[f64], options: &ScoreOptions) -> Result<f64, BoxError> {
        if inputs.is_empty() || inputs.len() != labels.len() {
            return Err("dev inputs and labels must be non-empty and aligned".into());
        }
        let correct = inputs
            .iter()
            .zip(labels)
            .filter(|(x, y)| (self.predict(x) >= options.threshold) == (**y > 0.5))
            .count();
        Ok(correct as f64 / inputs.len() as f64)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Random search over a toy logistic regression");

    // MT_TUNER_LOG_DIR=/tmp/tuning spills the best model to disk
    let mut config = TunerConfig::new(42);
    config.apply_env()?;

    let space = SearchSpace::from_json(&json!({
        "lr": {"range": [1e-3, 1.0], "scale": "log"},
        "epochs": [10, 50, 100],
        "l2": [0.0, 1e-3],
        "init_scale": 0.01
    }))?;
    println!("Discrete grid size: {:?}", space.grid_size());

    let train = make_dataset(400, 1);
    let dev = make_dataset(200, 2);
    let options = TrialOptions {
        init_args: &(),
        init: InitOptions { init_scale: 0.1 },
        train_args: &train,
        train: TrainOptions {
            lr: 0.1,
            epochs: 20,
            l2: 0.0,
        },
        score: ScoreOptions { threshold: 0.5 },
    };

    let mut tuner: Tuner<LogisticRegression, Box<dyn ModelStore<LogisticRegression>>> =
        Tuner::from_config(config)?;
    let outcome = tuner.search(
        &space,
        dev.xs.as_slice(),
        dev.ys.as_slice(),
        &options,
        &SearchOptions::default().with_max_search(12),
    )?;

    println!(
        "Best model: weights {:?}, bias {:.4} (accuracy {:.3})",
        outcome.model.weights, outcome.model.bias, outcome.report.best_score
    );
    for entry in tuner.run_stats().entries() {
        println!(
            "  trial {:>2} at {:.3}s -> {:.3}",
            entry.trial_index, entry.elapsed_seconds, entry.best_score
        );
    }

    Ok(())
}
