//! Search space definitions and the lazy configuration generator.

use mt_types::{invalid_parameter, Config, ConfigGenerationError, ParameterValue};
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Hyperparameter name (e.g. "lr").
    pub name: String,
    /// How the parameter's values are produced.
    pub kind: ParameterKind,
}

/// Describes how a parameter is enumerated or sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// A single value shared by every config.
    Fixed { value: Value },
    /// Finite candidate set, enumerated in the cross-product.
    Choice { values: Vec<Value> },
    /// Integer range [low, high] inclusive, enumerated in the cross-product.
    IntRange { low: i64, high: i64 },
    /// Continuous uniform range [low, high], drawn fresh per config.
    Uniform { low: f64, high: f64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
}

impl ParameterKind {
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Uniform { .. } | Self::LogUniform { .. })
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_fixed(self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, ParameterKind::Fixed { value })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.push(name, ParameterKind::Choice { values })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.push(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::Uniform { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::LogUniform { low, high })
    }

    /// Parse a JSON search-space description.
    ///
    /// Arrays become candidate sets, objects with a `"range": [a, b]` key
    /// become continuous ranges (`"scale"` is `"linear"` or `"log"`), and any
    /// other value is fixed. Key order is preserved.
    pub fn from_json(description: &Value) -> Result<Self, ConfigGenerationError> {
        let entries = description
            .as_object()
            .ok_or(ConfigGenerationError::NotAnObject)?;

        let mut space = Self::new();
        for (name, value) in entries {
            let kind = match value {
                Value::Array(values) => ParameterKind::Choice {
                    values: values.clone(),
                },
                Value::Object(rule) if rule.contains_key("range") => parse_range(name, rule)?,
                other => ParameterKind::Fixed {
                    value: other.clone(),
                },
            };
            space = space.push(name.clone(), kind);
        }

        space.validate()?;
        Ok(space)
    }

    /// Check every dimension; called before any config is produced.
    pub fn validate(&self) -> Result<(), ConfigGenerationError> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(invalid_parameter!(param.name, "declared more than once"));
            }
            match &param.kind {
                ParameterKind::Fixed { .. } => {}
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return Err(ConfigGenerationError::EmptyChoice {
                            name: param.name.clone(),
                        });
                    }
                }
                ParameterKind::IntRange { low, high } => {
                    if low > high {
                        return Err(ConfigGenerationError::InvalidBounds {
                            name: param.name.clone(),
                            low: *low as f64,
                            high: *high as f64,
                        });
                    }
                }
                ParameterKind::Uniform { low, high } | ParameterKind::LogUniform { low, high } => {
                    if !low.is_finite() || !high.is_finite() || !(high - low).is_finite() {
                        return Err(invalid_parameter!(param.name, "range bounds and span must be finite"));
                    }
                    if low > high {
                        return Err(ConfigGenerationError::InvalidBounds {
                            name: param.name.clone(),
                            low: *low,
                            high: *high,
                        });
                    }
                    if matches!(param.kind, ParameterKind::LogUniform { .. }) && *low <= 0.0 {
                        return Err(invalid_parameter!(
                            param.name,
                            "log-scale range needs positive bounds, got {low}"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of discrete combinations. Continuous dimensions do not
    /// multiply the count; returns `None` on overflow.
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::Fixed { .. } => 1,
                ParameterKind::Choice { values } => values.len(),
                ParameterKind::IntRange { low, high } => {
                    usize::try_from(high.checked_sub(*low)?).ok()?.checked_add(1)?
                }
                ParameterKind::Uniform { .. } | ParameterKind::LogUniform { .. } => 1,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    pub fn has_continuous(&self) -> bool {
        self.parameters.iter().any(|p| p.kind.is_continuous())
    }
}

fn parse_range(name: &str, rule: &Map<String, Value>) -> Result<ParameterKind, ConfigGenerationError> {
    let items = rule.get("range").and_then(Value::as_array);
    let bounds: Vec<f64> = items
        .map(|values| values.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    if items.map(Vec::len) != Some(2) || bounds.len() != 2 {
        return Err(invalid_parameter!(name, "range must hold exactly two numbers"));
    }
    let low = bounds[0].min(bounds[1]);
    let high = bounds[0].max(bounds[1]);

    match rule.get("scale") {
        None => Ok(ParameterKind::Uniform { low, high }),
        Some(Value::String(scale)) => match scale.as_str() {
            "linear" => Ok(ParameterKind::Uniform { low, high }),
            "log" => Ok(ParameterKind::LogUniform { low, high }),
            _ => Err(ConfigGenerationError::UnknownScale {
                name: name.to_string(),
                scale: scale.clone(),
            }),
        },
        Some(other) => Err(ConfigGenerationError::UnknownScale {
            name: name.to_string(),
            scale: other.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum Sampler {
    Linear { low: f64, high: f64 },
    Log { log_low: f64, log_high: f64 },
}

impl Sampler {
    fn draw<R: Rng>(self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        match self {
            Self::Linear { low, high } => low + (high - low) * u,
            Self::Log { log_low, log_high } => (log_low + (log_high - log_low) * u).exp(),
        }
    }
}

/// One discrete dimension of the grid, decoded on demand.
#[derive(Debug)]
enum Axis {
    Values(Vec<ParameterValue>),
    Ints { low: i64, len: usize },
}

impl Axis {
    fn len(&self) -> usize {
        match self {
            Self::Values(values) => values.len(),
            Self::Ints { len, .. } => *len,
        }
    }

    fn value(&self, digit: usize) -> ParameterValue {
        match self {
            Self::Values(values) => values[digit].clone(),
            // digit < len, so low + digit stays within [low, high]
            Self::Ints { low, .. } => ParameterValue::Int((i128::from(*low) + digit as i128) as i64),
        }
    }
}

/// Lazy, single-pass sequence of trial configs.
///
/// Discrete dimensions are enumerated as a cross-product (last parameter
/// varying fastest), optionally shuffled, then truncated to `max_search`.
/// Rows are decoded from their grid index as they are yielded; shuffling
/// draws a random order of at most `max_search` row indices. Continuous
/// dimensions get an independent draw per yielded config; when they exist
/// and `max_search` is set, the discrete rows are cycled until `max_search`
/// configs have been produced.
#[derive(Debug)]
pub struct ConfigGenerator<R> {
    axes: Vec<(String, Axis)>,
    continuous: Vec<(String, Sampler)>,
    grid_size: usize,
    order: Option<Vec<usize>>,
    max_search: Option<usize>,
    cycle: bool,
    produced: usize,
    rng: R,
}

impl<R: Rng> ConfigGenerator<R> {
    pub fn new(
        space: &SearchSpace,
        max_search: Option<usize>,
        shuffle: bool,
        mut rng: R,
    ) -> Result<Self, ConfigGenerationError> {
        space.validate()?;
        let grid_size = space.grid_size().ok_or(ConfigGenerationError::GridTooLarge)?;

        let mut axes = Vec::new();
        let mut continuous = Vec::new();
        for param in &space.parameters {
            let name = param.name.clone();
            match &param.kind {
                ParameterKind::Fixed { value } => {
                    axes.push((name, Axis::Values(vec![ParameterValue::from_json(value)])))
                }
                ParameterKind::Choice { values } => axes.push((
                    name,
                    Axis::Values(values.iter().map(ParameterValue::from_json).collect()),
                )),
                ParameterKind::IntRange { low, high } => {
                    let len = usize::try_from(i128::from(*high) - i128::from(*low) + 1)
                        .map_err(|_| ConfigGenerationError::GridTooLarge)?;
                    axes.push((name, Axis::Ints { low: *low, len }));
                }
                ParameterKind::Uniform { low, high } => {
                    continuous.push((name, Sampler::Linear { low: *low, high: *high }))
                }
                ParameterKind::LogUniform { low, high } => continuous.push((
                    name,
                    Sampler::Log {
                        log_low: low.ln(),
                        log_high: high.ln(),
                    },
                )),
            }
        }

        // Only the rows that can be reached are ordered: a cycled or
        // truncated search never visits more than `max_search` of them.
        let order = shuffle.then(|| {
            let amount = max_search.map_or(grid_size, |limit| limit.min(grid_size));
            index::sample(&mut rng, grid_size, amount).into_vec()
        });

        let cycle = !continuous.is_empty() && max_search.is_some();

        Ok(Self {
            axes,
            continuous,
            grid_size,
            order,
            max_search,
            cycle,
            produced: 0,
            rng,
        })
    }

    /// Grid row for a cross-product index, last axis varying fastest.
    fn row(&self, mut index: usize) -> Config {
        let mut config = Config::new();
        for (name, axis) in self.axes.iter().rev() {
            let len = axis.len();
            config.insert(name.clone(), axis.value(index % len));
            index /= len;
        }
        config
    }
}

impl<R: Rng> Iterator for ConfigGenerator<R> {
    type Item = Config;

    fn next(&mut self) -> Option<Config> {
        if self.max_search.is_some_and(|limit| self.produced >= limit) {
            return None;
        }
        let rows = self.order.as_ref().map_or(self.grid_size, Vec::len);
        if rows == 0 {
            return None;
        }
        let slot = if self.cycle {
            self.produced % rows
        } else if self.produced < rows {
            self.produced
        } else {
            return None;
        };
        let index = self.order.as_ref().map_or(slot, |order| order[slot]);

        let mut config = self.row(index);
        for (name, sampler) in &self.continuous {
            config.insert(name.clone(), ParameterValue::Float(sampler.draw(&mut self.rng)));
        }
        self.produced += 1;
        Some(config)
    }
}
