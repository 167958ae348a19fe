//! Concrete hyperparameter values and per-trial configurations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ConfigGenerationError;

/// Name of the config entry that carries a trial's random seed.
pub const SEED_KEY: &str = "seed";

/// A concrete parameter value produced by the config generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(Value),
}

impl ParameterValue {
    /// Integral JSON numbers become `Int`, other numbers `Float`, everything
    /// else is kept as raw JSON.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64().filter(|_| !n.is_u64()) {
                    Self::Float(f)
                } else {
                    Self::Json(value.clone())
                }
            }
            other => Self::Json(other.clone()),
        }
    }

    /// Non-finite floats have no JSON form and map to `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(v) => Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Json(v) => v.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Json(v) => v.as_i64(),
            Self::Float(_) => None,
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Value> for ParameterValue {
    fn from(v: Value) -> Self {
        Self::from_json(&v)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One trial's hyperparameters: name to concrete value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    params: BTreeMap<String, ParameterValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) -> Option<ParameterValue> {
        self.params.insert(name.into(), value.into())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.params.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.params.keys()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The explicitly supplied seed, if any. A JSON `null` counts as absent.
    /// Integral floats are accepted; any other value that is not a
    /// non-negative integer is an error.
    pub fn seed(&self) -> Result<Option<u64>, ConfigGenerationError> {
        let Some(value) = self.params.get(SEED_KEY) else {
            return Ok(None);
        };
        let seed = match value {
            ParameterValue::Int(v) => u64::try_from(*v).ok(),
            ParameterValue::Float(v) => float_seed(*v),
            ParameterValue::Json(Value::Null) => return Ok(None),
            ParameterValue::Json(v) => v.as_u64().or_else(|| v.as_f64().and_then(float_seed)),
        };
        seed.map(Some).ok_or_else(|| ConfigGenerationError::InvalidParameter {
            name: SEED_KEY.to_string(),
            message: format!("expected a non-negative integer, got {value}"),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        let value = i64::try_from(seed)
            .map(ParameterValue::Int)
            .unwrap_or_else(|_| ParameterValue::Json(Value::from(seed)));
        self.params.insert(SEED_KEY.to_string(), value);
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

fn float_seed(v: f64) -> Option<u64> {
    // 2^64 is the first float past u64::MAX
    (v.fract() == 0.0 && v >= 0.0 && v < 18_446_744_073_709_551_616.0).then(|| v as u64)
}

impl FromIterator<(String, ParameterValue)> for Config {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}
