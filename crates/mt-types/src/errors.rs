use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error returned by external model collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for a tuning run
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Config generation error: {0}")]
    ConfigGeneration(#[from] ConfigGenerationError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Search space produced no configurations")]
    EmptySearchSpace,

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Malformed search-space descriptions, raised before any trial starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigGenerationError {
    #[error("Parameter {name} has an empty candidate set")]
    EmptyChoice { name: String },

    #[error("Unrecognized scale '{scale}' for parameter {name}")]
    UnknownScale { name: String, scale: String },

    #[error("Invalid bounds for parameter {name}: low {low} is above high {high}")]
    InvalidBounds { name: String, low: f64, high: f64 },

    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Search space description must be a JSON object")]
    NotAnObject,

    #[error("Discrete grid has more combinations than can be indexed")]
    GridTooLarge,
}

/// Phase of a trial in which a collaborator failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStage {
    Construct,
    Train,
    Score,
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Construct => write!(f, "construction"),
            Self::Train => write!(f, "training"),
            Self::Score => write!(f, "scoring"),
        }
    }
}

/// An unrecoverable failure inside one trial; aborts the whole search
#[derive(Error, Debug)]
#[error("trial {index} failed during {stage}: {source}")]
pub struct TrialError {
    pub index: usize,
    pub stage: TrialStage,
    #[source]
    pub source: BoxError,
}

impl TrialError {
    pub fn new(index: usize, stage: TrialStage, source: impl Into<BoxError>) -> Self {
        Self {
            index,
            stage,
            source: source.into(),
        }
    }
}

/// Best-model save/load failures
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize model at {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No saved model found at {path}")]
    Missing { path: PathBuf },

    #[error("Model store holds no best model")]
    NoBestModel,
}

/// Tuner configuration and config-merging errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unrecognized config key: {path}")]
    UnknownKey { path: String },

    #[error("Expected a JSON object at {path}")]
    NotAnObject { path: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for tuning operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Result type alias for best-model persistence
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Macro for creating invalid-parameter errors
#[macro_export]
macro_rules! invalid_parameter {
    ($name:expr, $($arg:tt)*) => {
        $crate::ConfigGenerationError::InvalidParameter {
            name: ($name).to_string(),
            message: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_error_display() {
        let error = TrialError::new(3, TrialStage::Train, "loss diverged");

        let text = error.to_string();
        assert!(text.contains("trial 3"));
        assert!(text.contains("training"));
        assert!(text.contains("loss diverged"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_error_conversion() {
        let generation = ConfigGenerationError::EmptyChoice {
            name: "lr".to_string(),
        };
        let tune: TuneError = generation.into();

        match tune {
            TuneError::ConfigGeneration(ConfigGenerationError::EmptyChoice { name }) => {
                assert_eq!(name, "lr")
            }
            other => panic!("Expected ConfigGeneration error, got {other:?}"),
        }
    }

    #[test]
    fn test_macro() {
        let err = invalid_parameter!("dropout", "expected {} bounds", 2);
        assert_eq!(
            err,
            ConfigGenerationError::InvalidParameter {
                name: "dropout".to_string(),
                message: "expected 2 bounds".to_string(),
            }
        );
    }
}
