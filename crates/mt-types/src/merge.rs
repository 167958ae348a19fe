//! Recursive merging of JSON config trees.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::ConfigError;

/// What to do with overlay keys the base config does not define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissPolicy {
    /// Add the key to the base.
    #[default]
    Insert,
    /// Skip the key silently.
    Ignore,
    /// Skip the key and log a warning.
    Report,
    /// Fail on the first unknown key.
    Exception,
}

/// Merge `overlay` into `base`. Nested objects merge key by key; any other
/// value overwrites. Returns the dotted paths of overlay keys that were
/// skipped under `misses`.
pub fn recursive_merge(
    base: &mut Value,
    overlay: &Value,
    misses: MissPolicy,
) -> Result<Vec<String>, ConfigError> {
    let mut skipped = Vec::new();
    merge_at(base, overlay, misses, "", &mut skipped)?;
    Ok(skipped)
}

fn merge_at(
    base: &mut Value,
    overlay: &Value,
    misses: MissPolicy,
    prefix: &str,
    skipped: &mut Vec<String>,
) -> Result<(), ConfigError> {
    let overlay_map = overlay.as_object().ok_or_else(|| ConfigError::NotAnObject {
        path: display_path(prefix),
    })?;
    let base_map = base.as_object_mut().ok_or_else(|| ConfigError::NotAnObject {
        path: display_path(prefix),
    })?;

    for (key, value) in overlay_map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match base_map.get_mut(key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                merge_at(existing, value, misses, &path, skipped)?;
            }
            Some(existing) => *existing = value.clone(),
            None => match misses {
                MissPolicy::Insert => {
                    base_map.insert(key.clone(), value.clone());
                }
                MissPolicy::Ignore => skipped.push(path),
                MissPolicy::Report => {
                    warn!(key = %path, "Ignoring unrecognized config key");
                    skipped.push(path);
                }
                MissPolicy::Exception => return Err(ConfigError::UnknownKey { path }),
            },
        }
    }

    Ok(())
}

fn display_path(prefix: &str) -> String {
    if prefix.is_empty() {
        "<root>".to_string()
    } else {
        prefix.to_string()
    }
}
