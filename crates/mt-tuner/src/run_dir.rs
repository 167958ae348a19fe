use std::fs;
use std::io;
use std::path::Path;

/// Name for a fresh numbered run directory under `models_dir`: one past the
/// largest integer-named sub-directory, or `"1"` when there is none.
/// Non-numeric entries and plain files are ignored.
pub fn next_run_dir(models_dir: &Path) -> io::Result<String> {
    if !models_dir.exists() {
        return Ok("1".to_string());
    }

    let mut highest: Option<u64> = None;
    for entry in fs::read_dir(models_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|name| name.parse::<u64>().ok()) {
            highest = Some(highest.map_or(n, |h| h.max(n)));
        }
    }

    Ok(highest.map_or(1, |h| h.saturating_add(1)).to_string())
}
