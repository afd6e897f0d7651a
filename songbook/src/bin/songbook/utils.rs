use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Format a naive UTC timestamp to a human-readable string
pub fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Format a date without the time of day
pub fn format_date(dt: Option<NaiveDateTime>) -> String {
    dt.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Format file size in human-readable format
pub fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if size == 0 {
        return "0 B".to_string();
    }

    let mut size_f = size as f64;
    let mut unit_index = 0;

    while size_f >= 1024.0 && unit_index < UNITS.len() - 1 {
        size_f /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{size} {}", UNITS[unit_index])
    } else {
        format!("{size_f:.2} {}", UNITS[unit_index])
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~')
        && let Some(home) = std::env::var_os("HOME")
    {
        let rest = rest.trim_start_matches('/');
        let home = PathBuf::from(home);
        return if rest.is_empty() { home } else { home.join(rest) };
    }
    PathBuf::from(path)
}

/// Login name of the operator.
pub fn current_username() -> Result<String> {
    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .context("Cannot determine the current user (USER is not set)")
}

/// Replace `old` with `new` on every line of a file. Returns whether the file changed.
pub fn search_replace(path: &Path, old: &str, new: &str) -> Result<bool> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let replaced = content.replace(old, new);
    if replaced == content {
        return Ok(false);
    }
    std::fs::write(path, replaced).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
