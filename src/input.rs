//! Region list input.

use anyhow::{Context, Result};
use std::path::Path;

/// Reads a UTF-8 region list, one name per line.
pub fn read_region_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read region list: {}", path.display()))?;
    Ok(parse_region_list(&content))
}

/// Trims every line and skips blank ones, keeping order and duplicates.
pub fn parse_region_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim_start_matches('\u{feff}').trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
