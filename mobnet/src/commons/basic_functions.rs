use anyhow::{Context, Result};
use std::path::Path;

/// Min-max normalization to [0, 1]
/// A constant (or single valued) input maps every value to `constant_value`
pub fn min_max_normalize(values: &[f64], constant_value: f64) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if !range.is_finite() || range <= 0.0 {
        return vec![constant_value; values.len()];
    }
    values.iter().map(|v| (v - min) / range).collect()
}

/// Arithmetic mean, None for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Create the parent directory of an output file if it is missing
pub fn ensure_parent_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Keep at most `max_chars` characters, marking the cut with "..."
pub fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        label.to_string()
    } else {
        let head: String = label.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
