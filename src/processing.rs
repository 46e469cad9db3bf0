use crate::types::Neighborhood;
use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightRange {
    pub min: f64,
    pub max: f64,
}

impl WeightRange {
    pub fn from_weights(weights: &[f64]) -> Result<Self> {
        if weights.is_empty() {
            return Err(anyhow!("No street locations to size"));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite()) {
            return Err(anyhow!("Non-finite weight: {}", bad));
        }
        let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
        let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self { min, max })
    }

    pub fn is_flat(&self) -> bool {
        self.max == self.min
    }

    /// Linear map of `weight` onto `[min_size, max_size]`. When every
    /// weight is equal there is nothing to scale and `min_size` is used.
    pub fn scale(&self, weight: f64, min_size: f64, max_size: f64) -> f64 {
        if self.is_flat() {
            return min_size;
        }
        (weight - self.min) / (self.max - self.min) * (max_size - min_size) + min_size
    }
}

pub fn scale_marker_sizes(weights: &[f64], range: WeightRange, min_size: f64, max_size: f64) -> Vec<f64> {
    weights
        .iter()
        .map(|&w| range.scale(w, min_size, max_size))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub size: f64, // points squared
    pub diameter: f64, // points
}

/// Entries for the smallest and largest weight, truncated to whole
/// mentions. Collapses to one entry when both truncate to the same value.
pub fn legend_entries(range: WeightRange, min_size: f64, max_size: f64) -> Vec<LegendEntry> {
    let mut weights = vec![range.min.trunc(), range.max.trunc()];
    weights.dedup();
    weights
        .into_iter()
        .map(|w| {
            let size = range.scale(w, min_size, max_size).max(0.0);
            LegendEntry {
                label: format!("{} mentions", w as i64),
                size,
                diameter: size.sqrt(),
            }
        })
        .collect()
}

// ceil(n / cols) rows per column; trailing columns may be short or empty
pub fn split_columns<T: Clone>(labels: &[T], cols: usize) -> Vec<Vec<T>> {
    if cols == 0 {
        return Vec::new();
    }
    let rows = labels.len().div_ceil(cols);
    (0..cols)
        .map(|i| {
            let start = (i * rows).min(labels.len());
            let end = ((i + 1) * rows).min(labels.len());
            labels[start..end].to_vec()
        })
        .collect()
}

pub fn neighborhood_labels(neighborhoods: &[Neighborhood]) -> Vec<String> {
    let mut sorted: Vec<&Neighborhood> = neighborhoods.iter().collect();
    sorted.sort_by_key(|n| n.id);
    sorted
        .into_iter()
        .map(|n| format!("{} - {}", n.id, n.name))
        .collect()
}
