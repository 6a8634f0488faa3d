//! Descriptive summaries independent of the ANOVA decomposition, for report
//! surfaces that only want means.

use std::collections::BTreeMap;

use paideia_core::model::FactorKey;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub n: usize,
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub max: f64,
}

pub fn summarize(samples: &[f64]) -> Option<Summary> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let var = if n > 1 {
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };
    let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(Summary {
        n,
        mean,
        sd: var.sqrt(),
        min,
        max,
    })
}

/// Per-cell summaries in key order, skipping empty cells.
pub fn cell_summaries(
    cells: &BTreeMap<FactorKey, Vec<f64>>,
) -> Vec<(FactorKey, Summary)> {
    cells
        .iter()
        .filter_map(|(key, samples)| summarize(samples).map(|s| (*key, s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_known_values() {
        let s = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(s.n, 8);
        assert!((s.mean - 5.0).abs() < 1e-12);
        // sample sd of this classic set is sqrt(32/7)
        assert!((s.sd - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
    }

    #[test]
    fn empty_and_singleton() {
        assert!(summarize(&[]).is_none());
        let s = summarize(&[3.5]).unwrap();
        assert_eq!(s.sd, 0.0);
        assert_eq!(s.mean, 3.5);
    }

    #[test]
    fn cell_summaries_skip_empty_cells() {
        let mut cells = BTreeMap::new();
        cells.insert(FactorKey::default(), vec![1.0, 2.0]);
        cells.insert(
            FactorKey {
                recognition: true,
                ..Default::default()
            },
            vec![],
        );
        let out = cell_summaries(&cells);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.n, 2);
    }
}
