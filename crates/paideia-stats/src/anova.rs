//! Three-way factorial ANOVA over the 2x2x2 design. Main effects come from
//! marginal means, two-way interactions from pair means minus the main
//! deviations, and the three-way term is the residual of the cell sum of
//! squares, clamped at zero to absorb floating-point underflow. That
//! residual construction is exact for balanced designs only; for badly
//! unbalanced cell sizes the clamp hides real negative mass, so the result
//! carries a `balanced` flag instead of pretending otherwise.

use std::collections::BTreeMap;

use paideia_core::model::FactorKey;
use serde::Serialize;
use thiserror::Error;

use crate::special::f_sf;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnovaError {
    /// No samples in any cell. Returned as a value so a multi-metric report
    /// can keep rendering the other metrics.
    #[error("no samples in any factorial cell")]
    NoSamples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Recognition,
    Tutor,
    Learner,
}

impl Factor {
    pub const ALL: [Factor; 3] = [Factor::Recognition, Factor::Tutor, Factor::Learner];

    pub fn label(&self) -> &'static str {
        match self {
            Factor::Recognition => "recognition",
            Factor::Tutor => "tutor_architecture",
            Factor::Learner => "learner_architecture",
        }
    }

    fn level(&self, key: &FactorKey) -> bool {
        match self {
            Factor::Recognition => key.recognition,
            Factor::Tutor => key.tutor,
            Factor::Learner => key.learner,
        }
    }
}

/// One line of the ANOVA table.
#[derive(Debug, Clone, Serialize)]
pub struct EffectRow {
    pub label: String,
    pub ss: f64,
    pub df: f64,
    pub ms: f64,
    pub f: f64,
    pub p: f64,
    pub eta_sq: f64,
}

impl EffectRow {
    pub fn significant_05(&self) -> bool {
        self.p < 0.05
    }

    pub fn significant_10(&self) -> bool {
        self.p < 0.10
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CellSummary {
    pub key: FactorKey,
    pub n: usize,
    pub mean: f64,
    pub sd: f64,
}

/// Marginal means for one factor, pooled over the other two.
#[derive(Debug, Clone, Serialize)]
pub struct MarginalMeans {
    pub factor: Factor,
    pub n0: usize,
    pub mean0: f64,
    pub n1: usize,
    pub mean1: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FactorialAnova {
    pub n: usize,
    pub grand_mean: f64,
    pub ss_total: f64,
    pub df_total: f64,
    /// Seven terms in fixed order: R, T, L, RxT, RxL, TxL, RxTxL.
    pub effects: Vec<EffectRow>,
    pub ss_error: f64,
    pub df_error: f64,
    pub ms_error: f64,
    pub cells: Vec<CellSummary>,
    pub marginals: Vec<MarginalMeans>,
    /// All eight cells present with equal n. The three-way residual is only
    /// exact in this case.
    pub balanced: bool,
}

impl FactorialAnova {
    pub fn effect(&self, label: &str) -> Option<&EffectRow> {
        self.effects.iter().find(|e| e.label == label)
    }
}

pub fn run_anova(cells: &BTreeMap<FactorKey, Vec<f64>>) -> Result<FactorialAnova, AnovaError> {
    let n: usize = cells.values().map(Vec::len).sum();
    if n == 0 {
        return Err(AnovaError::NoSamples);
    }

    let grand_mean = cells.values().flatten().sum::<f64>() / n as f64;
    let ss_total: f64 = cells
        .values()
        .flatten()
        .map(|x| (x - grand_mean).powi(2))
        .sum();

    // main effects and their per-level deviations
    let mut main_ss = [0.0f64; 3];
    let mut deviations = [[0.0f64; 2]; 3];
    let mut marginals = Vec::with_capacity(3);
    for (fi, factor) in Factor::ALL.iter().enumerate() {
        let mut level_stats = [(0usize, grand_mean); 2];
        for (li, stat) in level_stats.iter_mut().enumerate() {
            let level = li == 1;
            let (count, mean) =
                pooled_mean(cells, grand_mean, |key| factor.level(key) == level);
            *stat = (count, mean);
            deviations[fi][li] = mean - grand_mean;
            main_ss[fi] += count as f64 * (mean - grand_mean).powi(2);
        }
        marginals.push(MarginalMeans {
            factor: *factor,
            n0: level_stats[0].0,
            mean0: level_stats[0].1,
            n1: level_stats[1].0,
            mean1: level_stats[1].1,
        });
    }

    // two-way interactions: pair mean minus the two main-effect deviations
    let pairs = [(0usize, 1usize), (0, 2), (1, 2)];
    let mut pair_ss = [0.0f64; 3];
    for (pi, &(fa, fb)) in pairs.iter().enumerate() {
        for la in 0..2usize {
            for lb in 0..2usize {
                let (count, mean) = pooled_mean(cells, grand_mean, |key| {
                    Factor::ALL[fa].level(key) == (la == 1)
                        && Factor::ALL[fb].level(key) == (lb == 1)
                });
                let interaction =
                    mean - grand_mean - deviations[fa][la] - deviations[fb][lb];
                pair_ss[pi] += count as f64 * interaction.powi(2);
            }
        }
    }

    // three-way as the residual of the cell sum of squares
    let mut ss_cells = 0.0;
    let mut ss_error = 0.0;
    let mut summaries = Vec::new();
    for key in FactorKey::all() {
        let samples = cells.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        if samples.is_empty() {
            summaries.push(CellSummary {
                key,
                n: 0,
                mean: grand_mean,
                sd: 0.0,
            });
            continue;
        }
        let cell_n = samples.len();
        let cell_mean = samples.iter().sum::<f64>() / cell_n as f64;
        let within: f64 = samples.iter().map(|x| (x - cell_mean).powi(2)).sum();
        ss_cells += cell_n as f64 * (cell_mean - grand_mean).powi(2);
        ss_error += within;
        let sd = if cell_n > 1 {
            (within / (cell_n - 1) as f64).sqrt()
        } else {
            0.0
        };
        summaries.push(CellSummary {
            key,
            n: cell_n,
            mean: cell_mean,
            sd,
        });
    }
    let three_way_ss = (ss_cells
        - main_ss.iter().sum::<f64>()
        - pair_ss.iter().sum::<f64>())
    .max(0.0);

    let cell_counts: Vec<usize> = summaries.iter().map(|c| c.n).collect();
    let balanced = cell_counts.iter().all(|&c| c > 0 && c == cell_counts[0]);
    if !balanced {
        tracing_warn_unbalanced(&cell_counts);
    }

    let df_error = n as f64 - 8.0;
    let ms_error = if df_error > 0.0 { ss_error / df_error } else { 0.0 };

    let term = |label: &str, ss: f64| -> EffectRow {
        let df = 1.0;
        let ms = ss / df;
        let (f, p) = if ms_error > 0.0 && df_error > 0.0 {
            let f = ms / ms_error;
            (f, f_sf(f, df, df_error))
        } else {
            // constant data: no variance to attribute, nothing significant
            (0.0, 1.0)
        };
        let eta_sq = if ss_total > 0.0 { ss / ss_total } else { 0.0 };
        EffectRow {
            label: label.to_string(),
            ss,
            df,
            ms,
            f,
            p,
            eta_sq,
        }
    };

    let effects = vec![
        term("recognition", main_ss[0]),
        term("tutor_architecture", main_ss[1]),
        term("learner_architecture", main_ss[2]),
        term("recognition x tutor", pair_ss[0]),
        term("recognition x learner", pair_ss[1]),
        term("tutor x learner", pair_ss[2]),
        term("recognition x tutor x learner", three_way_ss),
    ];

    Ok(FactorialAnova {
        n,
        grand_mean,
        ss_total,
        df_total: n as f64 - 1.0,
        effects,
        ss_error,
        df_error,
        ms_error,
        cells: summaries,
        marginals,
        balanced,
    })
}

/// Mean over every sample whose cell key satisfies the predicate. An empty
/// selection falls back to the grand mean (zero deviation) so one missing
/// level degrades the report instead of dividing by zero.
fn pooled_mean(
    cells: &BTreeMap<FactorKey, Vec<f64>>,
    grand_mean: f64,
    keep: impl Fn(&FactorKey) -> bool,
) -> (usize, f64) {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (key, samples) in cells {
        if keep(key) {
            sum += samples.iter().sum::<f64>();
            count += samples.len();
        }
    }
    if count == 0 {
        (0, grand_mean)
    } else {
        (count, sum / count as f64)
    }
}

fn tracing_warn_unbalanced(counts: &[usize]) {
    tracing::warn!(
        ?counts,
        "unbalanced cell sizes: three-way residual term is approximate"
    );
}
