use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scoring rubric: named dimensions rated 1-5 by the judge, each with a
/// weight and an optional group for the base/recognition split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    #[serde(default)]
    pub dimensions: BTreeMap<String, Dimension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<DimensionGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionGroup {
    Base,
    Recognition,
}

fn default_weight() -> f64 {
    1.0
}

/// Composites on the 0-100 scale. `None` means no rated dimension fed the
/// value, which is distinct from a genuine zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompositeScores {
    pub overall: Option<f64>,
    pub base: Option<f64>,
    pub recognition: Option<f64>,
}

impl Default for Rubric {
    fn default() -> Self {
        let mut dimensions = BTreeMap::new();
        let mut dim = |name: &str, group: Option<DimensionGroup>| {
            dimensions.insert(
                name.to_string(),
                Dimension {
                    weight: 1.0,
                    group,
                },
            );
        };
        dim("relevance", Some(DimensionGroup::Base));
        dim("accuracy", Some(DimensionGroup::Base));
        dim("pedagogical_fit", Some(DimensionGroup::Base));
        dim("clarity", Some(DimensionGroup::Base));
        dim("actionability", Some(DimensionGroup::Base));
        dim("responsiveness", Some(DimensionGroup::Recognition));
        dim("attunement", Some(DimensionGroup::Recognition));
        dim("epistemic_respect", Some(DimensionGroup::Recognition));
        dim("adaptivity", Some(DimensionGroup::Recognition));
        Rubric { dimensions }
    }
}

impl Rubric {
    /// Weighted mean of the rated dimensions, rescaled from 1-5 onto 0-100.
    /// Weights are renormalized over the dimensions actually present, so a
    /// missing dimension does not drag the composite toward zero.
    pub fn composite(&self, raw: &BTreeMap<String, f64>) -> Option<f64> {
        self.weighted(raw, |_| true)
    }

    pub fn group_composite(
        &self,
        raw: &BTreeMap<String, f64>,
        group: DimensionGroup,
    ) -> Option<f64> {
        self.weighted(raw, |d| d.group == Some(group))
    }

    pub fn composites(&self, raw: &BTreeMap<String, f64>) -> CompositeScores {
        CompositeScores {
            overall: self.composite(raw),
            base: self.group_composite(raw, DimensionGroup::Base),
            recognition: self.group_composite(raw, DimensionGroup::Recognition),
        }
    }

    fn weighted(
        &self,
        raw: &BTreeMap<String, f64>,
        keep: impl Fn(&Dimension) -> bool,
    ) -> Option<f64> {
        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        for (name, dim) in &self.dimensions {
            if !keep(dim) || dim.weight <= 0.0 {
                continue;
            }
            if let Some(score) = raw.get(name) {
                sum += score.clamp(1.0, 5.0) * dim.weight;
                weight_sum += dim.weight;
            }
        }
        if weight_sum == 0.0 {
            return None;
        }
        Some(((sum / weight_sum - 1.0) / 4.0) * 100.0)
    }
}

/// Mean over the values that are present. An absent score is excluded, not
/// treated as zero; all-absent yields `None`.
pub fn mean_of_present(values: &[Option<f64>]) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values.iter().flatten() {
        sum += v;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn two_dim_rubric() -> Rubric {
        let mut dimensions = BTreeMap::new();
        dimensions.insert(
            "a".to_string(),
            Dimension {
                weight: 0.5,
                group: Some(DimensionGroup::Base),
            },
        );
        dimensions.insert(
            "b".to_string(),
            Dimension {
                weight: 0.5,
                group: Some(DimensionGroup::Recognition),
            },
        );
        Rubric { dimensions }
    }

    #[test]
    fn composite_rescales_onto_percentage() {
        let rubric = two_dim_rubric();
        // (5*0.5 + 1*0.5) / 1.0 = 3.0 -> ((3-1)/4)*100 = 50
        let scores = rubric.composites(&raw(&[("a", 5.0), ("b", 1.0)]));
        assert_eq!(scores.overall, Some(50.0));
        assert_eq!(scores.base, Some(100.0));
        assert_eq!(scores.recognition, Some(0.0));
    }

    #[test]
    fn missing_dimension_renormalizes_weights() {
        let rubric = two_dim_rubric();
        // only "a" present: weighted mean = 5.0, not 2.5
        assert_eq!(rubric.composite(&raw(&[("a", 5.0)])), Some(100.0));
    }

    #[test]
    fn no_rated_dimensions_is_none_not_zero() {
        let rubric = two_dim_rubric();
        assert_eq!(rubric.composite(&raw(&[])), None);
        assert_eq!(rubric.composite(&raw(&[("unknown", 5.0)])), None);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let rubric = two_dim_rubric();
        assert_eq!(rubric.composite(&raw(&[("a", 9.0), ("b", -2.0)])), Some(50.0));
    }

    #[test]
    fn default_rubric_groups_are_disjoint() {
        let rubric = Rubric::default();
        let base: Vec<_> = rubric
            .dimensions
            .values()
            .filter(|d| d.group == Some(DimensionGroup::Base))
            .collect();
        let recognition: Vec<_> = rubric
            .dimensions
            .values()
            .filter(|d| d.group == Some(DimensionGroup::Recognition))
            .collect();
        assert_eq!(base.len(), 5);
        assert_eq!(recognition.len(), 4);
        assert_eq!(base.len() + recognition.len(), rubric.dimensions.len());
    }

    #[test]
    fn mean_skips_absent_scores() {
        assert_eq!(
            mean_of_present(&[Some(70.0), Some(90.0), None]),
            Some(80.0)
        );
        assert_eq!(mean_of_present(&[None, None]), None);
        assert_eq!(mean_of_present(&[]), None);
    }
}
