//! Isotonic Bounds
//!
//! Monotone (non-decreasing) error bound estimation over uncertainty-ordered
//! groups, using the pool adjacent violators algorithm.
use crate::errors::UncertaintyError;
use crate::utils::{items_to_strings, mean, sorted_quantile, validate_float_parameter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Statistic summarising the errors of one bin into its error bound.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
pub enum BoundStatistic {
    /// Largest error in the bin.
    #[default]
    Max,
    /// Mean error of the bin.
    Mean,
    /// Upper quantile of the bin's errors, linearly interpolated.
    Quantile { q: f64 },
}

impl BoundStatistic {
    pub fn validate(&self) -> Result<(), UncertaintyError> {
        match self {
            BoundStatistic::Quantile { q } => validate_float_parameter(*q, 0.0, 1.0, "bound_statistic.q"),
            _ => Ok(()),
        }
    }

    /// Evaluate the statistic over an ascending slice of errors.
    pub fn evaluate(&self, sorted_errors: &[f64]) -> f64 {
        match self {
            BoundStatistic::Max => sorted_errors.last().copied().unwrap_or(f64::NAN),
            BoundStatistic::Mean => mean(sorted_errors),
            BoundStatistic::Quantile { q } => sorted_quantile(sorted_errors, *q),
        }
    }
}

fn get_parse_error(s: &str) -> UncertaintyError {
    UncertaintyError::ParseString(
        s.to_string(),
        "BoundStatistic".to_string(),
        items_to_strings(vec!["Max", "Mean", "Quantile@q"]),
    )
}

impl FromStr for BoundStatistic {
    type Err = UncertaintyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Max" => Ok(BoundStatistic::Max),
            "Mean" => Ok(BoundStatistic::Mean),
            _ if s.starts_with("Quantile@") => {
                let q = s["Quantile@".len()..].parse().map_err(|_| get_parse_error(s))?;
                let stat = BoundStatistic::Quantile { q };
                stat.validate()?;
                Ok(stat)
            }
            _ => Err(get_parse_error(s)),
        }
    }
}

struct Block {
    /// Pooled errors, ascending.
    errors: Vec<f64>,
    n_groups: usize,
    value: f64,
}

fn merge_sorted(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Estimate one bound per group such that bounds never decrease with the
/// group index.
///
/// * `groups` - Errors of each group, ordered from lowest to highest uncertainty.
/// * `statistic` - Statistic used as the raw bound of a group.
///
/// When a group's statistic is below the block before it, the two blocks are
/// pooled and the statistic is recomputed over the union of their errors.
pub fn monotone_bounds(groups: &[Vec<f64>], statistic: BoundStatistic) -> Vec<f64> {
    let mut blocks: Vec<Block> = Vec::with_capacity(groups.len());

    for group in groups {
        let mut errors = group.clone();
        errors.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mut current = Block {
            value: statistic.evaluate(&errors),
            errors,
            n_groups: 1,
        };

        // Merge down
        while blocks.last().is_some_and(|prev| prev.value > current.value) {
            if let Some(prev) = blocks.pop() {
                let errors = merge_sorted(&prev.errors, &current.errors);
                current = Block {
                    value: statistic.evaluate(&errors),
                    errors,
                    n_groups: prev.n_groups + current.n_groups,
                };
            }
        }
        blocks.push(current);
    }

    blocks
        .iter()
        .flat_map(|b| std::iter::repeat(b.value).take(b.n_groups))
        .collect()
}
