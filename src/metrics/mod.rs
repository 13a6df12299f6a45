//! Metrics
//!
//! Bin-wise quality metrics of uncertainty bins: mean error, error bound
//! containment and set overlap with the ground truth error bins.
pub mod evaluation;

use crate::errors::UncertaintyError;
use crate::utils::{items_to_strings, mean};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A per bin metric.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinMetric {
    MeanError,
    BoundAccuracy,
    Jaccard,
    Recall,
    Precision,
}

impl BinMetric {
    pub const ALL: [BinMetric; 5] = [
        BinMetric::MeanError,
        BinMetric::BoundAccuracy,
        BinMetric::Jaccard,
        BinMetric::Recall,
        BinMetric::Precision,
    ];

    /// Whether a larger value means better bins.
    pub fn maximize(&self) -> bool {
        !matches!(self, BinMetric::MeanError)
    }
}

impl FromStr for BinMetric {
    type Err = UncertaintyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MeanError" => Ok(BinMetric::MeanError),
            "BoundAccuracy" => Ok(BinMetric::BoundAccuracy),
            "Jaccard" => Ok(BinMetric::Jaccard),
            "Recall" => Ok(BinMetric::Recall),
            "Precision" => Ok(BinMetric::Precision),
            _ => Err(UncertaintyError::ParseString(
                s.to_string(),
                "BinMetric".to_string(),
                items_to_strings(vec!["MeanError", "BoundAccuracy", "Jaccard", "Recall", "Precision"]),
            )),
        }
    }
}

/// Raw counts of one bin, which can be summed across units before any
/// ratio is taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinTally {
    /// Errors of the samples predicted into this bin.
    pub errors: Vec<f64>,
    /// Predicted samples whose error is within the bin's bound.
    pub within_bound: usize,
    /// Samples whose ground truth bin is this bin.
    pub truth: usize,
    /// Samples both predicted into and truly belonging to this bin.
    pub intersection: usize,
}

impl BinTally {
    pub fn predicted(&self) -> usize {
        self.errors.len()
    }

    pub fn merge(&mut self, other: &BinTally) {
        self.errors.extend_from_slice(&other.errors);
        self.within_bound += other.within_bound;
        self.truth += other.truth;
        self.intersection += other.intersection;
    }

    pub fn mean_error(&self) -> Option<f64> {
        if self.errors.is_empty() {
            None
        } else {
            Some(mean(&self.errors))
        }
    }

    pub fn bound_accuracy(&self) -> Option<f64> {
        ratio(self.within_bound, self.predicted())
    }

    pub fn jaccard(&self) -> Option<f64> {
        jaccard(self.intersection, self.predicted(), self.truth)
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(self.intersection, self.truth)
    }

    pub fn precision(&self) -> Option<f64> {
        ratio(self.intersection, self.predicted())
    }

    pub fn value(&self, metric: BinMetric) -> Option<f64> {
        match metric {
            BinMetric::MeanError => self.mean_error(),
            BinMetric::BoundAccuracy => self.bound_accuracy(),
            BinMetric::Jaccard => self.jaccard(),
            BinMetric::Recall => self.recall(),
            BinMetric::Precision => self.precision(),
        }
    }
}

#[inline]
fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

/// |P ∩ T| / |P ∪ T|, `None` when either set is empty.
pub fn jaccard(intersection: usize, predicted: usize, truth: usize) -> Option<f64> {
    if predicted == 0 || truth == 0 {
        return None;
    }
    ratio(intersection, predicted + truth - intersection)
}
