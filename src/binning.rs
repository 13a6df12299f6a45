use crate::data::{SampleId, SamplePair};
use crate::errors::UncertaintyError;
use crate::isotonic::{monotone_bounds, BoundStatistic};
use crate::utils::{fmt_vec_output, partition_sizes, stable_argsort, validate_finite};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Bin index of each sample.
pub type BinAssignment = HashMap<SampleId, usize>;

/// Uncertainty thresholds and per bin error bounds fitted on one validation split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileFit {
    /// `num_bins - 1` non-decreasing thresholds on the uncertainty axis.
    pub boundaries: Vec<f64>,
    /// `num_bins` non-decreasing error bounds, bin 0 is the lowest uncertainty bin.
    pub bounds: Vec<f64>,
}

impl QuantileFit {
    pub fn num_bins(&self) -> usize {
        self.bounds.len()
    }
}

/// Group index of every value when ranked ascending and split into
/// `num_bins` groups of as equal as possible size. Ties keep their input
/// order. With fewer values than bins, the highest groups stay empty.
pub fn quantile_ranks(values: &[f64], num_bins: usize) -> Vec<usize> {
    let order = stable_argsort(values);
    let mut ranks = vec![0; values.len()];
    let mut start = 0;
    for (bin, size) in partition_sizes(values.len(), num_bins).into_iter().enumerate() {
        for &i in &order[start..start + size] {
            ranks[i] = bin;
        }
        start += size;
    }
    ranks
}

/// Fit quantile boundaries on uncertainties and estimate an error bound per bin.
///
/// * `errors` - Localization error of each validation sample.
/// * `uncertainties` - Uncertainty value of each validation sample.
/// * `num_bins` - Number of quantile bins.
/// * `statistic` - Statistic used for the raw error bound of each bin.
pub fn fit(
    errors: &[f64],
    uncertainties: &[f64],
    num_bins: usize,
    statistic: BoundStatistic,
) -> Result<QuantileFit, UncertaintyError> {
    if num_bins == 0 {
        return Err(UncertaintyError::InvalidParameter(
            "num_bins".to_string(),
            "at least 1".to_string(),
            "0".to_string(),
        ));
    }
    if errors.len() != uncertainties.len() {
        return Err(UncertaintyError::LengthMismatch(
            "errors and uncertainties".to_string(),
            errors.len(),
            uncertainties.len(),
        ));
    }
    if uncertainties.len() < num_bins {
        return Err(UncertaintyError::InsufficientData(uncertainties.len(), num_bins));
    }
    validate_finite(errors, "errors")?;
    validate_finite(uncertainties, "uncertainties")?;
    if let Some(e) = errors.iter().find(|e| **e < 0.0) {
        return Err(UncertaintyError::InvalidValue(*e, "errors".to_string()));
    }
    statistic.validate()?;

    let order = stable_argsort(uncertainties);
    let sizes = partition_sizes(order.len(), num_bins);

    let mut groups: Vec<Vec<f64>> = Vec::with_capacity(num_bins);
    let mut boundaries = Vec::with_capacity(num_bins - 1);
    let mut start = 0;
    for size in sizes {
        let end = start + size;
        groups.push(order[start..end].iter().map(|&i| errors[i]).collect());
        // Split point between this group and the next one.
        if end < order.len() && groups.len() < num_bins {
            let upper_edge = uncertainties[order[end - 1]];
            let next_lower = uncertainties[order[end]];
            boundaries.push(upper_edge + (next_lower - upper_edge) / 2.0);
        }
        start = end;
    }

    let bounds = monotone_bounds(&groups, statistic);
    Ok(QuantileFit { boundaries, bounds })
}

/// [`fit`] on validation pairs.
pub fn fit_pairs(
    pairs: &[SamplePair],
    num_bins: usize,
    statistic: BoundStatistic,
) -> Result<QuantileFit, UncertaintyError> {
    let (errors, uncertainties): (Vec<f64>, Vec<f64>) = pairs.iter().map(|p| (p.error, p.uncertainty)).unzip();
    fit(&errors, &uncertainties, num_bins, statistic)
}

/// Bin of a single value: the number of boundaries less than or equal to it.
///
/// `boundaries` must be non-decreasing.
#[inline]
pub fn bin_index(value: f64, boundaries: &[f64]) -> usize {
    boundaries.partition_point(|b| *b <= value)
}

/// Assign every sample to a bin under the fitted `boundaries`.
pub fn predict(
    sample_values: &HashMap<SampleId, f64>,
    boundaries: &[f64],
) -> Result<BinAssignment, UncertaintyError> {
    if sample_values.is_empty() {
        return Err(UncertaintyError::EmptyInput("sample values to bin".to_string()));
    }
    if !boundaries.windows(2).all(|w| w[0] <= w[1]) {
        return Err(UncertaintyError::InvalidParameter(
            "boundaries".to_string(),
            "non-decreasing values".to_string(),
            format!("[{}]", fmt_vec_output(boundaries)),
        ));
    }
    sample_values
        .iter()
        .map(|(id, v)| {
            if v.is_nan() {
                Err(UncertaintyError::InvalidValue(*v, format!("uncertainty of sample {}", id)))
            } else {
                Ok((id.clone(), bin_index(*v, boundaries)))
            }
        })
        .collect()
}

/// Number of samples assigned to each of `num_bins` bins.
pub fn bin_populations(assignment: &BinAssignment, num_bins: usize) -> Vec<usize> {
    let mut counts = vec![0; num_bins];
    for bin in assignment.values() {
        if let Some(c) = counts.get_mut(*bin) {
            *c += 1;
        }
    }
    counts
}
