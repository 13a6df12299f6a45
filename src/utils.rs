use crate::errors::UncertaintyError;
use std::cmp::Ordering;

/// Create a string of all available items.
pub fn items_to_strings(items: Vec<&str>) -> String {
    let mut s = String::new();
    for i in items {
        s.push_str(i);
        s.push_str(&String::from(", "));
    }
    s
}

pub fn fmt_vec_output(v: &[f64]) -> String {
    let mut res = String::new();
    if let Some(last) = v.len().checked_sub(1) {
        if last == 0 {
            return format!("{:.4}", v[0]);
        }
        for n in &v[..last] {
            res.push_str(format!("{:.4}", n).as_str());
            res.push_str(", ");
        }
        res.push_str(format!("{:.4}", &v[last]).as_str());
    }
    res
}

// Validation
pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), UncertaintyError> {
    if value.is_nan() || value < min || max < value {
        let ex_msg = format!("real value within range {} and {}", min, max);
        Err(UncertaintyError::InvalidParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Fail on the first non finite value of `values`.
pub fn validate_finite(values: &[f64], what: &str) -> Result<(), UncertaintyError> {
    match values.iter().find(|v| !v.is_finite()) {
        Some(v) => Err(UncertaintyError::InvalidValue(*v, what.to_string())),
        None => Ok(()),
    }
}

/// Indices that sort `v` ascending. The sort is stable, so
/// equal values keep their original relative order.
pub fn stable_argsort(v: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..v.len()).collect();
    idx.sort_by(|a, b| v[*a].partial_cmp(&v[*b]).unwrap_or(Ordering::Equal));
    idx
}

/// Sizes of `n_groups` consecutive groups covering `n` items.
/// Sizes differ by at most one, the first `n % n_groups` groups
/// take the extra item.
pub fn partition_sizes(n: usize, n_groups: usize) -> Vec<usize> {
    if n_groups == 0 {
        return Vec::new();
    }
    let base = n / n_groups;
    let extra = n % n_groups;
    (0..n_groups).map(|g| base + usize::from(g < extra)).collect()
}

/// Quantile of an ascending slice, using linear interpolation
/// between the two closest ranks. Returns NaN for an empty slice.
pub fn sorted_quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[inline]
pub fn precision_round(n: f64, precision: i32) -> f64 {
    let p = (10.0_f64).powi(precision);
    (n * p).round() / p
}
