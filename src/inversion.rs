//! Confidence Inversion
//!
//! Some measures are confidences, where a larger value means the model is
//! more certain. These are remapped so that larger always means more uncertain.
use crate::data::PairTable;
use crate::errors::UncertaintyError;
use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};

/// Decreasing transform applied to an inverted measure.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
pub enum InversionMethod {
    /// `1 / x`, for strictly positive scores.
    #[default]
    Reciprocal,
    /// `max - x`, for scores with a known upper limit.
    Reflect { max: f64 },
}

impl InversionMethod {
    /// Transform `values`, reversing their order.
    pub fn apply(&self, values: &[f64], measure: &str) -> Result<Vec<f64>, UncertaintyError> {
        match self {
            InversionMethod::Reciprocal => values
                .iter()
                .map(|v| {
                    if *v > 0.0 && v.is_finite() {
                        Ok(1.0 / v)
                    } else {
                        Err(UncertaintyError::InvalidValue(*v, measure.to_string()))
                    }
                })
                .collect(),
            InversionMethod::Reflect { max } => Ok(values.iter().map(|v| max - v).collect()),
        }
    }
}

/// Categories whose measures must be inverted.
pub type InversionLookup = HashMap<String, bool>;

/// Invert `measure` in `table` when `category` is flagged in `lookup`.
///
/// Fails with a configuration error when `category` is not listed at all.
pub fn apply_inversion(
    mut table: PairTable,
    measure: &str,
    category: &str,
    lookup: &InversionLookup,
    method: InversionMethod,
) -> Result<PairTable, UncertaintyError> {
    let invert = lookup.get(category).copied().ok_or_else(|| {
        UncertaintyError::Configuration(format!(
            "uncertainty category {} has no entry in confidence_invert",
            category
        ))
    })?;
    if !invert {
        return Ok(table);
    }
    debug!("Inverting {} ({}) with {:?}.", measure, category, method);
    let inverted = method.apply(table.column(measure)?, measure)?;
    table.set_column(measure, inverted)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: Vec<f64>) -> PairTable {
        let n = values.len();
        PairTable::new((0..n).map(|i| i.to_string()).collect(), vec![0; n])
            .unwrap()
            .with_column("conf", values)
            .unwrap()
    }

    fn lookup(invert: bool) -> InversionLookup {
        HashMap::from([("S-MHA".to_string(), invert)])
    }

    #[test]
    fn test_reflect_confidence() {
        let out = apply_inversion(
            table(vec![0.9, 0.1]),
            "conf",
            "S-MHA",
            &lookup(true),
            InversionMethod::Reflect { max: 1.0 },
        )
        .unwrap();
        let v = out.column("conf").unwrap();
        assert!((v[0] - 0.1).abs() < 1e-12);
        assert!((v[1] - 0.9).abs() < 1e-12);
        assert!(v[0] < v[1]);
    }

    #[test]
    fn test_reciprocal() {
        let out = apply_inversion(
            table(vec![4.0, 0.5]),
            "conf",
            "S-MHA",
            &lookup(true),
            InversionMethod::Reciprocal,
        )
        .unwrap();
        assert_eq!(out.column("conf").unwrap(), &[0.25, 2.0]);

        let res = apply_inversion(
            table(vec![4.0, 0.0]),
            "conf",
            "S-MHA",
            &lookup(true),
            InversionMethod::Reciprocal,
        );
        assert!(matches!(res, Err(UncertaintyError::InvalidValue(_, _))));
    }

    #[test]
    fn test_not_flagged_is_unchanged() {
        let t = table(vec![0.9, 0.1]);
        let out = apply_inversion(t.clone(), "conf", "S-MHA", &lookup(false), InversionMethod::Reciprocal).unwrap();
        assert_eq!(out, t);
    }

    #[test]
    fn test_unknown_category() {
        let res = apply_inversion(
            table(vec![0.9]),
            "conf",
            "E-CPV",
            &lookup(true),
            InversionMethod::Reciprocal,
        );
        assert!(matches!(res, Err(UncertaintyError::Configuration(_))));
    }
}
