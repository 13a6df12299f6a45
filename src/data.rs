//! Data
//!
//! Tabular (uncertainty, error) pairs and the keys used to select them.
use crate::errors::UncertaintyError;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one subject / image. Unique within a fold and split.
pub type SampleId = String;

/// One localization error and its uncertainty value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePair {
    pub sample_id: SampleId,
    pub error: f64,
    pub uncertainty: f64,
}

/// Which columns to analyse together: the uncertainty category, the
/// localization error column and the uncertainty measure column.
///
/// Serialized as a three element list, `["S-MHA", "S-MHA Error", "S-MHA Uncertainty"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct UncertaintyPairing {
    pub category: String,
    pub error_field: String,
    pub uncertainty_field: String,
}

impl UncertaintyPairing {
    pub fn new(category: &str, error_field: &str, uncertainty_field: &str) -> Self {
        UncertaintyPairing {
            category: category.to_string(),
            error_field: error_field.to_string(),
            uncertainty_field: uncertainty_field.to_string(),
        }
    }

    /// Column holding the predicted bins of this measure in a results table.
    pub fn bins_column(&self) -> String {
        format!("{} bins", self.uncertainty_field)
    }

    /// Column holding the per fold error bounds of this measure.
    pub fn bounds_column(&self) -> String {
        format!("{} bounds", self.uncertainty_field)
    }
}

impl From<(String, String, String)> for UncertaintyPairing {
    fn from((category, error_field, uncertainty_field): (String, String, String)) -> Self {
        UncertaintyPairing {
            category,
            error_field,
            uncertainty_field,
        }
    }
}

impl From<UncertaintyPairing> for (String, String, String) {
    fn from(p: UncertaintyPairing) -> Self {
        (p.category, p.error_field, p.uncertainty_field)
    }
}

/// Data split a table is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    Validation,
    Testing,
}

impl Split {
    /// Name of the column holding the fold index of each row.
    pub fn fold_column(&self) -> &'static str {
        match self {
            Split::Validation => "Validation Fold",
            Split::Testing => "Testing Fold",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Validation => write!(f, "validation"),
            Split::Testing => write!(f, "testing"),
        }
    }
}

/// Rows to keep when loading a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldSelector {
    All,
    Fold(usize),
}

impl FoldSelector {
    #[inline]
    pub fn matches(&self, fold: usize) -> bool {
        match self {
            FoldSelector::All => true,
            FoldSelector::Fold(f) => *f == fold,
        }
    }
}

/// Columnar table of samples: one id and fold per row, plus named float columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairTable {
    pub uids: Vec<SampleId>,
    pub folds: Vec<usize>,
    columns: Vec<(String, Vec<f64>)>,
}

impl PairTable {
    pub fn new(uids: Vec<SampleId>, folds: Vec<usize>) -> Result<Self, UncertaintyError> {
        if uids.len() != folds.len() {
            return Err(UncertaintyError::LengthMismatch(
                "uids and folds".to_string(),
                uids.len(),
                folds.len(),
            ));
        }
        Ok(PairTable {
            uids,
            folds,
            columns: Vec::new(),
        })
    }

    /// Builder style variant of [`PairTable::set_column`].
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self, UncertaintyError> {
        self.set_column(name, values)?;
        Ok(self)
    }

    /// Add a column, replacing any existing column of the same name.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<(), UncertaintyError> {
        if values.len() != self.uids.len() {
            return Err(UncertaintyError::LengthMismatch(
                name.to_string(),
                values.len(),
                self.uids.len(),
            ));
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Result<&[f64], UncertaintyError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| UncertaintyError::MissingColumn(name.to_string()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Keep only the named columns, in the requested order.
    pub fn select(&self, columns: &[&str]) -> Result<PairTable, UncertaintyError> {
        let mut out = PairTable::new(self.uids.clone(), self.folds.clone())?;
        for name in columns {
            out.set_column(name, self.column(name)?.to_vec())?;
        }
        Ok(out)
    }

    /// Keep only rows whose fold matches `selector`.
    pub fn filter_folds(&self, selector: FoldSelector) -> PairTable {
        let keep: Vec<usize> = (0..self.len()).filter(|&i| selector.matches(self.folds[i])).collect();
        PairTable {
            uids: keep.iter().map(|&i| self.uids[i].clone()).collect(),
            folds: keep.iter().map(|&i| self.folds[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(n, v)| (n.clone(), keep.iter().map(|&i| v[i]).collect()))
                .collect(),
        }
    }

    /// Rows as (sample id, error, uncertainty) pairs.
    pub fn pairs(&self, error_field: &str, uncertainty_field: &str) -> Result<Vec<SamplePair>, UncertaintyError> {
        let errors = self.column(error_field)?;
        let uncertainties = self.column(uncertainty_field)?;
        Ok(self
            .uids
            .iter()
            .zip(errors.iter().zip(uncertainties))
            .map(|(id, (e, u))| SamplePair {
                sample_id: id.clone(),
                error: *e,
                uncertainty: *u,
            })
            .collect())
    }

    /// Map each sample id to its value in `field`.
    pub fn value_map(&self, field: &str) -> Result<HashMap<SampleId, f64>, UncertaintyError> {
        let values = self.column(field)?;
        Ok(self.uids.iter().cloned().zip(values.iter().copied()).collect())
    }
}
