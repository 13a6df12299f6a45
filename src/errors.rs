//! Errors
//!
//! Custom error types used throughout the `landmark_uncertainty` crate.
use std::fmt;
use thiserror::Error;

/// Identifies the (model, landmark, measure, fold) unit a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitKey {
    pub model: String,
    pub landmark: usize,
    pub measure: Option<String>,
    pub fold: Option<usize>,
}

impl UnitKey {
    pub fn new(model: &str, landmark: usize) -> Self {
        UnitKey {
            model: model.to_string(),
            landmark,
            measure: None,
            fold: None,
        }
    }

    pub fn with_measure(mut self, measure: &str) -> Self {
        self.measure = Some(measure.to_string());
        self
    }

    pub fn with_fold(mut self, fold: usize) -> Self {
        self.fold = Some(fold);
        self
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model={} landmark={}", self.model, self.landmark)?;
        if let Some(measure) = &self.measure {
            write!(f, " measure={}", measure)?;
        }
        if let Some(fold) = self.fold {
            write!(f, " fold={}", fold)?;
        }
        Ok(())
    }
}

/// Errors that can occur while fitting, predicting or evaluating uncertainty bins.
#[derive(Debug, Error)]
pub enum UncertaintyError {
    /// Missing or invalid pairing / inversion entry.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Fewer samples than bins.
    #[error("Cannot fit {1} bins from {0} samples.")]
    InsufficientData(usize, usize),
    /// Sample id predicted in more than one test fold.
    #[error("Sample {sample_id} appears in both fold {first_fold} and fold {second_fold}.")]
    FoldOverlap {
        sample_id: String,
        first_fold: usize,
        second_fold: usize,
    },
    /// An input map or slice was empty.
    #[error("Empty input: {0}")]
    EmptyInput(String),
    /// Unable to write results to file.
    #[error("Unable to write to file: {0}")]
    UnableToWrite(String),
    /// Unable to read data from file.
    #[error("Unable to read from file: {0}")]
    UnableToRead(String),
    /// A requested column does not exist.
    #[error("Column {0} not found.")]
    MissingColumn(String),
    /// Two parallel inputs have different lengths.
    #[error("Length mismatch for {0}: {1} != {2}.")]
    LengthMismatch(String, usize, usize),
    /// A value that cannot be binned or transformed.
    #[error("Invalid value {0} found in {1}.")]
    InvalidValue(f64, String),
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Invalid value parsing.
    #[error("Invalid value {0} passed for {1}, expected one of {2}.")]
    ParseString(String, String, String),
    /// A test sample has no bin after merging folds.
    #[error("Sample {0} was not assigned to any bin.")]
    UnassignedSample(String),
    /// A failure attached to the unit that produced it.
    #[error("[{key}] {source}")]
    Unit {
        key: UnitKey,
        #[source]
        source: Box<UncertaintyError>,
    },
}

impl UncertaintyError {
    /// Attach a unit key, keeping an existing key if one is already attached.
    pub fn in_unit(self, key: UnitKey) -> Self {
        match self {
            e @ UncertaintyError::Unit { .. } => e,
            e => UncertaintyError::Unit {
                key,
                source: Box::new(e),
            },
        }
    }

    /// The unit key, if one is attached.
    pub fn unit_key(&self) -> Option<&UnitKey> {
        match self {
            UncertaintyError::Unit { key, .. } => Some(key),
            _ => None,
        }
    }
}
