//! Pipeline Configuration
//!
//! Dataset layout, binning parameters and output location for a run. The
//! configuration is loaded once, validated, and then only passed by reference.
use crate::data::{Split, UncertaintyPairing};
use crate::errors::UncertaintyError;
use crate::inversion::{InversionLookup, InversionMethod};
use crate::isotonic::BoundStatistic;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the (uncertainty, error) tables live and what they contain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    /// Root folder of the extracted dataset.
    pub root: PathBuf,
    /// Folder name of the dataset archive inside `root`.
    pub base_dir: String,
    /// Where the archive can be downloaded from. Informational only.
    pub source: String,
    pub file_format: String,
    /// Dataset / view name, e.g. `4CH`.
    pub data: String,
    /// File stem of the validation pairs, `_l{landmark}.csv` is appended.
    pub ue_pairs_val: String,
    /// File stem of the test pairs, `_l{landmark}.csv` is appended.
    pub ue_pairs_test: String,
    pub models: Vec<String>,
    pub landmarks: Vec<usize>,
    pub num_folds: usize,
    pub uncertainty_error_pairs: Vec<UncertaintyPairing>,
    /// Whether each uncertainty category is a confidence that must be inverted.
    pub confidence_invert: Vec<(String, bool)>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            root: PathBuf::from("../../../data/landmarks/"),
            base_dir: "Uncertainty_tuples".to_string(),
            source: "https://github.com/pykale/data/raw/main/tabular/cardiac_landmark_uncertainty/Uncertainty_tuples.zip"
                .to_string(),
            file_format: "zip".to_string(),
            data: "4CH".to_string(),
            ue_pairs_val: "uncertainty_pairs_valid".to_string(),
            ue_pairs_test: "uncertainty_pairs_test".to_string(),
            models: vec!["PHD-Net".to_string(), "U-Net".to_string()],
            landmarks: vec![0, 1, 2],
            num_folds: 8,
            uncertainty_error_pairs: vec![
                UncertaintyPairing::new("S-MHA", "S-MHA Error", "S-MHA Uncertainty"),
                UncertaintyPairing::new("E-MHA", "E-MHA Error", "E-MHA Uncertainty"),
                UncertaintyPairing::new("E-CPV", "E-CPV Error", "E-CPV Uncertainty"),
            ],
            confidence_invert: vec![
                ("S-MHA".to_string(), true),
                ("E-MHA".to_string(), true),
                ("E-CPV".to_string(), false),
            ],
        }
    }
}

/// Parameters of the binning pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub num_quantile_bins: usize,
    /// Statistic used for the per bin error bound.
    pub bound_statistic: BoundStatistic,
    /// Transform applied to categories flagged in `confidence_invert`.
    pub inversion: InversionMethod,
    /// Number of threads for the (model, landmark) loop. All cores when unset.
    pub num_threads: Option<usize>,
    /// Abort the whole run on the first failing unit.
    pub fail_fast: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            num_quantile_bins: 5,
            bound_statistic: BoundStatistic::Max,
            inversion: InversionMethod::Reciprocal,
            num_threads: None,
            fail_fast: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Folder results are saved under. Nothing is written when unset.
    pub save_folder: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            save_folder: Some(PathBuf::from("./outputs/")),
        }
    }
}

/// Configuration of a full run.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub pipeline: PipelineSettings,
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn num_bins(&self) -> usize {
        self.pipeline.num_quantile_bins
    }

    pub fn inversion_lookup(&self) -> InversionLookup {
        self.dataset.confidence_invert.iter().cloned().collect()
    }

    /// Path of the (uncertainty, error) table of one model and landmark.
    pub fn pairs_path(&self, model: &str, landmark: usize, split: Split) -> PathBuf {
        let stem = match split {
            Split::Validation => &self.dataset.ue_pairs_val,
            Split::Testing => &self.dataset.ue_pairs_test,
        };
        self.dataset
            .root
            .join(&self.dataset.base_dir)
            .join(model)
            .join(&self.dataset.data)
            .join(format!("{}_l{}.csv", stem, landmark))
    }

    /// Folder the predicted bins and error bounds of `model` are saved to.
    pub fn results_dir(&self, model: &str) -> Option<PathBuf> {
        self.output
            .save_folder
            .as_ref()
            .map(|root| root.join("Uncertainty_Preds").join(model).join(&self.dataset.data))
    }

    /// Check the configuration before any work is started.
    pub fn validate(&self) -> Result<(), UncertaintyError> {
        let invalid = |name: &str, expected: &str, got: String| {
            Err(UncertaintyError::InvalidParameter(name.to_string(), expected.to_string(), got))
        };
        if self.pipeline.num_quantile_bins == 0 {
            return invalid("pipeline.num_quantile_bins", "at least 1", "0".to_string());
        }
        if self.dataset.num_folds == 0 {
            return invalid("dataset.num_folds", "at least 1", "0".to_string());
        }
        if let Some(0) = self.pipeline.num_threads {
            return invalid("pipeline.num_threads", "at least 1", "0".to_string());
        }
        if self.dataset.models.is_empty() {
            return Err(UncertaintyError::Configuration("no models to compare".to_string()));
        }
        if self.dataset.landmarks.is_empty() {
            return Err(UncertaintyError::Configuration("no landmarks to evaluate".to_string()));
        }
        if self.dataset.uncertainty_error_pairs.is_empty() {
            return Err(UncertaintyError::Configuration(
                "no uncertainty error pairs to evaluate".to_string(),
            ));
        }
        let lookup = self.inversion_lookup();
        for pairing in &self.dataset.uncertainty_error_pairs {
            if !lookup.contains_key(&pairing.category) {
                return Err(UncertaintyError::Configuration(format!(
                    "uncertainty category {} has no entry in confidence_invert",
                    pairing.category
                )));
            }
        }
        if let InversionMethod::Reflect { max } = self.pipeline.inversion {
            if !max.is_finite() {
                return invalid("pipeline.inversion.max", "a finite value", max.to_string());
            }
        }
        self.pipeline.bound_statistic.validate()
    }
}

/// JSON load and save.
pub trait JsonIO: Serialize + DeserializeOwned + Sized {
    /// Save as a json object to a file.
    ///
    /// * `path` - Path to save to.
    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), UncertaintyError> {
        fs::write(path, self.json_dump()?).map_err(|e| UncertaintyError::UnableToWrite(e.to_string()))
    }

    /// Dump as a json string.
    fn json_dump(&self) -> Result<String, UncertaintyError> {
        serde_json::to_string_pretty(self).map_err(|e| UncertaintyError::UnableToWrite(e.to_string()))
    }

    /// Load from a json string.
    ///
    /// * `json_str` - String object, which can be deserialized from json.
    fn from_json(json_str: &str) -> Result<Self, UncertaintyError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| UncertaintyError::UnableToRead(e.to_string()))
    }

    /// Load from a path to a json file.
    ///
    /// * `path` - Path to load from.
    fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, UncertaintyError> {
        let json_str = fs::read_to_string(path).map_err(|e| UncertaintyError::UnableToRead(e.to_string()))?;
        Self::from_json(&json_str)
    }
}

impl JsonIO for PipelineConfig {}
