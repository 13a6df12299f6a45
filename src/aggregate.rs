//! Fold Aggregation
//!
//! Fits quantile bins on each validation fold, predicts the matching test
//! fold, and merges the per fold assignments of every
//! (model, landmark, measure) unit.
use crate::binning::{bin_populations, fit_pairs, predict, BinAssignment};
use crate::config::PipelineConfig;
use crate::data::{FoldSelector, PairTable, Split, UncertaintyPairing};
use crate::errors::{UncertaintyError, UnitKey};
use crate::inversion::{apply_inversion, InversionLookup};
use crate::io::PairSource;
use crate::utils::fmt_vec_output;
use hashbrown::HashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Fit and test predictions of a single fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldFit {
    pub fold: usize,
    pub boundaries: Vec<f64>,
    pub bounds: Vec<f64>,
    pub assignment: BinAssignment,
}

/// All folds of one (model, landmark, measure) unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureFit {
    pub pairing: UncertaintyPairing,
    /// Fold indexed, `folds[f].fold == f`.
    pub folds: Vec<FoldFit>,
    /// Union of the per fold test assignments.
    pub assignment: BinAssignment,
}

/// Predicted bins and per fold error bounds of one measure, aligned with the
/// rows of the owning [`LandmarkResults`] table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureResults {
    pub pairing: UncertaintyPairing,
    pub bins: Vec<usize>,
    /// Error bounds of each fold, indexed by fold.
    pub fold_bounds: Vec<Vec<f64>>,
}

impl MeasureResults {
    pub fn bounds_for(&self, fold: usize) -> Option<&[f64]> {
        self.fold_bounds.get(fold).map(|b| b.as_slice())
    }
}

/// The predicted bins table and the error bounds table of one model and landmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkResults {
    pub model: String,
    pub landmark: usize,
    /// Test rows of all folds, with the error and uncertainty columns.
    pub table: PairTable,
    pub measures: Vec<MeasureResults>,
}

impl LandmarkResults {
    pub fn measure(&self, uncertainty_field: &str) -> Option<&MeasureResults> {
        self.measures
            .iter()
            .find(|m| m.pairing.uncertainty_field == uncertainty_field)
    }
}

/// Outcome of fitting every measure of one model and landmark.
#[derive(Debug)]
pub struct LandmarkFit {
    pub results: LandmarkResults,
    /// Measures that failed, each tagged with its unit key.
    pub failures: Vec<UncertaintyError>,
}

#[allow(clippy::too_many_arguments)]
fn load_split(
    source: &dyn PairSource,
    config: &PipelineConfig,
    lookup: &InversionLookup,
    model: &str,
    landmark: usize,
    pairing: &UncertaintyPairing,
    split: Split,
    fold: usize,
) -> Result<PairTable, UncertaintyError> {
    let columns = [pairing.error_field.as_str(), pairing.uncertainty_field.as_str()];
    let table = source.load(model, landmark, split, FoldSelector::Fold(fold), &columns)?;
    apply_inversion(
        table,
        &pairing.uncertainty_field,
        &pairing.category,
        lookup,
        config.pipeline.inversion,
    )
}

fn fit_fold(
    source: &dyn PairSource,
    config: &PipelineConfig,
    lookup: &InversionLookup,
    model: &str,
    landmark: usize,
    pairing: &UncertaintyPairing,
    fold: usize,
) -> Result<FoldFit, UncertaintyError> {
    let validation = load_split(source, config, lookup, model, landmark, pairing, Split::Validation, fold)?;
    let testing = load_split(source, config, lookup, model, landmark, pairing, Split::Testing, fold)?;

    let quantile_fit = fit_pairs(
        &validation.pairs(&pairing.error_field, &pairing.uncertainty_field)?,
        config.num_bins(),
        config.pipeline.bound_statistic,
    )?;
    let assignment = predict(&testing.value_map(&pairing.uncertainty_field)?, &quantile_fit.boundaries)?;

    debug!(
        "Fold {}: boundaries [{}], bounds [{}].",
        fold,
        fmt_vec_output(&quantile_fit.boundaries),
        fmt_vec_output(&quantile_fit.bounds)
    );
    let populations = bin_populations(&assignment, config.num_bins());
    if populations.contains(&0) {
        debug!("Fold {} has empty test bins: {:?}.", fold, populations);
    }

    Ok(FoldFit {
        fold,
        boundaries: quantile_fit.boundaries,
        bounds: quantile_fit.bounds,
        assignment,
    })
}

/// Merge per fold assignments, failing if a sample was predicted in two folds.
pub fn merge_assignments(folds: &[FoldFit]) -> Result<BinAssignment, UncertaintyError> {
    let total = folds.iter().map(|f| f.assignment.len()).sum();
    let mut merged = BinAssignment::with_capacity(total);
    let mut owner: HashMap<&str, usize> = HashMap::with_capacity(total);
    for fold_fit in folds {
        for (id, bin) in &fold_fit.assignment {
            if let Some(first_fold) = owner.insert(id.as_str(), fold_fit.fold) {
                return Err(UncertaintyError::FoldOverlap {
                    sample_id: id.clone(),
                    first_fold,
                    second_fold: fold_fit.fold,
                });
            }
            merged.insert(id.clone(), *bin);
        }
    }
    Ok(merged)
}

/// Fit and predict every fold of one (model, landmark, measure) unit.
///
/// Errors carry the unit key, including the fold when a single fold failed.
pub fn fit_measure(
    source: &dyn PairSource,
    config: &PipelineConfig,
    model: &str,
    landmark: usize,
    pairing: &UncertaintyPairing,
) -> Result<MeasureFit, UncertaintyError> {
    let lookup = config.inversion_lookup();
    let key = UnitKey::new(model, landmark).with_measure(&pairing.uncertainty_field);

    let folds = (0..config.dataset.num_folds)
        .map(|fold| {
            fit_fold(source, config, &lookup, model, landmark, pairing, fold)
                .map_err(|e| e.in_unit(key.clone().with_fold(fold)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let assignment = merge_assignments(&folds).map_err(|e| e.in_unit(key))?;

    Ok(MeasureFit {
        pairing: pairing.clone(),
        folds,
        assignment,
    })
}

/// Test rows of all folds with this measure's columns, and the bins of each row.
fn measure_results(
    source: &dyn PairSource,
    model: &str,
    landmark: usize,
    measure_fit: &MeasureFit,
) -> Result<(PairTable, MeasureResults), UncertaintyError> {
    let pairing = &measure_fit.pairing;
    let columns = [pairing.error_field.as_str(), pairing.uncertainty_field.as_str()];
    let table = source.load(model, landmark, Split::Testing, FoldSelector::All, &columns)?;
    let bins = table
        .uids
        .iter()
        .map(|id| {
            measure_fit
                .assignment
                .get(id)
                .copied()
                .ok_or_else(|| UncertaintyError::UnassignedSample(id.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let results = MeasureResults {
        pairing: pairing.clone(),
        bins,
        fold_bounds: measure_fit.folds.iter().map(|f| f.bounds.clone()).collect(),
    };
    Ok((table, results))
}

fn merge_columns(base: &mut Option<PairTable>, table: PairTable) -> Result<(), UncertaintyError> {
    match base {
        None => *base = Some(table),
        Some(base) => {
            if base.uids != table.uids || base.folds != table.folds {
                return Err(UncertaintyError::Configuration(
                    "test rows differ between uncertainty measures".to_string(),
                ));
            }
            let names: Vec<String> = table.column_names().map(String::from).collect();
            for name in names {
                base.set_column(&name, table.column(&name)?.to_vec())?;
            }
        }
    }
    Ok(())
}

/// Fit every configured measure of one model and landmark.
///
/// A failing measure is recorded in [`LandmarkFit::failures`] and the others
/// still run, unless `fail_fast` is set.
pub fn fit_landmark(
    source: &dyn PairSource,
    config: &PipelineConfig,
    model: &str,
    landmark: usize,
) -> Result<LandmarkFit, UncertaintyError> {
    info!("Fitting uncertainty bins for model {} landmark {}.", model, landmark);
    let mut table: Option<PairTable> = None;
    let mut measures = Vec::new();
    let mut failures = Vec::new();

    for pairing in &config.dataset.uncertainty_error_pairs {
        let key = UnitKey::new(model, landmark).with_measure(&pairing.uncertainty_field);
        let outcome = fit_measure(source, config, model, landmark, pairing).and_then(|measure_fit| {
            let (measure_table, results) =
                measure_results(source, model, landmark, &measure_fit).map_err(|e| e.in_unit(key.clone()))?;
            merge_columns(&mut table, measure_table).map_err(|e| e.in_unit(key.clone()))?;
            Ok(results)
        });
        match outcome {
            Ok(results) => measures.push(results),
            Err(e) if config.pipeline.fail_fast => return Err(e),
            Err(e) => {
                warn!("Skipping failed unit: {}", e);
                failures.push(e);
            }
        }
    }

    Ok(LandmarkFit {
        results: LandmarkResults {
            model: model.to_string(),
            landmark,
            table: table.unwrap_or_default(),
            measures,
        },
        failures,
    })
}
