//! Bin evaluation
//!
//! Compares predicted bins with the ground truth error bins of each
//! (model, measure, landmark, fold) unit and summarises them per grouping.
use crate::aggregate::LandmarkResults;
use crate::binning::quantile_ranks;
use crate::data::UncertaintyPairing;
use crate::errors::{UncertaintyError, UnitKey};
use crate::metrics::{BinMetric, BinTally};
use crate::utils::validate_finite;
use hashbrown::HashMap;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How evaluation units are grouped before the metrics are taken.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grouping {
    /// All landmarks and folds together.
    Pooled,
    Landmark,
    Fold,
    LandmarkFold,
}

impl Grouping {
    pub const ALL: [Grouping; 4] = [
        Grouping::Pooled,
        Grouping::Landmark,
        Grouping::Fold,
        Grouping::LandmarkFold,
    ];

    pub fn key(&self, landmark: usize, fold: usize) -> GroupKey {
        match self {
            Grouping::Pooled => GroupKey {
                landmark: None,
                fold: None,
            },
            Grouping::Landmark => GroupKey {
                landmark: Some(landmark),
                fold: None,
            },
            Grouping::Fold => GroupKey {
                landmark: None,
                fold: Some(fold),
            },
            Grouping::LandmarkFold => GroupKey {
                landmark: Some(landmark),
                fold: Some(fold),
            },
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub landmark: Option<usize>,
    pub fold: Option<usize>,
}

/// Tallies of a single (model, measure, landmark, fold) unit.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationUnit {
    pub model: String,
    /// Uncertainty field of the measure.
    pub measure: String,
    pub landmark: usize,
    pub fold: usize,
    pub tallies: Vec<BinTally>,
}

/// Metrics of every bin of one group, indexed by bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinMetrics {
    pub population: Vec<usize>,
    pub mean_error: Vec<Option<f64>>,
    pub bound_accuracy: Vec<Option<f64>>,
    pub jaccard: Vec<Option<f64>>,
    pub recall: Vec<Option<f64>>,
    pub precision: Vec<Option<f64>>,
    /// Errors of the samples predicted into each bin.
    pub errors: Vec<Vec<f64>>,
}

impl BinMetrics {
    pub fn from_tallies(tallies: &[BinTally]) -> Self {
        let per_bin = |metric: BinMetric| -> Vec<Option<f64>> { tallies.iter().map(|t| t.value(metric)).collect() };
        BinMetrics {
            population: tallies.iter().map(|t| t.predicted()).collect(),
            mean_error: per_bin(BinMetric::MeanError),
            bound_accuracy: per_bin(BinMetric::BoundAccuracy),
            jaccard: per_bin(BinMetric::Jaccard),
            recall: per_bin(BinMetric::Recall),
            precision: per_bin(BinMetric::Precision),
            errors: tallies.iter().map(|t| t.errors.clone()).collect(),
        }
    }

    pub fn num_bins(&self) -> usize {
        self.population.len()
    }

    pub fn values(&self, metric: BinMetric) -> &[Option<f64>] {
        match metric {
            BinMetric::MeanError => &self.mean_error,
            BinMetric::BoundAccuracy => &self.bound_accuracy,
            BinMetric::Jaccard => &self.jaccard,
            BinMetric::Recall => &self.recall,
            BinMetric::Precision => &self.precision,
        }
    }

    pub fn value(&self, metric: BinMetric, bin: usize) -> Option<f64> {
        self.values(metric).get(bin).copied().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub key: GroupKey,
    pub bins: BinMetrics,
}

/// Metrics of one model and measure under one grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTable {
    pub model: String,
    pub measure: String,
    pub grouping: Grouping,
    /// Ordered by landmark, then fold.
    pub groups: Vec<GroupMetrics>,
}

impl MetricTable {
    /// Values of `metric` in `bin` across all groups, skipping groups where
    /// the bin is empty.
    pub fn series(&self, metric: BinMetric, bin: usize) -> Vec<f64> {
        self.groups.iter().filter_map(|g| g.bins.value(metric, bin)).collect()
    }

    pub fn group(&self, landmark: Option<usize>, fold: Option<usize>) -> Option<&GroupMetrics> {
        let key = GroupKey { landmark, fold };
        self.groups.iter().find(|g| g.key == key)
    }

    /// The single group of a pooled table.
    pub fn pooled(&self) -> Option<&BinMetrics> {
        self.group(None, None).map(|g| &g.bins)
    }
}

/// Tallies of every fold of one measure in `results`, one entry per fold.
///
/// A problem with the measure as a whole gives a single failed entry.
fn measure_units(
    results: &LandmarkResults,
    pairing: &UncertaintyPairing,
    num_bins: usize,
) -> Vec<Result<EvaluationUnit, UncertaintyError>> {
    let key = UnitKey::new(&results.model, results.landmark).with_measure(&pairing.uncertainty_field);
    let measure = match results.measure(&pairing.uncertainty_field) {
        Some(m) => m,
        None => {
            warn!("No predicted bins for {}, skipping.", key);
            return Vec::new();
        }
    };
    let errors = match results.table.column(&pairing.error_field) {
        Ok(errors) => errors,
        Err(e) => return vec![Err(e.in_unit(key))],
    };
    if measure.bins.len() != errors.len() {
        return vec![Err(UncertaintyError::LengthMismatch(
            measure.pairing.bins_column(),
            errors.len(),
            measure.bins.len(),
        )
        .in_unit(key))];
    }

    let mut rows_by_fold: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, fold) in results.table.folds.iter().enumerate() {
        rows_by_fold.entry(*fold).or_default().push(row);
    }

    rows_by_fold
        .into_iter()
        .map(|(fold, rows)| {
            let unit_key = key.clone().with_fold(fold);
            let bounds = measure.bounds_for(fold).ok_or_else(|| {
                UncertaintyError::Configuration(format!("no error bounds for fold {}", fold)).in_unit(unit_key.clone())
            })?;
            if bounds.len() != num_bins {
                return Err(
                    UncertaintyError::LengthMismatch(measure.pairing.bounds_column(), num_bins, bounds.len())
                        .in_unit(unit_key),
                );
            }
            let unit_errors: Vec<f64> = rows.iter().map(|&r| errors[r]).collect();
            validate_finite(&unit_errors, &pairing.error_field).map_err(|e| e.in_unit(unit_key.clone()))?;
            let truth = quantile_ranks(&unit_errors, num_bins);

            let mut tallies = vec![BinTally::default(); num_bins];
            for (k, &row) in rows.iter().enumerate() {
                let predicted = measure.bins[row];
                if predicted >= num_bins {
                    return Err(UncertaintyError::InvalidParameter(
                        measure.pairing.bins_column(),
                        format!("a bin below {}", num_bins),
                        predicted.to_string(),
                    )
                    .in_unit(unit_key));
                }
                let error = unit_errors[k];
                let tally = &mut tallies[predicted];
                tally.errors.push(error);
                if error <= bounds[predicted] {
                    tally.within_bound += 1;
                }
                tallies[truth[k]].truth += 1;
                if truth[k] == predicted {
                    tallies[predicted].intersection += 1;
                }
            }
            Ok(EvaluationUnit {
                model: results.model.clone(),
                measure: pairing.uncertainty_field.clone(),
                landmark: results.landmark,
                fold,
                tallies,
            })
        })
        .collect()
}

/// Tally every (model, measure, landmark, fold) unit of `results`.
///
/// Units that cannot be tallied are returned as failures next to the healthy
/// ones. With `fail_fast` the first failure is returned instead.
pub fn evaluation_units(
    results: &[LandmarkResults],
    pairings: &[UncertaintyPairing],
    num_bins: usize,
    fail_fast: bool,
) -> Result<(Vec<EvaluationUnit>, Vec<UncertaintyError>), UncertaintyError> {
    if num_bins == 0 {
        return Err(UncertaintyError::InvalidParameter(
            "num_bins".to_string(),
            "at least 1".to_string(),
            "0".to_string(),
        ));
    }
    let outcomes: Vec<Vec<Result<EvaluationUnit, UncertaintyError>>> = results
        .par_iter()
        .map(|r| pairings.iter().flat_map(|p| measure_units(r, p, num_bins)).collect::<Vec<_>>())
        .collect();

    let mut units = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes.into_iter().flatten() {
        match outcome {
            Ok(unit) => units.push(unit),
            Err(e) if fail_fast => return Err(e),
            Err(e) => {
                warn!("Leaving unit out of the evaluation: {}", e);
                failures.push(e);
            }
        }
    }
    Ok((units, failures))
}

/// Metrics per (model, measure) of `units` grouped by `grouping`.
///
/// Tallies of a group are summed before any ratio is taken, so pooled values
/// weight every sample equally. Tables keep the order in which models and
/// measures first appear in `units`.
pub fn compute_metrics(units: &[EvaluationUnit], grouping: Grouping) -> Vec<MetricTable> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut grouped: HashMap<(&str, &str), BTreeMap<GroupKey, Vec<BinTally>>> = HashMap::new();

    for unit in units {
        let table_key = (unit.model.as_str(), unit.measure.as_str());
        let groups = grouped.entry(table_key).or_insert_with(|| {
            order.push(table_key);
            BTreeMap::new()
        });
        let tallies = groups
            .entry(grouping.key(unit.landmark, unit.fold))
            .or_insert_with(|| vec![BinTally::default(); unit.tallies.len()]);
        for (total, tally) in tallies.iter_mut().zip(&unit.tallies) {
            total.merge(tally);
        }
    }

    order
        .into_iter()
        .filter_map(|table_key| {
            grouped.remove(&table_key).map(|groups| MetricTable {
                model: table_key.0.to_string(),
                measure: table_key.1.to_string(),
                grouping,
                groups: groups
                    .into_iter()
                    .map(|(key, tallies)| GroupMetrics {
                        key,
                        bins: BinMetrics::from_tallies(&tallies),
                    })
                    .collect(),
            })
        })
        .collect()
}

/// Pooled, per landmark, per fold and per landmark and fold metric tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub num_bins: usize,
    pub pooled: Vec<MetricTable>,
    pub by_landmark: Vec<MetricTable>,
    pub by_fold: Vec<MetricTable>,
    pub by_landmark_fold: Vec<MetricTable>,
    /// Units left out of the tables, each message carrying its unit key.
    #[serde(default)]
    pub failures: Vec<String>,
}

impl EvaluationReport {
    pub fn tables(&self, grouping: Grouping) -> &[MetricTable] {
        match grouping {
            Grouping::Pooled => &self.pooled,
            Grouping::Landmark => &self.by_landmark,
            Grouping::Fold => &self.by_fold,
            Grouping::LandmarkFold => &self.by_landmark_fold,
        }
    }

    pub fn table(&self, grouping: Grouping, model: &str, measure: &str) -> Option<&MetricTable> {
        self.tables(grouping)
            .iter()
            .find(|t| t.model == model && t.measure == measure)
    }
}

/// Evaluate predicted bins and error bounds of all `results`.
///
/// Units that fail are listed in [`EvaluationReport::failures`] and the
/// remaining units are still evaluated.
pub fn evaluate(
    results: &[LandmarkResults],
    pairings: &[UncertaintyPairing],
    num_bins: usize,
) -> Result<EvaluationReport, UncertaintyError> {
    evaluate_with(results, pairings, num_bins, false)
}

/// [`evaluate`], returning the first failing unit as an error when `fail_fast` is set.
pub fn evaluate_with(
    results: &[LandmarkResults],
    pairings: &[UncertaintyPairing],
    num_bins: usize,
    fail_fast: bool,
) -> Result<EvaluationReport, UncertaintyError> {
    let (units, failures) = evaluation_units(results, pairings, num_bins, fail_fast)?;
    info!(
        "Evaluating {} units of {} landmark results with {} bins.",
        units.len(),
        results.len(),
        num_bins
    );
    Ok(EvaluationReport {
        num_bins,
        pooled: compute_metrics(&units, Grouping::Pooled),
        by_landmark: compute_metrics(&units, Grouping::Landmark),
        by_fold: compute_metrics(&units, Grouping::Fold),
        by_landmark_fold: compute_metrics(&units, Grouping::LandmarkFold),
        failures: failures.iter().map(|e| e.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MeasureResults;
    use crate::data::PairTable;

    const ERR: &str = "S-MHA Error";
    const UNC: &str = "S-MHA Uncertainty";

    fn pairing() -> UncertaintyPairing {
        UncertaintyPairing::new("S-MHA", ERR, UNC)
    }

    /// One landmark, rows given as (fold, error, predicted bin).
    fn results(landmark: usize, rows: &[(usize, f64, usize)], fold_bounds: Vec<Vec<f64>>) -> LandmarkResults {
        let uids = (0..rows.len()).map(|i| format!("{}_{}", landmark, i)).collect();
        let folds = rows.iter().map(|r| r.0).collect();
        let table = PairTable::new(uids, folds)
            .unwrap()
            .with_column(ERR, rows.iter().map(|r| r.1).collect())
            .unwrap()
            .with_column(UNC, vec![0.0; rows.len()])
            .unwrap();
        LandmarkResults {
            model: "U-Net".to_string(),
            landmark,
            table,
            measures: vec![MeasureResults {
                pairing: pairing(),
                bins: rows.iter().map(|r| r.2).collect(),
                fold_bounds,
            }],
        }
    }

    #[test]
    fn test_perfect_bins() {
        let r = results(
            0,
            &[(0, 1.0, 0), (0, 2.0, 0), (0, 3.0, 1), (0, 4.0, 1)],
            vec![vec![2.0, 3.5]],
        );
        let report = evaluate(&[r], &[pairing()], 2).unwrap();
        let pooled = report.table(Grouping::Pooled, "U-Net", UNC).unwrap().pooled().unwrap().clone();
        assert_eq!(pooled.population, vec![2, 2]);
        assert_eq!(pooled.jaccard, vec![Some(1.0), Some(1.0)]);
        assert_eq!(pooled.recall, vec![Some(1.0), Some(1.0)]);
        assert_eq!(pooled.precision, vec![Some(1.0), Some(1.0)]);
        assert_eq!(pooled.mean_error, vec![Some(1.5), Some(3.5)]);
        // 4.0 exceeds the upper bound of 3.5.
        assert_eq!(pooled.bound_accuracy, vec![Some(1.0), Some(0.5)]);
        assert_eq!(pooled.errors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_reversed_bins_are_disjoint() {
        let r = results(
            0,
            &[(0, 1.0, 1), (0, 2.0, 1), (0, 3.0, 0), (0, 4.0, 0)],
            vec![vec![10.0, 10.0]],
        );
        let report = evaluate(&[r], &[pairing()], 2).unwrap();
        let pooled = report.pooled[0].pooled().unwrap();
        assert_eq!(pooled.jaccard, vec![Some(0.0), Some(0.0)]);
        assert_eq!(pooled.recall, vec![Some(0.0), Some(0.0)]);
        assert_eq!(pooled.bound_accuracy, vec![Some(1.0), Some(1.0)]);
    }

    #[test]
    fn test_empty_bin_reports_none() {
        let r = results(0, &[(0, 1.0, 0), (0, 2.0, 0), (0, 3.0, 2)], vec![vec![5.0, 5.0, 5.0]]);
        let report = evaluate(&[r], &[pairing()], 3).unwrap();
        let pooled = report.pooled[0].pooled().unwrap();
        assert_eq!(pooled.population, vec![2, 0, 1]);
        assert_eq!(pooled.mean_error[1], None);
        assert_eq!(pooled.bound_accuracy[1], None);
        assert_eq!(pooled.precision[1], None);
        // Truth bin 1 holds the sample with error 2.0, predicted into bin 0.
        assert_eq!(pooled.recall[1], Some(0.0));
        assert_eq!(pooled.jaccard[1], None);
        assert_eq!(report.pooled[0].series(BinMetric::MeanError, 1), Vec::<f64>::new());
        assert_eq!(report.pooled[0].series(BinMetric::Jaccard, 1), Vec::<f64>::new());
    }

    #[test]
    fn test_jaccard_has_no_data_for_empty_predicted_bins() {
        let r = results(
            0,
            &[(0, 1.0, 0), (0, 2.0, 0), (0, 3.0, 0), (0, 4.0, 0)],
            vec![vec![5.0, 5.0]],
        );
        let report = evaluate(&[r], &[pairing()], 2).unwrap();
        for table in report.pooled.iter().chain(&report.by_landmark_fold) {
            for group in &table.groups {
                let bins = &group.bins;
                for b in 0..bins.num_bins() {
                    if bins.population[b] == 0 {
                        assert_eq!(bins.jaccard[b], None);
                        assert_eq!(bins.mean_error[b], None);
                    }
                }
            }
        }
        let pooled = report.pooled[0].pooled().unwrap();
        assert_eq!(pooled.population, vec![4, 0]);
        assert_eq!(pooled.jaccard, vec![Some(0.5), None]);
    }

    #[test]
    fn test_small_unit_leaves_top_truth_bins_empty() {
        let r = results(0, &[(0, 1.0, 0), (0, 2.0, 1)], vec![vec![5.0, 5.0, 5.0]]);
        let report = evaluate(&[r], &[pairing()], 3).unwrap();
        let pooled = report.pooled[0].pooled().unwrap();
        assert_eq!(pooled.recall[2], None);
        assert_eq!(pooled.jaccard[2], None);
        assert_eq!(pooled.jaccard[0], Some(1.0));
    }

    #[test]
    fn test_recall_precision_identity() {
        let r = results(
            0,
            &[
                (0, 1.0, 0),
                (0, 5.0, 0),
                (0, 2.0, 1),
                (0, 3.0, 1),
                (0, 4.0, 1),
                (0, 6.0, 1),
            ],
            vec![vec![3.0, 6.0]],
        );
        let (units, failures) = evaluation_units(&[r], &[pairing()], 2, false).unwrap();
        assert!(failures.is_empty());
        let table = &compute_metrics(&units, Grouping::Pooled)[0];
        let bins = table.pooled().unwrap();
        for (b, tally) in units[0].tallies.iter().enumerate() {
            let recall = bins.recall[b].unwrap();
            let precision = bins.precision[b].unwrap();
            let jaccard = bins.jaccard[b].unwrap();
            assert!((recall * tally.truth as f64 - tally.intersection as f64).abs() < 1e-12);
            assert!((precision * bins.population[b] as f64 - tally.intersection as f64).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&jaccard));
        }
    }

    #[test]
    fn test_groupings() {
        // Two landmarks, two folds each. Folds use their own bounds.
        let rows = [(0, 1.0, 0), (0, 2.0, 1), (1, 3.0, 0), (1, 4.0, 1)];
        let bounds = vec![vec![1.0, 2.0], vec![2.0, 3.0]];
        let all = vec![results(0, &rows, bounds.clone()), results(1, &rows, bounds)];
        let report = evaluate(&all, &[pairing()], 2).unwrap();

        let pooled = report.table(Grouping::Pooled, "U-Net", UNC).unwrap();
        assert_eq!(pooled.groups.len(), 1);
        assert_eq!(pooled.pooled().unwrap().population, vec![4, 4]);
        assert_eq!(pooled.pooled().unwrap().bound_accuracy, vec![Some(0.5), Some(0.5)]);

        let by_landmark = report.table(Grouping::Landmark, "U-Net", UNC).unwrap();
        assert_eq!(by_landmark.groups.len(), 2);
        assert_eq!(by_landmark.groups[1].key, GroupKey { landmark: Some(1), fold: None });
        assert_eq!(by_landmark.series(BinMetric::Jaccard, 0), vec![1.0, 1.0]);

        let by_fold = report.table(Grouping::Fold, "U-Net", UNC).unwrap();
        let fold1 = &by_fold.group(None, Some(1)).unwrap().bins;
        assert_eq!(fold1.bound_accuracy, vec![Some(0.0), Some(0.0)]);
        let fold0 = &by_fold.group(None, Some(0)).unwrap().bins;
        assert_eq!(fold0.bound_accuracy, vec![Some(1.0), Some(1.0)]);

        assert_eq!(report.tables(Grouping::LandmarkFold)[0].groups.len(), 4);
    }

    #[test]
    fn test_failing_unit_leaves_others_evaluated() {
        let good = results(0, &[(0, 1.0, 0), (0, 2.0, 1)], vec![vec![1.0, 2.0]]);
        // Fold 1 has a test row but no bounds.
        let broken = results(1, &[(0, 1.0, 0), (1, 2.0, 1)], vec![vec![1.0, 2.0]]);
        let all = [good, broken];

        let report = evaluate(&all, &[pairing()], 2).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("landmark=1"));
        assert!(report.failures[0].contains("fold=1"));
        let by_landmark = report.table(Grouping::Landmark, "U-Net", UNC).unwrap();
        assert_eq!(by_landmark.group(Some(0), None).unwrap().bins.population, vec![1, 1]);
        assert_eq!(by_landmark.group(Some(1), None).unwrap().bins.population, vec![1, 0]);
        assert_eq!(report.pooled[0].pooled().unwrap().population, vec![2, 1]);

        let err = evaluate_with(&all, &[pairing()], 2, true).unwrap_err();
        let key = err.unit_key().unwrap();
        assert_eq!((key.landmark, key.fold), (1, Some(1)));
    }

    #[test]
    fn test_measure_level_failure() {
        let mut r = results(0, &[(0, 1.0, 0), (0, 2.0, 1)], vec![vec![1.0, 2.0]]);
        r.measures[0].bins.pop();
        let (units, failures) = evaluation_units(&[r], &[pairing()], 2, false).unwrap();
        assert!(units.is_empty());
        assert!(matches!(
            failures[0],
            UncertaintyError::Unit { ref source, .. } if matches!(**source, UncertaintyError::LengthMismatch(_, 2, 1))
        ));
    }

    #[test]
    fn test_unfitted_measure_is_skipped() {
        let r = results(0, &[(0, 1.0, 0)], vec![vec![1.0]]);
        let other = UncertaintyPairing::new("E-CPV", "E-CPV Error", "E-CPV Uncertainty");
        let (units, failures) = evaluation_units(&[r], &[other], 1, false).unwrap();
        assert!(units.is_empty());
        assert!(failures.is_empty());
    }
}
