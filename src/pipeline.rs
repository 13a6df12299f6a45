//! Pipeline
//!
//! Runs the fit phase over every (model, landmark) combination, persists
//! the results, and evaluates them.
use crate::aggregate::{fit_landmark, LandmarkFit, LandmarkResults};
use crate::config::PipelineConfig;
use crate::errors::{UncertaintyError, UnitKey};
use crate::io::{load_landmark_results, predicted_bins_path, save_landmark_results, saved_pairings, PairSource};
use crate::metrics::evaluation::{evaluate_with, EvaluationReport};
use crate::report::format_summary;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;

/// Counts of (model, landmark, measure) units of a run and the failures.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub units_total: usize,
    pub units_succeeded: usize,
    pub failures: Vec<UncertaintyError>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn log(&self) {
        if self.is_complete() {
            info!("All {} units succeeded.", self.units_total);
            return;
        }
        warn!(
            "{} of {} units succeeded, {} failed:",
            self.units_succeeded,
            self.units_total,
            self.failures.len()
        );
        for failure in &self.failures {
            warn!("  {}", failure);
        }
    }
}

/// Landmark results of a fit or load, with the summary of its units.
#[derive(Debug)]
pub struct FitOutcome {
    pub results: Vec<LandmarkResults>,
    pub summary: RunSummary,
}

fn build_pool(config: &PipelineConfig) -> Result<rayon::ThreadPool, UncertaintyError> {
    let num_threads = match config.pipeline.num_threads {
        Some(num_threads) => num_threads,
        None => std::thread::available_parallelism().map_or(1, |n| n.get()),
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| UncertaintyError::Configuration(format!("unable to build thread pool: {}", e)))
}

fn fit_and_save(
    source: &dyn PairSource,
    config: &PipelineConfig,
    model: &str,
    landmark: usize,
) -> Result<LandmarkFit, UncertaintyError> {
    let fit = fit_landmark(source, config, model, landmark)?;
    if fit.results.measures.is_empty() {
        warn!("No measure of model {} landmark {} could be fitted.", model, landmark);
        return Ok(fit);
    }
    if let Some(dir) = config.results_dir(model) {
        save_landmark_results(&dir, &fit.results).map_err(|e| e.in_unit(UnitKey::new(model, landmark)))?;
        debug!("Saved results of model {} landmark {} to {}.", model, landmark, dir.display());
    }
    Ok(fit)
}

/// Fit, predict and save every configured (model, landmark) combination.
///
/// Combinations run in parallel. Failed units are collected in the summary,
/// unless `pipeline.fail_fast` is set, in which case the first failure is returned.
pub fn run_fit(source: &dyn PairSource, config: &PipelineConfig) -> Result<FitOutcome, UncertaintyError> {
    config.validate()?;
    let start = Instant::now();
    let pool = build_pool(config)?;

    let combinations: Vec<(&str, usize)> = config
        .dataset
        .models
        .iter()
        .flat_map(|m| config.dataset.landmarks.iter().map(move |l| (m.as_str(), *l)))
        .collect();
    info!(
        "Fitting {} model/landmark combinations with {} bins on {} threads.",
        combinations.len(),
        config.num_bins(),
        pool.current_num_threads()
    );

    let outcomes: Vec<Result<LandmarkFit, UncertaintyError>> = pool.install(|| {
        combinations
            .par_iter()
            .map(|(model, landmark)| fit_and_save(source, config, model, *landmark))
            .collect()
    });

    let mut summary = RunSummary {
        units_total: combinations.len() * config.dataset.uncertainty_error_pairs.len(),
        ..Default::default()
    };
    let mut results = Vec::with_capacity(outcomes.len());
    for ((model, landmark), outcome) in combinations.iter().zip(outcomes) {
        match outcome {
            Ok(fit) => {
                summary.units_succeeded += fit.results.measures.len();
                summary.failures.extend(fit.failures);
                if !fit.results.measures.is_empty() {
                    results.push(fit.results);
                }
            }
            Err(e) if config.pipeline.fail_fast => return Err(e),
            Err(e) => {
                warn!("Model {} landmark {} failed: {}", model, landmark, e);
                summary.failures.push(e);
            }
        }
    }
    info!("Fit phase finished in {:.2?}.", start.elapsed());
    Ok(FitOutcome { results, summary })
}

/// Evaluate `results` with the configured pairings and bin count.
///
/// Units that cannot be evaluated are listed in the report's failures,
/// unless `pipeline.fail_fast` is set.
pub fn run_evaluation(
    results: &[LandmarkResults],
    config: &PipelineConfig,
) -> Result<EvaluationReport, UncertaintyError> {
    let report = evaluate_with(
        results,
        &config.dataset.uncertainty_error_pairs,
        config.num_bins(),
        config.pipeline.fail_fast,
    )?;
    if !report.failures.is_empty() {
        warn!("{} units were left out of the evaluation.", report.failures.len());
    }
    debug!("Pooled metrics:\n{}", format_summary(&report));
    Ok(report)
}

fn load_landmark(
    dir: &Path,
    config: &PipelineConfig,
    model: &str,
    landmark: usize,
) -> Result<LandmarkResults, UncertaintyError> {
    let pairings = saved_pairings(dir, landmark, &config.dataset.uncertainty_error_pairs)?;
    load_landmark_results(dir, model, landmark, &pairings)
}

/// Read back the results saved by [`run_fit`].
///
/// Combinations without saved results are skipped with a warning. Results
/// that cannot be read are collected in the summary. With `pipeline.fail_fast`
/// both return the first error instead.
pub fn load_saved_results(config: &PipelineConfig) -> Result<FitOutcome, UncertaintyError> {
    config.validate()?;
    let mut summary = RunSummary {
        units_total: config.dataset.models.len()
            * config.dataset.landmarks.len()
            * config.dataset.uncertainty_error_pairs.len(),
        ..Default::default()
    };
    let mut results = Vec::new();
    for model in &config.dataset.models {
        let dir = config
            .results_dir(model)
            .ok_or_else(|| UncertaintyError::Configuration("output.save_folder is not set".to_string()))?;
        for &landmark in &config.dataset.landmarks {
            let key = UnitKey::new(model, landmark);
            if !predicted_bins_path(&dir, landmark).exists() && !config.pipeline.fail_fast {
                warn!("No saved results for {}, skipping.", key);
                continue;
            }
            match load_landmark(&dir, config, model, landmark).map_err(|e| e.in_unit(key)) {
                Ok(loaded) => {
                    summary.units_succeeded += loaded.measures.len();
                    results.push(loaded);
                }
                Err(e) if config.pipeline.fail_fast => return Err(e),
                Err(e) => {
                    warn!("Unable to load saved results: {}", e);
                    summary.failures.push(e);
                }
            }
        }
    }
    info!("Loaded {} saved landmark results.", results.len());
    Ok(FitOutcome { results, summary })
}
