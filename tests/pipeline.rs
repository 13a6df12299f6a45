use landmark_uncertainty::metrics::evaluation::Grouping;
use landmark_uncertainty::report::bin_labels;
use landmark_uncertainty::{
    load_saved_results, run_evaluation, run_fit, BinMetric, CsvPairSource, EvaluationReport, JsonIO, PipelineConfig,
    Split,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const MODEL: &str = "U-Net";
const NUM_FOLDS: usize = 3;
const PER_FOLD: usize = 10;

/// Errors rise with the E-CPV uncertainty and fall with the S-MHA confidence.
fn write_pairs(config: &PipelineConfig, landmark: usize, split: Split) {
    let prefix = match split {
        Split::Validation => "v",
        Split::Testing => "t",
    };
    let mut lines = vec![format!(
        "uid,{},S-MHA Error,S-MHA Uncertainty,E-CPV Error,E-CPV Uncertainty",
        split.fold_column()
    )];
    for fold in 0..NUM_FOLDS {
        for i in 0..PER_FOLD {
            let error = i as f64 + 0.5 * fold as f64 + landmark as f64;
            lines.push(format!(
                "{}{}_{},{},{},{},{},{}",
                prefix,
                fold,
                i,
                fold,
                error,
                1.0 / (error + 1.0),
                error,
                error * 2.0
            ));
        }
    }
    let path = config.pairs_path(MODEL, landmark, split);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, lines.join("\n")).unwrap();
}

fn setup(root: &Path) -> PipelineConfig {
    let json = format!(
        r#"{{
            "dataset": {{
                "root": {:?},
                "models": ["{}"],
                "landmarks": [0, 1],
                "num_folds": {},
                "uncertainty_error_pairs": [
                    ["S-MHA", "S-MHA Error", "S-MHA Uncertainty"],
                    ["E-CPV", "E-CPV Error", "E-CPV Uncertainty"]
                ]
            }},
            "pipeline": {{"num_threads": 2}},
            "output": {{"save_folder": {:?}}}
        }}"#,
        root.join("data").display().to_string(),
        MODEL,
        NUM_FOLDS,
        root.join("outputs").display().to_string()
    );
    let cfg_path = root.join("config.json");
    fs::write(&cfg_path, json).unwrap();
    let config = PipelineConfig::load_json(&cfg_path).unwrap();
    for landmark in [0, 1] {
        write_pairs(&config, landmark, Split::Validation);
        write_pairs(&config, landmark, Split::Testing);
    }
    config
}

#[test]
fn test_fit_save_and_evaluate_csv() {
    let dir = tempdir().unwrap();
    let config = setup(dir.path());
    assert_eq!(config.num_bins(), 5);
    assert!(config.inversion_lookup()["S-MHA"]);

    let source = CsvPairSource::new(&config);
    let outcome = run_fit(&source, &config).unwrap();
    assert!(outcome.summary.is_complete());
    assert_eq!(outcome.summary.units_total, 4);
    assert_eq!(outcome.results.len(), 2);

    let out_dir = dir.path().join("outputs").join("Uncertainty_Preds").join(MODEL).join("4CH");
    assert!(out_dir.join("res_predicted_bins_l0.csv").exists());
    assert!(out_dir.join("estimated_error_bounds_l1.csv").exists());

    let report = run_evaluation(&outcome.results, &config).unwrap();
    assert_eq!(report.pooled.len(), 2);
    for table in &report.pooled {
        let pooled = table.pooled().unwrap();
        // Both measures rank the errors exactly, so bins match the truth.
        assert_eq!(pooled.jaccard, vec![Some(1.0); 5], "{}", table.measure);
        assert_eq!(pooled.population, vec![12; 5]);
        // Bounds are the maximum validation error of each bin, and test
        // errors equal validation errors.
        assert_eq!(pooled.bound_accuracy, vec![Some(1.0); 5]);
        let means: Vec<f64> = pooled.mean_error.iter().map(|m| m.unwrap()).collect();
        assert!(means.windows(2).all(|w| w[0] < w[1]));
    }

    let by_landmark_fold = report.table(Grouping::LandmarkFold, MODEL, "E-CPV Uncertainty").unwrap();
    assert_eq!(by_landmark_fold.groups.len(), 2 * NUM_FOLDS);
    assert_eq!(by_landmark_fold.series(BinMetric::Recall, 0), vec![1.0; 2 * NUM_FOLDS]);
}

#[test]
fn test_evaluate_saved_results() {
    let dir = tempdir().unwrap();
    let config = setup(dir.path());
    let outcome = run_fit(&CsvPairSource::new(&config), &config).unwrap();

    let loaded = load_saved_results(&config).unwrap();
    assert!(loaded.summary.is_complete());
    assert_eq!(loaded.results, outcome.results);

    let report = run_evaluation(&loaded.results, &config).unwrap();
    assert!(report.failures.is_empty());
    let report_path = dir.path().join("report.json");
    report.save_json(&report_path).unwrap();
    let reloaded = EvaluationReport::load_json(&report_path).unwrap();
    assert_eq!(reloaded, report);
    assert_eq!(bin_labels(reloaded.num_bins)[0], "B5");
}

#[test]
fn test_missing_landmark_is_reported() {
    let dir = tempdir().unwrap();
    let mut config = setup(dir.path());
    config.dataset.landmarks = vec![0, 1, 2];
    let outcome = run_fit(&CsvPairSource::new(&config), &config).unwrap();
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.summary.failures.len(), 2);
    assert!(outcome
        .summary
        .failures
        .iter()
        .all(|e| e.unit_key().map(|k| k.landmark) == Some(2)));

    // Evaluation still covers the landmarks that were fitted.
    let loaded = load_saved_results(&config).unwrap();
    assert_eq!(loaded.results.len(), 2);
    assert!(loaded.summary.is_complete());
    let report = run_evaluation(&loaded.results, &config).unwrap();
    let by_landmark = report.table(Grouping::Landmark, MODEL, "S-MHA Uncertainty").unwrap();
    assert_eq!(by_landmark.groups.len(), 2);
}

#[test]
fn test_corrupt_saved_landmark_is_left_out() {
    let dir = tempdir().unwrap();
    let config = setup(dir.path());
    run_fit(&CsvPairSource::new(&config), &config).unwrap();
    let results_dir = config.results_dir(MODEL).unwrap();
    let bins_path = results_dir.join("res_predicted_bins_l1.csv");
    let text = fs::read_to_string(&bins_path).unwrap();
    fs::write(&bins_path, text.replacen(",0\n", ",7\n", 1)).unwrap();

    // Landmark 1 loads, but a bin index outside 0..5 fails its fold at evaluation.
    let loaded = load_saved_results(&config).unwrap();
    assert_eq!(loaded.results.len(), 2);
    let report = run_evaluation(&loaded.results, &config).unwrap();
    assert!(!report.failures.is_empty());
    assert!(report.failures.iter().all(|f| f.contains("landmark=1")));
    let pooled = report.table(Grouping::Landmark, MODEL, "E-CPV Uncertainty").unwrap();
    assert_eq!(pooled.group(Some(0), None).unwrap().bins.population, vec![6; 5]);
}
