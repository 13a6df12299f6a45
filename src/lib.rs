mod isotonic;

// Modules
pub mod aggregate;
pub mod binning;
pub mod config;
pub mod data;
pub mod errors;
pub mod inversion;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod utils;

// Individual classes, and functions
pub use aggregate::{fit_landmark, fit_measure, merge_assignments, LandmarkResults};
pub use binning::{fit, fit_pairs, predict, BinAssignment, QuantileFit};
pub use config::{JsonIO, PipelineConfig};
pub use data::{FoldSelector, PairTable, SamplePair, Split, UncertaintyPairing};
pub use errors::{UncertaintyError, UnitKey};
pub use inversion::{apply_inversion, InversionMethod};
pub use io::{CsvPairSource, InMemoryPairSource, PairSource};
pub use isotonic::BoundStatistic;
pub use metrics::evaluation::{compute_metrics, evaluate, evaluate_with, EvaluationReport, Grouping, MetricTable};
pub use metrics::BinMetric;
pub use pipeline::{load_saved_results, run_evaluation, run_fit, FitOutcome, RunSummary};
