//! landmark-uncertainty: fit quantile uncertainty bins for every configured
//! model and landmark, then evaluate them.
//!
//! Usage:
//!   landmark-uncertainty --cfg config.json
//!   landmark-uncertainty --cfg config.json --phase evaluate --report report.json
//!   landmark-uncertainty --cfg config.json --metric Jaccard --metric MeanError
//!
//! Log verbosity follows `RUST_LOG`, default `info`.
use clap::{Parser, ValueEnum};
use landmark_uncertainty::metrics::evaluation::Grouping;
use landmark_uncertainty::report::format_tables;
use landmark_uncertainty::{
    load_saved_results, run_evaluation, run_fit, BinMetric, BoundStatistic, CsvPairSource, JsonIO, PipelineConfig,
    UncertaintyError,
};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Phase {
    /// Fit bins and bounds and save them.
    Fit,
    /// Evaluate previously saved results.
    Evaluate,
    /// Fit, then evaluate the fitted results.
    All,
}

#[derive(Parser)]
#[command(name = "landmark-uncertainty")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file. Fields left out keep their defaults.
    #[arg(long)]
    cfg: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Phase::All)]
    phase: Phase,

    /// Where to write the evaluation report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log the pooled table of this metric, e.g. `Jaccard`. Repeatable.
    #[arg(long = "metric")]
    metrics: Vec<BinMetric>,

    /// Overrides `pipeline.bound_statistic`: `Max`, `Mean` or `Quantile@q`.
    #[arg(long)]
    bound_statistic: Option<BoundStatistic>,
}

fn run(cli: Cli) -> Result<bool, UncertaintyError> {
    let mut config = match &cli.cfg {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(statistic) = cli.bound_statistic {
        config.pipeline.bound_statistic = statistic;
    }
    config.validate()?;

    let outcome = match cli.phase {
        Phase::Evaluate => load_saved_results(&config)?,
        Phase::Fit | Phase::All => run_fit(&CsvPairSource::new(&config), &config)?,
    };
    outcome.summary.log();
    let complete = outcome.summary.is_complete();
    if cli.phase == Phase::Fit {
        return Ok(complete);
    }

    let report = run_evaluation(&outcome.results, &config)?;
    if !cli.metrics.is_empty() {
        info!("Pooled metrics:\n{}", format_tables(&report, Grouping::Pooled, &cli.metrics));
    }
    match &cli.report {
        Some(path) => {
            report.save_json(path)?;
            info!("Evaluation report written to {}.", path.display());
        }
        None => println!("{}", report.json_dump()?),
    }
    Ok(complete && report.failures.is_empty())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
