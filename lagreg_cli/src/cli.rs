use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use lagreg_rs::config::{
    Config, DEFAULT_HORIZON, DEFAULT_SPLIT_SEED, DEFAULT_TEST_FRACTION, DEFAULT_WINDOW_SIZE,
    Penalty, ScalingMode, SolverKind,
};

#[derive(Parser, Debug)]
#[command(
    name = "lagreg",
    about = "Predict forward price direction from lagged closes with logistic regression"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Derive features from a directory of ticker files, fit, and evaluate
    #[command(name = "train")]
    Train(TrainArgs),
}

#[derive(Parser, Debug)]
pub struct TrainArgs {
    /// Directory holding one price file per ticker
    #[arg(long = "data-dir", value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    pub data_dir: PathBuf,

    /// Glob pattern for ticker files inside --data-dir
    #[arg(long = "pattern", default_value = "*.txt")]
    pub pattern: String,

    /// Name of the closing price column
    #[arg(long = "close-column", default_value = "Close")]
    pub close_column: String,

    /// Name of the date column; pass an empty string to ignore dates
    #[arg(long = "date-column", default_value = "Date")]
    pub date_column: String,

    /// Read only a random subset of this many ticker files
    #[arg(long = "sample-size")]
    pub sample_size: Option<usize>,

    /// Seed for --sample-size. When omitted a seed is drawn and logged.
    #[arg(long = "sample-seed", requires = "sample_size")]
    pub sample_seed: Option<u64>,

    /// Number of lagged closes per row
    #[arg(long = "window-size", default_value_t = DEFAULT_WINDOW_SIZE)]
    pub window_size: usize,

    /// Rows ahead of the change that decides the label
    #[arg(long = "horizon", default_value_t = DEFAULT_HORIZON)]
    pub horizon: usize,

    /// Share of retained rows held out for evaluation
    #[arg(long = "test-fraction", default_value_t = DEFAULT_TEST_FRACTION)]
    pub test_fraction: f64,

    /// Seed for the train/test shuffle
    #[arg(long = "split-seed", default_value_t = DEFAULT_SPLIT_SEED)]
    pub split_seed: u64,

    /// Which rows the min-max scaler is fitted on
    #[arg(long = "scaling", value_enum, default_value = "full-dataset")]
    pub scaling: ScalingValue,

    #[arg(long = "penalty", value_enum, default_value = "l2")]
    pub penalty: PenaltyValue,

    /// Inverse L2 strength; smaller values regularize harder
    #[arg(long = "c", default_value_t = 1.0)]
    pub c: f64,

    #[arg(long = "solver", value_enum, default_value = "newton")]
    pub solver: SolverValue,

    #[arg(long = "max-iter", default_value_t = 100)]
    pub max_iter: usize,

    /// Stop once every gradient component is at most this large
    #[arg(long = "tolerance", default_value_t = 1e-4)]
    pub tolerance: f64,

    /// Step size for --solver gradient-descent
    #[arg(long = "learning-rate", default_value_t = 0.5)]
    pub learning_rate: f64,

    /// Number of worker threads (omit to use all logical cores)
    #[arg(long = "workers", alias = "n-jobs")]
    pub workers: Option<usize>,

    /// Inclusive start date filter (YYYY-MM-DD)
    #[arg(long = "date-start")]
    pub date_start: Option<String>,

    /// Inclusive end date filter (YYYY-MM-DD)
    #[arg(long = "date-end")]
    pub date_end: Option<String>,

    /// Write the full run report as JSON to this file
    #[arg(long = "summary-json", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub summary_json: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long = "log-file", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}

impl TrainArgs {
    pub fn into_config(self) -> Result<Config> {
        let include_date_start = parse_date_flag("--date-start", self.date_start.as_deref())?;
        let include_date_end = parse_date_flag("--date-end", self.date_end.as_deref())?;
        let date_column = Some(self.date_column).filter(|name| !name.trim().is_empty());

        let config = Config {
            data_dir: self.data_dir,
            file_pattern: self.pattern,
            close_column: self.close_column,
            date_column,
            sample_size: self.sample_size,
            sample_seed: self.sample_seed,
            include_date_start,
            include_date_end,
            window_size: self.window_size,
            horizon: self.horizon,
            test_fraction: self.test_fraction,
            split_seed: self.split_seed,
            scaling: self.scaling.to_mode(),
            penalty: self.penalty.to_penalty(self.c),
            solver: self.solver.to_kind(),
            max_iter: self.max_iter,
            tolerance: self.tolerance,
            learning_rate: self.learning_rate,
            n_workers: normalize_workers(self.workers),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScalingValue {
    /// Fit on every retained row before splitting
    FullDataset,
    /// Fit on the training rows only
    TrainOnly,
}

impl ScalingValue {
    fn to_mode(self) -> ScalingMode {
        match self {
            ScalingValue::FullDataset => ScalingMode::FullDataset,
            ScalingValue::TrainOnly => ScalingMode::TrainOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PenaltyValue {
    L2,
    None,
}

impl PenaltyValue {
    fn to_penalty(self, c: f64) -> Penalty {
        match self {
            PenaltyValue::L2 => Penalty::L2 { c },
            PenaltyValue::None => Penalty::None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SolverValue {
    Newton,
    GradientDescent,
}

impl SolverValue {
    fn to_kind(self) -> SolverKind {
        match self {
            SolverValue::Newton => SolverKind::Newton,
            SolverValue::GradientDescent => SolverKind::GradientDescent,
        }
    }
}

fn normalize_workers(value: Option<usize>) -> usize {
    value.filter(|&n| n > 0).unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// Parse an optional `YYYY-MM-DD` value, naming the flag on failure.
fn parse_date_flag(flag: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .with_context(|| format!("{flag} expects a YYYY-MM-DD date, got {raw:?}"))
        })
        .transpose()
}
