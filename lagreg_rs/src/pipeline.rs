use std::fmt;
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::Array2;
use serde::Serialize;
use tracing::info;

use crate::config::{Config, ScalingMode};
use crate::data::{DirectorySource, RecordSource};
use crate::dataset::Dataset;
use crate::error::LagregError;
use crate::features::{DerivedSet, FeatureSpec};
use crate::metrics::{self, ConfusionMatrix};
use crate::model::{FitSummary, LogisticRegression};
use crate::scaler::MinMaxScaler;
use crate::split::{SplitIndices, take_labels, take_rows, train_test_split};

/// Everything a run produced, from input counts through the test metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Seed used to sample input files, when sampling was enabled.
    pub sample_seed: Option<u64>,
    pub split_seed: u64,
    pub window_size: usize,
    pub horizon: usize,
    pub scaling: ScalingMode,
    /// Tickers handed over by the record source, including empty ones.
    pub tickers_discovered: usize,
    pub tickers_loaded: usize,
    pub tickers_skipped: usize,
    pub tickers_with_rows: usize,
    pub rows_assembled: usize,
    pub rows_retained: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Share of retained rows labelled 1.
    pub positive_rate: f64,
    pub fit: FitSummary,
    /// Lag column names, aligned with `coefficients`.
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
}

/// The result block printed at the end of a run:
///
/// ```text
/// Accuracy: 0.5123
/// Confusion Matrix:
/// [[ 812 1034]
///  [ 764 1077]]
/// ```
impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Accuracy: {:.4}", self.accuracy)?;
        writeln!(f, "Confusion Matrix:")?;
        write!(f, "{}", self.confusion)
    }
}

/// Train/test partitions after scaling.
struct Partitions {
    split: SplitIndices,
    x_train: Array2<f64>,
    x_test: Array2<f64>,
}

pub struct DirectionPipeline {
    config: Config,
}

impl DirectionPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run over the ticker files described by the configuration.
    pub fn run(&self) -> Result<RunReport> {
        let source = DirectorySource::from_config(&self.config);
        self.run_with_source(&source)
    }

    /// Run over any record source, e.g. in-memory tickers.
    pub fn run_with_source<S: RecordSource + ?Sized>(&self, source: &S) -> Result<RunReport> {
        let config = &self.config;
        config.validate().context("Invalid configuration")?;
        let started = Instant::now();

        info!(
            data_dir = %config.data_dir.display(),
            window_size = config.window_size,
            horizon = config.horizon,
            test_fraction = config.test_fraction,
            split_seed = config.split_seed,
            scaling = ?config.scaling,
            penalty = ?config.penalty,
            solver = ?config.solver,
            max_iter = config.max_iter,
            n_workers = config.n_workers,
            "Starting direction pipeline"
        );

        let entities = source.load().context("load stage failed")?;
        let sample_seed = source.sample_seed();
        let tickers_discovered = entities.len();
        let tickers_skipped = entities.iter().filter(|e| e.bars.is_empty()).count();

        let dataset = Dataset::assemble(entities);
        if dataset.is_empty() {
            return Err(LagregError::EmptyDataset { stage: "loading" })
                .context("assemble stage failed");
        }
        info!(
            tickers = %format_int(dataset.entity_count()),
            skipped = tickers_skipped,
            rows = %format_int(dataset.len()),
            "Assembled dataset"
        );

        let spec = FeatureSpec::from_config(config);
        let derived =
            DerivedSet::derive(&dataset, spec, config.n_workers).context("derive stage failed")?;
        if derived.is_empty() {
            return Err(LagregError::EmptyDataset {
                stage: "feature derivation",
            })
            .with_context(|| {
                format!(
                    "derive stage failed: no ticker has the {} rows needed for one sample",
                    spec.min_history()
                )
            });
        }

        let parts = self.scale_and_split(&derived)?;
        let y_train = take_labels(&derived.labels, &parts.split.train);
        let y_test = take_labels(&derived.labels, &parts.split.test);
        info!(
            train_rows = %format_int(y_train.len()),
            test_rows = %format_int(y_test.len()),
            "Split retained rows"
        );

        let mut model = LogisticRegression::from_config(config);
        let fit = model
            .fit(parts.x_train.view(), &y_train)
            .context("fit stage failed")?;
        info!(
            solver = ?fit.solver,
            iterations = fit.iterations,
            converged = fit.converged,
            loss = fit.final_loss,
            "Fitted logistic regression"
        );

        let predictions = model
            .predict(parts.x_test.view())
            .context("predict stage failed")?;

        let accuracy = metrics::accuracy(&y_test, &predictions).context("evaluate stage failed")?;
        let confusion =
            metrics::confusion_matrix(&y_test, &predictions).context("evaluate stage failed")?;

        let report = RunReport {
            sample_seed,
            split_seed: config.split_seed,
            window_size: config.window_size,
            horizon: config.horizon,
            scaling: config.scaling,
            tickers_discovered,
            tickers_loaded: tickers_discovered - tickers_skipped,
            tickers_skipped,
            tickers_with_rows: derived.entities_with_rows(),
            rows_assembled: dataset.len(),
            rows_retained: derived.len(),
            train_rows: y_train.len(),
            test_rows: y_test.len(),
            positive_rate: derived.positive_rate(),
            fit,
            feature_names: spec.column_names(),
            coefficients: model
                .coefficients
                .as_ref()
                .map(|w| w.to_vec())
                .unwrap_or_default(),
            intercept: model.intercept.unwrap_or_default(),
            accuracy,
            precision: confusion.precision(),
            recall: confusion.recall(),
            f1: confusion.f1(),
            confusion,
        };

        let accuracy_fmt = format!("{:.4}", report.accuracy);
        let precision_fmt = format!("{:.4}", report.precision);
        let recall_fmt = format!("{:.4}", report.recall);
        info!(
            accuracy = accuracy_fmt.as_str(),
            precision = precision_fmt.as_str(),
            recall = recall_fmt.as_str(),
            test_rows = report.test_rows,
            elapsed = %format_duration(started.elapsed().as_secs_f32()),
            "Evaluation complete"
        );

        Ok(report)
    }

    fn scale_and_split(&self, derived: &DerivedSet) -> Result<Partitions> {
        let config = &self.config;
        let n = derived.len();
        match config.scaling {
            ScalingMode::FullDataset => {
                let (_, scaled) = MinMaxScaler::fit_transform(derived.features.view())
                    .context("scale stage failed")?;
                let split = train_test_split(n, config.test_fraction, config.split_seed)
                    .context("split stage failed")?;
                let x_train = take_rows(scaled.view(), &split.train);
                let x_test = take_rows(scaled.view(), &split.test);
                Ok(Partitions {
                    split,
                    x_train,
                    x_test,
                })
            }
            ScalingMode::TrainOnly => {
                let split = train_test_split(n, config.test_fraction, config.split_seed)
                    .context("split stage failed")?;
                let raw_train = take_rows(derived.features.view(), &split.train);
                let raw_test = take_rows(derived.features.view(), &split.test);
                let scaler = MinMaxScaler::fit(raw_train.view()).context("scale stage failed")?;
                let x_train = scaler
                    .transform(raw_train.view())
                    .context("scale stage failed")?;
                let x_test = scaler
                    .transform(raw_test.view())
                    .context("scale stage failed")?;
                Ok(Partitions {
                    split,
                    x_train,
                    x_test,
                })
            }
        }
    }
}

/// Decimal digits grouped in threes with commas.
fn format_int(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.char_indices() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_duration(seconds: f32) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "unknown".to_string();
    }
    if seconds < 60.0 {
        return format!("{seconds:.2}s");
    }
    let total = seconds.round() as u64;
    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m {secs:02}s")
    }
}
