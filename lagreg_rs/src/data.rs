use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use glob::{Pattern, glob};
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::LagregError;
use crate::progress::LoadProgress;

/// One dated price observation for a single ticker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub date: Option<NaiveDate>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Bar carrying only a closing price; every other field is unknown.
    pub fn from_close(close: f64) -> Self {
        Self {
            date: None,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close,
            volume: f64::NAN,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

/// Date-ordered bars for one ticker.
#[derive(Debug, Clone)]
pub struct EntityBars {
    pub ticker: String,
    pub bars: Vec<Bar>,
}

impl EntityBars {
    pub fn new(ticker: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            ticker: ticker.into(),
            bars,
        }
    }

    pub fn from_closes(ticker: impl Into<String>, closes: &[f64]) -> Self {
        Self::new(ticker, closes.iter().copied().map(Bar::from_close).collect())
    }
}

/// Supplies per-ticker bar sequences to the pipeline.
///
/// Implementations return tickers in a stable order, each with its bars
/// sorted by non-decreasing date. An input that yielded no bars is returned
/// with an empty `bars` vector so callers can count it as skipped; the
/// assembler drops it.
pub trait RecordSource {
    fn load(&self) -> Result<Vec<EntityBars>>;

    /// Seed behind any random input selection, reported so a run can be
    /// repeated.
    fn sample_seed(&self) -> Option<u64> {
        None
    }
}

impl RecordSource for Vec<EntityBars> {
    fn load(&self) -> Result<Vec<EntityBars>> {
        Ok(self.clone())
    }
}

/// Reads one headered delimited file per ticker from a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    data_dir: PathBuf,
    file_pattern: String,
    close_column: String,
    date_column: Option<String>,
    sample_size: Option<usize>,
    sample_seed: u64,
    include_date_start: Option<NaiveDate>,
    include_date_end: Option<NaiveDate>,
}

impl DirectorySource {
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            file_pattern: config.file_pattern.clone(),
            close_column: config.close_column.clone(),
            date_column: config.date_column.clone(),
            sample_size: config.sample_size,
            sample_seed: config.sample_seed.unwrap_or_else(rand::random),
            include_date_start: config.include_date_start,
            include_date_end: config.include_date_end,
        }
    }

    fn pattern(&self) -> String {
        let dir = Pattern::escape(&self.data_dir.to_string_lossy());
        format!("{}/{}", dir.trim_end_matches('/'), self.file_pattern)
    }

    /// All files matching the pattern, sorted by path.
    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.pattern();
        let mut files = Vec::new();
        for entry in glob(&pattern).with_context(|| format!("Invalid file pattern {pattern}"))? {
            let path = entry.with_context(|| format!("Failed to read an entry of {pattern}"))?;
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(LagregError::NoInputFiles { pattern }.into());
        }
        Ok(files)
    }

    fn in_window(&self, date: Option<NaiveDate>) -> bool {
        if self.include_date_start.is_none() && self.include_date_end.is_none() {
            return true;
        }
        let Some(d) = date else {
            return false;
        };
        if let Some(s) = self.include_date_start {
            if d < s {
                return false;
            }
        }
        if let Some(e) = self.include_date_end {
            if d > e {
                return false;
            }
        }
        true
    }

    /// Read one ticker file. Returns `Ok(None)` when the file holds no usable
    /// bars (zero bytes, blank lines only, header only, or emptied by the
    /// date window).
    pub fn read_bars(&self, path: &Path) -> Result<Option<Vec<Bar>>> {
        let size = fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        if size == 0 {
            return Ok(None);
        }

        // Infer over every row: integer-looking leading closes must not fix
        // the column to Int64 and null out later decimals.
        let frame = LazyCsvReader::new(path)
            .has_header(true)
            .with_infer_schema_length(None)
            .with_try_parse_dates(true)
            .with_ignore_errors(true)
            .finish()
            .and_then(|lazy| lazy.collect());
        let df = match frame {
            Ok(df) => df,
            Err(PolarsError::NoData(_)) => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read CSV data from {}", path.display()));
            }
        };

        let height = df.height();
        if height == 0 {
            return Ok(None);
        }

        let close_series =
            df.column(&self.close_column)
                .map_err(|_| LagregError::MissingColumn {
                    column: self.close_column.clone(),
                    file: path.display().to_string(),
                })?;
        let close = series_to_f64(close_series)?;
        let unparsed = close.iter().filter(|v| v.is_nan()).count();
        if unparsed > 0 {
            warn!(
                file = %path.display(),
                column = %self.close_column,
                unparsed,
                "Close values are missing or not numeric; rows that depend on them are dropped"
            );
        }
        let open = optional_f64(&df, "Open", height)?;
        let high = optional_f64(&df, "High", height)?;
        let low = optional_f64(&df, "Low", height)?;
        let volume = optional_f64(&df, "Volume", height)?;
        let dates = match self.date_column.as_deref() {
            Some(name) => match df.column(name) {
                Ok(series) => parse_dates(series)
                    .with_context(|| format!("Failed to parse dates in {}", path.display()))?,
                Err(_) => vec![None; height],
            },
            None => vec![None; height],
        };

        let mut bars: Vec<Bar> = (0..height)
            .map(|i| Bar {
                date: dates[i],
                open: open[i],
                high: high[i],
                low: low[i],
                close: close[i],
                volume: volume[i],
            })
            .collect();

        let has_dates = bars.iter().all(|bar| bar.date.is_some());
        if has_dates && bars.windows(2).any(|pair| pair[0].date > pair[1].date) {
            warn!(
                file = %path.display(),
                "Bars are not in chronological order; re-sorting by date"
            );
            bars.sort_by_key(|bar| bar.date);
        }

        bars.retain(|bar| self.in_window(bar.date));
        if bars.is_empty() {
            return Ok(None);
        }
        Ok(Some(bars))
    }
}

impl RecordSource for DirectorySource {
    fn load(&self) -> Result<Vec<EntityBars>> {
        let discovered = self.discover_files()?;
        let files = match self.sample_size {
            Some(n) => {
                if n > discovered.len() {
                    warn!(
                        requested = n,
                        available = discovered.len(),
                        "Sample size exceeds available ticker files; reading all of them"
                    );
                }
                info!(
                    sample_size = n,
                    seed = self.sample_seed,
                    "Sampling ticker files"
                );
                sample_files(discovered, n, self.sample_seed)
            }
            None => discovered,
        };

        info!(
            files = files.len(),
            dir = %self.data_dir.display(),
            "Reading ticker files"
        );

        let mut progress = LoadProgress::new(files.len());
        let mut entities = Vec::with_capacity(files.len());
        for path in &files {
            let ticker = ticker_from_path(path);
            match self.read_bars(path)? {
                Some(bars) => {
                    debug!(ticker = %ticker, bars = bars.len(), "Loaded ticker");
                    entities.push(EntityBars::new(ticker, bars));
                    progress.record_loaded();
                }
                None => {
                    warn!(file = %path.display(), "Skipping empty file");
                    entities.push(EntityBars::new(ticker, Vec::new()));
                    progress.record_skipped();
                }
            }
        }
        progress.finish();

        Ok(entities)
    }

    /// Seed used for file sampling, or None when every file is read.
    fn sample_seed(&self) -> Option<u64> {
        self.sample_size.map(|_| self.sample_seed)
    }
}

/// Uniform sample of `sample_size` files without replacement. The chosen
/// files keep their original relative order.
pub fn sample_files(files: Vec<PathBuf>, sample_size: usize, seed: u64) -> Vec<PathBuf> {
    if sample_size >= files.len() {
        return files;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, files.len(), sample_size).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| files[i].clone()).collect()
}

/// Ticker identifier: the file name up to its first '.'.
pub fn ticker_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.split('.').next().unwrap_or_default().to_string()
}

fn optional_f64(df: &DataFrame, name: &str, height: usize) -> Result<Vec<f64>> {
    match df.column(name) {
        Ok(series) => series_to_f64(series),
        Err(_) => Ok(vec![f64::NAN; height]),
    }
}

/// Any numeric or text column as `f64`, with nulls and unparseable text as
/// NaN.
fn series_to_f64(series: &Series) -> Result<Vec<f64>> {
    let dtype = series.dtype();
    if !dtype.is_numeric() && *dtype != DataType::String {
        return Err(anyhow!(
            "Unsupported dtype for numeric column {}: {dtype:?}",
            series.name()
        ));
    }
    let floats = series
        .cast(&DataType::Float64)
        .with_context(|| format!("Failed to cast {} to f64", series.name()))?;
    Ok(floats
        .f64()
        .context("Failed to interpret as f64")?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn parse_dates(series: &Series) -> Result<Vec<Option<NaiveDate>>> {
    match series.dtype() {
        DataType::Date => {
            let days = series
                .cast(&DataType::Int32)
                .context("Failed to cast date column to day counts")?;
            Ok(days
                .i32()
                .context("Failed to interpret day counts as i32")?
                .into_iter()
                .map(|opt| {
                    opt.and_then(|d| DateTime::<Utc>::from_timestamp(d as i64 * 86_400, 0))
                        .map(|dt| dt.date_naive())
                })
                .collect())
        }
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let raw = series
                .cast(&DataType::Int64)
                .context("Failed to cast datetime column to integers")?;
            Ok(raw
                .i64()
                .context("Failed to interpret datetime column as i64")?
                .into_iter()
                .map(|opt| {
                    let ts = opt?;
                    let (secs, nsecs) = match unit {
                        TimeUnit::Nanoseconds => (
                            ts.div_euclid(1_000_000_000),
                            ts.rem_euclid(1_000_000_000) as u32,
                        ),
                        TimeUnit::Microseconds => (
                            ts.div_euclid(1_000_000),
                            ts.rem_euclid(1_000_000) as u32 * 1_000,
                        ),
                        TimeUnit::Milliseconds => (
                            ts.div_euclid(1_000),
                            ts.rem_euclid(1_000) as u32 * 1_000_000,
                        ),
                    };
                    DateTime::<Utc>::from_timestamp(secs, nsecs).map(|dt| dt.date_naive())
                })
                .collect())
        }
        DataType::String => Ok(series
            .str()
            .context("Failed to interpret date column as strings")?
            .into_iter()
            .map(|opt| opt.and_then(parse_date_str))
            .collect()),
        other => Err(anyhow!(
            "Date column {} has unsupported dtype {other:?}",
            series.name()
        )),
    }
}

fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}
