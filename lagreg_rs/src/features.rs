use anyhow::{Context, Result};
use ndarray::Array2;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::dataset::Dataset;

/// Shape of the lagged-close window and the forward label offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    pub window: usize,
    pub horizon: usize,
}

impl FeatureSpec {
    pub fn new(window: usize, horizon: usize) -> Self {
        Self { window, horizon }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.window_size, config.horizon)
    }

    /// Rows a ticker needs before its first row can be retained.
    pub fn min_history(&self) -> usize {
        self.window + self.horizon + 1
    }

    pub fn column_names(&self) -> Vec<String> {
        (1..=self.window).map(|k| format!("lag_{k}")).collect()
    }
}

/// Fractional change of each close against the previous one. Position 0,
/// non-finite closes and a zero previous close have no defined change.
pub fn pct_change(closes: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        if i == 0 {
            out.push(None);
            continue;
        }
        let prev = closes[i - 1];
        let curr = closes[i];
        if prev.is_finite() && curr.is_finite() && prev != 0.0 {
            out.push(Some((curr - prev) / prev));
        } else {
            out.push(None);
        }
    }
    out
}

/// Label each position by the sign of the change `horizon` rows ahead.
pub fn forward_labels(changes: &[Option<f64>], horizon: usize) -> Vec<Option<u8>> {
    (0..changes.len())
        .map(|i| {
            let ahead = changes.get(i + horizon).copied().flatten()?;
            Some(u8::from(ahead > 0.0))
        })
        .collect()
}

/// `close[i - k]`, when that row exists and holds a finite price.
pub fn lag(closes: &[f64], i: usize, k: usize) -> Option<f64> {
    let j = i.checked_sub(k)?;
    closes.get(j).copied().filter(|v| v.is_finite())
}

/// Retained rows of a single ticker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRows {
    /// Row-major `positions.len() x window` lag values.
    pub features: Vec<f64>,
    pub labels: Vec<u8>,
    /// Position of each retained row within the ticker's own sequence.
    pub positions: Vec<usize>,
}

impl EntityRows {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Derive lag features and labels for one ticker's closes.
///
/// Row `i` is kept only when all of `close[i-1] .. close[i-window]` exist
/// and the change at `i + horizon` is defined. Features read strictly
/// earlier rows; only the label looks ahead.
pub fn derive_entity(closes: &[f64], spec: FeatureSpec) -> EntityRows {
    let mut rows = EntityRows::default();
    if spec.window == 0 || closes.len() < spec.min_history() {
        return rows;
    }

    let changes = pct_change(closes);
    let labels = forward_labels(&changes, spec.horizon);
    let mut window = Vec::with_capacity(spec.window);

    for i in spec.window..closes.len() - spec.horizon {
        let Some(label) = labels[i] else {
            continue;
        };
        window.clear();
        for k in 1..=spec.window {
            match lag(closes, i, k) {
                Some(v) => window.push(v),
                None => break,
            }
        }
        if window.len() != spec.window {
            continue;
        }
        rows.features.extend_from_slice(&window);
        rows.labels.push(label);
        rows.positions.push(i);
    }

    rows
}

/// Retained rows of every ticker: the feature matrix `X` and the label
/// vector `Y`, aligned by position.
#[derive(Debug, Clone)]
pub struct DerivedSet {
    pub spec: FeatureSpec,
    pub features: Array2<f64>,
    pub labels: Vec<u8>,
    entities_with_rows: usize,
}

impl DerivedSet {
    /// Derive every ticker on a pool of `n_workers` threads. Output order
    /// follows ticker order, then row order within each ticker.
    pub fn derive(dataset: &Dataset, spec: FeatureSpec, n_workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_workers.max(1))
            .build()
            .context("Failed to build worker pool")?;

        let per_entity: Vec<EntityRows> = pool.install(|| {
            dataset
                .entities()
                .par_iter()
                .map(|entity| derive_entity(dataset.entity_closes(entity), spec))
                .collect()
        });

        let total: usize = per_entity.iter().map(EntityRows::len).sum();
        let mut flat = Vec::with_capacity(total * spec.window);
        let mut labels = Vec::with_capacity(total);
        let mut entities_with_rows = 0usize;

        for rows in per_entity.iter().filter(|rows| !rows.is_empty()) {
            entities_with_rows += 1;
            flat.extend_from_slice(&rows.features);
            labels.extend_from_slice(&rows.labels);
        }

        let features = Array2::from_shape_vec((total, spec.window), flat)
            .context("Derived feature buffer does not match the expected shape")?;

        let set = Self {
            spec,
            features,
            labels,
            entities_with_rows,
        };

        info!(
            rows = set.len(),
            tickers = dataset.entity_count(),
            tickers_with_rows = set.entities_with_rows,
            tickers_short_history = dataset.entity_count() - set.entities_with_rows,
            positive_rate = set.positive_rate(),
            "Derived lag features and labels"
        );

        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn entities_with_rows(&self) -> usize {
        self.entities_with_rows
    }

    /// Share of rows labelled 1, or 0 for an empty set.
    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&l| l == 1).count() as f64 / self.labels.len() as f64
    }
}
