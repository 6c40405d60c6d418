use ndarray::{Array1, Array2, ArrayView2, Axis};
use tracing::debug;

use crate::error::LagregError;

/// Per-column min-max scaling to `[0, 1]`.
///
/// Columns whose min equals their max carry no information and map to 0.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    min: Array1<f64>,
    max: Array1<f64>,
}

impl MinMaxScaler {
    pub fn fit(x: ArrayView2<'_, f64>) -> Result<Self, LagregError> {
        if x.nrows() == 0 {
            return Err(LagregError::EmptyDataset { stage: "scaler fit" });
        }
        let min = x.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
        let max = x.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));

        let degenerate = min
            .iter()
            .zip(max.iter())
            .filter(|(lo, hi)| lo == hi)
            .count();
        if degenerate > 0 {
            debug!(columns = degenerate, "Zero-range feature columns map to 0");
        }

        Ok(Self { min, max })
    }

    pub fn n_features(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &Array1<f64> {
        &self.min
    }

    pub fn max(&self) -> &Array1<f64> {
        &self.max
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>, LagregError> {
        if x.ncols() != self.n_features() {
            return Err(LagregError::DimensionMismatch {
                expected: self.n_features(),
                got: x.ncols(),
            });
        }
        let mut out = x.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let lo = self.min[j];
            let range = self.max[j] - lo;
            if range == 0.0 {
                column.fill(0.0);
            } else {
                column.mapv_inplace(|v| (v - lo) / range);
            }
        }
        Ok(out)
    }

    pub fn fit_transform(x: ArrayView2<'_, f64>) -> Result<(Self, Array2<f64>), LagregError> {
        let scaler = Self::fit(x)?;
        let scaled = scaler.transform(x)?;
        Ok((scaler, scaled))
    }
}
