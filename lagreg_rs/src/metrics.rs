use std::fmt;

use serde::Serialize;

use crate::error::LagregError;

fn check_lengths(y_true: &[u8], y_pred: &[u8]) -> Result<(), LagregError> {
    if y_true.len() != y_pred.len() {
        return Err(LagregError::DimensionMismatch {
            expected: y_true.len(),
            got: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(LagregError::EmptyDataset { stage: "evaluation" });
    }
    Ok(())
}

/// Fraction of positions where prediction and truth agree.
pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> Result<f64, LagregError> {
    check_lengths(y_true, y_pred)?;
    let hits = y_true
        .iter()
        .zip(y_pred)
        .filter(|(truth, pred)| truth == pred)
        .count();
    Ok(hits as f64 / y_true.len() as f64)
}

/// 2x2 counts with rows = true class and columns = predicted class, both in
/// ascending label order (0, then 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_labels(y_true: &[u8], y_pred: &[u8]) -> Result<Self, LagregError> {
        check_lengths(y_true, y_pred)?;
        let mut counts = [[0usize; 2]; 2];
        for (&truth, &pred) in y_true.iter().zip(y_pred) {
            counts[usize::from(truth == 1)][usize::from(pred == 1)] += 1;
        }
        Ok(Self { counts })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn true_negatives(&self) -> usize {
        self.counts[0][0]
    }

    pub fn false_positives(&self) -> usize {
        self.counts[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.counts[1][0]
    }

    pub fn true_positives(&self) -> usize {
        self.counts[1][1]
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_negatives() + self.true_positives(), self.total())
    }

    /// Precision for class 1; 0 when nothing was predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(
            self.true_positives(),
            self.true_positives() + self.false_positives(),
        )
    }

    /// Recall for class 1; 0 when the truth has no positives.
    pub fn recall(&self) -> f64 {
        ratio(
            self.true_positives(),
            self.true_positives() + self.false_negatives(),
        )
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn confusion_matrix(y_true: &[u8], y_pred: &[u8]) -> Result<ConfusionMatrix, LagregError> {
    ConfusionMatrix::from_labels(y_true, y_pred)
}

/// Bracketed rows with cells right-aligned to the widest count:
///
/// ```text
/// [[ 5 12]
///  [ 3 40]]
/// ```
impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        let [top, bottom] = self.counts;
        writeln!(f, "[[{:>width$} {:>width$}]", top[0], top[1])?;
        write!(f, " [{:>width$} {:>width$}]]", bottom[0], bottom[1])
    }
}
