use ndarray::{Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::LagregError;

/// Disjoint train/test row indices covering `0..n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Number of test rows for `n` rows at `test_fraction`.
pub fn test_size(n: usize, test_fraction: f64) -> usize {
    let raw = (test_fraction * n as f64).round();
    (raw.max(0.0) as usize).min(n)
}

/// Shuffle `0..n` with a PRNG seeded from `seed`; the first
/// `round(test_fraction * n)` indices become the test set. Labels are not
/// stratified.
pub fn train_test_split(
    n: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<SplitIndices, LagregError> {
    let n_test = test_size(n, test_fraction);
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let train = order.split_off(n_test);
    let test = order;

    if train.is_empty() {
        return Err(LagregError::EmptyDataset {
            stage: "train split",
        });
    }
    if test.is_empty() {
        return Err(LagregError::EmptyDataset { stage: "test split" });
    }
    Ok(SplitIndices { train, test })
}

/// Gather rows of `x` in the order given by `indices`.
pub fn take_rows(x: ArrayView2<'_, f64>, indices: &[usize]) -> Array2<f64> {
    x.select(Axis(0), indices)
}

pub fn take_labels(y: &[u8], indices: &[usize]) -> Vec<u8> {
    indices.iter().map(|&i| y[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn hundred_rows_split_eighty_twenty() {
        let split = train_test_split(100, 0.2, 42).unwrap();
        assert_eq!(split.train.len(), 80);
        assert_eq!(split.test.len(), 20);
    }

    #[test]
    fn same_seed_same_partition() {
        let a = train_test_split(257, 0.2, 42).unwrap();
        let b = train_test_split(257, 0.2, 42).unwrap();
        assert_eq!(a, b);

        let c = train_test_split(257, 0.2, 7).unwrap();
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn partition_is_disjoint_and_exhaustive() {
        let split = train_test_split(57, 0.3, 1).unwrap();
        let train: HashSet<usize> = split.train.iter().copied().collect();
        let test: HashSet<usize> = split.test.iter().copied().collect();
        assert!(train.is_disjoint(&test));
        let all: HashSet<usize> = train.union(&test).copied().collect();
        assert_eq!(all, (0..57).collect::<HashSet<_>>());
        assert_eq!(split.test.len(), 17);
    }

    #[test]
    fn tiny_inputs_report_the_empty_side() {
        assert_eq!(
            train_test_split(1, 0.2, 42),
            Err(LagregError::EmptyDataset { stage: "test split" })
        );
        assert_eq!(
            train_test_split(0, 0.2, 42),
            Err(LagregError::EmptyDataset {
                stage: "train split"
            })
        );
    }

    #[test]
    fn take_rows_follows_index_order() {
        let x = ndarray::array![[0.0], [1.0], [2.0]];
        let picked = take_rows(x.view(), &[2, 0]);
        assert_eq!(picked, ndarray::array![[2.0], [0.0]]);
        assert_eq!(take_labels(&[0, 1, 1], &[2, 0]), vec![1, 0]);
    }
}
