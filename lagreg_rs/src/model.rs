use nalgebra::{DMatrix, DVector};
use ndarray::linalg::general_mat_mul;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Config, Penalty, SolverKind};
use crate::error::LagregError;

const ARMIJO_C: f64 = 1e-4;
const MAX_HALVINGS: usize = 50;
const CHOLESKY_JITTER: [f64; 4] = [0.0, 1e-10, 1e-8, 1e-6];
const HESSIAN_BLOCK_ROWS: usize = 4096;

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let exp_z = z.exp();
        exp_z / (1.0 + exp_z)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

fn max_abs(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
}

/// Diagnostics of one `fit` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitSummary {
    pub solver: SolverKind,
    pub iterations: usize,
    pub converged: bool,
    /// Objective value (penalized mean log-loss) at the returned parameters.
    pub final_loss: f64,
    /// Largest absolute gradient component at the returned parameters.
    pub gradient_max_abs: f64,
}

/// Penalized mean log-loss over a design matrix with a trailing bias column.
///
/// Parameters are laid out as `[w_1 .. w_d, b]`; the bias is never penalized.
#[derive(Debug, Clone)]
pub struct LogisticProblem {
    design: Array2<f64>,
    y: Array1<f64>,
    lambda: f64,
}

impl LogisticProblem {
    pub fn new(x: ArrayView2<'_, f64>, y: &[u8], lambda: f64) -> Self {
        let (n, d) = x.dim();
        let mut design = Array2::<f64>::ones((n, d + 1));
        design.slice_mut(s![.., ..d]).assign(&x);
        let y = y.iter().map(|&label| f64::from(label)).collect();
        Self { design, y, lambda }
    }

    pub fn n_samples(&self) -> usize {
        self.design.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.design.ncols() - 1
    }

    /// Length of the parameter vector (weights plus bias).
    pub fn n_params(&self) -> usize {
        self.design.ncols()
    }

    fn penalty_term(&self, params: &Array1<f64>) -> f64 {
        let w = params.slice(s![..self.n_features()]);
        0.5 * self.lambda * w.dot(&w)
    }

    pub fn loss(&self, params: &Array1<f64>) -> f64 {
        let z = self.design.dot(params);
        let data: f64 = z
            .iter()
            .zip(self.y.iter())
            .map(|(&z, &y)| softplus(z) - y * z)
            .sum();
        data / self.n_samples() as f64 + self.penalty_term(params)
    }

    pub fn loss_and_gradient(&self, params: &Array1<f64>) -> (f64, Array1<f64>) {
        let n = self.n_samples() as f64;
        let d = self.n_features();
        let z = self.design.dot(params);

        let data: f64 = z
            .iter()
            .zip(self.y.iter())
            .map(|(&z, &y)| softplus(z) - y * z)
            .sum();
        let residual = z.mapv(sigmoid) - &self.y;
        let mut grad = self.design.t().dot(&residual) / n;
        grad.slice_mut(s![..d])
            .scaled_add(self.lambda, &params.slice(s![..d]));

        (data / n + self.penalty_term(params), grad)
    }

    /// `Xᵀ diag(p(1-p)) X / n` plus the ridge term, accumulated in row
    /// blocks so only one block of weighted rows is held at a time.
    pub fn hessian(&self, params: &Array1<f64>) -> Array2<f64> {
        let k = self.n_params();
        let inv_n = 1.0 / self.n_samples() as f64;
        let mut h = Array2::<f64>::zeros((k, k));
        let mut weighted = Array2::<f64>::zeros((HESSIAN_BLOCK_ROWS.min(self.n_samples()), k));

        for block in self.design.axis_chunks_iter(Axis(0), HESSIAN_BLOCK_ROWS) {
            let curvature = block.dot(params).mapv(|z| {
                let p = sigmoid(z);
                p * (1.0 - p)
            });
            let mut scratch = weighted.slice_mut(s![..block.nrows(), ..]);
            scratch.assign(&block);
            scratch *= &curvature.insert_axis(Axis(1));
            general_mat_mul(inv_n, &block.t(), &scratch.view(), 1.0, &mut h);
        }

        for j in 0..self.n_features() {
            h[[j, j]] += self.lambda;
        }
        h
    }
}

#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub params: Array1<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub final_loss: f64,
    pub gradient_max_abs: f64,
}

/// Minimizes a [`LogisticProblem`] from a starting point.
pub trait Solver {
    fn kind(&self) -> SolverKind;

    fn minimize(
        &self,
        problem: &LogisticProblem,
        init: Array1<f64>,
    ) -> Result<SolverOutcome, LagregError>;
}

/// Damped Newton iterations with a backtracking (Armijo) line search.
#[derive(Debug, Clone, Copy)]
pub struct NewtonSolver {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl NewtonSolver {
    fn direction(h: &Array2<f64>, grad: &Array1<f64>) -> Result<Array1<f64>, LagregError> {
        let k = grad.len();
        let rhs = DVector::from_iterator(k, grad.iter().copied());
        for jitter in CHOLESKY_JITTER {
            let m = DMatrix::from_fn(k, k, |i, j| {
                h[[i, j]] + if i == j { jitter } else { 0.0 }
            });
            if let Some(chol) = m.cholesky() {
                let step = chol.solve(&rhs);
                return Ok(step.iter().copied().collect());
            }
        }
        Err(LagregError::SolverFailure(
            "Hessian is not positive definite".to_string(),
        ))
    }
}

impl Solver for NewtonSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Newton
    }

    fn minimize(
        &self,
        problem: &LogisticProblem,
        init: Array1<f64>,
    ) -> Result<SolverOutcome, LagregError> {
        let mut params = init;
        let (mut loss, mut grad) = problem.loss_and_gradient(&params);
        let mut iterations = 0;

        while iterations < self.max_iter && max_abs(&grad) > self.tolerance {
            let step = Self::direction(&problem.hessian(&params), &grad)?;
            let slope = -grad.dot(&step);

            let mut t = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let candidate = &params - &(&step * t);
                let candidate_loss = problem.loss(&candidate);
                if candidate_loss <= loss + ARMIJO_C * t * slope {
                    accepted = Some(candidate);
                    break;
                }
                t *= 0.5;
            }
            iterations += 1;

            let Some(next) = accepted else {
                debug!(iterations, loss, "Newton line search made no progress");
                break;
            };
            params = next;
            (loss, grad) = problem.loss_and_gradient(&params);
            debug!(
                iteration = iterations,
                loss,
                step = t,
                gradient = max_abs(&grad),
                "Newton step"
            );
        }

        let gradient_max_abs = max_abs(&grad);
        Ok(SolverOutcome {
            params,
            iterations,
            converged: gradient_max_abs <= self.tolerance,
            final_loss: loss,
            gradient_max_abs,
        })
    }
}

/// Batch gradient descent with a fixed step size.
#[derive(Debug, Clone, Copy)]
pub struct GradientDescent {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Solver for GradientDescent {
    fn kind(&self) -> SolverKind {
        SolverKind::GradientDescent
    }

    fn minimize(
        &self,
        problem: &LogisticProblem,
        init: Array1<f64>,
    ) -> Result<SolverOutcome, LagregError> {
        let mut params = init;
        let (mut loss, mut grad) = problem.loss_and_gradient(&params);
        let mut iterations = 0;

        while iterations < self.max_iter && max_abs(&grad) > self.tolerance {
            params.scaled_add(-self.learning_rate, &grad);
            (loss, grad) = problem.loss_and_gradient(&params);
            iterations += 1;
            if !loss.is_finite() {
                return Err(LagregError::SolverFailure(format!(
                    "gradient descent diverged at iteration {iterations} (learning rate {})",
                    self.learning_rate
                )));
            }
        }

        let gradient_max_abs = max_abs(&grad);
        Ok(SolverOutcome {
            params,
            iterations,
            converged: gradient_max_abs <= self.tolerance,
            final_loss: loss,
            gradient_max_abs,
        })
    }
}

/// Binary logistic regression: `P(y = 1 | x) = sigmoid(x · w + b)`.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    penalty: Penalty,
    solver: SolverKind,
    max_iter: usize,
    tolerance: f64,
    learning_rate: f64,
    summary: Option<FitSummary>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LogisticRegression {
    pub fn new(
        penalty: Penalty,
        solver: SolverKind,
        max_iter: usize,
        tolerance: f64,
        learning_rate: f64,
    ) -> Self {
        Self {
            coefficients: None,
            intercept: None,
            penalty,
            solver,
            max_iter,
            tolerance,
            learning_rate,
            summary: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.penalty,
            config.solver,
            config.max_iter,
            config.tolerance,
            config.learning_rate,
        )
    }

    pub fn summary(&self) -> Option<&FitSummary> {
        self.summary.as_ref()
    }

    fn build_solver(&self) -> Box<dyn Solver> {
        match self.solver {
            SolverKind::Newton => Box::new(NewtonSolver {
                max_iter: self.max_iter,
                tolerance: self.tolerance,
            }),
            SolverKind::GradientDescent => Box::new(GradientDescent {
                learning_rate: self.learning_rate,
                max_iter: self.max_iter,
                tolerance: self.tolerance,
            }),
        }
    }

    /// Fit weights and bias on `x` (one row per sample) and 0/1 labels `y`.
    /// Starts from zero and replaces any previous fit.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[u8]) -> Result<FitSummary, LagregError> {
        if x.nrows() == 0 {
            return Err(LagregError::EmptyTrainingSet);
        }
        if y.len() != x.nrows() {
            return Err(LagregError::DimensionMismatch {
                expected: x.nrows(),
                got: y.len(),
            });
        }

        let positives = y.iter().filter(|&&label| label == 1).count();
        if positives == 0 || positives == y.len() {
            warn!(
                rows = y.len(),
                positives, "Training labels contain a single class"
            );
        }

        let problem = LogisticProblem::new(x, y, self.penalty.lambda(x.nrows()));
        let solver = self.build_solver();
        let outcome = solver.minimize(&problem, Array1::zeros(problem.n_params()))?;

        if !outcome.converged {
            warn!(
                solver = ?solver.kind(),
                iterations = outcome.iterations,
                gradient = outcome.gradient_max_abs,
                tolerance = self.tolerance,
                "Logistic regression did not converge within max_iter"
            );
        }

        let d = problem.n_features();
        self.coefficients = Some(outcome.params.slice(s![..d]).to_owned());
        self.intercept = Some(outcome.params[d]);

        let summary = FitSummary {
            solver: solver.kind(),
            iterations: outcome.iterations,
            converged: outcome.converged,
            final_loss: outcome.final_loss,
            gradient_max_abs: outcome.gradient_max_abs,
        };
        self.summary = Some(summary);
        Ok(summary)
    }

    fn fitted(&self) -> Result<(&Array1<f64>, f64), LagregError> {
        match (&self.coefficients, self.intercept) {
            (Some(w), Some(b)) => Ok((w, b)),
            _ => Err(LagregError::NotFitted),
        }
    }

    /// Raw margins `x · w + b`.
    pub fn decision_function(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, LagregError> {
        let (w, b) = self.fitted()?;
        if x.ncols() != w.len() {
            return Err(LagregError::DimensionMismatch {
                expected: w.len(),
                got: x.ncols(),
            });
        }
        Ok(x.dot(w) + b)
    }

    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, LagregError> {
        Ok(self.decision_function(x)?.mapv(sigmoid))
    }

    /// Class 1 when `P(y = 1) >= 0.5`.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Vec<u8>, LagregError> {
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|&p| u8::from(p >= 0.5))
            .collect())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<u8, LagregError> {
        let (w, b) = self.fitted()?;
        if row.len() != w.len() {
            return Err(LagregError::DimensionMismatch {
                expected: w.len(),
                got: row.len(),
            });
        }
        let z = ArrayView1::from(row).dot(w) + b;
        Ok(u8::from(sigmoid(z) >= 0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Two features in [0, 1] with labels that are mostly, but not
    /// perfectly, explained by their sum.
    fn noisy_problem() -> (Array2<f64>, Vec<u8>) {
        let n = 40;
        let mut x = Array2::<f64>::zeros((n, 2));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let a = (i % 10) as f64 / 9.0;
            let b = ((i * 7) % 13) as f64 / 12.0;
            x[[i, 0]] = a;
            x[[i, 1]] = b;
            let mut label = u8::from(a + b > 1.0);
            if i % 6 == 0 {
                label = 1 - label;
            }
            y.push(label);
        }
        (x, y)
    }

    #[test]
    fn blocked_hessian_matches_dense_product() {
        // Spans two row blocks with a partial tail.
        let n = HESSIAN_BLOCK_ROWS + 37;
        let x = Array2::from_shape_fn((n, 3), |(i, j)| ((i * (j + 3)) % 17) as f64 / 16.0);
        let y: Vec<u8> = (0..n).map(|i| u8::from(i % 3 == 0)).collect();
        let lambda = 0.25;
        let problem = LogisticProblem::new(x.view(), &y, lambda);
        let params = array![0.4, -0.3, 0.2, -0.1];

        let design = &problem.design;
        let curvature = design.dot(&params).mapv(|z| sigmoid(z) * (1.0 - sigmoid(z)));
        let mut expected = design.t().dot(&(design * &curvature.insert_axis(Axis(1)))) / n as f64;
        for j in 0..3 {
            expected[[j, j]] += lambda;
        }

        let h = problem.hessian(&params);
        assert_eq!(h.dim(), (4, 4));
        for ((i, j), &v) in h.indexed_iter() {
            assert!(
                (v - expected[[i, j]]).abs() < 1e-10,
                "h[{i},{j}] = {v}, expected {}",
                expected[[i, j]]
            );
            assert!((v - h[[j, i]]).abs() < 1e-12);
        }
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(softplus(800.0).is_finite());
        assert!((softplus(0.0) - 2f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn intercept_only_fit_recovers_log_odds() {
        let x = Array2::<f64>::zeros((4, 1));
        let y = [1, 1, 1, 0];
        let mut model =
            LogisticRegression::new(Penalty::default(), SolverKind::Newton, 100, 1e-10, 0.5);
        let summary = model.fit(x.view(), &y).unwrap();

        assert!(summary.converged);
        assert!((model.intercept.unwrap() - 3f64.ln()).abs() < 1e-6);
        assert_eq!(model.coefficients.as_ref().unwrap()[0], 0.0);
    }

    #[test]
    fn newton_converges_on_default_settings() {
        let (x, y) = noisy_problem();
        let mut model = LogisticRegression::default();
        let summary = model.fit(x.view(), &y).unwrap();

        assert!(summary.converged);
        assert!(summary.iterations < 20);
        assert!(summary.gradient_max_abs <= 1e-4);
        let w = model.coefficients.as_ref().unwrap();
        assert!(w[0] > 0.0 && w[1] > 0.0);
    }

    #[test]
    fn gradient_descent_reaches_the_newton_optimum() {
        let (x, y) = noisy_problem();
        let mut newton =
            LogisticRegression::new(Penalty::default(), SolverKind::Newton, 100, 1e-8, 0.5);
        let mut descent = LogisticRegression::new(
            Penalty::default(),
            SolverKind::GradientDescent,
            50_000,
            1e-6,
            0.5,
        );
        let a = newton.fit(x.view(), &y).unwrap();
        let b = descent.fit(x.view(), &y).unwrap();

        assert!(b.converged);
        assert!((a.final_loss - b.final_loss).abs() < 1e-6);
        assert_eq!(newton.predict(x.view()).unwrap(), descent.predict(x.view()).unwrap());
    }

    #[test]
    fn weaker_regularization_gives_larger_weights() {
        let (x, y) = noisy_problem();
        let mut strong =
            LogisticRegression::new(Penalty::L2 { c: 0.01 }, SolverKind::Newton, 100, 1e-8, 0.5);
        let mut weak =
            LogisticRegression::new(Penalty::L2 { c: 100.0 }, SolverKind::Newton, 100, 1e-8, 0.5);
        strong.fit(x.view(), &y).unwrap();
        weak.fit(x.view(), &y).unwrap();

        let norm = |m: &LogisticRegression| {
            let w = m.coefficients.as_ref().unwrap();
            w.dot(w)
        };
        assert!(norm(&weak) > norm(&strong));
    }

    #[test]
    fn threshold_maps_half_to_class_one() {
        let mut model = LogisticRegression::default();
        model.coefficients = Some(array![1.0]);
        model.intercept = Some(0.0);

        assert_eq!(model.predict(array![[0.0], [-0.1], [0.1]].view()).unwrap(), vec![1, 0, 1]);
        assert_eq!(model.predict_row(&[0.0]).unwrap(), 1);
        assert_eq!(model.predict_row(&[-3.0]).unwrap(), 0);
        let p = model.predict_proba(array![[0.0]].view()).unwrap();
        assert_eq!(p[0], 0.5);
    }

    #[test]
    fn single_class_training_still_fits() {
        let x = array![[0.1], [0.5], [0.9]];
        let mut model = LogisticRegression::default();
        model.fit(x.view(), &[1, 1, 1]).unwrap();
        assert_eq!(model.predict(x.view()).unwrap(), vec![1, 1, 1]);
    }

    #[test]
    fn misuse_is_reported() {
        let mut model = LogisticRegression::default();
        assert_eq!(
            model.predict(array![[1.0]].view()),
            Err(LagregError::NotFitted)
        );
        assert_eq!(model.predict_row(&[1.0]), Err(LagregError::NotFitted));

        let empty = Array2::<f64>::zeros((0, 2));
        assert_eq!(
            model.fit(empty.view(), &[]),
            Err(LagregError::EmptyTrainingSet)
        );
        assert_eq!(
            model.fit(array![[1.0], [2.0]].view(), &[1]),
            Err(LagregError::DimensionMismatch {
                expected: 2,
                got: 1
            })
        );

        model.fit(array![[0.0], [1.0]].view(), &[0, 1]).unwrap();
        assert_eq!(
            model.predict(array![[1.0, 2.0]].view()),
            Err(LagregError::DimensionMismatch {
                expected: 1,
                got: 2
            })
        );
        assert_eq!(
            model.predict_row(&[]),
            Err(LagregError::DimensionMismatch {
                expected: 1,
                got: 0
            })
        );
    }
}
