//! Least squares and ridge-penalized logistic regression.
//!
//! OLS is solved through the normal equations with nalgebra; the logistic
//! negative log-likelihood implements [`ObjectiveFunction`] and is minimized by
//! [`LbfgsOptimizer`].

use cw_core::{Error, Result};
use cw_prob::math::{log1pexp_and_sigmoid, sigmoid};
use nalgebra::{DMatrix, DVector};

use crate::optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};

#[inline]
fn row_dot(x_row: &[f64], beta: &[f64]) -> f64 {
    debug_assert_eq!(x_row.len(), beta.len());
    x_row.iter().zip(beta).map(|(&x, &b)| x * b).sum()
}

/// Dense row-major design matrix, optionally with a leading intercept column.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    n: usize,
    p: usize,
    intercept: bool,
    data: Vec<f64>,
}

impl DesignMatrix {
    /// Assemble from feature columns (all of equal length, finite values).
    pub fn from_columns(columns: &[&[f64]], intercept: bool) -> Result<Self> {
        let n = columns.first().map(|c| c.len()).unwrap_or(0);
        let p = columns.len() + usize::from(intercept);
        if n == 0 || p == 0 {
            return Err(Error::Validation("design matrix must be non-empty (n>0, p>0)".into()));
        }
        if let Some((j, c)) = columns.iter().enumerate().find(|(_, c)| c.len() != n) {
            return Err(Error::Validation(format!(
                "design column {j} has {} rows, expected {n}",
                c.len()
            )));
        }
        if columns.iter().any(|c| c.iter().any(|v| !v.is_finite())) {
            return Err(Error::Validation("design matrix must contain only finite values".into()));
        }
        let mut data = Vec::with_capacity(n * p);
        for i in 0..n {
            if intercept {
                data.push(1.0);
            }
            data.extend(columns.iter().map(|c| c[i]));
        }
        Ok(Self { n, p, intercept, data })
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n
    }

    #[inline]
    fn row(&self, i: usize) -> &[f64] {
        let start = i * self.p;
        &self.data[start..start + self.p]
    }

    fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.n, self.p, &self.data)
    }
}

/// Ordinary least squares fit with classical standard errors.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Coefficients in design-column order.
    pub coefficients: Vec<f64>,
    /// Standard errors `sqrt(σ̂² (X'X)⁻¹_jj)`.
    pub std_errors: Vec<f64>,
    /// Residual variance `RSS / (n − p)`.
    pub residual_variance: f64,
    /// Residual degrees of freedom `n − p`.
    pub df: usize,
    /// Coefficient of determination.
    pub r_squared: f64,
}

/// Fit `y = Xβ + ε` by least squares.
pub fn ols_fit(x: &DesignMatrix, y: &[f64]) -> Result<OlsFit> {
    if y.len() != x.n {
        return Err(Error::Validation(format!("y has {} rows, X has {}", y.len(), x.n)));
    }
    if x.n <= x.p {
        return Err(Error::Computation(format!(
            "OLS needs more rows than parameters (n={}, p={})",
            x.n, x.p
        )));
    }

    let x_mat = x.to_dmatrix();
    let y_vec = DVector::from_column_slice(y);
    let xtx = x_mat.transpose() * &x_mat;
    let xty = x_mat.transpose() * &y_vec;
    let xtx_inv = xtx
        .try_inverse()
        .ok_or_else(|| Error::Computation("X'X singular (collinear design columns)".into()))?;
    if (0..x.p).any(|j| !(xtx_inv[(j, j)].is_finite() && xtx_inv[(j, j)] > 0.0)) {
        return Err(Error::Computation("X'X numerically singular (collinear design columns)".into()));
    }
    let beta = &xtx_inv * &xty;

    let resid = &y_vec - &x_mat * &beta;
    let rss: f64 = resid.iter().map(|r| r * r).sum();
    let df = x.n - x.p;
    let sigma2 = rss / df as f64;
    let y_mean = y.iter().sum::<f64>() / x.n as f64;
    let tss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN };

    Ok(OlsFit {
        coefficients: beta.iter().copied().collect(),
        std_errors: (0..x.p).map(|j| (sigma2 * xtx_inv[(j, j)]).sqrt()).collect(),
        residual_variance: sigma2,
        df,
        r_squared,
    })
}

/// Mean logistic negative log-likelihood with an L2 penalty on the slopes.
///
/// `f(β) = (1/n) Σ_i [log(1 + exp(η_i)) − y_i η_i] + (λ / 2n) Σ_{j≥1} β_j²`
///
/// The intercept (column 0 when present) is not penalized.
#[derive(Debug, Clone)]
pub struct LogisticObjective<'a> {
    x: &'a DesignMatrix,
    y: &'a [bool],
    ridge: f64,
}

impl<'a> LogisticObjective<'a> {
    /// Objective over `x` with binary labels `y` and penalty `ridge >= 0`.
    pub fn new(x: &'a DesignMatrix, y: &'a [bool], ridge: f64) -> Result<Self> {
        if y.len() != x.n {
            return Err(Error::Validation(format!("y has {} rows, X has {}", y.len(), x.n)));
        }
        if !(ridge.is_finite() && ridge >= 0.0) {
            return Err(Error::Validation(format!("ridge must be finite and >= 0, got {ridge}")));
        }
        Ok(Self { x, y, ridge })
    }

    fn penalized(&self, j: usize) -> bool {
        !(self.x.intercept && j == 0)
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.x.p {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.x.p,
                params.len()
            )));
        }
        if params.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("params must contain only finite values".into()));
        }
        Ok(())
    }
}

impl ObjectiveFunction for LogisticObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.check_params(params)?;
        let n = self.x.n as f64;
        let mut nll = 0.0;
        for i in 0..self.x.n {
            let eta = row_dot(self.x.row(i), params);
            let (log_term, _) = log1pexp_and_sigmoid(eta);
            nll += log_term - if self.y[i] { eta } else { 0.0 };
        }
        let penalty: f64 = params
            .iter()
            .enumerate()
            .filter(|(j, _)| self.penalized(*j))
            .map(|(_, b)| b * b)
            .sum();
        Ok(nll / n + 0.5 * self.ridge * penalty / n)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_params(params)?;
        let n = self.x.n as f64;
        let mut grad = vec![0.0; self.x.p];
        for i in 0..self.x.n {
            let row = self.x.row(i);
            let (_, mu) = log1pexp_and_sigmoid(row_dot(row, params));
            let r = mu - if self.y[i] { 1.0 } else { 0.0 };
            for (g, &xij) in grad.iter_mut().zip(row) {
                *g += r * xij;
            }
        }
        for (j, g) in grad.iter_mut().enumerate() {
            *g /= n;
            if self.penalized(j) {
                *g += self.ridge * params[j] / n;
            }
        }
        Ok(grad)
    }
}

/// Fitted logistic regression.
#[derive(Debug, Clone)]
pub struct LogisticFit {
    /// Coefficients in design-column order.
    pub coefficients: Vec<f64>,
    /// Infinity norm of the gradient at the solution.
    pub grad_norm: f64,
    /// Optimizer diagnostics.
    pub optimization: OptimizationResult,
}

impl LogisticFit {
    /// Fitted probabilities `σ(Xβ)` for every row of `x`.
    pub fn predict(&self, x: &DesignMatrix) -> Vec<f64> {
        (0..x.n).map(|i| sigmoid(row_dot(x.row(i), &self.coefficients))).collect()
    }
}

/// Fit a ridge-penalized logistic regression by L-BFGS from `β = 0`.
pub fn fit_logistic(
    x: &DesignMatrix,
    y: &[bool],
    ridge: f64,
    config: OptimizerConfig,
) -> Result<LogisticFit> {
    let objective = LogisticObjective::new(x, y, ridge)?;
    let optimization = LbfgsOptimizer::new(config).minimize(&objective, &vec![0.0; x.p])?;
    let grad = objective.gradient(&optimization.parameters)?;
    let grad_norm = grad.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
    Ok(LogisticFit { coefficients: optimization.parameters.clone(), grad_norm, optimization })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ols_exact_line() {
        let x1 = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x1.iter().map(|v| 1.5 + 2.0 * v).collect();
        let x = DesignMatrix::from_columns(&[&x1], true).unwrap();
        let fit = ols_fit(&x, &y).unwrap();
        assert_relative_eq!(fit.coefficients[0], 1.5, epsilon = 1e-10);
        assert_relative_eq!(fit.coefficients[1], 2.0, epsilon = 1e-10);
        assert_eq!(fit.df, 3);
        assert!(fit.std_errors[1] < 1e-6);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ols_standard_error_matches_closed_form() {
        // Simple regression: se(b1) = sqrt(s² / Sxx).
        let x1 = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [2.1, 3.9, 6.2, 7.8, 10.1, 12.2];
        let x = DesignMatrix::from_columns(&[&x1], true).unwrap();
        let fit = ols_fit(&x, &y).unwrap();
        let mx = 3.5;
        let sxx: f64 = x1.iter().map(|v| (v - mx).powi(2)).sum();
        let expected = (fit.residual_variance / sxx).sqrt();
        assert_relative_eq!(fit.std_errors[1], expected, epsilon = 1e-10);
    }

    #[test]
    fn test_ols_collinear_fails() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let x = DesignMatrix::from_columns(&[&a, &b], true).unwrap();
        assert!(ols_fit(&x, &[1.0, 2.0, 3.0, 5.0]).is_err());
    }

    #[test]
    fn test_ols_needs_residual_df() {
        let a = [1.0, 2.0];
        let x = DesignMatrix::from_columns(&[&a], true).unwrap();
        assert!(ols_fit(&x, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_logistic_gradient_matches_finite_differences() {
        let a = [-1.0, -0.5, 0.0, 0.3, 0.9, 1.4, 2.0];
        let y = [false, false, true, false, true, true, true];
        let x = DesignMatrix::from_columns(&[&a], true).unwrap();
        let obj = LogisticObjective::new(&x, &y, 0.5).unwrap();
        let p = [0.2, 0.7];
        let g = obj.gradient(&p).unwrap();
        for j in 0..2 {
            let h = 1e-6;
            let mut hi = p;
            let mut lo = p;
            hi[j] += h;
            lo[j] -= h;
            let fd = (obj.eval(&hi).unwrap() - obj.eval(&lo).unwrap()) / (2.0 * h);
            assert_relative_eq!(g[j], fd, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_fit_logistic_separates_classes() {
        let a: Vec<f64> = (0..40).map(|i| i as f64 / 10.0 - 2.0).collect();
        let y: Vec<bool> = a.iter().enumerate().map(|(i, v)| *v > 0.0 || i % 7 == 0).collect();
        let x = DesignMatrix::from_columns(&[&a], true).unwrap();
        let fit = fit_logistic(&x, &y, 1.0, OptimizerConfig::default()).unwrap();
        assert!(fit.coefficients[1] > 0.0);
        assert!(fit.grad_norm < 1e-4, "grad_norm={}", fit.grad_norm);
        let p = fit.predict(&x);
        assert!(p[0] < 0.5 && p[39] > 0.5);
    }
}
