//! Propensity scores: treatment arms, logistic propensity model, overlap.

use cw_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::optimizer::OptimizerConfig;
use crate::regression::{DesignMatrix, fit_logistic};

/// Gradient norm below which a fit that hit the iteration cap is still accepted.
const ACCEPTABLE_GRAD_NORM: f64 = 1e-4;

/// Binary split of the treatment column.
#[derive(Debug, Clone)]
pub struct TreatmentArms {
    /// Arm membership per row.
    pub treated: Vec<bool>,
    /// Median split point for continuous treatments (`t > threshold` is treated).
    pub threshold: Option<f64>,
    /// Treated rows.
    pub n_treated: usize,
    /// Control rows.
    pub n_control: usize,
}

fn median(values: &[f64]) -> f64 {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    let n = v.len();
    if n % 2 == 1 { v[n / 2] } else { 0.5 * (v[n / 2 - 1] + v[n / 2]) }
}

/// Split a treatment column into arms.
///
/// A column holding only 0 and 1 is used as-is. Anything else is split at its
/// median. Fails when either arm is empty.
pub fn split_treatment(t: &[f64]) -> Result<TreatmentArms> {
    if t.is_empty() {
        return Err(Error::Computation("treatment column is empty".into()));
    }
    let binary = t.iter().all(|&v| v == 0.0 || v == 1.0);
    let (treated, threshold): (Vec<bool>, Option<f64>) = if binary {
        (t.iter().map(|&v| v == 1.0).collect(), None)
    } else {
        let m = median(t);
        (t.iter().map(|&v| v > m).collect(), Some(m))
    };
    let n_treated = treated.iter().filter(|&&b| b).count();
    let n_control = treated.len() - n_treated;
    if n_treated == 0 || n_control == 0 {
        return Err(Error::Computation(format!(
            "treatment split leaves an empty arm ({n_treated} treated, {n_control} control)"
        )));
    }
    Ok(TreatmentArms { treated, threshold, n_treated, n_control })
}

/// Fitted propensity model.
#[derive(Debug, Clone)]
pub struct PropensityFit {
    /// `P(treated | covariates)` per row, unclipped.
    pub scores: Vec<f64>,
}

/// Fit `P(treated | covariates)` by ridge-penalized logistic regression.
///
/// Covariates are standardized before fitting so the penalty treats them
/// alike. A constant covariate or a failed optimization is an error.
pub fn fit_propensity(
    covariates: &[(&str, &[f64])],
    treated: &[bool],
    ridge: f64,
    max_iter: u64,
) -> Result<PropensityFit> {
    if covariates.is_empty() {
        return Err(Error::Computation("propensity model needs at least one covariate".into()));
    }
    let mut standardized: Vec<Vec<f64>> = Vec::with_capacity(covariates.len());
    for (name, col) in covariates {
        let n = col.len() as f64;
        let mean = col.iter().sum::<f64>() / n;
        let sd = (col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        if !(sd > 1e-12) {
            return Err(Error::Computation(format!("covariate '{name}' is constant")));
        }
        standardized.push(col.iter().map(|v| (v - mean) / sd).collect());
    }
    let cols: Vec<&[f64]> = standardized.iter().map(Vec::as_slice).collect();
    let x = DesignMatrix::from_columns(&cols, true)?;

    let config = OptimizerConfig { max_iter, ..OptimizerConfig::default() };
    let fit = fit_logistic(&x, treated, ridge, config)?;
    if !fit.optimization.converged && fit.grad_norm > ACCEPTABLE_GRAD_NORM {
        return Err(Error::Computation(format!(
            "propensity model did not converge after {} iterations (gradient norm {:.2e})",
            fit.optimization.n_iter, fit.grad_norm
        )));
    }
    tracing::trace!(n_iter = fit.optimization.n_iter, fval = fit.optimization.fval, "propensity fit");

    Ok(PropensityFit { scores: fit.predict(&x) })
}

/// Overlap diagnostics for propensity scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapDiagnostics {
    /// Number of scored rows.
    pub n_total: usize,
    /// Rows with a score outside `[bound, 1 − bound]`.
    pub n_extreme: usize,
    /// `n_extreme / n_total`.
    pub fraction_extreme: f64,
    /// Bound used for `n_extreme`.
    pub bound: f64,
    /// Mean score.
    pub mean_propensity: f64,
    /// Min score.
    pub min_propensity: f64,
    /// Max score.
    pub max_propensity: f64,
}

/// Summarize how many scores sit near 0 or 1.
pub fn overlap_diagnostics(scores: &[f64], bound: f64) -> OverlapDiagnostics {
    let n_total = scores.len();
    let n_extreme = scores.iter().filter(|&&p| p < bound || p > 1.0 - bound).count();
    let (min, max, sum) = scores.iter().fold((f64::INFINITY, f64::NEG_INFINITY, 0.0), |(lo, hi, s), &p| {
        (lo.min(p), hi.max(p), s + p)
    });
    OverlapDiagnostics {
        n_total,
        n_extreme,
        fraction_extreme: if n_total > 0 { n_extreme as f64 / n_total as f64 } else { 0.0 },
        bound,
        mean_propensity: if n_total > 0 { sum / n_total as f64 } else { f64::NAN },
        min_propensity: min,
        max_propensity: max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_binary_and_continuous() {
        let b = split_treatment(&[0.0, 1.0, 1.0, 0.0]).unwrap();
        assert_eq!(b.treated, [false, true, true, false]);
        assert_eq!(b.threshold, None);

        let c = split_treatment(&[3.0, 1.0, 4.0, 2.0]).unwrap();
        assert_eq!(c.threshold, Some(2.5));
        assert_eq!(c.treated, [true, false, true, false]);
        assert_eq!((c.n_treated, c.n_control), (2, 2));
    }

    #[test]
    fn test_split_rejects_empty_arm() {
        assert!(split_treatment(&[1.0, 1.0, 1.0]).is_err());
        assert!(split_treatment(&[5.0, 5.0, 5.0]).is_err());
        assert!(split_treatment(&[]).is_err());
    }

    #[test]
    fn test_propensity_tracks_covariate() {
        let x: Vec<f64> = (0..200).map(|i| (i as f64 - 100.0) / 25.0).collect();
        let treated: Vec<bool> = x.iter().enumerate().map(|(i, v)| *v + 0.5 * ((i % 5) as f64 - 2.0) > 0.0).collect();
        let fit = fit_propensity(&[("x", x.as_slice())], &treated, 1.0, 500).unwrap();
        assert_eq!(fit.scores.len(), 200);
        assert!(fit.scores[0] < 0.2);
        assert!(fit.scores[199] > 0.8);
        assert!(fit.scores.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_constant_covariate_fails() {
        let x = vec![1.0; 10];
        let t: Vec<bool> = (0..10).map(|i| i % 2 == 0).collect();
        let err = fit_propensity(&[("flat", x.as_slice())], &t, 1.0, 100).unwrap_err();
        assert!(err.to_string().contains("flat"));
    }

    #[test]
    fn test_overlap_diagnostics() {
        let d = overlap_diagnostics(&[0.001, 0.2, 0.5, 0.8, 0.999], 0.01);
        assert_eq!(d.n_extreme, 2);
        assert!((d.fraction_extreme - 0.4).abs() < 1e-12);
        assert_eq!(d.min_propensity, 0.001);
        assert_eq!(d.max_propensity, 0.999);
    }
}
