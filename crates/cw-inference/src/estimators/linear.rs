//! Backdoor-adjusted linear regression.

use cw_core::Result;

use super::{Diagnostic, FitDetail, MethodFit, MethodInput};
use crate::regression::{DesignMatrix, ols_fit};

/// Below this many residual degrees of freedom the t interval gets very wide.
const SMALL_SAMPLE_DF: usize = 30;

/// OLS of `y` on `[1, t, confounders...]`; the ATE is the treatment slope.
pub(super) fn fit(input: &MethodInput<'_>) -> Result<MethodFit> {
    let mut cols: Vec<&[f64]> = Vec::with_capacity(1 + input.covariates.len());
    cols.push(input.t);
    cols.extend(input.covariates.iter().map(|(_, c)| *c));
    let x = DesignMatrix::from_columns(&cols, true)?;
    let ols = ols_fit(&x, input.y)?;

    let mut warnings = Vec::new();
    if ols.df < SMALL_SAMPLE_DF {
        warnings.push(Diagnostic::warning(
            "sample_size",
            format!("only {} residual degrees of freedom; the interval is imprecise", ols.df),
        ));
    }

    let mut names = vec!["intercept".to_string(), input.treatment.to_string()];
    names.extend(input.covariates.iter().map(|(n, _)| n.to_string()));

    Ok(MethodFit {
        ate: ols.coefficients[1],
        std_error: ols.std_errors[1],
        df: Some(ols.df as f64),
        warnings,
        detail: FitDetail::Linear {
            names,
            coefficients: ols.coefficients,
            std_errors: ols.std_errors,
            df: ols.df,
            r_squared: ols.r_squared,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_adjusts_for_confounder() {
        // y = 1 + 2 t + 3 c exactly, with t correlated to c.
        let c: Vec<f64> = (0..40).map(|i| (i as f64 * 0.37).sin()).collect();
        let t: Vec<f64> = c.iter().enumerate().map(|(i, v)| 2.0 * v + (i % 3) as f64).collect();
        let y: Vec<f64> = t.iter().zip(&c).map(|(t, c)| 1.0 + 2.0 * t + 3.0 * c).collect();
        let input = MethodInput { treatment: "t", y: &y, t: &t, covariates: vec![("c", c.as_slice())] };
        let f = fit(&input).unwrap();
        assert_relative_eq!(f.ate, 2.0, epsilon = 1e-9);
        assert_eq!(f.df, Some(37.0));
        match f.detail {
            FitDetail::Linear { names, .. } => assert_eq!(names, ["intercept", "t", "c"]),
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn test_small_sample_warning() {
        let t = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [0.1, 1.2, 1.9, 3.2, 3.9, 5.1];
        let input = MethodInput { treatment: "t", y: &y, t: &t, covariates: vec![] };
        let f = fit(&input).unwrap();
        assert_eq!(f.warnings.len(), 1);
        assert_eq!(f.warnings[0].category, "sample_size");
    }
}
