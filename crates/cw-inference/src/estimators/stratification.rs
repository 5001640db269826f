//! Propensity score stratification.
//!
//! Units are sorted by propensity score and cut into `n_strata` equal-count
//! strata. Within each stratum the outcome is regressed on the treatment and
//! the confounders, so confounding left inside a coarse stratum does not leak
//! into the effect; the stratum effect is the treatment slope. The ATE is the
//! stratum-size-weighted average and its variance `Σ w_s² Var_s`. Strata
//! without `min_units_per_arm` units in both arms are dropped.

use cw_core::{Error, Result};
use serde::{Deserialize, Serialize};

use super::{Diagnostic, EstimatorOptions, FitDetail, MethodFit, MethodInput, positivity_warning};
use crate::propensity::{fit_propensity, overlap_diagnostics, split_treatment};
use crate::regression::{DesignMatrix, ols_fit};

/// One propensity stratum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumSummary {
    /// Stratum index (0 = lowest propensity).
    pub index: usize,
    /// Lowest score in the stratum.
    pub propensity_low: f64,
    /// Highest score in the stratum.
    pub propensity_high: f64,
    /// Treated units.
    pub n_treated: usize,
    /// Control units.
    pub n_control: usize,
    /// Within-stratum effect (`None` when dropped).
    pub effect: Option<f64>,
    /// Within-stratum standard error (`None` when dropped).
    pub std_error: Option<f64>,
}

impl StratumSummary {
    /// Whether the stratum contributed to the ATE.
    pub fn kept(&self) -> bool {
        self.effect.is_some()
    }
}

/// `(effect, variance)` of one stratum, or `None` if its regression is not
/// identified (too few rows, no treatment variation, collinear columns).
fn stratum_effect(input: &MethodInput<'_>, rows: &[usize]) -> Option<(f64, f64)> {
    let pick = |col: &[f64]| -> Vec<f64> { rows.iter().map(|&i| col[i]).collect() };
    let y = pick(input.y);
    let mut columns = Vec::with_capacity(1 + input.covariates.len());
    columns.push(pick(input.t));
    columns.extend(input.covariates.iter().map(|(_, c)| pick(*c)));
    let cols: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();

    let x = DesignMatrix::from_columns(&cols, true).ok()?;
    let ols = ols_fit(&x, &y).ok()?;
    let (effect, se) = (ols.coefficients[1], ols.std_errors[1]);
    if effect.is_finite() && se.is_finite() { Some((effect, se * se)) } else { None }
}

pub(super) fn fit(input: &MethodInput<'_>, options: &EstimatorOptions) -> Result<MethodFit> {
    let n = input.n();
    let k = options.n_strata;
    if n < k * 2 * options.min_units_per_arm {
        return Err(Error::Computation(format!(
            "{n} rows are too few for {k} strata with {} units per arm",
            options.min_units_per_arm
        )));
    }
    let arms = split_treatment(input.t)?;
    let ps = fit_propensity(&input.covariates, &arms.treated, options.propensity_ridge, options.max_iter)?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| ps.scores[a].total_cmp(&ps.scores[b]).then(a.cmp(&b)));

    let mut strata = Vec::with_capacity(k);
    let (mut ate, mut var, mut n_kept) = (0.0, 0.0, 0usize);
    let mut kept: Vec<(usize, f64, f64)> = Vec::with_capacity(k);
    for s in 0..k {
        let rows = &order[s * n / k..(s + 1) * n / k];
        let (treated, control): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&i| arms.treated[i]);
        let enough = treated.len() >= options.min_units_per_arm && control.len() >= options.min_units_per_arm;
        let est = if enough { stratum_effect(input, rows) } else { None };
        if let Some((effect, v)) = est {
            kept.push((rows.len(), effect, v));
            n_kept += rows.len();
        }
        strata.push(StratumSummary {
            index: s,
            propensity_low: ps.scores[rows[0]],
            propensity_high: ps.scores[rows[rows.len() - 1]],
            n_treated: treated.len(),
            n_control: control.len(),
            effect: est.map(|e| e.0),
            std_error: est.map(|e| e.1.sqrt()),
        });
    }

    if kept.is_empty() {
        return Err(Error::Computation(
            "no propensity stratum has enough treated and control units".into(),
        ));
    }
    for &(size, effect, v) in &kept {
        let w = size as f64 / n_kept as f64;
        ate += w * effect;
        var += w * w * v;
    }

    let mut warnings = Vec::new();
    let n_dropped = k - kept.len();
    if n_dropped > 0 {
        warnings.push(Diagnostic::warning(
            "stratification",
            format!(
                "{n_dropped} of {k} strata dropped for lacking overlap ({} of {n} units excluded)",
                n - n_kept
            ),
        ));
    }
    let overlap = overlap_diagnostics(&ps.scores, options.positivity_bound);
    warnings.extend(positivity_warning(&overlap, options));

    Ok(MethodFit {
        ate,
        std_error: var.sqrt(),
        df: None,
        warnings,
        detail: FitDetail::Stratification { threshold: arms.threshold, strata, overlap },
    })
}
