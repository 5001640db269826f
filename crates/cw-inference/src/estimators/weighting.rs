//! Inverse probability weighting with Hajek-normalized weights.
//!
//! Treated units get weight `1/p`, controls `1/(1−p)`, with `p` clipped to
//! `[clip, 1 − clip]` so no weight can overflow. Weighted arm means are
//! normalized by each arm's total weight. For a median-split continuous
//! treatment the outcome contrast is divided by the treatment contrast.
//! The standard error uses the influence function of the ratio of weighted
//! means (propensity model treated as known).

use cw_core::{Error, Result};
use cw_prob::math::clip_probability;

use super::{Diagnostic, EstimatorOptions, FitDetail, MethodFit, MethodInput, positivity_warning};
use crate::propensity::{fit_propensity, overlap_diagnostics, split_treatment};

/// One unit holding more than this share of its arm's weight gets a warning.
const MAX_WEIGHT_SHARE: f64 = 0.1;

#[derive(Default)]
struct ArmSums {
    w: f64,
    w2: f64,
    wy: f64,
    wt: f64,
    max_w: f64,
}

impl ArmSums {
    fn add(&mut self, w: f64, y: f64, t: f64) {
        self.w += w;
        self.w2 += w * w;
        self.wy += w * y;
        self.wt += w * t;
        self.max_w = self.max_w.max(w);
    }

    fn ess(&self) -> f64 {
        self.w * self.w / self.w2
    }
}

pub(super) fn fit(input: &MethodInput<'_>, options: &EstimatorOptions) -> Result<MethodFit> {
    let arms = split_treatment(input.t)?;
    let ps = fit_propensity(&input.covariates, &arms.treated, options.propensity_ridge, options.max_iter)?;
    let overlap = overlap_diagnostics(&ps.scores, options.positivity_bound);

    let clip = options.propensity_clip;
    let mut n_clipped = 0usize;
    let weights: Vec<f64> = arms
        .treated
        .iter()
        .zip(&ps.scores)
        .map(|(&treated, &raw)| {
            let p = clip_probability(raw, clip);
            if p != raw {
                n_clipped += 1;
            }
            if treated { 1.0 / p } else { 1.0 / (1.0 - p) }
        })
        .collect();

    let (mut s1, mut s0) = (ArmSums::default(), ArmSums::default());
    for (i, &w) in weights.iter().enumerate() {
        let arm = if arms.treated[i] { &mut s1 } else { &mut s0 };
        arm.add(w, input.y[i], input.t[i]);
    }

    let (mu1_y, mu0_y) = (s1.wy / s1.w, s0.wy / s0.w);
    let (mu1_t, mu0_t) = (s1.wt / s1.w, s0.wt / s0.w);
    let contrast = mu1_t - mu0_t;
    if !(contrast > 1e-12) {
        return Err(Error::Computation("weighted arms show no treatment contrast".into()));
    }
    let ate = (mu1_y - mu0_y) / contrast;

    // Influence function of (μ1_z − μ0_z) / contrast with z = y − ate·t.
    let (mu1_z, mu0_z) = (mu1_y - ate * mu1_t, mu0_y - ate * mu0_t);
    let mut sum_phi2 = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        let z = input.y[i] - ate * input.t[i];
        let phi = if arms.treated[i] { w * (z - mu1_z) / s1.w } else { -w * (z - mu0_z) / s0.w };
        sum_phi2 += phi * phi;
    }
    let std_error = sum_phi2.sqrt() / contrast;

    let max_weight_share = (s1.max_w / s1.w).max(s0.max_w / s0.w);
    let mut warnings = Vec::new();
    warnings.extend(positivity_warning(&overlap, options));
    if max_weight_share > MAX_WEIGHT_SHARE {
        warnings.push(Diagnostic::warning(
            "extreme_weights",
            format!(
                "a single unit carries {:.1}% of its arm's weight; the estimate is fragile",
                100.0 * max_weight_share
            ),
        ));
    }
    if n_clipped > 0 {
        tracing::debug!(n_clipped, clip, "clipped propensity scores");
    }

    Ok(MethodFit {
        ate,
        std_error,
        df: None,
        warnings,
        detail: FitDetail::Weighting {
            threshold: arms.threshold,
            n_clipped,
            ess_treated: s1.ess(),
            ess_control: s0.ess(),
            max_weight_share,
            overlap,
        },
    })
}
