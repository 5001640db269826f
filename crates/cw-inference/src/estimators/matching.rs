//! Nearest-neighbour propensity score matching.
//!
//! Every unit is matched, with replacement, to the opposite-arm unit with the
//! closest propensity score (ATT and ATC matches pooled). The effect is the
//! ratio `Σ Δy / Σ Δt` over matched pairs, which is the mean outcome
//! difference for a 0/1 treatment and a per-unit effect for a median-split
//! continuous one. The standard error comes from a seeded rayon bootstrap.

use cw_core::{Error, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use super::{Diagnostic, EstimatorOptions, FitDetail, MethodFit, MethodInput, Uncertainty, positivity_warning};
use crate::propensity::{OverlapDiagnostics, fit_propensity, overlap_diagnostics, split_treatment};
use crate::resampling::{SampleSummary, with_replacement};

struct MatchOutcome {
    ate: f64,
    threshold: Option<f64>,
    n_treated: usize,
    n_control: usize,
    n_matches: usize,
    n_unmatched: usize,
    overlap: OverlapDiagnostics,
}

/// Closest entry of `sorted` (by score) to `p`: `(row, distance)`.
fn nearest(sorted: &[(f64, usize)], p: f64) -> Option<(usize, f64)> {
    let pos = sorted.partition_point(|&(s, _)| s < p);
    let below = pos.checked_sub(1).map(|i| sorted[i]);
    let above = sorted.get(pos).copied();
    match (below, above) {
        (Some((sb, rb)), Some((sa, ra))) => {
            Some(if (p - sb) <= (sa - p) { (rb, p - sb) } else { (ra, sa - p) })
        }
        (Some((s, r)), None) | (None, Some((s, r))) => Some((r, (s - p).abs())),
        (None, None) => None,
    }
}

fn match_once(input: &MethodInput<'_>, options: &EstimatorOptions) -> Result<MatchOutcome> {
    let arms = split_treatment(input.t)?;
    let need = options.min_matching_units;
    if arms.n_treated < need || arms.n_control < need {
        return Err(Error::Computation(format!(
            "too few comparable units: {} treated, {} control (need {need} per arm)",
            arms.n_treated, arms.n_control
        )));
    }
    let ps = fit_propensity(&input.covariates, &arms.treated, options.propensity_ridge, options.max_iter)?;

    let mut treated: Vec<(f64, usize)> = Vec::with_capacity(arms.n_treated);
    let mut control: Vec<(f64, usize)> = Vec::with_capacity(arms.n_control);
    for (i, (&is_treated, &p)) in arms.treated.iter().zip(&ps.scores).enumerate() {
        if is_treated { treated.push((p, i)) } else { control.push((p, i)) }
    }
    let by_score = |a: &(f64, usize), b: &(f64, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
    treated.sort_by(by_score);
    control.sort_by(by_score);

    let (mut sum_dy, mut sum_dt) = (0.0, 0.0);
    let (mut n_matches, mut n_unmatched) = (0usize, 0usize);
    let mut add = |ti: usize, ci: usize| {
        sum_dy += input.y[ti] - input.y[ci];
        sum_dt += input.t[ti] - input.t[ci];
        n_matches += 1;
    };
    for &(p, ti) in &treated {
        let Some((ci, dist)) = nearest(&control, p) else { continue };
        if options.matching_caliper.is_some_and(|c| dist > c) {
            n_unmatched += 1;
        } else {
            add(ti, ci);
        }
    }
    for &(p, ci) in &control {
        let Some((ti, dist)) = nearest(&treated, p) else { continue };
        if options.matching_caliper.is_some_and(|c| dist > c) {
            n_unmatched += 1;
        } else {
            add(ti, ci);
        }
    }

    if n_matches == 0 {
        return Err(Error::Computation("no unit found a match within the caliper".into()));
    }
    if !(sum_dt > 0.0) {
        return Err(Error::Computation("matched pairs show no treatment contrast".into()));
    }

    Ok(MatchOutcome {
        ate: sum_dy / sum_dt,
        threshold: arms.threshold,
        n_treated: arms.n_treated,
        n_control: arms.n_control,
        n_matches,
        n_unmatched,
        overlap: overlap_diagnostics(&ps.scores, options.positivity_bound),
    })
}

/// Bootstrap standard error; resample `b` uses seed `options.seed + b`.
fn bootstrap_se(input: &MethodInput<'_>, options: &EstimatorOptions) -> Result<(f64, usize)> {
    let n = input.n();
    let draws: Vec<Option<f64>> = (0..options.bootstrap_samples)
        .into_par_iter()
        .map(|b| {
            let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(b as u64));
            let rows = with_replacement(&mut rng, n, n);
            let owned = input.resample(&rows);
            match_once(&owned.view(), options).ok().map(|m| m.ate)
        })
        .collect();
    let ok: Vec<f64> = draws.into_iter().flatten().collect();
    if ok.len() < 2 {
        return Err(Error::Computation(format!(
            "only {} of {} bootstrap resamples produced a match estimate",
            ok.len(),
            options.bootstrap_samples
        )));
    }
    let summary = SampleSummary::of(&ok)
        .ok_or_else(|| Error::Internal("empty bootstrap summary".into()))?;
    Ok((summary.sd, ok.len()))
}

pub(super) fn fit(
    input: &MethodInput<'_>,
    options: &EstimatorOptions,
    uncertainty: Uncertainty,
) -> Result<MethodFit> {
    let m = match_once(input, options)?;
    let mut warnings = Vec::new();
    if m.n_unmatched > 0 {
        warnings.push(Diagnostic::warning(
            "matching",
            format!("{} units had no match within the caliper and were skipped", m.n_unmatched),
        ));
    }

    let (std_error, bootstrap_draws) = match uncertainty {
        Uncertainty::PointOnly => (f64::NAN, 0),
        Uncertainty::Full => {
            let (se, draws) = bootstrap_se(input, options)?;
            if draws < options.bootstrap_samples {
                warnings.push(Diagnostic::warning(
                    "bootstrap",
                    format!(
                        "{} of {} bootstrap resamples failed and were skipped",
                        options.bootstrap_samples - draws,
                        options.bootstrap_samples
                    ),
                ));
            }
            (se, draws)
        }
    };
    warnings.extend(positivity_warning(&m.overlap, options));

    Ok(MethodFit {
        ate: m.ate,
        std_error,
        df: None,
        warnings,
        detail: FitDetail::Matching {
            threshold: m.threshold,
            n_treated: m.n_treated,
            n_control: m.n_control,
            n_matches: m.n_matches,
            n_unmatched: m.n_unmatched,
            bootstrap_draws,
            overlap: m.overlap,
        },
    })
}
