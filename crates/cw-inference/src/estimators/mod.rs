//! ATE estimators behind one uniform contract.
//!
//! Every method consumes the same `(dataset, estimand)` pair and produces an
//! [`EstimateResult`]. Dispatch is a `match` on the closed
//! [`EstimatorMethod`] enum; each method lives in its own submodule and
//! returns a point estimate, a standard error and method-specific detail.
//! Confidence intervals, p-values and the `ci_lower <= ate <= ci_upper`
//! post-condition are handled here, once, for all methods.

mod linear;
mod matching;
mod stratification;
mod weighting;

pub use stratification::StratumSummary;

use std::fmt;
use std::str::FromStr;

use cw_core::{Dataset, Error, Result};
use cw_prob::{normal, student_t};
use serde::{Deserialize, Serialize};

use crate::identify::Estimand;
use crate::propensity::OverlapDiagnostics;

/// Supported estimation methods, in canonical report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMethod {
    /// OLS of the outcome on treatment and confounders.
    LinearRegression,
    /// Nearest-neighbour matching on the propensity score.
    PropensityScoreMatching,
    /// Propensity-score quantile strata.
    PropensityScoreStratification,
    /// Inverse probability weighting.
    #[serde(rename = "propensity_score_weighting", alias = "inverse_probability_weighting")]
    InverseProbabilityWeighting,
}

impl EstimatorMethod {
    /// All methods in canonical order.
    pub const ALL: [Self; 4] = [
        Self::LinearRegression,
        Self::PropensityScoreMatching,
        Self::PropensityScoreStratification,
        Self::InverseProbabilityWeighting,
    ];

    /// Stable identifier used in configs and reports.
    pub fn id(self) -> &'static str {
        match self {
            Self::LinearRegression => "linear_regression",
            Self::PropensityScoreMatching => "propensity_score_matching",
            Self::PropensityScoreStratification => "propensity_score_stratification",
            Self::InverseProbabilityWeighting => "propensity_score_weighting",
        }
    }

    /// Display name.
    pub fn label(self) -> &'static str {
        match self {
            Self::LinearRegression => "Linear Regression",
            Self::PropensityScoreMatching => "Propensity Score Matching",
            Self::PropensityScoreStratification => "Propensity Score Stratification",
            Self::InverseProbabilityWeighting => "Inverse Probability Weighting",
        }
    }

    /// Whether the method models treatment assignment from covariates.
    pub fn requires_covariates(self) -> bool {
        !matches!(self, Self::LinearRegression)
    }

    /// Position in [`EstimatorMethod::ALL`].
    pub fn rank(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EstimatorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EstimatorMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "linear_regression" | "linear" | "ols" => Ok(Self::LinearRegression),
            "propensity_score_matching" | "matching" => Ok(Self::PropensityScoreMatching),
            "propensity_score_stratification" | "stratification" => {
                Ok(Self::PropensityScoreStratification)
            }
            "propensity_score_weighting" | "inverse_probability_weighting" | "weighting" | "ipw" => {
                Ok(Self::InverseProbabilityWeighting)
            }
            other => Err(Error::Validation(format!(
                "unknown estimation method '{other}' (expected one of: {})",
                Self::ALL.map(Self::id).join(", ")
            ))),
        }
    }
}

/// Tuning knobs shared by the estimators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorOptions {
    /// Number of propensity strata.
    pub n_strata: usize,
    /// Minimum treated and control units a stratum needs to be kept.
    pub min_units_per_arm: usize,
    /// Minimum treated and control units matching needs overall.
    pub min_matching_units: usize,
    /// Maximum propensity distance for a match (`None` = unrestricted).
    pub matching_caliper: Option<f64>,
    /// Bootstrap resamples for the matching standard error.
    pub bootstrap_samples: usize,
    /// IPW propensities are clipped to `[propensity_clip, 1 − propensity_clip]`.
    pub propensity_clip: f64,
    /// Scores outside `[positivity_bound, 1 − positivity_bound]` count as extreme.
    pub positivity_bound: f64,
    /// Fraction of extreme scores above which a positivity warning is attached.
    pub positivity_max_fraction: f64,
    /// L2 penalty of the propensity model.
    pub propensity_ridge: f64,
    /// Iteration cap of the propensity optimizer.
    pub max_iter: u64,
    /// Base seed for the matching bootstrap.
    pub seed: u64,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            n_strata: 5,
            min_units_per_arm: 2,
            min_matching_units: 5,
            matching_caliper: None,
            bootstrap_samples: 100,
            propensity_clip: 0.01,
            positivity_bound: 0.01,
            positivity_max_fraction: 0.05,
            propensity_ridge: 1.0,
            max_iter: 500,
            seed: 0,
        }
    }
}

impl EstimatorOptions {
    /// Reject options no estimator could run with.
    pub fn validate(&self) -> Result<()> {
        if self.n_strata == 0 {
            return Err(Error::Validation("n_strata must be >= 1".into()));
        }
        if self.min_units_per_arm < 2 {
            return Err(Error::Validation("min_units_per_arm must be >= 2".into()));
        }
        if self.min_matching_units == 0 {
            return Err(Error::Validation("min_matching_units must be >= 1".into()));
        }
        if let Some(c) = self.matching_caliper {
            if !(c.is_finite() && c > 0.0) {
                return Err(Error::Validation(format!("matching_caliper must be > 0, got {c}")));
            }
        }
        if self.bootstrap_samples < 2 {
            return Err(Error::Validation("bootstrap_samples must be >= 2".into()));
        }
        for (name, v) in [
            ("propensity_clip", self.propensity_clip),
            ("positivity_bound", self.positivity_bound),
        ] {
            if !(v > 0.0 && v < 0.5) {
                return Err(Error::Validation(format!("{name} must be in (0, 0.5), got {v}")));
            }
        }
        if !(0.0..=1.0).contains(&self.positivity_max_fraction) {
            return Err(Error::Validation("positivity_max_fraction must be in [0, 1]".into()));
        }
        if !(self.propensity_ridge.is_finite() && self.propensity_ridge >= 0.0) {
            return Err(Error::Validation("propensity_ridge must be finite and >= 0".into()));
        }
        if self.max_iter == 0 {
            return Err(Error::Validation("max_iter must be >= 1".into()));
        }
        Ok(())
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Result usable but questionable.
    Warning,
    /// Result should not be trusted.
    Critical,
}

/// A diagnostic attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Category (e.g. `"positivity"`).
    pub category: String,
    /// Severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Informational diagnostic.
    pub fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self { category: category.into(), severity: Severity::Info, message: message.into() }
    }

    /// Warning diagnostic.
    pub fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self { category: category.into(), severity: Severity::Warning, message: message.into() }
    }
}

/// Method-specific fit metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitDetail {
    /// OLS coefficients.
    Linear {
        /// Design column names (`intercept`, treatment, confounders...).
        names: Vec<String>,
        /// Coefficients.
        coefficients: Vec<f64>,
        /// Standard errors.
        std_errors: Vec<f64>,
        /// Residual degrees of freedom.
        df: usize,
        /// Coefficient of determination.
        r_squared: f64,
    },
    /// Propensity matching.
    Matching {
        /// Median split point for a continuous treatment.
        threshold: Option<f64>,
        /// Treated units.
        n_treated: usize,
        /// Control units.
        n_control: usize,
        /// Matched pairs used.
        n_matches: usize,
        /// Units without a match inside the caliper.
        n_unmatched: usize,
        /// Bootstrap resamples that produced an estimate.
        bootstrap_draws: usize,
        /// Propensity overlap.
        overlap: OverlapDiagnostics,
    },
    /// Propensity stratification.
    Stratification {
        /// Median split point for a continuous treatment.
        threshold: Option<f64>,
        /// Per-stratum breakdown.
        strata: Vec<StratumSummary>,
        /// Propensity overlap.
        overlap: OverlapDiagnostics,
    },
    /// Inverse probability weighting.
    Weighting {
        /// Median split point for a continuous treatment.
        threshold: Option<f64>,
        /// Units whose propensity was clipped.
        n_clipped: usize,
        /// Kish effective sample size of the treated arm.
        ess_treated: f64,
        /// Kish effective sample size of the control arm.
        ess_control: f64,
        /// Largest share of an arm's total weight held by one unit.
        max_weight_share: f64,
        /// Propensity overlap (before clipping).
        overlap: OverlapDiagnostics,
    },
}

/// Raw-fit metadata kept with an estimate so refuters can re-run the method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitHandle {
    /// Method that produced the fit.
    pub method: EstimatorMethod,
    /// Treatment variable.
    pub treatment: String,
    /// Outcome variable.
    pub outcome: String,
    /// Adjustment set used.
    pub adjustment_set: Vec<String>,
    /// Options the method ran with.
    pub options: EstimatorOptions,
    /// Method-specific detail.
    pub detail: FitDetail,
}

/// Per-method effect estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateResult {
    /// Method.
    pub method: EstimatorMethod,
    /// Point estimate of the ATE (outcome change per unit of treatment).
    pub ate: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
    /// Confidence level of the interval.
    pub confidence_level: f64,
    /// Standard error of `ate`.
    pub std_error: f64,
    /// Two-sided p-value against zero effect.
    pub p_value: f64,
    /// Whether the interval excludes zero.
    pub significant: bool,
    /// Rows used.
    pub n_obs: usize,
    /// Diagnostics.
    pub warnings: Vec<Diagnostic>,
    /// Raw-fit metadata (dropped by [`EstimateResult::without_fit`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitHandle>,
}

impl EstimateResult {
    /// Copy without the fit handle (e.g. for export).
    pub fn without_fit(&self) -> Self {
        Self { fit: None, ..self.clone() }
    }

    /// Whether `value` lies inside the confidence interval.
    pub fn ci_contains(&self, value: f64) -> bool {
        self.ci_lower <= value && value <= self.ci_upper
    }

    /// Half the interval width.
    pub fn ci_half_width(&self) -> f64 {
        0.5 * (self.ci_upper - self.ci_lower)
    }

    /// Whether any diagnostic of `category` is attached.
    pub fn has_warning(&self, category: &str) -> bool {
        self.warnings.iter().any(|w| w.category == category)
    }
}

/// Columns one method reads, borrowed from the dataset.
pub(crate) struct MethodInput<'a> {
    pub treatment: &'a str,
    pub y: &'a [f64],
    pub t: &'a [f64],
    pub covariates: Vec<(&'a str, &'a [f64])>,
}

impl<'a> MethodInput<'a> {
    fn from_dataset(dataset: &'a Dataset, estimand: &'a Estimand) -> Result<Self> {
        let columns = estimand.columns();
        dataset.validate_columns(&columns)?;
        let mut covariates = Vec::with_capacity(estimand.adjustment_set.len());
        for name in &estimand.adjustment_set {
            covariates.push((name.as_str(), dataset.column(name)?));
        }
        Ok(Self {
            treatment: &estimand.treatment,
            y: dataset.column(&estimand.outcome)?,
            t: dataset.column(&estimand.treatment)?,
            covariates,
        })
    }

    pub fn n(&self) -> usize {
        self.y.len()
    }

    /// Owned copy of the given rows (bootstrap resamples).
    pub fn resample(&self, rows: &[usize]) -> OwnedInput {
        let pick = |col: &[f64]| rows.iter().map(|&r| col[r]).collect::<Vec<f64>>();
        OwnedInput {
            treatment: self.treatment.to_string(),
            y: pick(self.y),
            t: pick(self.t),
            covariates: self.covariates.iter().map(|(n, c)| (n.to_string(), pick(c))).collect(),
        }
    }
}

/// Owned counterpart of [`MethodInput`].
pub(crate) struct OwnedInput {
    treatment: String,
    y: Vec<f64>,
    t: Vec<f64>,
    covariates: Vec<(String, Vec<f64>)>,
}

impl OwnedInput {
    pub fn view(&self) -> MethodInput<'_> {
        MethodInput {
            treatment: &self.treatment,
            y: &self.y,
            t: &self.t,
            covariates: self.covariates.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect(),
        }
    }
}

/// Whether a method should also quantify its uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Uncertainty {
    Full,
    PointOnly,
}

/// What one method returns before intervals are attached.
pub(crate) struct MethodFit {
    pub ate: f64,
    pub std_error: f64,
    /// Degrees of freedom for a Student-t interval; `None` means normal.
    pub df: Option<f64>,
    pub warnings: Vec<Diagnostic>,
    pub detail: FitDetail,
}

pub(crate) fn positivity_warning(
    overlap: &OverlapDiagnostics,
    options: &EstimatorOptions,
) -> Option<Diagnostic> {
    if overlap.fraction_extreme <= options.positivity_max_fraction {
        return None;
    }
    tracing::warn!(
        fraction = overlap.fraction_extreme,
        bound = overlap.bound,
        "positivity violation in propensity scores"
    );
    Some(Diagnostic::warning(
        "positivity",
        format!(
            "{:.1}% of units have a propensity score outside [{}, {}]; the effect relies on \
             extrapolation and clipped weights",
            100.0 * overlap.fraction_extreme,
            overlap.bound,
            1.0 - overlap.bound
        ),
    ))
}

fn check_inputs(input: &MethodInput<'_>, estimand: &Estimand, method: EstimatorMethod) -> Result<()> {
    if method.requires_covariates() && estimand.adjustment_set.is_empty() {
        return Err(Error::identification(
            format!("{} needs at least one confounder to model treatment assignment", method.id()),
            "declare confounders or use linear_regression",
        ));
    }
    let t0 = input.t[0];
    if input.t.iter().all(|&v| v == t0) {
        return Err(Error::estimation(
            method.id(),
            format!("treatment '{}' has zero variance", estimand.treatment),
            "the treatment must vary across rows",
        ));
    }
    Ok(())
}

fn fit_method(
    input: &MethodInput<'_>,
    method: EstimatorMethod,
    options: &EstimatorOptions,
    uncertainty: Uncertainty,
) -> Result<MethodFit> {
    match method {
        EstimatorMethod::LinearRegression => linear::fit(input),
        EstimatorMethod::PropensityScoreMatching => matching::fit(input, options, uncertainty),
        EstimatorMethod::PropensityScoreStratification => stratification::fit(input, options),
        EstimatorMethod::InverseProbabilityWeighting => weighting::fit(input, options),
    }
    .map_err(|e| e.into_estimation(method.id()))
}

/// Estimate the ATE with default [`EstimatorOptions`].
pub fn estimate(
    dataset: &Dataset,
    estimand: &Estimand,
    method: EstimatorMethod,
    confidence_level: f64,
) -> Result<EstimateResult> {
    estimate_with(dataset, estimand, method, confidence_level, &EstimatorOptions::default())
}

/// Estimate the ATE of `estimand` with `method`.
///
/// Fails with [`Error::InvalidDataset`] when a declared column is missing or
/// non-finite, [`Error::Identification`] when a propensity method has no
/// covariates, and [`Error::Estimation`] for every method-level failure.
pub fn estimate_with(
    dataset: &Dataset,
    estimand: &Estimand,
    method: EstimatorMethod,
    confidence_level: f64,
    options: &EstimatorOptions,
) -> Result<EstimateResult> {
    if !(confidence_level.is_finite() && confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(Error::Validation(format!(
            "confidence_level must be in (0,1), got {confidence_level}"
        )));
    }
    options.validate()?;
    let input = MethodInput::from_dataset(dataset, estimand)?;
    check_inputs(&input, estimand, method)?;

    let fit = fit_method(&input, method, options, Uncertainty::Full)?;
    if !fit.ate.is_finite() {
        return Err(Error::estimation(
            method.id(),
            "effect estimate is not finite",
            "check for extreme values or near-constant columns",
        ));
    }
    if !(fit.std_error.is_finite() && fit.std_error >= 0.0) {
        return Err(Error::estimation(
            method.id(),
            format!("standard error is not usable ({})", fit.std_error),
            "add rows or reduce the number of confounders",
        ));
    }

    let (crit, p_value) = match fit.df {
        Some(df) => {
            let stat = z_or_t(fit.ate, fit.std_error);
            (
                student_t::two_sided_critical(confidence_level, df)?,
                student_t::two_sided_p(stat, df)?,
            )
        }
        None => {
            let stat = z_or_t(fit.ate, fit.std_error);
            (normal::two_sided_critical(confidence_level)?, normal::two_sided_p(stat))
        }
    };
    let half = crit * fit.std_error;
    let (ci_lower, ci_upper) = (fit.ate - half, fit.ate + half);
    if !(ci_lower <= fit.ate && fit.ate <= ci_upper) {
        return Err(Error::Internal(format!(
            "{}: interval [{ci_lower}, {ci_upper}] does not contain estimate {}",
            method.id(),
            fit.ate
        )));
    }

    let mut warnings: Vec<Diagnostic> =
        estimand.caveats.iter().map(|c| Diagnostic::info("identification", c.clone())).collect();
    warnings.extend(fit.warnings);

    tracing::debug!(
        method = method.id(),
        ate = fit.ate,
        std_error = fit.std_error,
        ci_lower,
        ci_upper,
        "estimate complete"
    );

    Ok(EstimateResult {
        method,
        ate: fit.ate,
        ci_lower,
        ci_upper,
        confidence_level,
        std_error: fit.std_error,
        p_value,
        significant: ci_lower > 0.0 || ci_upper < 0.0,
        n_obs: input.n(),
        warnings,
        fit: Some(FitHandle {
            method,
            treatment: estimand.treatment.clone(),
            outcome: estimand.outcome.clone(),
            adjustment_set: estimand.adjustment_set.clone(),
            options: options.clone(),
            detail: fit.detail,
        }),
    })
}

fn z_or_t(ate: f64, se: f64) -> f64 {
    if se > 0.0 {
        ate / se
    } else if ate == 0.0 {
        0.0
    } else {
        ate.signum() * f64::INFINITY
    }
}

/// Point estimate only, skipping uncertainty quantification.
///
/// Used by the refuters, which re-run a method many times and only need the
/// effect. Matching skips its bootstrap here.
pub fn point_estimate(
    dataset: &Dataset,
    estimand: &Estimand,
    method: EstimatorMethod,
    options: &EstimatorOptions,
) -> Result<f64> {
    let input = MethodInput::from_dataset(dataset, estimand)?;
    check_inputs(&input, estimand, method)?;
    let fit = fit_method(&input, method, options, Uncertainty::PointOnly)?;
    if !fit.ate.is_finite() {
        return Err(Error::estimation(method.id(), "effect estimate is not finite", "inspect the data"));
    }
    Ok(fit.ate)
}
