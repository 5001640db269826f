//! Refutation tests.
//!
//! Each test perturbs the data or the model, re-runs the estimator that
//! produced a fitted estimate, and judges whether the effect survives:
//!
//! - `random_common_cause`: add an independent N(0,1) confounder. The effect
//!   should not move.
//! - `placebo_treatment`: replace the treatment with noise (or a permutation).
//!   The effect should vanish.
//! - `data_subset`: re-estimate on random subsets drawn without replacement.
//!   The effect should not move.
//! - `bootstrap`: re-estimate on resamples drawn with replacement. The effect
//!   should not move, and the empirical interval is reported next to the
//!   analytic one.
//!
//! "Should not move" means `|mean(simulated) − original| <= tolerance · SE`.
//! "Should vanish" means the mean placebo effect is inside the Student-t
//! interval around zero given the spread of the placebo draws.
//!
//! Simulations run on rayon. Simulation `i` uses seed `seed + i` and results
//! are collected in index order, so the summary does not depend on thread
//! scheduling.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cw_core::{Dataset, Error, Result};
use cw_prob::{normal, student_t};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::estimators::{EstimateResult, EstimatorMethod, EstimatorOptions, point_estimate};
use crate::identify::Estimand;
use crate::resampling::{SampleSummary, percentile_interval, with_replacement, without_replacement};

/// Upper bound on simulations per test.
pub const MAX_SIMULATIONS: usize = 1000;

const RANDOM_COMMON_CAUSE_COLUMN: &str = "__random_common_cause";

/// Default bootstrap resample size, as a fraction of the dataset.
const BOOTSTRAP_SAMPLE_FRACTION: f64 = 0.8;

/// Multiple of the expected subset spread that `data_subset` still accepts.
const SUBSET_SPREAD_FACTOR: f64 = 3.0;

/// Available refutation tests, in canonical report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefutationKind {
    /// Add an independent random confounder.
    RandomCommonCause,
    /// Replace the treatment with a placebo.
    PlaceboTreatment,
    /// Re-estimate on random subsets.
    DataSubset,
    /// Re-estimate on bootstrap resamples.
    Bootstrap,
}

impl RefutationKind {
    /// All tests in canonical order.
    pub const ALL: [Self; 4] =
        [Self::RandomCommonCause, Self::PlaceboTreatment, Self::DataSubset, Self::Bootstrap];

    /// Stable identifier.
    pub fn id(self) -> &'static str {
        match self {
            Self::RandomCommonCause => "random_common_cause",
            Self::PlaceboTreatment => "placebo_treatment",
            Self::DataSubset => "data_subset",
            Self::Bootstrap => "bootstrap",
        }
    }

    /// Display name.
    pub fn label(self) -> &'static str {
        match self {
            Self::RandomCommonCause => "Random Common Cause",
            Self::PlaceboTreatment => "Placebo Treatment",
            Self::DataSubset => "Data Subset",
            Self::Bootstrap => "Bootstrap",
        }
    }

    /// Simulations run when none are requested.
    pub fn default_simulations(self) -> usize {
        match self {
            Self::RandomCommonCause => 100,
            Self::PlaceboTreatment => 50,
            Self::DataSubset => 10,
            Self::Bootstrap => 200,
        }
    }

    /// Position in [`RefutationKind::ALL`].
    pub fn rank(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RefutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RefutationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random_common_cause" | "rcc" => Ok(Self::RandomCommonCause),
            "placebo_treatment" | "placebo" | "placebo_treatment_refuter" => Ok(Self::PlaceboTreatment),
            "data_subset" | "subset" | "data_subset_refuter" => Ok(Self::DataSubset),
            "bootstrap" | "bootstrap_refuter" => Ok(Self::Bootstrap),
            other => Err(Error::Validation(format!(
                "unknown refutation test '{other}' (expected one of: {})",
                Self::ALL.map(Self::id).join(", ")
            ))),
        }
    }
}

/// How the placebo treatment is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceboType {
    /// Fresh noise with the treatment's scale (Bernoulli for a 0/1 treatment).
    #[default]
    RandomNoise,
    /// A random permutation of the observed treatment.
    Permute,
}

/// Parameters of one refutation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefutationParams {
    /// Simulations to run (`None` = the test's default).
    pub num_simulations: Option<usize>,
    /// Fraction of rows kept by `data_subset`.
    pub subset_fraction: f64,
    /// Rows per `bootstrap` resample (`None` = 80% of the dataset, at most its size).
    pub sample_size: Option<usize>,
    /// Placebo draw for `placebo_treatment`.
    pub placebo_type: PlaceboType,
    /// Allowed drift of the effect, in multiples of the original standard error.
    pub tolerance: f64,
    /// Base seed (`None` = OS entropy).
    pub seed: Option<u64>,
    /// Worker threads (0 = rayon's global pool).
    pub workers: usize,
}

impl Default for RefutationParams {
    fn default() -> Self {
        Self {
            num_simulations: None,
            subset_fraction: 0.8,
            sample_size: None,
            placebo_type: PlaceboType::RandomNoise,
            tolerance: 1.0,
            seed: None,
            workers: 0,
        }
    }
}

impl RefutationParams {
    /// Set the simulation count.
    pub fn with_simulations(mut self, n: usize) -> Self {
        self.num_simulations = Some(n);
        self
    }

    /// Set the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Simulations requested for `kind`, before capping.
    pub fn simulations_for(&self, kind: RefutationKind) -> usize {
        self.num_simulations.unwrap_or_else(|| kind.default_simulations())
    }

    /// Reject parameters no test could run with.
    pub fn validate(&self, kind: RefutationKind) -> Result<()> {
        if self.simulations_for(kind) < 2 {
            return Err(Error::Validation(format!("{kind} needs at least 2 simulations")));
        }
        if !(self.subset_fraction > 0.0 && self.subset_fraction < 1.0) {
            return Err(Error::Validation(format!(
                "subset_fraction must be in (0, 1), got {}",
                self.subset_fraction
            )));
        }
        if self.sample_size.is_some_and(|s| s < 2) {
            return Err(Error::Validation("sample_size must be >= 2".into()));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::Validation(format!("tolerance must be > 0, got {}", self.tolerance)));
        }
        Ok(())
    }
}

/// Shared flag that stops in-flight refutations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// New, not-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress of one refutation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationProgress {
    /// Test being run.
    pub test: RefutationKind,
    /// Simulations finished so far.
    pub completed: usize,
    /// Simulations scheduled.
    pub total: usize,
}

/// Progress callback; invoked from worker threads.
pub type ProgressCallback = Arc<dyn Fn(SimulationProgress) + Send + Sync>;

/// Cancellation and progress hooks for long-running refutations.
#[derive(Clone, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for RunControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl RunControl {
    /// No cancellation, no progress reporting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report progress through `f`.
    pub fn with_progress(mut self, f: impl Fn(SimulationProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(f));
        self
    }

    /// The cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report(&self, progress: SimulationProgress) {
        if let Some(cb) = &self.progress {
            cb(progress);
        }
    }
}

/// Outcome of one refutation test on one estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefutationResult {
    /// Test.
    pub test: RefutationKind,
    /// Estimator that was refuted.
    pub method: EstimatorMethod,
    /// Original ATE.
    pub original_estimate: f64,
    /// Mean ATE across simulations.
    pub new_effect: f64,
    /// Whether the effect survived.
    pub passed: bool,
    /// Two-sided p-value of the test's null (placebo: zero effect; others: original effect).
    pub p_value: f64,
    /// Tolerance in standard errors.
    pub tolerance: f64,
    /// Largest deviation the judgment allowed, in effect units.
    pub allowed_deviation: f64,
    /// Simulations requested (after capping).
    pub simulations_requested: usize,
    /// Simulations that produced an estimate.
    pub simulations_run: usize,
    /// Simulations whose estimator failed.
    pub simulations_failed: usize,
    /// Standard deviation of the simulated estimates.
    pub spread: f64,
    /// Largest spread `data_subset` accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_limit: Option<f64>,
    /// Signed relative change of `new_effect` vs. the original, in percent.
    pub delta_pct: Option<f64>,
    /// Subset fraction (`data_subset`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset_fraction: Option<f64>,
    /// Rows per resample (`bootstrap`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,
    /// Placebo draw (`placebo_treatment`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placebo_type: Option<PlaceboType>,
    /// Percentile interval of the resampled estimates (`bootstrap`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empirical_ci: Option<(f64, f64)>,
    /// Empirical / analytic interval half-width (`bootstrap`), with the analytic
    /// width rescaled to the resample size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_width_ratio: Option<f64>,
    /// Notes (capped simulation count, failed simulations).
    pub warnings: Vec<String>,
}

/// Run `test` against `fitted` with no progress reporting.
pub fn refute(
    dataset: &Dataset,
    estimand: &Estimand,
    fitted: &EstimateResult,
    test: RefutationKind,
    params: &RefutationParams,
) -> Result<RefutationResult> {
    refute_with(dataset, estimand, fitted, test, params, &RunControl::default())
}

/// Run `test` against `fitted`.
///
/// Fails with [`Error::Refutation`] when the estimate's fit handle was
/// discarded or belongs to a different estimand, when parameters are invalid,
/// or when fewer than two simulations produce an estimate; with
/// [`Error::Cancelled`] when `control` is cancelled (partial work is dropped).
pub fn refute_with(
    dataset: &Dataset,
    estimand: &Estimand,
    fitted: &EstimateResult,
    test: RefutationKind,
    params: &RefutationParams,
    control: &RunControl,
) -> Result<RefutationResult> {
    run(dataset, estimand, fitted, test, params, control).map_err(|e| e.into_refutation(test.id()))
}

struct Simulation<'a> {
    dataset: &'a Dataset,
    estimand: &'a Estimand,
    method: EstimatorMethod,
    options: &'a EstimatorOptions,
    test: RefutationKind,
    params: &'a RefutationParams,
    extra_column: String,
}

impl Simulation<'_> {
    fn run(&self, rng: &mut StdRng) -> Result<f64> {
        let n = self.dataset.n_rows();
        match self.test {
            RefutationKind::RandomCommonCause => {
                let w: Vec<f64> = (0..n).map(|_| StandardNormal.sample(&mut *rng)).collect();
                let data = self.dataset.with_column(self.extra_column.clone(), w)?;
                let est = self.estimand.with_extra_confounder(self.extra_column.clone());
                point_estimate(&data, &est, self.method, self.options)
            }
            RefutationKind::PlaceboTreatment => {
                let t = self.dataset.column(&self.estimand.treatment)?;
                let placebo = placebo_column(t, self.params.placebo_type, rng);
                let data = self.dataset.replace_column(&self.estimand.treatment, placebo)?;
                point_estimate(&data, self.estimand, self.method, self.options)
            }
            RefutationKind::DataSubset => {
                let k = ((self.params.subset_fraction * n as f64).round() as usize).max(2);
                let rows = without_replacement(rng, n, k);
                let data = self.dataset.select_rows(&rows)?;
                point_estimate(&data, self.estimand, self.method, self.options)
            }
            RefutationKind::Bootstrap => {
                let k = bootstrap_sample_size(self.params, n);
                let rows = with_replacement(rng, n, k);
                let data = self.dataset.select_rows(&rows)?;
                point_estimate(&data, self.estimand, self.method, self.options)
            }
        }
    }
}

fn placebo_column(t: &[f64], kind: PlaceboType, rng: &mut StdRng) -> Vec<f64> {
    match kind {
        PlaceboType::Permute => {
            let mut v = t.to_vec();
            v.shuffle(rng);
            v
        }
        PlaceboType::RandomNoise => {
            let s = SampleSummary::of(t).unwrap_or(SampleSummary { n: 0, mean: 0.0, sd: 1.0 });
            if t.iter().all(|&v| v == 0.0 || v == 1.0) {
                (0..t.len()).map(|_| f64::from(rng.random::<f64>() < s.mean)).collect()
            } else {
                let sd = if s.sd > 0.0 { s.sd } else { 1.0 };
                (0..t.len())
                    .map(|_| {
                        let z: f64 = StandardNormal.sample(&mut *rng);
                        s.mean + sd * z
                    })
                    .collect()
            }
        }
    }
}

fn bootstrap_sample_size(params: &RefutationParams, n_rows: usize) -> usize {
    params
        .sample_size
        .unwrap_or_else(|| ((BOOTSTRAP_SAMPLE_FRACTION * n_rows as f64) as usize).max(2))
}

/// Subset estimates scatter around the full-data estimate with standard
/// deviation about `SE · sqrt((1 − f) / f)`.
fn subset_spread_limit(std_error: f64, fraction: f64, tolerance: f64) -> f64 {
    SUBSET_SPREAD_FACTOR * tolerance * std_error * ((1.0 - fraction) / fraction).sqrt()
}

fn unused_column_name(dataset: &Dataset, base: &str) -> String {
    if !dataset.has_column(base) {
        return base.to_string();
    }
    (1..).map(|i| format!("{base}_{i}")).find(|c| !dataset.has_column(c)).unwrap_or_default()
}

fn check_handle(estimand: &Estimand, fitted: &EstimateResult, test: RefutationKind) -> Result<()> {
    let Some(handle) = fitted.fit.as_ref() else {
        return Err(Error::refutation(
            test.id(),
            format!("the {} estimate has no fit handle", fitted.method),
            "re-run the estimate and keep its fit handle (do not call without_fit)",
        ));
    };
    let matches = handle.method == fitted.method
        && handle.treatment == estimand.treatment
        && handle.outcome == estimand.outcome
        && handle.adjustment_set == estimand.adjustment_set;
    if !matches {
        return Err(Error::refutation(
            test.id(),
            format!(
                "the {} estimate was fitted for {} -> {} and does not match the estimand {} -> {}",
                fitted.method, handle.treatment, handle.outcome, estimand.treatment, estimand.outcome
            ),
            "refute an estimate produced from the same estimand",
        ));
    }
    Ok(())
}

fn run(
    dataset: &Dataset,
    estimand: &Estimand,
    fitted: &EstimateResult,
    test: RefutationKind,
    params: &RefutationParams,
    control: &RunControl,
) -> Result<RefutationResult> {
    check_handle(estimand, fitted, test)?;
    params.validate(test)?;
    dataset.validate_columns(&estimand.columns())?;
    let Some(handle) = fitted.fit.as_ref() else {
        return Err(Error::Internal("fit handle vanished after validation".into()));
    };
    let n_rows = dataset.n_rows();
    if let Some(size) = params.sample_size.filter(|&s| test == RefutationKind::Bootstrap && s > n_rows) {
        return Err(Error::refutation(
            test.id(),
            format!("sample_size {size} exceeds the {n_rows} rows of the dataset"),
            "use a sample_size no larger than the dataset",
        ));
    }

    let mut warnings = Vec::new();
    let requested = params.simulations_for(test);
    let total = if requested > MAX_SIMULATIONS {
        tracing::warn!(test = test.id(), requested, cap = MAX_SIMULATIONS, "capping simulations");
        warnings.push(format!("{requested} simulations requested; capped at {MAX_SIMULATIONS}"));
        MAX_SIMULATIONS
    } else {
        requested
    };
    let base_seed = params.seed.unwrap_or_else(|| rand::rng().random());

    let sim = Simulation {
        dataset,
        estimand,
        method: fitted.method,
        options: &handle.options,
        test,
        params,
        extra_column: unused_column_name(dataset, RANDOM_COMMON_CAUSE_COLUMN),
    };
    tracing::info!(test = test.id(), method = fitted.method.id(), simulations = total, "refutation started");

    let completed = AtomicUsize::new(0);
    let run_one = |i: usize| -> Option<Result<f64>> {
        if control.is_cancelled() {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
        let r = sim.run(&mut rng);
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        control.report(SimulationProgress { test, completed: done, total });
        Some(r)
    };
    let outcomes: Vec<Option<Result<f64>>> = if params.workers > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.workers)
            .build()
            .map_err(|e| Error::Computation(format!("failed to build refutation thread pool: {e}")))?;
        pool.install(|| (0..total).into_par_iter().map(&run_one).collect())
    } else {
        (0..total).into_par_iter().map(&run_one).collect()
    };

    if control.is_cancelled() {
        let done = completed.load(Ordering::Relaxed);
        tracing::info!(test = test.id(), done, total, "refutation cancelled");
        return Err(Error::Cancelled(format!(
            "{} on {} cancelled after {done} of {total} simulations",
            test.id(),
            fitted.method.id()
        )));
    }

    let mut draws = Vec::with_capacity(total);
    let mut first_error: Option<String> = None;
    for (i, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Some(Ok(v)) => {
                tracing::debug!(test = test.id(), simulation = i, estimate = v, "simulation");
                draws.push(v);
            }
            Some(Err(e)) => {
                tracing::debug!(test = test.id(), simulation = i, error = %e, "simulation failed");
                first_error.get_or_insert_with(|| e.to_string());
            }
            None => {}
        }
    }
    let failed = total - draws.len();
    let Some(summary) = SampleSummary::of(&draws).filter(|s| s.n >= 2) else {
        return Err(Error::refutation(
            test.id(),
            format!(
                "only {} of {total} simulations produced an estimate (first error: {})",
                draws.len(),
                first_error.unwrap_or_else(|| "none".into())
            ),
            "use more rows, a larger subset fraction or a simpler method",
        ));
    };
    if failed > 0 {
        warnings.push(format!("{failed} of {total} simulations failed and were skipped"));
    }

    let original = fitted.ate;
    let floor = 1e-9 * original.abs().max(1.0);
    let (passed, p_value, allowed) = match test {
        RefutationKind::PlaceboTreatment => {
            let df = (summary.n - 1) as f64;
            let se_mean = summary.se_mean();
            let crit = student_t::two_sided_critical(fitted.confidence_level, df)?;
            let allowed = (crit * se_mean).max(floor);
            let p = if se_mean > 0.0 {
                student_t::two_sided_p(summary.mean / se_mean, df)?
            } else if summary.mean.abs() <= floor {
                1.0
            } else {
                0.0
            };
            (summary.mean.abs() <= allowed, p, allowed)
        }
        _ => {
            let allowed = (params.tolerance * fitted.std_error).max(floor);
            let deviation = summary.mean - original;
            let p = if summary.sd > 0.0 {
                normal::two_sided_p((original - summary.mean) / summary.sd)
            } else if deviation.abs() <= floor {
                1.0
            } else {
                0.0
            };
            (deviation.abs() <= allowed, p, allowed)
        }
    };
    let spread_limit = (test == RefutationKind::DataSubset)
        .then(|| subset_spread_limit(fitted.std_error, params.subset_fraction, params.tolerance).max(floor));
    let passed = passed && spread_limit.is_none_or(|limit| summary.sd <= limit);

    let (empirical_ci, ci_width_ratio) = if test == RefutationKind::Bootstrap {
        let (lo, hi) = percentile_interval(&draws, fitted.confidence_level)?;
        let m = bootstrap_sample_size(params, n_rows);
        let analytic = fitted.ci_half_width() * (n_rows as f64 / m as f64).sqrt();
        (Some((lo, hi)), (analytic > 0.0).then(|| 0.5 * (hi - lo) / analytic))
    } else {
        (None, None)
    };

    let result = RefutationResult {
        test,
        method: fitted.method,
        original_estimate: original,
        new_effect: summary.mean,
        passed,
        p_value,
        tolerance: params.tolerance,
        allowed_deviation: allowed,
        simulations_requested: total,
        simulations_run: summary.n,
        simulations_failed: failed,
        spread: summary.sd,
        spread_limit,
        delta_pct: (original != 0.0).then(|| 100.0 * (summary.mean - original) / original.abs()),
        subset_fraction: (test == RefutationKind::DataSubset).then_some(params.subset_fraction),
        sample_size: (test == RefutationKind::Bootstrap).then(|| bootstrap_sample_size(params, n_rows)),
        placebo_type: (test == RefutationKind::PlaceboTreatment).then_some(params.placebo_type),
        empirical_ci,
        ci_width_ratio,
        warnings,
    };
    tracing::info!(
        test = test.id(),
        method = fitted.method.id(),
        new_effect = result.new_effect,
        passed = result.passed,
        "refutation complete"
    );
    Ok(result)
}
