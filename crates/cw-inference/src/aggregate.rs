//! Comparison table and robustness summary.
//!
//! Both are method-indexed and stably ordered (canonical method order, then
//! canonical test order, then submission order). Failed items stay in the
//! table as `failed` rows carrying the error kind, message and hint, so the
//! counts always reconcile with what was requested.

use cw_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::estimators::{Diagnostic, EstimateResult, EstimatorMethod};
use crate::interpret::{interpret_estimate, interpret_refutation};
use crate::refute::{RefutationKind, RefutationResult};

/// Result of one requested estimator.
#[derive(Debug)]
pub struct MethodOutcome {
    /// Method that was requested.
    pub method: EstimatorMethod,
    /// Estimate, or why it failed.
    pub result: Result<EstimateResult>,
}

/// Result of one requested refutation.
#[derive(Debug)]
pub struct RefutationOutcome {
    /// Estimator whose estimate was refuted.
    pub method: EstimatorMethod,
    /// Test that was requested.
    pub test: RefutationKind,
    /// Refutation, or why it failed.
    pub result: Result<RefutationResult>,
}

/// Row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Completed.
    Ok,
    /// Failed; see the row's `failure`.
    Failed,
}

/// Why a row failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Error category (see [`cw_core::Error::kind`]).
    pub kind: String,
    /// Error message.
    pub message: String,
    /// Remediation hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl From<&Error> for FailureInfo {
    fn from(e: &Error) -> Self {
        Self { kind: e.kind().to_string(), message: e.to_string(), hint: e.hint().map(str::to_string) }
    }
}

/// One estimator's row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    /// Method.
    pub method: EstimatorMethod,
    /// Display name.
    pub label: String,
    /// Status.
    pub status: RowStatus,
    /// The estimate (without its fit handle) when it succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<EstimateResult>,
    /// Plain-language explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    /// Failure details when it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

/// Method-indexed comparison of effect estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonTable {
    /// Rows in canonical method order.
    pub rows: Vec<ComparisonRow>,
    /// Methods requested.
    pub requested: usize,
    /// Methods that produced an estimate.
    pub succeeded: usize,
    /// Methods that failed.
    pub failed: usize,
}

impl ComparisonTable {
    /// Row for `method`, if it was requested.
    pub fn row(&self, method: EstimatorMethod) -> Option<&ComparisonRow> {
        self.rows.iter().find(|r| r.method == method)
    }

    /// Successful estimates in table order.
    pub fn estimates(&self) -> impl Iterator<Item = &EstimateResult> {
        self.rows.iter().filter_map(|r| r.estimate.as_ref())
    }

    /// e.g. `"4 requested, 3 succeeded, 1 failed"`.
    pub fn headline(&self) -> String {
        format!("{} requested, {} succeeded, {} failed", self.requested, self.succeeded, self.failed)
    }
}

/// One (method, test) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessRow {
    /// Estimator.
    pub method: EstimatorMethod,
    /// Test.
    pub test: RefutationKind,
    /// Status.
    pub status: RowStatus,
    /// Whether the effect survived (`None` when the test failed to run).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    /// Original estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_estimate: Option<f64>,
    /// Mean refuted estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_effect: Option<f64>,
    /// Signed relative change vs. the original, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_pct: Option<f64>,
    /// Full test result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RefutationResult>,
    /// Plain-language explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

/// Robustness of every refuted estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessSummary {
    /// Rows in canonical (method, test) order.
    pub rows: Vec<RobustnessRow>,
    /// Refutations requested.
    pub requested: usize,
    /// Refutations that ran to completion.
    pub completed: usize,
    /// Completed refutations the effect survived.
    pub passed: usize,
    /// Completed refutations the effect did not survive.
    pub failed_checks: usize,
    /// Refutations that could not run.
    pub errors: usize,
}

impl RobustnessSummary {
    /// Row for `(method, test)`, if it was requested.
    pub fn row(&self, method: EstimatorMethod, test: RefutationKind) -> Option<&RobustnessRow> {
        self.rows.iter().find(|r| r.method == method && r.test == test)
    }

    /// Whether every requested refutation ran and passed.
    pub fn all_passed(&self) -> bool {
        self.requested > 0 && self.passed == self.requested
    }

    /// Rows of one estimator.
    pub fn for_method(&self, method: EstimatorMethod) -> impl Iterator<Item = &RobustnessRow> {
        self.rows.iter().filter(move |r| r.method == method)
    }
}

/// Build the comparison table.
pub fn aggregate_estimates(outcomes: &[MethodOutcome]) -> ComparisonTable {
    let mut rows: Vec<ComparisonRow> = outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(est) => {
                let (treatment, outcome) = est
                    .fit
                    .as_ref()
                    .map_or(("treatment", "outcome"), |h| (h.treatment.as_str(), h.outcome.as_str()));
                ComparisonRow {
                    method: o.method,
                    label: o.method.label().to_string(),
                    status: RowStatus::Ok,
                    interpretation: Some(interpret_estimate(est, treatment, outcome)),
                    estimate: Some(est.without_fit()),
                    failure: None,
                }
            }
            Err(e) => ComparisonRow {
                method: o.method,
                label: o.method.label().to_string(),
                status: RowStatus::Failed,
                estimate: None,
                interpretation: None,
                failure: Some(FailureInfo::from(e)),
            },
        })
        .collect();
    rows.sort_by_key(|r| r.method.rank());

    let succeeded = rows.iter().filter(|r| r.status == RowStatus::Ok).count();
    ComparisonTable { requested: rows.len(), succeeded, failed: rows.len() - succeeded, rows }
}

/// Build the robustness summary.
pub fn aggregate_refutations(outcomes: &[RefutationOutcome]) -> RobustnessSummary {
    let mut rows: Vec<RobustnessRow> = outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(r) => RobustnessRow {
                method: o.method,
                test: o.test,
                status: RowStatus::Ok,
                passed: Some(r.passed),
                original_estimate: Some(r.original_estimate),
                new_effect: Some(r.new_effect),
                delta_pct: r.delta_pct,
                interpretation: Some(interpret_refutation(r)),
                result: Some(r.clone()),
                failure: None,
            },
            Err(e) => RobustnessRow {
                method: o.method,
                test: o.test,
                status: RowStatus::Failed,
                passed: None,
                original_estimate: None,
                new_effect: None,
                delta_pct: None,
                result: None,
                interpretation: None,
                failure: Some(FailureInfo::from(e)),
            },
        })
        .collect();
    rows.sort_by_key(|r| (r.method.rank(), r.test.rank()));

    let completed = rows.iter().filter(|r| r.status == RowStatus::Ok).count();
    let passed = rows.iter().filter(|r| r.passed == Some(true)).count();
    RobustnessSummary {
        requested: rows.len(),
        completed,
        passed,
        failed_checks: completed - passed,
        errors: rows.len() - completed,
        rows,
    }
}

/// Diagnostics of every successful estimate, tagged with the method.
pub fn collect_warnings(table: &ComparisonTable) -> Vec<(EstimatorMethod, &Diagnostic)> {
    table
        .rows
        .iter()
        .filter_map(|r| r.estimate.as_ref().map(|e| (r.method, e)))
        .flat_map(|(m, e)| e.warnings.iter().map(move |w| (m, w)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(method: EstimatorMethod, ate: f64) -> MethodOutcome {
        MethodOutcome {
            method,
            result: Ok(EstimateResult {
                method,
                ate,
                ci_lower: ate - 0.1,
                ci_upper: ate + 0.1,
                confidence_level: 0.95,
                std_error: 0.05,
                p_value: 0.001,
                significant: true,
                n_obs: 500,
                warnings: vec![Diagnostic::warning("positivity", "extreme")],
                fit: None,
            }),
        }
    }

    fn refuted(method: EstimatorMethod, test: RefutationKind, passed: bool) -> RefutationOutcome {
        RefutationOutcome {
            method,
            test,
            result: Ok(RefutationResult {
                test,
                method,
                original_estimate: 0.8,
                new_effect: 0.79,
                passed,
                p_value: 0.5,
                tolerance: 1.0,
                allowed_deviation: 0.05,
                simulations_requested: 10,
                simulations_run: 10,
                simulations_failed: 0,
                spread: 0.01,
                spread_limit: None,
                delta_pct: Some(-1.25),
                subset_fraction: None,
                sample_size: None,
                placebo_type: None,
                empirical_ci: None,
                ci_width_ratio: None,
                warnings: vec![],
            }),
        }
    }

    #[test]
    fn test_failed_methods_are_kept_and_ordered() {
        let outcomes = vec![
            ok(EstimatorMethod::InverseProbabilityWeighting, 0.7),
            MethodOutcome {
                method: EstimatorMethod::PropensityScoreMatching,
                result: Err(Error::estimation("propensity_score_matching", "too few units", "add rows")),
            },
            ok(EstimatorMethod::LinearRegression, 0.8),
        ];
        let table = aggregate_estimates(&outcomes);
        assert_eq!(
            table.rows.iter().map(|r| r.method).collect::<Vec<_>>(),
            [
                EstimatorMethod::LinearRegression,
                EstimatorMethod::PropensityScoreMatching,
                EstimatorMethod::InverseProbabilityWeighting
            ]
        );
        assert_eq!((table.requested, table.succeeded, table.failed), (3, 2, 1));
        assert_eq!(table.headline(), "3 requested, 2 succeeded, 1 failed");
        let failed = table.row(EstimatorMethod::PropensityScoreMatching).unwrap();
        assert_eq!(failed.status, RowStatus::Failed);
        let info = failed.failure.as_ref().unwrap();
        assert_eq!(info.kind, "estimation");
        assert_eq!(info.hint.as_deref(), Some("add rows"));
        assert_eq!(table.estimates().count(), 2);
        assert_eq!(collect_warnings(&table).len(), 2);
    }

    #[test]
    fn test_robustness_counts() {
        let outcomes = vec![
            refuted(EstimatorMethod::LinearRegression, RefutationKind::Bootstrap, true),
            refuted(EstimatorMethod::LinearRegression, RefutationKind::PlaceboTreatment, false),
            RefutationOutcome {
                method: EstimatorMethod::LinearRegression,
                test: RefutationKind::DataSubset,
                result: Err(Error::Cancelled("stopped".into())),
            },
        ];
        let s = aggregate_refutations(&outcomes);
        assert_eq!((s.requested, s.completed, s.passed, s.failed_checks, s.errors), (3, 2, 1, 1, 1));
        assert_eq!(
            s.rows.iter().map(|r| r.test).collect::<Vec<_>>(),
            [RefutationKind::PlaceboTreatment, RefutationKind::DataSubset, RefutationKind::Bootstrap]
        );
        assert!(!s.all_passed());
        assert_eq!(s.for_method(EstimatorMethod::LinearRegression).count(), 3);
        let row = s.row(EstimatorMethod::LinearRegression, RefutationKind::Bootstrap).unwrap();
        assert_eq!(row.delta_pct, Some(-1.25));
        assert!(row.interpretation.as_ref().unwrap().contains("stable"));
    }

    #[test]
    fn test_table_serializes() {
        let table = aggregate_estimates(&[ok(EstimatorMethod::LinearRegression, 0.8)]);
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        let back: ComparisonTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
