//! Plain-language explanations of estimates and refutations.

use crate::estimators::{EstimateResult, Severity};
use crate::refute::{RefutationKind, RefutationResult};

/// What a refutation test does and what a healthy result looks like.
pub fn test_description(test: RefutationKind) -> &'static str {
    match test {
        RefutationKind::RandomCommonCause => {
            "Adds a randomly generated confounder; a robust estimate should not change."
        }
        RefutationKind::PlaceboTreatment => {
            "Replaces the treatment with a placebo; the effect should drop to zero."
        }
        RefutationKind::DataSubset => {
            "Re-estimates on random subsets of the data; the effect should stay put."
        }
        RefutationKind::Bootstrap => {
            "Re-estimates on bootstrap resamples; the effect should stay put and the \
             empirical interval should resemble the analytic one."
        }
    }
}

/// Explain an effect estimate for `treatment` on `outcome`.
pub fn interpret_estimate(result: &EstimateResult, treatment: &str, outcome: &str) -> String {
    let direction = if result.ate >= 0.0 { "increase" } else { "decrease" };
    let pct = 100.0 * result.confidence_level;
    let mut text = format!(
        "A one-unit increase in {treatment} causes an estimated {direction} of {:.4} in {outcome} \
         ({pct:.0}% CI: {:.4} to {:.4}).",
        result.ate.abs(),
        result.ci_lower,
        result.ci_upper,
    );
    if result.significant {
        text.push_str(" The interval excludes zero, so the effect is statistically significant.");
    } else {
        text.push_str(" The interval includes zero: the data are consistent with no effect.");
    }
    let n_warnings = result.warnings.iter().filter(|w| w.severity >= Severity::Warning).count();
    if n_warnings > 0 {
        text.push_str(&format!(" {n_warnings} diagnostic warning(s) apply; review them before relying on it."));
    }
    text
}

/// Explain a refutation outcome.
pub fn interpret_refutation(result: &RefutationResult) -> String {
    let verdict = match (result.test, result.passed) {
        (RefutationKind::PlaceboTreatment, true) => format!(
            "The placebo effect ({:.4}) is indistinguishable from zero: the estimate is not an artefact \
             of the treatment column.",
            result.new_effect
        ),
        (RefutationKind::PlaceboTreatment, false) => format!(
            "The placebo still shows an effect of {:.4}: the original estimate may be spurious.",
            result.new_effect
        ),
        (_, true) => format!(
            "The effect moved from {:.4} to {:.4}, within the allowed {:.4}: the estimate is stable.",
            result.original_estimate, result.new_effect, result.allowed_deviation
        ),
        (RefutationKind::DataSubset, false) if result.spread_limit.is_some_and(|l| result.spread > l) => format!(
            "Subset estimates scatter with a spread of {:.4}, above the {:.4} expected from sampling \
             alone: the estimate is fragile.",
            result.spread,
            result.spread_limit.unwrap_or_default()
        ),
        (_, false) => format!(
            "The effect moved from {:.4} to {:.4}, beyond the allowed {:.4}: the estimate is fragile.",
            result.original_estimate, result.new_effect, result.allowed_deviation
        ),
    };
    let mut text = format!("{} {verdict}", test_description(result.test));
    if let Some(ratio) = result.ci_width_ratio {
        text.push_str(&format!(" The bootstrap interval is {ratio:.2}x the width of the analytic interval."));
    }
    text
}
