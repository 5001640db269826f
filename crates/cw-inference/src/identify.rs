//! Backdoor identification.

use cw_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::estimators::EstimatorMethod;
use crate::graph::CausalGraph;

/// Identification strategy used to derive the estimand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationStrategy {
    /// Adjust for a set of variables that blocks every backdoor path.
    Backdoor,
}

/// Causal quantity being estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetEstimand {
    /// Average treatment effect `E[Y | do(T = t + 1)] − E[Y | do(T = t)]`.
    Ate,
}

/// Identified causal quantity with its adjustment set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimand {
    /// Strategy.
    pub strategy: IdentificationStrategy,
    /// Target quantity.
    pub target: TargetEstimand,
    /// Treatment variable.
    pub treatment: String,
    /// Outcome variable.
    pub outcome: String,
    /// Variables to condition on.
    pub adjustment_set: Vec<String>,
    /// Assumptions the user should know about (e.g. empty adjustment set).
    pub caveats: Vec<String>,
}

impl Estimand {
    /// Human-readable statement of the identified expression.
    pub fn expression(&self) -> String {
        if self.adjustment_set.is_empty() {
            format!("d/d[{}] E[{}]", self.treatment, self.outcome)
        } else {
            format!(
                "d/d[{}] E[{} | {}]",
                self.treatment,
                self.outcome,
                self.adjustment_set.join(", ")
            )
        }
    }

    /// Copy of this estimand that additionally adjusts for `name`.
    pub fn with_extra_confounder(&self, name: impl Into<String>) -> Self {
        let mut out = self.clone();
        out.adjustment_set.push(name.into());
        out
    }

    /// Adjustment-set columns plus treatment and outcome, for validation.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![self.treatment.as_str(), self.outcome.as_str()];
        cols.extend(self.adjustment_set.iter().map(String::as_str));
        cols
    }
}

/// Identify the ATE of the graph's treatment on its outcome.
///
/// Every declared confounder is a common parent of treatment and outcome, so
/// the backdoor adjustment set is exactly the confounder list. When that set is
/// empty, propensity-based methods have nothing to model and identification
/// fails if any of them was requested; regression alone proceeds with a caveat.
pub fn identify(graph: &CausalGraph, requested: &[EstimatorMethod]) -> Result<Estimand> {
    let treatment = graph.treatment();
    let outcome = graph.outcome();
    let outcome_parents = graph.parents(outcome);
    let adjustment_set: Vec<String> = graph
        .parents(treatment)
        .into_iter()
        .filter(|p| outcome_parents.contains(p))
        .map(str::to_string)
        .collect();

    let mut caveats = Vec::new();
    if adjustment_set.is_empty() {
        let needs: Vec<&str> =
            requested.iter().filter(|m| m.requires_covariates()).map(|m| m.id()).collect();
        if !needs.is_empty() {
            return Err(Error::identification(
                format!(
                    "no confounders declared, but {} need(s) covariates to model treatment assignment",
                    needs.join(", ")
                ),
                "declare at least one confounder or request only linear_regression",
            ));
        }
        caveats.push(format!(
            "no confounders declared: the effect of '{treatment}' is identified only if its \
             assignment is unconfounded"
        ));
    }

    let estimand = Estimand {
        strategy: IdentificationStrategy::Backdoor,
        target: TargetEstimand::Ate,
        treatment: treatment.to_string(),
        outcome: outcome.to_string(),
        adjustment_set,
        caveats,
    };
    tracing::info!(estimand = %estimand.expression(), "identified estimand");
    Ok(estimand)
}
