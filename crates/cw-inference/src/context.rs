//! End-to-end analysis pipeline.
//!
//! [`AnalysisContext`] owns one validated run: the dataset, the causal graph,
//! the identified estimand and the configuration. Construction performs every
//! check that is fatal to a run (graph, columns, identification); estimator
//! and refutation failures are isolated per item and end up as failure rows.

use std::sync::Arc;

use cw_core::{Dataset, Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregate::{
    ComparisonTable, MethodOutcome, RefutationOutcome, RobustnessSummary, aggregate_estimates,
    aggregate_refutations,
};
use crate::config::AnalysisConfig;
use crate::estimators::estimate_with;
use crate::graph::{CausalGraph, GraphExport, build_graph, check_against_dataset};
use crate::identify::{Estimand, identify};
use crate::refute::{RunControl, refute_with};

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Library version that produced the report.
    pub version: String,
    /// Rows analysed.
    pub n_rows: usize,
    /// Causal graph for visualization.
    pub graph: GraphExport,
    /// Identified estimand.
    pub estimand: Estimand,
    /// Effect estimates.
    pub comparison: ComparisonTable,
    /// Refutation results.
    pub robustness: RobustnessSummary,
}

/// A validated analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    dataset: Arc<Dataset>,
    config: AnalysisConfig,
    graph: CausalGraph,
    estimand: Estimand,
}

impl AnalysisContext {
    /// Validate `config` against `dataset` and identify the estimand.
    ///
    /// Fails with [`Error::InvalidModel`] for a bad variable declaration
    /// (including a confounder that duplicates the treatment or outcome),
    /// [`Error::InvalidDataset`] for missing or non-finite columns and
    /// [`Error::Identification`] when propensity methods lack confounders.
    pub fn new(dataset: impl Into<Arc<Dataset>>, config: AnalysisConfig) -> Result<Self> {
        let dataset = dataset.into();
        config.validate()?;
        let graph = build_graph(&config.treatment, &config.outcome, config.confounders.as_slice())?;
        let mut columns = vec![config.treatment.as_str(), config.outcome.as_str()];
        columns.extend(config.confounders.iter().map(String::as_str));
        dataset.validate_columns(&columns)?;
        check_against_dataset(&graph, &dataset)?;
        let estimand = identify(&graph, &config.methods)?;
        tracing::info!(
            treatment = %config.treatment,
            outcome = %config.outcome,
            n_rows = dataset.n_rows(),
            n_confounders = config.confounders.len(),
            "analysis context ready"
        );
        Ok(Self { dataset, config, graph, estimand })
    }

    /// Generate the dataset from the configuration's synthetic recipe.
    pub fn from_config(config: AnalysisConfig) -> Result<Self> {
        let Some(synthetic) = config.synthetic.as_ref() else {
            return Err(Error::Validation(
                "configuration has no synthetic section; supply a dataset instead".into(),
            ));
        };
        let dataset = synthetic.generate()?;
        Self::new(dataset, config)
    }

    /// Dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Causal graph.
    pub fn graph(&self) -> &CausalGraph {
        &self.graph
    }

    /// Identified estimand.
    pub fn estimand(&self) -> &Estimand {
        &self.estimand
    }

    /// Run every configured estimator on a pool sized to the method count.
    ///
    /// Outcomes come back in request order; a failing method yields an
    /// `Err` outcome instead of aborting the batch.
    pub fn estimate_all(&self) -> Result<Vec<MethodOutcome>> {
        let methods = &self.config.methods;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(methods.len().max(1))
            .build()
            .map_err(|e| Error::Computation(format!("failed to build estimator thread pool: {e}")))?;
        tracing::info!(methods = methods.len(), "estimating");
        let outcomes: Vec<MethodOutcome> = pool.install(|| {
            methods
                .par_iter()
                .map(|&method| MethodOutcome {
                    method,
                    result: estimate_with(
                        &self.dataset,
                        &self.estimand,
                        method,
                        self.config.confidence_level,
                        &self.config.estimator_options,
                    ),
                })
                .collect()
        });
        for o in &outcomes {
            match &o.result {
                Ok(r) => tracing::debug!(method = o.method.id(), ate = r.ate, "method done"),
                Err(e) => tracing::warn!(method = o.method.id(), error = %e, "method failed"),
            }
        }
        Ok(outcomes)
    }

    /// Run every configured refutation against every estimate.
    ///
    /// Estimates that failed produce a failed row per test. Cancellation
    /// aborts the whole batch with [`Error::Cancelled`].
    pub fn refute_all(
        &self,
        estimates: &[MethodOutcome],
        control: &RunControl,
    ) -> Result<Vec<RefutationOutcome>> {
        let mut outcomes = Vec::with_capacity(estimates.len() * self.config.refutations.len());
        for est in estimates {
            for spec in &self.config.refutations {
                let result = match &est.result {
                    Ok(fitted) => {
                        let params = self.config.effective_params(spec);
                        match refute_with(&self.dataset, &self.estimand, fitted, spec.test, &params, control) {
                            Err(e @ Error::Cancelled(_)) => return Err(e),
                            other => other,
                        }
                    }
                    Err(_) => Err(Error::refutation(
                        spec.test.id(),
                        format!("the {} estimate failed; there is nothing to refute", est.method),
                        "fix the estimation failure first",
                    )),
                };
                outcomes.push(RefutationOutcome { method: est.method, test: spec.test, result });
            }
        }
        Ok(outcomes)
    }

    /// Estimate, refute and aggregate.
    pub fn run(&self, control: &RunControl) -> Result<AnalysisReport> {
        let estimates = self.estimate_all()?;
        let comparison = aggregate_estimates(&estimates);
        tracing::info!(summary = %comparison.headline(), "estimation complete");
        let refutations = self.refute_all(&estimates, control)?;
        let robustness = aggregate_refutations(&refutations);
        tracing::info!(
            requested = robustness.requested,
            passed = robustness.passed,
            errors = robustness.errors,
            "robustness summary ready"
        );
        Ok(AnalysisReport {
            version: crate::VERSION.to_string(),
            n_rows: self.dataset.n_rows(),
            graph: self.graph.export(),
            estimand: self.estimand.clone(),
            comparison,
            robustness,
        })
    }
}
