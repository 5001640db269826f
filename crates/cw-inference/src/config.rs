//! Serializable analysis configuration.
//!
//! `AnalysisConfig` captures everything a run needs: the variable
//! declaration, the selected estimators, the confidence level, the refutation
//! plan and (optionally) a synthetic data recipe. JSON round-trips are exact
//! (`serde_json` with `float_roundtrip`).

use std::path::Path;

use cw_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::estimators::{EstimatorMethod, EstimatorOptions};
use crate::refute::{RefutationKind, RefutationParams};
use crate::synthetic::{OUTCOME_COLUMN, SyntheticConfig};

/// One requested refutation test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefutationSpec {
    /// Test to run.
    pub test: RefutationKind,
    /// Test parameters.
    #[serde(default)]
    pub params: RefutationParams,
}

impl RefutationSpec {
    /// Spec with default parameters.
    pub fn new(test: RefutationKind) -> Self {
        Self { test, params: RefutationParams::default() }
    }
}

fn default_methods() -> Vec<EstimatorMethod> {
    EstimatorMethod::ALL.to_vec()
}

fn default_confidence_level() -> f64 {
    0.95
}

/// Full description of an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Treatment column.
    pub treatment: String,
    /// Outcome column.
    pub outcome: String,
    /// Confounder columns, in adjustment order.
    #[serde(default)]
    pub confounders: Vec<String>,
    /// Estimators to run.
    #[serde(default = "default_methods")]
    pub methods: Vec<EstimatorMethod>,
    /// Confidence level of every interval.
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    /// Estimator tuning.
    #[serde(default)]
    pub estimator_options: EstimatorOptions,
    /// Refutations to run against every successful estimate.
    #[serde(default)]
    pub refutations: Vec<RefutationSpec>,
    /// Tolerance (in standard errors) overriding every refutation's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    /// Base seed for refutations that do not set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Generate the dataset instead of loading one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<SyntheticConfig>,
}

impl AnalysisConfig {
    /// Minimal configuration: all methods, 95% intervals, no refutations.
    pub fn new<S: AsRef<str>>(treatment: &str, outcome: &str, confounders: &[S]) -> Self {
        Self {
            treatment: treatment.to_string(),
            outcome: outcome.to_string(),
            confounders: confounders.iter().map(|c| c.as_ref().to_string()).collect(),
            methods: default_methods(),
            confidence_level: default_confidence_level(),
            estimator_options: EstimatorOptions::default(),
            refutations: Vec::new(),
            tolerance: None,
            seed: None,
            synthetic: None,
        }
    }

    /// The default marketing-mix scenario: `social` on `sales` over the
    /// generated confounders, every method and every refutation test.
    pub fn template() -> Self {
        let synthetic = SyntheticConfig::default();
        let confounders: Vec<String> = synthetic.confounders.iter().map(|c| c.name.clone()).collect();
        Self {
            refutations: RefutationKind::ALL.into_iter().map(RefutationSpec::new).collect(),
            seed: Some(123),
            synthetic: Some(synthetic),
            ..Self::new("social", OUTCOME_COLUMN, confounders.as_slice())
        }
    }

    /// Select the estimators to run.
    pub fn with_methods(mut self, methods: &[EstimatorMethod]) -> Self {
        self.methods = methods.to_vec();
        self
    }

    /// Add a refutation test.
    pub fn with_refutation(mut self, test: RefutationKind, params: RefutationParams) -> Self {
        self.refutations.push(RefutationSpec { test, params });
        self
    }

    /// Parameters a refutation spec actually runs with, after applying the
    /// run-level tolerance and seed.
    pub fn effective_params(&self, spec: &RefutationSpec) -> RefutationParams {
        let mut params = spec.params.clone();
        if let Some(tol) = self.tolerance {
            params.tolerance = tol;
        }
        if params.seed.is_none() {
            params.seed = self.seed;
        }
        params
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.treatment.trim().is_empty() || self.outcome.trim().is_empty() {
            return Err(Error::Validation("treatment and outcome must be named".into()));
        }
        if self.methods.is_empty() {
            return Err(Error::Validation("at least one estimation method is required".into()));
        }
        for (i, m) in self.methods.iter().enumerate() {
            if self.methods[..i].contains(m) {
                return Err(Error::Validation(format!("method '{m}' listed more than once")));
            }
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::Validation(format!(
                "confidence_level must be in (0,1), got {}",
                self.confidence_level
            )));
        }
        if let Some(tol) = self.tolerance.filter(|t| !(t.is_finite() && *t > 0.0)) {
            return Err(Error::Validation(format!("tolerance must be > 0, got {tol}")));
        }
        self.estimator_options.validate()?;
        for (i, spec) in self.refutations.iter().enumerate() {
            if self.refutations[..i].iter().any(|s| s.test == spec.test) {
                return Err(Error::Validation(format!("refutation '{}' listed more than once", spec.test)));
            }
            self.effective_params(spec).validate(spec.test)?;
        }
        Ok(())
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write to `path` as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read and validate from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
