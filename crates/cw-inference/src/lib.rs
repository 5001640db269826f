//! # cw-inference
//!
//! Causal effect estimation and robustness checks for Causeway.
//!
//! This crate provides:
//! - Synthetic marketing-mix data with known ground-truth effects
//! - Backdoor causal graphs and ATE identification
//! - Four ATE estimators behind one contract (regression, propensity
//!   matching, stratification and weighting)
//! - Perturbation refuters with seeded, cancellable parallel simulations
//! - Comparison tables, robustness summaries and the end-to-end pipeline
//!
//! ## Architecture
//!
//! Every stage is a function from immutable inputs to a new value:
//! `Dataset → CausalGraph → Estimand → EstimateResult → RefutationResult`.
//! [`AnalysisContext`] wires the stages together for one run and fans the
//! estimators and refutation simulations out over rayon pools.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Comparison table and robustness summary.
pub mod aggregate;
/// Serializable analysis configuration.
pub mod config;
/// End-to-end analysis pipeline.
pub mod context;
/// ATE estimators.
pub mod estimators;
/// Causal DAG construction and validation.
pub mod graph;
/// Backdoor identification.
pub mod identify;
/// Plain-language explanations.
pub mod interpret;
/// Generic numerical optimizer (L-BFGS backend).
pub mod optimizer;
/// Propensity model and overlap diagnostics.
pub mod propensity;
/// Refutation tests.
pub mod refute;
/// OLS and logistic regression primitives.
pub mod regression;
/// Resampling and percentile helpers.
pub mod resampling;
/// Synthetic data generator.
pub mod synthetic;

pub use aggregate::{
    ComparisonTable, MethodOutcome, RefutationOutcome, RobustnessSummary, aggregate_estimates,
    aggregate_refutations, collect_warnings,
};
pub use config::{AnalysisConfig, RefutationSpec};
pub use context::{AnalysisContext, AnalysisReport};
pub use estimators::{
    Diagnostic, EstimateResult, EstimatorMethod, EstimatorOptions, Severity, estimate, estimate_with,
    point_estimate,
};
pub use graph::{CausalGraph, GraphExport, build_graph};
pub use identify::{Estimand, identify};
pub use interpret::{interpret_estimate, interpret_refutation};
pub use optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use refute::{
    CancellationToken, MAX_SIMULATIONS, PlaceboType, RefutationKind, RefutationParams,
    RefutationResult, RunControl, SimulationProgress, refute, refute_with,
};
pub use synthetic::{ChannelConfig, ConfounderConfig, ConfounderProcess, SyntheticConfig, generate};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
