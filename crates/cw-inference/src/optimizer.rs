//! Unconstrained L-BFGS minimization.
//!
//! Thin wrapper around argmin's L-BFGS with More-Thuente line search. Used by
//! the propensity model; the objective supplies an analytic gradient.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use cw_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for the L-BFGS optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum number of iterations.
    pub max_iter: u64,
    /// Convergence tolerance on the gradient norm.
    pub tol: f64,
    /// Number of corrections kept for the inverse-Hessian approximation.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-8, m: 10 }
    }
}

/// Result of a minimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found.
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`.
    pub fval: f64,
    /// Number of iterations.
    pub n_iter: u64,
    /// Number of objective evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Whether the solver reported convergence.
    pub converged: bool,
    /// Termination message.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Smooth objective with an analytic gradient.
pub trait ObjectiveFunction: Send + Sync {
    /// Objective value.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of [`ObjectiveFunction::eval`].
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>>;
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    counts: Arc<FuncCounts>,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        self.objective.eval(params).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        self.objective.gradient(params).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

/// L-BFGS optimizer.
#[derive(Debug, Clone, Default)]
pub struct LbfgsOptimizer {
    config: OptimizerConfig,
}

impl LbfgsOptimizer {
    /// Create an optimizer with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` starting from `init_params`.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
    ) -> Result<OptimizationResult> {
        if init_params.is_empty() {
            return Err(Error::Validation("optimizer needs at least one parameter".into()));
        }
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, counts: counts.clone() };

        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-14) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("invalid optimizer configuration (tol): {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| {
                Error::Validation(format!("invalid optimizer configuration (tol_cost): {e}"))
            })?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_params.to_vec()).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("optimization failed: {e}")))?;

        let state = res.state();
        let parameters = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("optimizer returned no parameters".to_string()))?
            .clone();
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged,
            message: termination.to_string(),
        })
    }
}
