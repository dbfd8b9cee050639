//! Minimizer backends.
//!
//! The nested nuisance fit only needs "minimize this function inside these
//! bounds". That capability is the `Minimizer` trait; the concrete backends
//! wrap `argmin` solvers:
//!
//! - `LbfgsMinimizer`: L-BFGS with More-Thuente line search, bounds enforced by
//!   clamping plus a projected numerical gradient
//! - `NelderMeadMinimizer`: derivative-free simplex search, bounds by clamping

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;

use crate::domain::{MinimizerMethod, MinimizerSettings};
use crate::error::{Result, ScanError};

/// Function to be minimized.
pub trait ObjectiveFunction: Send + Sync {
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Central-difference gradient with absolute step `eps`.
    fn gradient(&self, params: &[f64], eps: f64) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        let mut shifted = params.to_vec();
        for i in 0..params.len() {
            shifted[i] = params[i] + eps;
            let f_plus = self.eval(&shifted)?;
            shifted[i] = params[i] - eps;
            let f_minus = self.eval(&shifted)?;
            shifted[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

/// Outcome of one minimization.
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best parameters, inside the bounds.
    pub parameters: Vec<f64>,
    /// Objective at `parameters`.
    pub fval: f64,
    pub n_iter: u64,
    /// Objective evaluations (including those spent on gradients).
    pub n_fev: usize,
    pub converged: bool,
    /// Termination message from the backend.
    pub message: String,
}

impl fmt::Display for Minimum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Minimum(fval={:.6}, n_iter={}, n_fev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.converged
        )
    }
}

/// A bounded minimization backend.
pub trait Minimizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
        settings: &MinimizerSettings,
    ) -> Result<Minimum>;
}

/// Backend selected by the minimizer settings.
pub fn minimizer_for(method: MinimizerMethod) -> Box<dyn Minimizer> {
    match method {
        MinimizerMethod::Lbfgs => Box::new(LbfgsMinimizer),
        MinimizerMethod::NelderMead => Box::new(NelderMeadMinimizer),
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params
        .iter()
        .zip(bounds.iter())
        .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
        .collect()
}

fn check_inputs(init: &[f64], bounds: &[(f64, f64)]) -> Result<()> {
    if init.len() != bounds.len() {
        return Err(ScanError::Config(format!(
            "parameter and bounds length mismatch: {} != {}",
            init.len(),
            bounds.len()
        )));
    }
    if let Some((lo, hi)) = bounds.iter().find(|(lo, hi)| !(lo <= hi)) {
        return Err(ScanError::InvalidRange { min: *lo, max: *hi });
    }
    Ok(())
}

/// Nothing to optimize: evaluate once.
fn trivial_minimum(objective: &dyn ObjectiveFunction) -> Result<Minimum> {
    let fval = objective.eval(&[])?;
    Ok(Minimum {
        parameters: Vec::new(),
        fval,
        n_iter: 0,
        n_fev: 1,
        converged: true,
        message: "no free parameters".to_string(),
    })
}

fn is_converged(status: &TerminationStatus) -> bool {
    matches!(
        status,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    )
}

/// First objective error of a run.
type FailureSlot = Arc<Mutex<Option<ScanError>>>;

/// Adapter exposing an [`ObjectiveFunction`] to argmin.
///
/// argmin unwraps cost errors in places (Nelder-Mead simplex setup), so a
/// failing objective is reported as `+inf` and the error is parked in
/// `failure`. Once parked, no further evaluations run.
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    grad_eps: f64,
    evals: Arc<AtomicUsize>,
    failure: FailureSlot,
}

impl<'a> ArgminProblem<'a> {
    fn new(objective: &'a dyn ObjectiveFunction, bounds: &'a [(f64, f64)], grad_eps: f64) -> Self {
        Self {
            objective,
            bounds,
            grad_eps,
            evals: Arc::new(AtomicUsize::new(0)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    fn has_failed(&self) -> bool {
        self.failure.lock().map_or(true, |slot| slot.is_some())
    }

    fn park(&self, err: ScanError) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(err);
        }
    }
}

/// The parked objective error, if any, as a per-point evaluator failure.
fn take_failure(slot: &FailureSlot) -> Option<ScanError> {
    let err = slot.lock().ok()?.take()?;
    Some(match err {
        ScanError::Evaluator(_) => err,
        other => ScanError::Evaluator(other.to_string()),
    })
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        if self.has_failed() {
            return Ok(f64::INFINITY);
        }
        self.evals.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        match self.objective.eval(&clamped) {
            Ok(v) => Ok(v),
            Err(err) => {
                self.park(err);
                Ok(f64::INFINITY)
            }
        }
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        if self.has_failed() {
            return Err(argmin::core::Error::msg("objective failed"));
        }
        self.evals.fetch_add(2 * params.len(), Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = match self.objective.gradient(&clamped, self.grad_eps) {
            Ok(g) => g,
            Err(err) => {
                let msg = err.to_string();
                self.park(err);
                return Err(argmin::core::Error::msg(msg));
            }
        };

        // At a bound, drop components that would push further outside.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }
        Ok(g)
    }
}

/// L-BFGS with box constraints via clamping.
#[derive(Debug, Clone, Copy, Default)]
pub struct LbfgsMinimizer;

impl Minimizer for LbfgsMinimizer {
    fn name(&self) -> &'static str {
        "lbfgs"
    }

    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
        settings: &MinimizerSettings,
    ) -> Result<Minimum> {
        check_inputs(init, bounds)?;
        if init.is_empty() {
            return trivial_minimum(objective);
        }

        let problem = ArgminProblem::new(objective, bounds, settings.grad_eps);
        let (evals, failure) = (problem.evals.clone(), problem.failure.clone());

        // argmin's default cost tolerance is ~EPS, far too strict for llh scales.
        let tol_cost = if settings.tol == 0.0 {
            0.0
        } else {
            (0.1 * settings.tol).max(1e-12)
        };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), settings.m)
            .with_tolerance_grad(settings.tol)
            .map_err(|e| ScanError::Config(format!("invalid L-BFGS tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| ScanError::Config(format!("invalid L-BFGS cost tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(clamp_params(init, bounds)).max_iters(settings.max_iter))
            .run();
        if let Some(err) = take_failure(&failure) {
            return Err(err);
        }
        let res = res.map_err(|e| ScanError::Evaluator(format!("L-BFGS failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| ScanError::Evaluator("L-BFGS returned no parameters".to_string()))?;
        let termination = state.get_termination_status();

        Ok(Minimum {
            parameters: clamp_params(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: evals.load(Ordering::Relaxed),
            converged: is_converged(termination),
            message: termination.to_string(),
        })
    }
}

/// Nelder-Mead simplex search.
#[derive(Debug, Clone, Copy, Default)]
pub struct NelderMeadMinimizer;

impl NelderMeadMinimizer {
    /// Start vertex plus one vertex per axis, stepped inwards from the bounds.
    fn initial_simplex(init: &[f64], bounds: &[(f64, f64)], step: f64) -> Vec<Vec<f64>> {
        let start = clamp_params(init, bounds);
        let mut simplex = Vec::with_capacity(start.len() + 1);
        simplex.push(start.clone());
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            let mut vertex = start.clone();
            let width = (hi - lo).max(f64::MIN_POSITIVE);
            let delta = step * width;
            vertex[i] = if vertex[i] + delta <= hi {
                vertex[i] + delta
            } else {
                vertex[i] - delta
            };
            simplex.push(vertex);
        }
        simplex
    }
}

impl Minimizer for NelderMeadMinimizer {
    fn name(&self) -> &'static str {
        "nelder-mead"
    }

    fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
        settings: &MinimizerSettings,
    ) -> Result<Minimum> {
        check_inputs(init, bounds)?;
        if init.is_empty() {
            return trivial_minimum(objective);
        }

        let problem = ArgminProblem::new(objective, bounds, settings.grad_eps);
        let (evals, failure) = (problem.evals.clone(), problem.failure.clone());

        let simplex = Self::initial_simplex(init, bounds, settings.simplex_step);
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(settings.tol)
            .map_err(|e| ScanError::Config(format!("invalid Nelder-Mead tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(settings.max_iter))
            .run();
        if let Some(err) = take_failure(&failure) {
            return Err(err);
        }
        let res = res.map_err(|e| ScanError::Evaluator(format!("Nelder-Mead failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| ScanError::Evaluator("Nelder-Mead returned no parameters".to_string()))?;
        let termination = state.get_termination_status();

        Ok(Minimum {
            parameters: clamp_params(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: evals.load(Ordering::Relaxed),
            converged: is_converged(termination),
            message: termination.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 0.2)^2 + (y - 0.7)^2, minimum inside the unit box.
    struct Quadratic;

    impl ObjectiveFunction for Quadratic {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok((p[0] - 0.2).powi(2) + (p[1] - 0.7).powi(2))
        }
    }

    struct Failing;

    impl ObjectiveFunction for Failing {
        fn eval(&self, _p: &[f64]) -> Result<f64> {
            Err(ScanError::Evaluator("forward model exploded".into()))
        }
    }

    fn unit_box() -> Vec<(f64, f64)> {
        vec![(0.0, 1.0), (0.0, 1.0)]
    }

    #[test]
    fn numerical_gradient_matches_analytic() {
        let g = Quadratic.gradient(&[0.5, 0.5], 1e-6).unwrap();
        assert_relative_eq!(g[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(g[1], -0.4, epsilon = 1e-6);
    }

    #[test]
    fn lbfgs_finds_interior_minimum() {
        let settings = MinimizerSettings::default();
        let m = LbfgsMinimizer
            .minimize(&Quadratic, &[0.5, 0.5], &unit_box(), &settings)
            .unwrap();
        assert!(m.converged, "{}", m.message);
        assert_relative_eq!(m.parameters[0], 0.2, epsilon = 1e-4);
        assert_relative_eq!(m.parameters[1], 0.7, epsilon = 1e-4);
        assert!(m.fval < 1e-8);
    }

    #[test]
    fn lbfgs_respects_bounds() {
        let settings = MinimizerSettings::default();
        let bounds = vec![(0.5, 1.0), (0.0, 1.0)];
        let m = LbfgsMinimizer
            .minimize(&Quadratic, &[0.8, 0.5], &bounds, &settings)
            .unwrap();
        assert_relative_eq!(m.parameters[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(m.parameters[1], 0.7, epsilon = 1e-3);
    }

    #[test]
    fn nelder_mead_finds_interior_minimum() {
        let settings = MinimizerSettings {
            method: MinimizerMethod::NelderMead,
            tol: 1e-12,
            ..MinimizerSettings::default()
        };
        let m = NelderMeadMinimizer
            .minimize(&Quadratic, &[0.5, 0.5], &unit_box(), &settings)
            .unwrap();
        assert!(m.converged, "{}", m.message);
        assert_relative_eq!(m.parameters[0], 0.2, epsilon = 1e-3);
        assert_relative_eq!(m.parameters[1], 0.7, epsilon = 1e-3);
    }

    #[test]
    fn initial_simplex_stays_inside_bounds() {
        let simplex = NelderMeadMinimizer::initial_simplex(&[1.0, 0.0], &unit_box(), 0.05);
        assert_eq!(simplex.len(), 3);
        for v in &simplex {
            assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
        }
        assert_relative_eq!(simplex[1][0], 0.95, epsilon = 1e-12);
    }

    #[test]
    fn objective_errors_surface_as_evaluator_failures() {
        let settings = MinimizerSettings::default();
        let err = LbfgsMinimizer
            .minimize(&Failing, &[0.5, 0.5], &unit_box(), &settings)
            .unwrap_err();
        assert!(matches!(err, ScanError::Evaluator(_)));
    }

    /// Fails only away from the start point, so the first evaluation succeeds.
    struct FailsAbove(f64);

    impl ObjectiveFunction for FailsAbove {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            if p[0] > self.0 {
                return Err(ScanError::Config("template maker rejected x".into()));
            }
            Quadratic.eval(p)
        }
    }

    #[test]
    fn nelder_mead_objective_errors_surface_as_evaluator_failures() {
        let settings = MinimizerSettings {
            method: MinimizerMethod::NelderMead,
            ..MinimizerSettings::default()
        };
        let err = NelderMeadMinimizer
            .minimize(&Failing, &[0.5, 0.5], &unit_box(), &settings)
            .unwrap_err();
        assert_eq!(err.to_string(), ScanError::Evaluator("forward model exploded".into()).to_string());

        // The second simplex vertex (x = 0.55) fails.
        let err = NelderMeadMinimizer
            .minimize(&FailsAbove(0.52), &[0.5, 0.5], &unit_box(), &settings)
            .unwrap_err();
        assert!(matches!(&err, ScanError::Evaluator(msg) if msg.contains("rejected x")));
    }

    #[test]
    fn lbfgs_reports_the_first_objective_error() {
        let err = LbfgsMinimizer
            .minimize(&FailsAbove(0.5), &[0.5, 0.5], &unit_box(), &MinimizerSettings::default())
            .unwrap_err();
        assert!(matches!(&err, ScanError::Evaluator(msg) if msg.contains("rejected x")));
    }

    #[test]
    fn empty_problem_is_evaluated_once() {
        struct Constant;
        impl ObjectiveFunction for Constant {
            fn eval(&self, _p: &[f64]) -> Result<f64> {
                Ok(3.5)
            }
        }
        let m = minimizer_for(MinimizerMethod::Lbfgs)
            .minimize(&Constant, &[], &[], &MinimizerSettings::default())
            .unwrap();
        assert_eq!(m.fval, 3.5);
        assert!(m.converged);
    }

    #[test]
    fn length_mismatch_is_a_config_error() {
        let err = LbfgsMinimizer
            .minimize(&Quadratic, &[0.5], &unit_box(), &MinimizerSettings::default())
            .unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
