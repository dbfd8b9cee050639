//! Objective evaluation at a single scan point.
//!
//! `ObjectiveEvaluator` is the boundary the scan driver talks to: given the
//! reference dataset and a full parameter snapshot (scanned dimensions already
//! fixed), return the achieved objective and the fitted nuisance values.
//!
//! `LlhEvaluator` is the standard implementation: it maps the floating
//! parameters onto unit coordinates over their ranges, minimizes
//! `-ln L + priors` with the configured backend and maps the optimum back.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::domain::{Channel, Hierarchy, MinimizerSettings, ParamSet, Prior};
use crate::error::{Result, ScanError};
use crate::fit::minimizer::{Minimizer, ObjectiveFunction, minimizer_for};
use crate::math::{channel_llh, prior_penalty};
use crate::models::{Histogram, TemplateMaker};

/// What the evaluator hands back for one scan point.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Objective values visited by the nested fit; the last entry is the value
    /// at the best fit. Holds only that final value unless steps are saved.
    pub llh_trajectory: Vec<f64>,
    /// Best-fit value of every floating parameter.
    pub fitted: BTreeMap<String, f64>,
    /// Floating parameter values per objective evaluation (saved steps only).
    pub param_trajectory: Option<BTreeMap<String, Vec<f64>>>,
    pub converged: bool,
    pub n_iter: u64,
    pub message: String,
}

impl Evaluation {
    /// Objective at the best fit.
    pub fn final_llh(&self) -> Option<f64> {
        self.llh_trajectory.last().copied()
    }
}

/// Computes the profiled objective for a full parameter assignment.
pub trait ObjectiveEvaluator: Sync {
    fn evaluate(
        &self,
        reference: &Histogram,
        params: &ParamSet,
        hierarchy: Hierarchy,
    ) -> Result<Evaluation>;
}

/// Poisson likelihood evaluator with a nested nuisance fit.
pub struct LlhEvaluator<'a, T: TemplateMaker + ?Sized> {
    maker: &'a T,
    minimizer: Box<dyn Minimizer>,
    settings: MinimizerSettings,
    channel: Channel,
    save_steps: bool,
}

impl<'a, T: TemplateMaker + ?Sized> LlhEvaluator<'a, T> {
    pub fn new(maker: &'a T, settings: MinimizerSettings, channel: Channel, save_steps: bool) -> Self {
        Self {
            maker,
            minimizer: minimizer_for(settings.method),
            settings,
            channel,
            save_steps,
        }
    }

    /// Replace the backend chosen from the settings.
    pub fn with_minimizer(mut self, minimizer: Box<dyn Minimizer>) -> Self {
        self.minimizer = minimizer;
        self
    }
}

struct FloatingParam {
    name: String,
    lo: f64,
    hi: f64,
    prior: Option<Prior>,
}

impl FloatingParam {
    fn to_physical(&self, unit: f64) -> f64 {
        self.lo + unit * (self.hi - self.lo)
    }

    fn to_unit(&self, value: f64) -> f64 {
        ((value - self.lo) / (self.hi - self.lo)).clamp(0.0, 1.0)
    }
}

#[derive(Default)]
struct StepLog {
    llh: Vec<f64>,
    params: BTreeMap<String, Vec<f64>>,
}

/// `-ln L + priors` as a function of the floating parameters in unit coordinates.
struct NestedObjective<'a, T: TemplateMaker + ?Sized> {
    maker: &'a T,
    reference: &'a Histogram,
    hierarchy: Hierarchy,
    channel: Channel,
    base: BTreeMap<String, f64>,
    floating: Vec<FloatingParam>,
    deadline: Option<(Instant, Duration)>,
    steps: Option<Mutex<StepLog>>,
}

impl<T: TemplateMaker + ?Sized> NestedObjective<'_, T> {
    fn physical_values(&self, unit: &[f64]) -> BTreeMap<String, f64> {
        let mut values = self.base.clone();
        for (p, &u) in self.floating.iter().zip(unit) {
            values.insert(p.name.clone(), p.to_physical(u));
        }
        values
    }
}

impl<T: TemplateMaker + ?Sized> ObjectiveFunction for NestedObjective<'_, T> {
    fn eval(&self, unit: &[f64]) -> Result<f64> {
        if let Some((deadline, budget)) = self.deadline {
            if Instant::now() > deadline {
                return Err(ScanError::Evaluator(format!(
                    "nested fit exceeded its {:.1}s budget",
                    budget.as_secs_f64()
                )));
            }
        }

        let values = self.physical_values(unit);
        let expected = self.maker.expected(&values, self.hierarchy)?;
        let llh = channel_llh(self.reference, &expected, self.channel)?;

        let mut objective = -llh;
        for p in &self.floating {
            if let Some(prior) = &p.prior {
                objective += prior_penalty(prior, values[&p.name]);
            }
        }
        if !objective.is_finite() {
            return Err(ScanError::Evaluator(format!(
                "non-finite objective {objective} at {values:?}"
            )));
        }

        if let Some(steps) = &self.steps {
            if let Ok(mut log) = steps.lock() {
                log.llh.push(objective);
                for p in &self.floating {
                    log.params
                        .entry(p.name.clone())
                        .or_default()
                        .push(values[&p.name]);
                }
            }
        }
        Ok(objective)
    }
}

impl<T: TemplateMaker + ?Sized> ObjectiveEvaluator for LlhEvaluator<'_, T> {
    fn evaluate(
        &self,
        reference: &Histogram,
        params: &ParamSet,
        hierarchy: Hierarchy,
    ) -> Result<Evaluation> {
        let floating: Vec<FloatingParam> = params
            .iter()
            .filter(|(_, p)| p.is_floating())
            .filter_map(|(name, p)| {
                p.range.map(|(lo, hi)| FloatingParam {
                    name: name.clone(),
                    lo,
                    hi,
                    prior: p.prior.clone(),
                })
            })
            .collect();

        let init: Vec<f64> = floating
            .iter()
            .filter_map(|f| params.get(&f.name).map(|p| f.to_unit(p.value)))
            .collect();
        let bounds = vec![(0.0, 1.0); floating.len()];

        let objective = NestedObjective {
            maker: self.maker,
            reference,
            hierarchy,
            channel: self.channel,
            base: params.values(),
            floating,
            deadline: self
                .settings
                .point_timeout_s
                .map(|s| {
                    let budget = Duration::from_secs_f64(s);
                    (Instant::now() + budget, budget)
                }),
            steps: self.save_steps.then(|| Mutex::new(StepLog::default())),
        };

        let minimum = self
            .minimizer
            .minimize(&objective, &init, &bounds, &self.settings)?;
        debug!(
            backend = self.minimizer.name(),
            "{minimum} ({})", minimum.message
        );

        if !minimum.converged {
            if self.settings.require_convergence {
                return Err(ScanError::Evaluator(format!(
                    "nested fit did not converge: {}",
                    minimum.message
                )));
            }
            warn!("nested fit did not converge: {}", minimum.message);
        }

        // Re-evaluate at the optimum so the trajectory ends on the reported value.
        let final_llh = objective.eval(&minimum.parameters)?;

        let fitted: BTreeMap<String, f64> = objective
            .floating
            .iter()
            .zip(&minimum.parameters)
            .map(|(p, &u)| (p.name.clone(), p.to_physical(u)))
            .collect();

        let (llh_trajectory, param_trajectory) = match objective.steps {
            Some(steps) => {
                let log = steps
                    .into_inner()
                    .map_err(|_| ScanError::Evaluator("step log was poisoned".to_string()))?;
                (log.llh, Some(log.params))
            }
            None => (vec![final_llh], None),
        };

        Ok(Evaluation {
            llh_trajectory,
            fitted,
            param_trajectory,
            converged: minimum.converged,
            n_iter: minimum.n_iter,
            message: minimum.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MinimizerMethod, ParamSpec};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    /// One-bin model whose expected count is `norm * 100`.
    struct Counting;

    impl TemplateMaker for Counting {
        fn expected(&self, values: &BTreeMap<String, f64>, _h: Hierarchy) -> Result<Histogram> {
            let mu = values.get("norm").copied().unwrap_or(1.0) * 100.0;
            Ok(Histogram {
                ebins: vec![1.0, 2.0],
                czbins: vec![-1.0, 0.0],
                trck: DMatrix::from_element(1, 1, mu),
                cscd: DMatrix::from_element(1, 1, 0.0),
            })
        }
    }

    fn reference(count: f64) -> Histogram {
        Histogram {
            ebins: vec![1.0, 2.0],
            czbins: vec![-1.0, 0.0],
            trck: DMatrix::from_element(1, 1, count),
            cscd: DMatrix::from_element(1, 1, 0.0),
        }
    }

    fn settings() -> MinimizerSettings {
        MinimizerSettings {
            method: MinimizerMethod::NelderMead,
            tol: 1e-10,
            require_convergence: false,
            ..MinimizerSettings::default()
        }
    }

    fn params() -> ParamSet {
        let mut p = ParamSet::new();
        p.insert("norm", ParamSpec::new(1.0).with_range(0.5, 1.5));
        p
    }

    #[test]
    fn fits_normalization_to_reference() {
        let evaluator = LlhEvaluator::new(&Counting, settings(), Channel::Trck, false);
        let eval = evaluator
            .evaluate(&reference(120.0), &params(), Hierarchy::Normal)
            .unwrap();
        assert_relative_eq!(eval.fitted["norm"], 1.2, epsilon = 1e-3);
        assert_eq!(eval.llh_trajectory.len(), 1);
        assert!(eval.param_trajectory.is_none());
        assert!(eval.final_llh().unwrap().is_finite());
    }

    #[test]
    fn fixed_params_are_not_fitted() {
        let evaluator = LlhEvaluator::new(&Counting, settings(), Channel::Trck, false);
        let mut p = params();
        p.fix_at("norm", 0.8).unwrap();
        let eval = evaluator.evaluate(&reference(120.0), &p, Hierarchy::Normal).unwrap();
        assert!(eval.fitted.is_empty());

        // -ln L at mu = 80, d = 120 (lnΓ term included).
        let expected = -(120.0 * 80.0_f64.ln() - 80.0 - statrs::function::gamma::ln_gamma(121.0));
        assert_relative_eq!(eval.final_llh().unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn saved_steps_end_with_reported_value() {
        let evaluator = LlhEvaluator::new(&Counting, settings(), Channel::Trck, true);
        let eval = evaluator
            .evaluate(&reference(90.0), &params(), Hierarchy::Normal)
            .unwrap();
        assert!(eval.llh_trajectory.len() > 1);
        let steps = eval.param_trajectory.as_ref().unwrap();
        assert_eq!(steps["norm"].len(), eval.llh_trajectory.len());
        // First evaluation is the start point (norm = 1.0), well away from 0.9.
        assert!(eval.final_llh().unwrap() < eval.llh_trajectory[0]);
    }

    #[test]
    fn gaussian_prior_pulls_fit_towards_fiducial() {
        let evaluator = LlhEvaluator::new(&Counting, settings(), Channel::Trck, false);
        let mut p = ParamSet::new();
        p.insert(
            "norm",
            ParamSpec::new(1.0).with_range(0.5, 1.5).with_prior(Prior::Gaussian {
                fiducial: 1.0,
                sigma: 0.01,
            }),
        );
        let eval = evaluator.evaluate(&reference(120.0), &p, Hierarchy::Normal).unwrap();
        assert!(eval.fitted["norm"] < 1.1);
    }

    #[test]
    fn forward_model_failure_is_reported() {
        struct Broken;
        impl TemplateMaker for Broken {
            fn expected(&self, _v: &BTreeMap<String, f64>, _h: Hierarchy) -> Result<Histogram> {
                Err(ScanError::Evaluator("template maker failed".into()))
            }
        }
        for method in [MinimizerMethod::NelderMead, MinimizerMethod::Lbfgs] {
            let s = MinimizerSettings {
                method,
                ..settings()
            };
            let evaluator = LlhEvaluator::new(&Broken, s, Channel::Trck, false);
            let err = evaluator
                .evaluate(&reference(100.0), &params(), Hierarchy::Normal)
                .unwrap_err();
            assert!(matches!(&err, ScanError::Evaluator(msg) if msg.contains("template maker failed")));
        }
    }

    #[test]
    fn point_timeout_ends_the_nested_fit() {
        struct Slow;
        impl TemplateMaker for Slow {
            fn expected(&self, v: &BTreeMap<String, f64>, h: Hierarchy) -> Result<Histogram> {
                std::thread::sleep(Duration::from_millis(30));
                Counting.expected(v, h)
            }
        }

        for method in [MinimizerMethod::NelderMead, MinimizerMethod::Lbfgs] {
            let s = MinimizerSettings {
                method,
                point_timeout_s: Some(0.05),
                ..settings()
            };
            let evaluator = LlhEvaluator::new(&Slow, s, Channel::Trck, false);
            let started = Instant::now();
            let err = evaluator
                .evaluate(&reference(120.0), &params(), Hierarchy::Normal)
                .unwrap_err();
            assert!(matches!(&err, ScanError::Evaluator(msg) if msg.contains("budget")), "{err}");
            // Evaluations stop at the deadline instead of running to max_iter.
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }

    #[test]
    fn exhausted_budget_fails_when_convergence_required() {
        let strict = MinimizerSettings {
            max_iter: 1,
            tol: 0.0,
            require_convergence: true,
            ..settings()
        };
        let evaluator = LlhEvaluator::new(&Counting, strict, Channel::Trck, false);
        let err = evaluator
            .evaluate(&reference(120.0), &params(), Hierarchy::Normal)
            .unwrap_err();
        assert!(err.to_string().contains("did not converge"));
    }
}
