//! The grid-scan driver.
//!
//! For every point of the scan grid the driver takes a private copy of the
//! hypothesis parameters, pins the scanned parameters to the point's values,
//! and asks the evaluator to profile out everything that is still free.
//! Points are independent, so they may be dispatched to a rayon pool; results
//! are always recorded in enumeration order.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::domain::{Hierarchy, ParamSet};
use crate::error::{Result, ScanError};
use crate::fit::{Evaluation, ObjectiveEvaluator};
use crate::models::{Histogram, ReferenceBuilder};
use crate::scan::grid::{ScanGrid, ScanPoint};
use crate::scan::result::ScanResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Worker count: 0 = all cores, 1 = sequential.
    pub jobs: usize,
    /// Keep the per-evaluation history of every nested fit.
    pub keep_trajectories: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            keep_trajectories: false,
        }
    }
}

/// What a finished scan hands back for persistence.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub reference: Histogram,
    pub grid: ScanGrid,
    pub result: ScanResult,
}

pub struct ScanDriver<'a, E: ObjectiveEvaluator + ?Sized> {
    evaluator: &'a E,
    options: ScanOptions,
}

impl<'a, E: ObjectiveEvaluator + ?Sized> ScanDriver<'a, E> {
    pub fn new(evaluator: &'a E, options: ScanOptions) -> Self {
        Self { evaluator, options }
    }

    /// Run a full scan.
    ///
    /// `hypo` must already carry the stepping specification of every scanned
    /// parameter. The reference dataset is built exactly once from `data`.
    pub fn run(
        &self,
        builder: &dyn ReferenceBuilder,
        data: &ParamSet,
        data_hierarchy: Hierarchy,
        hypo: &ParamSet,
        hypo_hierarchy: Hierarchy,
    ) -> Result<ScanOutcome> {
        hypo.validate()?;
        let grid = ScanGrid::from_params(hypo)?;
        for name in grid.names() {
            if hypo.get(name).is_some_and(|p| p.fixed) {
                return Err(ScanError::Config(format!(
                    "scanned parameter '{name}' is fixed in the template settings"
                )));
            }
        }

        let nuisance: Vec<String> = hypo
            .floating_names()
            .into_iter()
            .filter(|n| !grid.names().contains(n))
            .collect();
        debug!(scanned = ?grid.names(), ?nuisance, points = grid.len(), "scan grid ready");
        for name in grid.names() {
            debug!("steps for {name}: {:?}", grid.axis(name).unwrap_or_default());
        }

        let reference = builder.build(data, data_hierarchy)?;

        let mut result = ScanResult::new(grid.names(), &nuisance, self.options.keep_trajectories);
        let total = grid.len();

        if self.options.jobs == 1 {
            for point in &grid {
                let outcome = self.evaluate_point(&reference, hypo, hypo_hierarchy, &point, total);
                result.record(&point, &outcome)?;
            }
        } else {
            let points: Vec<ScanPoint> = grid.iter().collect();
            let evaluate_all = || -> Vec<Result<Evaluation>> {
                points
                    .par_iter()
                    .map(|point| self.evaluate_point(&reference, hypo, hypo_hierarchy, point, total))
                    .collect()
            };

            let outcomes = if self.options.jobs == 0 {
                evaluate_all()
            } else {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.options.jobs)
                    .build()
                    .map_err(|e| ScanError::Config(format!("failed to create worker pool: {e}")))?;
                pool.install(evaluate_all)
            };

            for (point, outcome) in points.iter().zip(&outcomes) {
                result.record(point, outcome)?;
            }
        }

        let failed = result.failed_count();
        if failed > 0 {
            warn!("{failed} of {total} scan points failed");
        }
        info!(points = total, failed, "scan finished");

        Ok(ScanOutcome {
            reference,
            grid,
            result,
        })
    }

    /// Evaluate one point on its own copy of the hypothesis parameters.
    fn evaluate_point(
        &self,
        reference: &Histogram,
        template: &ParamSet,
        hierarchy: Hierarchy,
        point: &ScanPoint,
        total: usize,
    ) -> Result<Evaluation> {
        info!("scan point {}/{}: {:?}", point.index + 1, total, point.values);

        let mut params = template.clone();
        for (name, &value) in &point.values {
            params.fix_at(name, value)?;
        }

        let started = Instant::now();
        let outcome = self
            .evaluator
            .evaluate(reference, &params, hierarchy)
            .and_then(|eval| match eval.final_llh() {
                Some(llh) if llh.is_finite() => Ok(eval),
                Some(llh) => Err(ScanError::Evaluator(format!("non-finite llh {llh}"))),
                None => Err(ScanError::Evaluator("evaluator returned no llh".to_string())),
            });
        debug!(
            target: "llh_scan::timing",
            point = point.index,
            elapsed_s = started.elapsed().as_secs_f64(),
            "optimizer finished"
        );

        match &outcome {
            Ok(eval) => debug!(
                "llh = {:.6} after {} iterations; fitted {:?}",
                eval.final_llh().unwrap_or(f64::NAN),
                eval.n_iter,
                eval.fitted
            ),
            Err(err) => warn!("scan point {} failed: {err}", point.index),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParamSpec, StepSpec};
    use crate::scan::result::PointStatus;
    use nalgebra::DMatrix;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the parameter state it was called with; llh is a paraboloid.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<ParamSet>>,
        nan_at: Option<(f64, f64)>,
    }

    impl ObjectiveEvaluator for Recording {
        fn evaluate(&self, _r: &Histogram, params: &ParamSet, _h: Hierarchy) -> Result<Evaluation> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(params.clone());
            }
            let t = params.get("theta23").map_or(0.0, |p| p.value);
            let d = params.get("deltam31").map_or(0.0, |p| p.value);
            let llh = if self.nan_at == Some((t, d)) {
                f64::NAN
            } else {
                (t - 0.5).powi(2) + (d * 1000.0 - 2.5).powi(2)
            };
            Ok(Evaluation {
                llh_trajectory: vec![llh + 1.0, llh],
                fitted: [("aeff_scale".to_string(), 1.0 + t)].into_iter().collect(),
                param_trajectory: None,
                converged: true,
                n_iter: 2,
                message: "ok".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CountingBuilder {
        calls: AtomicUsize,
    }

    impl ReferenceBuilder for CountingBuilder {
        fn build(&self, _p: &ParamSet, _h: Hierarchy) -> Result<Histogram> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Histogram {
                ebins: vec![1.0, 2.0],
                czbins: vec![-1.0, 0.0],
                trck: DMatrix::from_element(1, 1, 10.0),
                cscd: DMatrix::from_element(1, 1, 5.0),
            })
        }
    }

    fn hypo() -> ParamSet {
        let mut p = ParamSet::new();
        p.insert(
            "theta23",
            ParamSpec::new(0.7)
                .with_range(0.35, 0.65)
                .with_steps(StepSpec::Count(3)),
        );
        p.insert(
            "deltam31",
            ParamSpec::new(0.0024)
                .with_range(0.002, 0.003)
                .with_steps(StepSpec::Count(2)),
        );
        p.insert("aeff_scale", ParamSpec::new(1.0).with_range(0.8, 1.2));
        p.insert("livetime", ParamSpec::new(3.0).fixed());
        p
    }

    fn run(evaluator: &Recording, jobs: usize) -> Result<ScanOutcome> {
        let builder = CountingBuilder::default();
        let options = ScanOptions {
            jobs,
            keep_trajectories: false,
        };
        let out = ScanDriver::new(evaluator, options).run(
            &builder,
            &hypo(),
            Hierarchy::Normal,
            &hypo(),
            Hierarchy::Inverted,
        );
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        out
    }

    #[test]
    fn points_are_recorded_in_enumeration_order() {
        let evaluator = Recording::default();
        let out = run(&evaluator, 1).unwrap();
        let r = &out.result;

        assert_eq!(r.len(), 6);
        assert_eq!(
            r.values("theta23").unwrap(),
            &[0.35, 0.5, 0.65, 0.35, 0.5, 0.65]
        );
        assert_eq!(
            r.values("deltam31").unwrap(),
            &[0.002, 0.002, 0.002, 0.003, 0.003, 0.003]
        );
        assert_eq!(r.llh().len(), 6);
        assert!(r.is_consistent());
        assert_eq!(r.nuisance_names().collect::<Vec<_>>(), vec!["aeff_scale"]);
    }

    #[test]
    fn every_point_sees_its_own_fixed_values() {
        let evaluator = Recording::default();
        let out = run(&evaluator, 1).unwrap();
        let seen = evaluator.seen.lock().unwrap();
        assert_eq!(seen.len(), 6);

        for (i, params) in seen.iter().enumerate() {
            let point = out.grid.point(i).unwrap();
            for (name, value) in &point.values {
                let spec = params.get(name).unwrap();
                assert!(spec.fixed);
                assert_eq!(spec.value, *value);
            }
            // Nuisance parameters always start from the template state.
            let aeff = params.get("aeff_scale").unwrap();
            assert!(!aeff.fixed);
            assert_eq!(aeff.value, 1.0);
        }
    }

    #[test]
    fn nan_point_is_recorded_as_failure_and_scan_continues() {
        let evaluator = Recording {
            nan_at: Some((0.5, 0.002)),
            ..Recording::default()
        };
        let out = run(&evaluator, 1).unwrap();
        let r = &out.result;

        assert_eq!(r.len(), 6);
        assert_eq!(r.failed_count(), 1);
        // deltam31 sorts first, so theta23 varies fastest: (0.002, 0.5) is index 1.
        assert_eq!(r.llh()[1], None);
        assert!(matches!(r.status()[1], PointStatus::Failed { .. }));
        assert_eq!(r.llh().iter().filter(|v| v.is_some()).count(), 5);
        assert_eq!(r.fitted("aeff_scale").unwrap()[1], None);
    }

    #[test]
    fn parallel_scan_matches_sequential() {
        let sequential = run(&Recording::default(), 1).unwrap();
        let pooled = run(&Recording::default(), 3).unwrap();
        let all_cores = run(&Recording::default(), 0).unwrap();
        assert_eq!(sequential.result, pooled.result);
        assert_eq!(sequential.result, all_cores.result);
    }

    #[test]
    fn best_point_is_the_paraboloid_minimum() {
        let out = run(&Recording::default(), 1).unwrap();
        let best = out.result.best_index().unwrap();
        let values = out.result.point_values(best);
        assert_eq!(values["theta23"], 0.5);
    }

    #[test]
    fn fixed_scanned_parameter_is_rejected_before_scanning() {
        let mut h = hypo();
        h.get_mut("theta23").unwrap().fixed = true;

        let evaluator = Recording::default();
        let builder = CountingBuilder::default();
        let err = ScanDriver::new(&evaluator, ScanOptions::default())
            .run(&builder, &hypo(), Hierarchy::Normal, &h, Hierarchy::Normal)
            .unwrap_err();
        assert!(err.to_string().contains("theta23"));
        assert_eq!(builder.calls.load(Ordering::SeqCst), 0);
        assert!(evaluator.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn nothing_to_scan_is_an_error() {
        let mut p = ParamSet::new();
        p.insert("aeff_scale", ParamSpec::new(1.0).with_range(0.8, 1.2));
        let evaluator = Recording::default();
        let err = ScanDriver::new(&evaluator, ScanOptions::default())
            .run(&CountingBuilder::default(), &p, Hierarchy::Normal, &p, Hierarchy::Normal)
            .unwrap_err();
        assert!(matches!(err, ScanError::EmptyScan(_)));
    }

    #[test]
    fn trajectories_are_kept_on_request() {
        let evaluator = Recording::default();
        let options = ScanOptions {
            jobs: 1,
            keep_trajectories: true,
        };
        let out = ScanDriver::new(&evaluator, options)
            .run(
                &CountingBuilder::default(),
                &hypo(),
                Hierarchy::Normal,
                &hypo(),
                Hierarchy::Normal,
            )
            .unwrap();
        let t = out.result.trajectories().unwrap();
        assert_eq!(t.len(), 6);
        assert_eq!(t[0].as_ref().unwrap().llh.len(), 2);
    }

    /// One trck bin holding `10 * norm` events; refuses to model theta23 = 0.5.
    struct PickyMaker;

    impl crate::models::TemplateMaker for PickyMaker {
        fn expected(
            &self,
            values: &std::collections::BTreeMap<String, f64>,
            _h: Hierarchy,
        ) -> Result<Histogram> {
            if values.get("theta23") == Some(&0.5) {
                return Err(ScanError::Evaluator("no template at theta23 = 0.5".into()));
            }
            let norm = values.get("norm").copied().unwrap_or(1.0);
            Ok(Histogram {
                ebins: vec![1.0, 2.0],
                czbins: vec![-1.0, 0.0],
                trck: DMatrix::from_element(1, 1, 10.0 * norm),
                cscd: DMatrix::from_element(1, 1, 5.0),
            })
        }
    }

    #[test]
    fn forward_model_error_inside_nested_fit_fails_only_that_point() {
        use crate::domain::{Channel, MinimizerMethod, MinimizerSettings};
        use crate::fit::LlhEvaluator;

        let mut hypo = ParamSet::new();
        hypo.insert(
            "theta23",
            ParamSpec::new(0.5)
                .with_range(0.35, 0.65)
                .with_steps(StepSpec::Count(3)),
        );
        hypo.insert("norm", ParamSpec::new(1.0).with_range(0.5, 1.5));

        for method in [MinimizerMethod::NelderMead, MinimizerMethod::Lbfgs] {
            let settings = MinimizerSettings {
                method,
                require_convergence: false,
                ..MinimizerSettings::default()
            };
            let evaluator = LlhEvaluator::new(&PickyMaker, settings, Channel::Trck, false);
            for jobs in [1, 2] {
                let options = ScanOptions {
                    jobs,
                    keep_trajectories: false,
                };
                let out = ScanDriver::new(&evaluator, options)
                    .run(
                        &CountingBuilder::default(),
                        &hypo,
                        Hierarchy::Normal,
                        &hypo,
                        Hierarchy::Normal,
                    )
                    .unwrap();
                let r = &out.result;

                assert_eq!(r.values("theta23").unwrap(), &[0.35, 0.5, 0.65]);
                assert_eq!(r.failed_count(), 1, "{method:?}");
                assert_eq!(r.llh()[1], None);
                match &r.status()[1] {
                    PointStatus::Failed { reason } => assert!(reason.contains("no template")),
                    PointStatus::Ok => panic!("theta23 = 0.5 should fail"),
                }
                assert!(r.llh()[0].is_some() && r.llh()[2].is_some());
            }
        }
    }
}
