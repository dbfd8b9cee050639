//! Reference ("data") dataset construction.
//!
//! The Asimov dataset is the template evaluated at the data hypothesis
//! parameter values. With a seed, a Poisson pseudo-experiment is drawn from
//! it instead; the same seed always yields the same maps.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Poisson;
use tracing::info;

use crate::domain::{Hierarchy, ParamSet};
use crate::error::{Result, ScanError};
use crate::models::template::{Histogram, TemplateMaker};

/// Builds the dataset every scan point is compared against.
pub trait ReferenceBuilder {
    fn build(&self, params: &ParamSet, hierarchy: Hierarchy) -> Result<Histogram>;
}

pub struct AsimovBuilder<'a, T: TemplateMaker + ?Sized> {
    maker: &'a T,
    fluctuate_seed: Option<u64>,
}

impl<'a, T: TemplateMaker + ?Sized> AsimovBuilder<'a, T> {
    pub fn new(maker: &'a T) -> Self {
        Self {
            maker,
            fluctuate_seed: None,
        }
    }

    pub fn with_fluctuations(mut self, seed: Option<u64>) -> Self {
        self.fluctuate_seed = seed;
        self
    }
}

impl<T: TemplateMaker + ?Sized> ReferenceBuilder for AsimovBuilder<'_, T> {
    fn build(&self, params: &ParamSet, hierarchy: Hierarchy) -> Result<Histogram> {
        let asimov = self.maker.expected(&params.values(), hierarchy)?;
        let Some(seed) = self.fluctuate_seed else {
            info!(total = asimov.total(), "built Asimov reference dataset");
            return Ok(asimov);
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let trck = fluctuate(&asimov.trck, &mut rng)?;
        let cscd = fluctuate(&asimov.cscd, &mut rng)?;
        let data = Histogram {
            trck,
            cscd,
            ..asimov
        };
        info!(seed, total = data.total(), "built fluctuated reference dataset");
        Ok(data)
    }
}

/// Replace every expectation by a Poisson draw around it.
fn fluctuate(expected: &DMatrix<f64>, rng: &mut StdRng) -> Result<DMatrix<f64>> {
    let mut out = DMatrix::zeros(expected.nrows(), expected.ncols());
    for (dst, &mu) in out.iter_mut().zip(expected.iter()) {
        if mu <= 0.0 {
            continue;
        }
        let dist = Poisson::new(mu)
            .map_err(|e| ScanError::Evaluator(format!("cannot fluctuate bin with mean {mu}: {e}")))?;
        let n: f64 = dist.sample(rng);
        *dst = n;
    }
    Ok(out)
}
