//! Binned Poisson log-likelihood and prior penalties.
//!
//! ```text
//! ln L = Σ_bins  d ln μ - μ - ln Γ(d + 1)
//! ```
//!
//! `d` need not be an integer (Asimov data is an expectation), so the
//! factorial term uses `ln Γ`. Expected counts are floored so that empty
//! template bins do not produce `ln 0`.

use nalgebra::DMatrix;
use statrs::function::gamma::ln_gamma;

use crate::domain::{Channel, Prior};
use crate::error::{Result, ScanError};
use crate::models::Histogram;

/// Smallest expected count used inside the logarithm.
const MIN_EXPECTED: f64 = 1e-10;

/// Poisson log-likelihood of `data` given `expected`, summed over bins.
pub fn poisson_llh(data: &DMatrix<f64>, expected: &DMatrix<f64>) -> Result<f64> {
    if data.shape() != expected.shape() {
        return Err(ScanError::Evaluator(format!(
            "map shape mismatch: data {:?} vs template {:?}",
            data.shape(),
            expected.shape()
        )));
    }

    let mut llh = 0.0;
    for (&d, &mu) in data.iter().zip(expected.iter()) {
        if !(d.is_finite() && d >= 0.0) {
            return Err(ScanError::Evaluator(format!("invalid data count {d}")));
        }
        if !mu.is_finite() {
            return Err(ScanError::Evaluator(format!("non-finite expected count {mu}")));
        }
        let mu = mu.max(MIN_EXPECTED);
        llh += d * mu.ln() - mu - ln_gamma(d + 1.0);
    }
    Ok(llh)
}

/// Log-likelihood over the maps selected by `channel`.
pub fn channel_llh(reference: &Histogram, expected: &Histogram, channel: Channel) -> Result<f64> {
    let mut llh = 0.0;
    if channel.uses_tracks() {
        llh += poisson_llh(&reference.trck, &expected.trck)?;
    }
    if channel.uses_cascades() {
        llh += poisson_llh(&reference.cscd, &expected.cscd)?;
    }
    Ok(llh)
}

/// Penalty added to `-ln L` for a parameter at `value`.
pub fn prior_penalty(prior: &Prior, value: f64) -> f64 {
    match prior {
        Prior::Uniform => 0.0,
        Prior::Gaussian { fiducial, sigma } => {
            let pull = (value - fiducial) / sigma;
            0.5 * pull * pull
        }
    }
}
