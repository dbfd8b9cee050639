//! Expected event maps for a parameter assignment.
//!
//! `TemplateMaker` is the forward-model boundary used by the likelihood and
//! by the reference dataset builder. `OscillationTemplateMaker` is a small,
//! deterministic atmospheric-neutrino model: a power-law flux, an effective
//! area rising with energy, ν_μ disappearance from `math::oscillation`, and a
//! track/cascade split by an energy-dependent PID fraction.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Binning, Hierarchy, TemplateSettings};
use crate::error::{Result, ScanError};
use crate::math::{OscParams, baseline_km, survival_probability};

/// Flux normalization (events per GeV per unit cos-zenith per year at 1 GeV).
const FLUX_NORM: f64 = 2000.0;

/// Spectral index of the unoscillated atmospheric flux.
const SPECTRAL_INDEX: f64 = 2.7;

/// ν_e to ν_μ flux ratio; ν_e are treated as unoscillated and land in cascades.
const NUE_RATIO: f64 = 0.5;

/// Binned expected (or observed) counts for both event channels.
///
/// Maps are `ebins.len() - 1` rows (energy) by `czbins.len() - 1` columns
/// (cos-zenith).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub ebins: Vec<f64>,
    pub czbins: Vec<f64>,
    #[serde(with = "matrix_rows")]
    pub trck: DMatrix<f64>,
    #[serde(with = "matrix_rows")]
    pub cscd: DMatrix<f64>,
}

impl Histogram {
    /// Total count over both channels.
    pub fn total(&self) -> f64 {
        self.trck.sum() + self.cscd.sum()
    }
}

/// Produces expected event maps for a full set of parameter values.
pub trait TemplateMaker: Sync {
    fn expected(&self, values: &BTreeMap<String, f64>, hierarchy: Hierarchy) -> Result<Histogram>;
}

/// Toy atmospheric oscillation template maker.
#[derive(Debug, Clone)]
pub struct OscillationTemplateMaker {
    binning: Binning,
    device: Option<u32>,
}

impl OscillationTemplateMaker {
    pub fn new(settings: &TemplateSettings) -> Result<Self> {
        validate_binning(&settings.binning)?;
        match settings.device {
            Some(id) => debug!(device = id, "template maker bound to device"),
            None => debug!("template maker running on host"),
        }
        Ok(Self {
            binning: settings.binning.clone(),
            device: settings.device,
        })
    }

    pub fn device(&self) -> Option<u32> {
        self.device
    }
}

fn validate_binning(binning: &Binning) -> Result<()> {
    let strictly_increasing = |edges: &[f64]| edges.windows(2).all(|w| w[0] < w[1]);

    let e = &binning.ebins;
    if e.len() < 2 || !strictly_increasing(e) || e.iter().any(|&x| !(x.is_finite() && x > 0.0)) {
        return Err(ScanError::Config(format!(
            "energy bin edges must be positive, finite and strictly increasing (got {e:?})"
        )));
    }
    let cz = &binning.czbins;
    if cz.len() < 2 || !strictly_increasing(cz) || cz.iter().any(|x| !(-1.0..=1.0).contains(x)) {
        return Err(ScanError::Config(format!(
            "cos-zenith bin edges must lie in [-1, 1] and be strictly increasing (got {cz:?})"
        )));
    }
    Ok(())
}

fn required(values: &BTreeMap<String, f64>, name: &str) -> Result<f64> {
    values
        .get(name)
        .copied()
        .ok_or_else(|| ScanError::Config(format!("template maker needs parameter '{name}'")))
}

fn optional(values: &BTreeMap<String, f64>, name: &str, default: f64) -> f64 {
    values.get(name).copied().unwrap_or(default)
}

/// Fraction of ν_μ CC events reconstructed as tracks.
fn track_fraction(energy_gev: f64) -> f64 {
    0.3 + 0.5 * energy_gev / (energy_gev + 15.0)
}

impl TemplateMaker for OscillationTemplateMaker {
    /// The mass ordering sets the sign of Δm²31; the parameter supplies its
    /// magnitude.
    fn expected(&self, values: &BTreeMap<String, f64>, hierarchy: Hierarchy) -> Result<Histogram> {
        let dm31 = required(values, "deltam31")?.abs();
        let osc = OscParams {
            theta23: required(values, "theta23")?,
            theta13: optional(values, "theta13", 0.15),
            deltam31: match hierarchy {
                Hierarchy::Normal => dm31,
                Hierarchy::Inverted => -dm31,
            },
        };
        let aeff_scale = optional(values, "aeff_scale", 1.0);
        let energy_scale = optional(values, "energy_scale", 1.0);
        let delta_index = optional(values, "atm_delta_index", 0.0);
        let livetime = optional(values, "livetime", 1.0);

        if !(energy_scale > 0.0) {
            return Err(ScanError::Evaluator(format!(
                "energy_scale must be positive (got {energy_scale})"
            )));
        }

        let ebins = &self.binning.ebins;
        let czbins = &self.binning.czbins;
        let (ne, ncz) = (ebins.len() - 1, czbins.len() - 1);
        let mut trck = DMatrix::zeros(ne, ncz);
        let mut cscd = DMatrix::zeros(ne, ncz);

        for i in 0..ne {
            let width_e = ebins[i + 1] - ebins[i];
            let energy = 0.5 * (ebins[i] + ebins[i + 1]) * energy_scale;
            let flux = FLUX_NORM * energy.powf(-(SPECTRAL_INDEX + delta_index));
            let aeff = aeff_scale * energy.powf(1.5);
            let pid = track_fraction(energy);

            for j in 0..ncz {
                let width_cz = czbins[j + 1] - czbins[j];
                let coszen = 0.5 * (czbins[j] + czbins[j + 1]);
                let horizon_boost = 1.0 + 0.2 * (1.0 - coszen.abs());

                let numu = flux * horizon_boost * aeff * width_e * width_cz * livetime;
                let survived = numu * survival_probability(energy, baseline_km(coszen), osc);

                trck[(i, j)] = pid * survived;
                cscd[(i, j)] = (1.0 - pid) * survived + NUE_RATIO * numu;
            }
        }

        Ok(Histogram {
            ebins: ebins.clone(),
            czbins: czbins.clone(),
            trck,
            cscd,
        })
    }
}

/// Serialize a matrix as nested row arrays.
mod matrix_rows {
    use nalgebra::DMatrix;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(m: &DMatrix<f64>, s: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<Vec<f64>> = m.row_iter().map(|r| r.iter().copied().collect()).collect();
        rows.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DMatrix<f64>, D::Error> {
        let rows = Vec::<Vec<f64>>::deserialize(d)?;
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != ncols) {
            return Err(D::Error::custom("matrix rows have different lengths"));
        }
        Ok(DMatrix::from_row_iterator(nrows, ncols, rows.into_iter().flatten()))
    }
}
