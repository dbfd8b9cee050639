//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - parsed from the JSON settings documents
//! - copied per scan point (each evaluation gets its own snapshot)
//! - written back out for provenance

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::ParamSet;
use crate::error::{Result, ScanError};

/// One of the two discrete mass-ordering hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hierarchy {
    Normal,
    Inverted,
}

impl Hierarchy {
    pub fn from_normal(normal: bool) -> Self {
        if normal {
            Hierarchy::Normal
        } else {
            Hierarchy::Inverted
        }
    }

    /// Suffix used in template settings for hierarchy-dependent parameters.
    pub fn suffix(self) -> &'static str {
        match self {
            Hierarchy::Normal => "_nh",
            Hierarchy::Inverted => "_ih",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Hierarchy::Normal => "NH",
            Hierarchy::Inverted => "IH",
        }
    }

    /// Key of the data-hypothesis section in the result bundle.
    pub fn data_tag(self) -> String {
        format!("data_{}", self.short_name())
    }

    /// Key of the fit-hypothesis section in the result bundle.
    pub fn hypo_tag(self) -> String {
        format!("hypo_{}", self.short_name())
    }
}

/// Which detector channel(s) enter the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Trck,
    Cscd,
    #[default]
    All,
}

impl Channel {
    pub fn uses_tracks(self) -> bool {
        matches!(self, Channel::Trck | Channel::All)
    }

    pub fn uses_cascades(self) -> bool {
        matches!(self, Channel::Cscd | Channel::All)
    }
}

/// Spacing policy used when expanding a step count into grid values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    #[default]
    Linear,
    Log,
}

/// How a scanned parameter is stepped through its range.
///
/// JSON forms:
/// - `5` → five linearly spaced values
/// - `{"count": 5, "spacing": "log"}`
/// - `{"values": [0.4, 0.5, 0.6]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Count(usize),
    Values {
        values: Vec<f64>,
    },
    Spaced {
        count: usize,
        #[serde(default)]
        spacing: Spacing,
    },
}

/// Prior information attached to a parameter.
///
/// Only the objective evaluator looks at priors; the scan driver treats them as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Prior {
    Uniform,
    Gaussian { fiducial: f64, sigma: f64 },
}

/// Settings for a single model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub value: f64,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<Prior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<StepSpec>,
}

impl ParamSpec {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            fixed: false,
            range: None,
            prior: None,
            steps: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_steps(mut self, steps: StepSpec) -> Self {
        self.steps = Some(steps);
        self
    }

    /// True when the optimizer is allowed to move this parameter.
    ///
    /// A free parameter whose range collapses to a point has nothing to explore
    /// and is treated like a fixed one.
    pub fn is_floating(&self) -> bool {
        !self.fixed && matches!(self.range, Some((lo, hi)) if hi > lo)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.value.is_finite() {
            return Err(ScanError::Config(format!("non-finite value {}", self.value)));
        }
        if let Some((min, max)) = self.range {
            if !(min.is_finite() && max.is_finite()) {
                return Err(ScanError::Config(format!("non-finite range [{min}, {max}]")));
            }
            if min > max {
                return Err(ScanError::InvalidRange { min, max });
            }
        } else if !self.fixed {
            return Err(ScanError::Config("free parameter has no range".to_string()));
        }
        if let Some(Prior::Gaussian { fiducial, sigma }) = &self.prior {
            if !(fiducial.is_finite() && sigma.is_finite() && *sigma > 0.0) {
                return Err(ScanError::Config(format!(
                    "invalid gaussian prior (fiducial={fiducial}, sigma={sigma})"
                )));
            }
        }
        Ok(())
    }
}

/// Analysis binning (bin edges).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    /// Energy bin edges in GeV.
    pub ebins: Vec<f64>,
    /// Cosine-zenith bin edges.
    pub czbins: Vec<f64>,
}

/// Template (forward model) settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    pub params: ParamSet,
    pub binning: Binning,
    #[serde(default)]
    pub channel: Channel,
    /// Opaque accelerator selection threaded through to the forward model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<u32>,
}

/// Which minimizer backend performs the nested nuisance fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MinimizerMethod {
    #[default]
    Lbfgs,
    NelderMead,
}

/// Minimizer settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerSettings {
    pub method: MinimizerMethod,
    pub max_iter: u64,
    /// Gradient tolerance (L-BFGS) or simplex cost spread tolerance (Nelder-Mead).
    pub tol: f64,
    /// L-BFGS history length.
    pub m: usize,
    /// Finite-difference step in unit coordinates.
    pub grad_eps: f64,
    /// Initial simplex edge length in unit coordinates.
    pub simplex_step: f64,
    /// Treat a fit that stops without converging as a failed point.
    pub require_convergence: bool,
    /// Wall-clock budget for the nested fit at one scan point.
    pub point_timeout_s: Option<f64>,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            method: MinimizerMethod::Lbfgs,
            max_iter: 500,
            tol: 1e-6,
            m: 10,
            grad_eps: 1e-6,
            simplex_step: 0.05,
            require_convergence: true,
            point_timeout_s: None,
        }
    }
}

impl MinimizerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(ScanError::Config("max_iter must be >= 1".to_string()));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(ScanError::Config(format!("invalid tol {}", self.tol)));
        }
        if self.m == 0 {
            return Err(ScanError::Config("L-BFGS history m must be >= 1".to_string()));
        }
        if !(self.grad_eps.is_finite() && self.grad_eps > 0.0 && self.grad_eps < 0.5) {
            return Err(ScanError::Config(format!("invalid grad_eps {}", self.grad_eps)));
        }
        if !(self.simplex_step.is_finite() && self.simplex_step > 0.0 && self.simplex_step <= 1.0) {
            return Err(ScanError::Config(format!(
                "invalid simplex_step {}",
                self.simplex_step
            )));
        }
        if let Some(t) = self.point_timeout_s {
            if !(t.is_finite() && t > 0.0) {
                return Err(ScanError::Config(format!("invalid point_timeout_s {t}")));
            }
        }
        Ok(())
    }
}

/// Grid (stepping) settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSettings {
    /// Scanned parameter name → stepping specification.
    pub steps: BTreeMap<String, StepSpec>,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub template_settings: PathBuf,
    pub minimizer_settings: PathBuf,
    pub grid_settings: PathBuf,
    pub data_hierarchy: Hierarchy,
    pub hypo_hierarchy: Hierarchy,
    /// Keep every objective evaluation of the nested fits.
    pub save_steps: bool,
    pub device: Option<u32>,
    pub outfile: PathBuf,
    /// Worker count: 0 = all cores, 1 = sequential.
    pub jobs: usize,
    pub export_csv: Option<PathBuf>,
    /// Poisson-fluctuate the reference dataset with this seed.
    pub fluctuate_seed: Option<u64>,
}
