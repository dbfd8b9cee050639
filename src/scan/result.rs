//! Scan result accumulation and the serialized result bundle.
//!
//! `ScanResult` stores one row per scan point as parallel arrays: each scanned
//! parameter name maps to the values it took, `llh` holds the achieved
//! objective, `status` says whether the point succeeded, and `fitted` holds the
//! nuisance best-fit values. All arrays always have the same length; failed
//! points are recorded with `null` entries, never with made-up numbers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ScanError};
use crate::fit::Evaluation;
use crate::io::settings::SettingsDocs;
use crate::models::Histogram;
use crate::scan::grid::ScanPoint;

/// Keys used by `ScanResult` itself; scanned parameters may not use them.
pub const RESERVED_KEYS: [&str; 4] = ["llh", "status", "fitted", "trajectories"];

/// Outcome marker for one scan point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PointStatus {
    Ok,
    Failed { reason: String },
}

impl PointStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, PointStatus::Ok)
    }
}

/// Per-evaluation history of one nested fit (kept with `--save-steps`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub llh: Vec<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(flatten)]
    values: BTreeMap<String, Vec<f64>>,
    llh: Vec<Option<f64>>,
    status: Vec<PointStatus>,
    fitted: BTreeMap<String, Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trajectories: Option<Vec<Option<Trajectory>>>,
}

impl ScanResult {
    /// Empty accumulator for the given scanned and nuisance parameter names.
    pub fn new(scanned: &[String], nuisance: &[String], keep_trajectories: bool) -> Self {
        Self {
            values: scanned.iter().map(|n| (n.clone(), Vec::new())).collect(),
            llh: Vec::new(),
            status: Vec::new(),
            fitted: nuisance.iter().map(|n| (n.clone(), Vec::new())).collect(),
            trajectories: keep_trajectories.then(Vec::new),
        }
    }

    /// Append one row.
    ///
    /// The point must carry exactly the scanned names this result was created
    /// with; otherwise nothing is appended.
    pub fn record(
        &mut self,
        point: &ScanPoint,
        outcome: &std::result::Result<Evaluation, ScanError>,
    ) -> Result<()> {
        let layout_matches = point.values.len() == self.values.len()
            && point.values.keys().all(|k| self.values.contains_key(k));
        if !layout_matches {
            return Err(ScanError::Config(format!(
                "scan point {} does not match the result layout",
                point.index
            )));
        }

        for (name, value) in &point.values {
            if let Some(column) = self.values.get_mut(name) {
                column.push(*value);
            }
        }

        match outcome {
            Ok(eval) => {
                self.llh.push(eval.final_llh());
                self.status.push(PointStatus::Ok);
                for (name, column) in self.fitted.iter_mut() {
                    column.push(eval.fitted.get(name).copied());
                }
                if let Some(trajectories) = self.trajectories.as_mut() {
                    trajectories.push(Some(Trajectory {
                        llh: eval.llh_trajectory.clone(),
                        params: eval.param_trajectory.clone().unwrap_or_default(),
                    }));
                }
            }
            Err(err) => {
                self.llh.push(None);
                self.status.push(PointStatus::Failed {
                    reason: err.to_string(),
                });
                for column in self.fitted.values_mut() {
                    column.push(None);
                }
                if let Some(trajectories) = self.trajectories.as_mut() {
                    trajectories.push(None);
                }
            }
        }
        Ok(())
    }

    /// Number of recorded points.
    pub fn len(&self) -> usize {
        self.llh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.llh.is_empty()
    }

    /// Scanned parameter names.
    pub fn scanned_names(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Nuisance parameter names.
    pub fn nuisance_names(&self) -> impl Iterator<Item = &String> {
        self.fitted.keys()
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn llh(&self) -> &[Option<f64>] {
        &self.llh
    }

    pub fn status(&self) -> &[PointStatus] {
        &self.status
    }

    pub fn fitted(&self, name: &str) -> Option<&[Option<f64>]> {
        self.fitted.get(name).map(Vec::as_slice)
    }

    pub fn trajectories(&self) -> Option<&[Option<Trajectory>]> {
        self.trajectories.as_deref()
    }

    pub fn failed_count(&self) -> usize {
        self.status.iter().filter(|s| !s.is_ok()).count()
    }

    /// True when every column has one entry per recorded point.
    pub fn is_consistent(&self) -> bool {
        let n = self.llh.len();
        self.status.len() == n
            && self.values.values().all(|v| v.len() == n)
            && self.fitted.values().all(|v| v.len() == n)
            && self.trajectories.as_ref().is_none_or(|t| t.len() == n)
    }

    /// Index of the successful point with the lowest objective.
    ///
    /// Ties resolve to the earliest point.
    pub fn best_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, llh) in self.llh.iter().enumerate() {
            let Some(v) = *llh else { continue };
            if best.is_none_or(|(_, b)| v < b) {
                best = Some((i, v));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Scanned values of the point at `index`.
    pub fn point_values(&self, index: usize) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.get(index).map(|x| (k.clone(), *x)))
            .collect()
    }
}

/// The reference dataset and all fit-hypothesis scans run against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    pub asimov_data: Histogram,
    pub hypos: BTreeMap<String, ScanResult>,
}

/// Everything written to the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanBundle {
    pub tool: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub template_settings: Value,
    pub minimizer_settings: Value,
    pub grid_settings: Value,
    /// Keyed by data tag (`data_NH`), then hypothesis tag (`hypo_IH`).
    pub results: BTreeMap<String, DataSection>,
}

impl ScanBundle {
    /// Empty bundle carrying the settings documents for provenance.
    pub fn new(settings: &SettingsDocs) -> Self {
        Self {
            tool: "llhscan".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            template_settings: settings.template.clone(),
            minimizer_settings: settings.minimizer.clone(),
            grid_settings: settings.grid.clone(),
            results: BTreeMap::new(),
        }
    }

    /// Bundle a single finished scan.
    pub fn finalize(
        settings: &SettingsDocs,
        data_tag: &str,
        hypo_tag: &str,
        reference: Histogram,
        result: ScanResult,
    ) -> Result<Self> {
        let mut bundle = Self::new(settings);
        bundle.insert(data_tag, hypo_tag, reference, result)?;
        Ok(bundle)
    }

    /// Add the scan for one (data, hypo) pairing.
    ///
    /// Pairings are never overwritten. A data tag that already exists must come
    /// with the same reference dataset.
    pub fn insert(
        &mut self,
        data_tag: &str,
        hypo_tag: &str,
        reference: Histogram,
        result: ScanResult,
    ) -> Result<()> {
        if !result.is_consistent() {
            return Err(ScanError::Config(format!(
                "result for {data_tag}/{hypo_tag} has ragged columns"
            )));
        }

        let section = self
            .results
            .entry(data_tag.to_string())
            .or_insert_with(|| DataSection {
                asimov_data: reference.clone(),
                hypos: BTreeMap::new(),
            });
        if section.asimov_data != reference {
            return Err(ScanError::Config(format!(
                "{data_tag} already holds a different reference dataset"
            )));
        }
        if section.hypos.contains_key(hypo_tag) {
            return Err(ScanError::Config(format!(
                "results for {data_tag}/{hypo_tag} already exist"
            )));
        }
        section.hypos.insert(hypo_tag.to_string(), result);
        Ok(())
    }

    pub fn get(&self, data_tag: &str, hypo_tag: &str) -> Option<&ScanResult> {
        self.results.get(data_tag)?.hypos.get(hypo_tag)
    }

    /// All `(data_tag, hypo_tag, result)` triples in key order.
    pub fn pairings(&self) -> impl Iterator<Item = (&str, &str, &ScanResult)> {
        self.results.iter().flat_map(|(d, section)| {
            section
                .hypos
                .iter()
                .map(move |(h, r)| (d.as_str(), h.as_str(), r))
        })
    }
}
