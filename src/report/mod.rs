//! Reporting utilities: point rankings, profiles, and formatted terminal output.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::scan::ScanResult;

pub mod format;

pub use format::*;

/// One successful scan point, for rankings.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPoint {
    pub index: usize,
    pub llh: f64,
    pub values: BTreeMap<String, f64>,
}

/// Minimum llh as a function of one scanned parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub param: String,
    /// `(value, min llh over all other scanned parameters)`, sorted by value.
    pub points: Vec<(f64, f64)>,
}

/// The `top_n` successful points with the lowest llh.
///
/// Ties keep enumeration order; failed points are skipped.
pub fn rank_points(result: &ScanResult, top_n: usize) -> Vec<RankedPoint> {
    let mut ok: Vec<(usize, f64)> = result
        .llh()
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|llh| (i, llh)))
        .collect();
    ok.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));

    ok.into_iter()
        .take(top_n)
        .map(|(index, llh)| RankedPoint {
            index,
            llh,
            values: result.point_values(index),
        })
        .collect()
}

/// Profile of the minimum llh against `param`.
///
/// Returns `None` if `param` is not scanned. Grid values where every point
/// failed are left out.
pub fn profile(result: &ScanResult, param: &str) -> Option<Profile> {
    let column = result.values(param)?;

    let mut points: Vec<(f64, f64)> = Vec::new();
    for (&x, llh) in column.iter().zip(result.llh()) {
        let Some(llh) = *llh else { continue };
        match points.iter_mut().find(|(v, _)| *v == x) {
            Some((_, best)) => *best = best.min(llh),
            None => points.push((x, llh)),
        }
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    Some(Profile {
        param: param.to_string(),
        points,
    })
}

/// Number of distinct values a scanned parameter took.
pub fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}
