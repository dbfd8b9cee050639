//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the scan and fitting code stays clean and testable
//! - output changes are localized

use std::path::Path;

use crate::report::{distinct_count, rank_points};
use crate::scan::{PointStatus, ScanResult};

/// Failure reasons listed before the output is cut short.
const MAX_FAILURES_SHOWN: usize = 5;

/// One-line confirmation after a scan was written.
pub fn format_run_line(data_tag: &str, hypo_tag: &str, outfile: &Path, elapsed_s: f64) -> String {
    format!(
        "Saved {data_tag}/{hypo_tag} scan to {} ({elapsed_s:.1}s)",
        outfile.display()
    )
}

/// Summary of one (data, hypo) pairing: grid shape, failures, best point, and
/// the `top_n` lowest-llh points.
pub fn format_scan_summary(data_tag: &str, hypo_tag: &str, result: &ScanResult, top_n: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== {data_tag} / {hypo_tag} ===\n"));

    let scanned: Vec<&String> = result.scanned_names().collect();
    let nuisance: Vec<&String> = result.nuisance_names().collect();

    let shape: Vec<String> = scanned
        .iter()
        .map(|n| {
            let count = result.values(n).map(distinct_count).unwrap_or(0);
            format!("{n} ({count})")
        })
        .collect();
    out.push_str(&format!("Scanned: {}\n", shape.join(" x ")));
    if nuisance.is_empty() {
        out.push_str("Nuisance: none\n");
    } else {
        out.push_str(&format!(
            "Nuisance: {}\n",
            nuisance.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }
    out.push_str(&format!(
        "Points: {} | failed: {}\n",
        result.len(),
        result.failed_count()
    ));

    match result.best_index() {
        Some(best) => {
            let llh = result.llh()[best].unwrap_or(f64::NAN);
            out.push_str(&format!("Best: llh={llh:.4} at {}\n", fmt_point(result, best)));
            for name in &nuisance {
                if let Some(v) = result.fitted(name).and_then(|col| col[best]) {
                    out.push_str(&format!("  fitted {name} = {v:.6}\n"));
                }
            }
        }
        None => out.push_str("Best: n/a (no successful points)\n"),
    }

    if top_n > 0 {
        let ranked = rank_points(result, top_n);
        if !ranked.is_empty() {
            let best_llh = ranked[0].llh;
            out.push_str(&format!("\nLowest llh (top {}):\n", ranked.len()));
            out.push_str(&format!("{:>4} {:>6} {:>14} {:>10}", "#", "index", "llh", "delta"));
            for name in &scanned {
                out.push_str(&format!(" {:>12}", truncate(name, 12)));
            }
            out.push('\n');
            for (rank, p) in ranked.iter().enumerate() {
                out.push_str(&format!(
                    "{:>4} {:>6} {:>14.4} {:>10.4}",
                    rank + 1,
                    p.index,
                    p.llh,
                    p.llh - best_llh
                ));
                for name in &scanned {
                    let v = p.values.get(name.as_str()).copied().unwrap_or(f64::NAN);
                    out.push_str(&format!(" {v:>12.6}"));
                }
                out.push('\n');
            }
        }
    }

    let failures: Vec<(usize, &str)> = result
        .status()
        .iter()
        .enumerate()
        .filter_map(|(i, s)| match s {
            PointStatus::Failed { reason } => Some((i, reason.as_str())),
            PointStatus::Ok => None,
        })
        .collect();
    if !failures.is_empty() {
        out.push_str("\nFailed points:\n");
        for (i, reason) in failures.iter().take(MAX_FAILURES_SHOWN) {
            out.push_str(&format!("  [{i}] {}: {reason}\n", fmt_point(result, *i)));
        }
        if failures.len() > MAX_FAILURES_SHOWN {
            out.push_str(&format!(
                "  ... and {} more\n",
                failures.len() - MAX_FAILURES_SHOWN
            ));
        }
    }

    out
}

fn fmt_point(result: &ScanResult, index: usize) -> String {
    result
        .point_values(index)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max - 1).chain(std::iter::once('~')).collect()
}
