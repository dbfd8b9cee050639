//! Export scan results as a flat CSV table.
//!
//! One row per scan point and pairing, meant for spreadsheets or quick plotting
//! scripts. Failed points have an empty `llh` and fitted columns.

use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::io::output::write_atomically;
use crate::scan::{PointStatus, ScanBundle, ScanResult};

/// Write every (data, hypo) pairing of `bundle` into one CSV file.
pub fn write_results_csv(path: &Path, bundle: &ScanBundle) -> Result<()> {
    write_atomically(path, "export CSV", |out| write_table(out, bundle))
}

fn write_table<W: Write>(out: &mut W, bundle: &ScanBundle) -> std::io::Result<()> {
    let mut header_written = false;
    for (data_tag, hypo_tag, result) in bundle.pairings() {
        let scanned: Vec<&String> = result.scanned_names().collect();
        let nuisance: Vec<&String> = result.nuisance_names().collect();

        if !header_written {
            write!(out, "data,hypo,index")?;
            for name in &scanned {
                write!(out, ",{name}")?;
            }
            write!(out, ",llh,status")?;
            for name in &nuisance {
                write!(out, ",fit_{name}")?;
            }
            writeln!(out)?;
            header_written = true;
        }

        for i in 0..result.len() {
            write_row(out, data_tag, hypo_tag, result, i, &scanned, &nuisance)?;
        }
    }
    Ok(())
}

fn write_row<W: Write>(
    out: &mut W,
    data_tag: &str,
    hypo_tag: &str,
    result: &ScanResult,
    i: usize,
    scanned: &[&String],
    nuisance: &[&String],
) -> std::io::Result<()> {
    write!(out, "{data_tag},{hypo_tag},{i}")?;
    for name in scanned {
        let v = result.values(name).and_then(|col| col.get(i)).copied();
        write!(out, ",{}", fmt_opt(v))?;
    }

    let llh = result.llh().get(i).copied().flatten();
    let status = match result.status().get(i) {
        Some(PointStatus::Ok) => "ok",
        Some(PointStatus::Failed { .. }) | None => "failed",
    };
    write!(out, ",{},{status}", fmt_opt(llh))?;

    for name in nuisance {
        let v = result.fitted(name).and_then(|col| col.get(i)).copied().flatten();
        write!(out, ",{}", fmt_opt(v))?;
    }
    writeln!(out)
}

/// Shortest representation that parses back to the same `f64`.
fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}
