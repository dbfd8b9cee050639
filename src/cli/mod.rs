//! Command-line parsing for the likelihood grid scanner.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! scan and fitting code. `app` turns the parsed arguments into a `ScanConfig`.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::Hierarchy;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "llhscan",
    version,
    about = "Profile-likelihood grid scan over atmospheric oscillation parameters"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan the grid, profiling out nuisance parameters at every point.
    Scan(ScanArgs),
    /// Summarize a result file: best point, lowest-llh points, optional profile plot.
    Summary(SummaryArgs),
}

/// Which hierarchy generates the reference dataset.
#[derive(Debug, Clone, Copy, Args)]
#[group(required = true, multiple = false)]
pub struct DataSelect {
    /// Build the reference dataset from the normal hierarchy.
    #[arg(long)]
    pub data_nh: bool,

    /// Build the reference dataset from the inverted hierarchy.
    #[arg(long)]
    pub data_ih: bool,
}

impl DataSelect {
    pub fn hierarchy(&self) -> Hierarchy {
        Hierarchy::from_normal(self.data_nh)
    }
}

/// Which hierarchy is assumed by the fit.
#[derive(Debug, Clone, Copy, Args)]
#[group(required = true, multiple = false)]
pub struct HypoSelect {
    /// Fit assuming the normal hierarchy.
    #[arg(long)]
    pub hypo_nh: bool,

    /// Fit assuming the inverted hierarchy.
    #[arg(long)]
    pub hypo_ih: bool,
}

impl HypoSelect {
    pub fn hierarchy(&self) -> Hierarchy {
        Hierarchy::from_normal(self.hypo_nh)
    }
}

/// Options for a scan.
#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    /// Template generation and systematics settings (JSON).
    #[arg(short = 't', long, alias = "template_settings", value_name = "JSONFILE")]
    pub template_settings: PathBuf,

    /// Nested fit (minimizer) settings (JSON).
    #[arg(short = 'm', long, alias = "minimizer_settings", value_name = "JSONFILE")]
    pub minimizer_settings: PathBuf,

    /// Scan grid settings (JSON): which parameters to step and how.
    #[arg(short = 'g', long, alias = "grid_settings", value_name = "JSONFILE")]
    pub grid_settings: PathBuf,

    #[command(flatten)]
    pub data: DataSelect,

    #[command(flatten)]
    pub hypo: HypoSelect,

    /// Save every step the nested fits take.
    #[arg(short = 's', long)]
    pub save_steps: bool,

    /// Accelerator device id passed through to the template maker.
    #[arg(long, alias = "gpu_id", value_name = "ID")]
    pub device: Option<u32>,

    /// Output file.
    #[arg(short = 'o', long, default_value = "llh_data.json", value_name = "JSONFILE")]
    pub outfile: PathBuf,

    /// Worker threads (0 = all cores, 1 = sequential).
    #[arg(short = 'j', long, default_value_t = 0)]
    pub jobs: usize,

    /// Also export the scan table to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Use a Poisson-fluctuated pseudo-experiment (with this seed) instead of Asimov data.
    #[arg(long, value_name = "SEED")]
    pub fluctuate_seed: Option<u64>,
}

/// Options for summarizing a result file.
#[derive(Debug, Clone, Args)]
pub struct SummaryArgs {
    /// Result file written by `llhscan scan`.
    #[arg(short = 'i', long, default_value = "llh_data.json", value_name = "JSONFILE")]
    pub input: PathBuf,

    /// Show the N lowest-llh points per pairing.
    #[arg(long, default_value_t = 5)]
    pub top: usize,

    /// Plot the profile (min llh) against this scanned parameter.
    #[arg(long, value_name = "PARAM")]
    pub profile: Option<String>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}
