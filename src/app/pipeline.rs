//! The scan pipeline shared by the CLI front-end and the end-to-end tests.
//!
//! settings -> template maker -> hierarchy selection -> reference dataset ->
//! grid scan -> result bundle -> output file (+ optional CSV)

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::domain::ScanConfig;
use crate::error::Result;
use crate::fit::LlhEvaluator;
use crate::io::{load_settings, write_bundle, write_results_csv};
use crate::models::{AsimovBuilder, OscillationTemplateMaker};
use crate::scan::{ScanBundle, ScanDriver, ScanOptions};

/// All outputs of a single `llhscan scan` run.
#[derive(Debug, Clone)]
pub struct ScanRun {
    pub bundle: ScanBundle,
    pub data_tag: String,
    pub hypo_tag: String,
    pub elapsed_s: f64,
}

/// Execute a scan and write its result bundle.
///
/// Nothing is written unless the whole scan completes, and a failed export
/// leaves no result bundle behind.
pub fn run_scan(config: &ScanConfig) -> Result<ScanRun> {
    let started = Instant::now();

    let settings = load_settings(
        &config.template_settings,
        &config.minimizer_settings,
        &config.grid_settings,
        config.device,
    )?;

    let t = Instant::now();
    let maker = OscillationTemplateMaker::new(&settings.template)?;
    debug!(
        target: "llh_scan::timing",
        elapsed_s = t.elapsed().as_secs_f64(),
        "template maker initialized"
    );

    let data_tag = config.data_hierarchy.data_tag();
    let hypo_tag = config.hypo_hierarchy.hypo_tag();
    info!("running with data: {data_tag} and hypo: {hypo_tag}");

    let params = &settings.template.params;
    let data_params = params.select_hierarchy(config.data_hierarchy)?;
    let mut hypo_params = params.select_hierarchy(config.hypo_hierarchy)?;
    hypo_params.apply_grid(&settings.grid)?;

    let evaluator = LlhEvaluator::new(
        &maker,
        settings.minimizer.clone(),
        settings.template.channel,
        config.save_steps,
    );
    let builder = AsimovBuilder::new(&maker).with_fluctuations(config.fluctuate_seed);
    let options = ScanOptions {
        jobs: config.jobs,
        keep_trajectories: config.save_steps,
    };

    let outcome = ScanDriver::new(&evaluator, options).run(
        &builder,
        &data_params,
        config.data_hierarchy,
        &hypo_params,
        config.hypo_hierarchy,
    )?;

    let bundle = ScanBundle::finalize(
        &settings.docs,
        &data_tag,
        &hypo_tag,
        outcome.reference,
        outcome.result,
    )?;

    // The CSV goes first: once the bundle is in place the run has succeeded.
    if let Some(path) = &config.export_csv {
        info!("exporting results table to {}", path.display());
        write_results_csv(path, &bundle)?;
    }
    info!("saving results to {}", config.outfile.display());
    if let Err(err) = write_bundle(&config.outfile, &bundle) {
        if let Some(path) = &config.export_csv {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("could not remove {} after failed save: {e}", path.display());
            }
        }
        return Err(err);
    }

    Ok(ScanRun {
        bundle,
        data_tag,
        hypo_tag,
        elapsed_s: started.elapsed().as_secs_f64(),
    })
}
