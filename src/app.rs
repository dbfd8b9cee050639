//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - initializes logging
//! - runs the scan pipeline or summarizes an existing result file
//! - prints reports/plots

use clap::Parser;
use tracing::info;

use crate::cli::{Command, ScanArgs, SummaryArgs};
use crate::domain::ScanConfig;
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `llhscan` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // `llhscan -t ... --data-nh ...` behaves like `llhscan scan -t ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);
    crate::logging::init_logging(cli.verbose);

    match cli.command {
        Command::Scan(args) => handle_scan(&args),
        Command::Summary(args) => handle_summary(&args),
    }
}

fn handle_scan(args: &ScanArgs) -> Result<(), AppError> {
    let config = scan_config_from_args(args);
    let run = pipeline::run_scan(&config)?;
    info!("finished in {:.1}s", run.elapsed_s);

    println!(
        "{}",
        crate::report::format_run_line(&run.data_tag, &run.hypo_tag, &config.outfile, run.elapsed_s)
    );
    if let Some(result) = run.bundle.get(&run.data_tag, &run.hypo_tag) {
        println!(
            "{}",
            crate::report::format_scan_summary(&run.data_tag, &run.hypo_tag, result, 0)
        );
    }
    Ok(())
}

fn handle_summary(args: &SummaryArgs) -> Result<(), AppError> {
    let bundle = crate::io::read_bundle(&args.input)?;
    if bundle.results.is_empty() {
        return Err(AppError::new(
            2,
            format!("No scan results in '{}'.", args.input.display()),
        ));
    }

    for (data_tag, hypo_tag, result) in bundle.pairings() {
        println!(
            "{}",
            crate::report::format_scan_summary(data_tag, hypo_tag, result, args.top)
        );

        if let Some(name) = &args.profile {
            let profile = crate::report::profile(result, name).ok_or_else(|| {
                AppError::new(
                    2,
                    format!("'{name}' is not a scanned parameter of {data_tag}/{hypo_tag}."),
                )
            })?;
            println!(
                "{}",
                crate::plot::render_profile_plot(&profile, args.width, args.height)
            );
        }
    }
    Ok(())
}

pub fn scan_config_from_args(args: &ScanArgs) -> ScanConfig {
    ScanConfig {
        template_settings: args.template_settings.clone(),
        minimizer_settings: args.minimizer_settings.clone(),
        grid_settings: args.grid_settings.clone(),
        data_hierarchy: args.data.hierarchy(),
        hypo_hierarchy: args.hypo.hierarchy(),
        save_steps: args.save_steps,
        device: args.device,
        outfile: args.outfile.clone(),
        jobs: args.jobs,
        export_csv: args.export_csv.clone(),
        fluctuate_seed: args.fluctuate_seed,
    }
}

/// Rewrite argv so flag-first invocations default to `llhscan scan`.
///
/// Rules:
/// - `llhscan`                          -> `llhscan scan`
/// - `llhscan -t T.json ...`            -> `llhscan scan -t T.json ...`
/// - `llhscan -v summary ...`           -> unchanged (verbosity flags are skipped)
/// - `llhscan --help/--version/-h`      -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    if argv.len() < 2 {
        argv.push("scan".to_string());
        return argv;
    }

    let is_verbosity = |a: &str| {
        a == "--verbose" || (a.len() > 1 && a.starts_with('-') && a[1..].chars().all(|c| c == 'v'))
    };
    let Some(first) = argv[1..].iter().position(|a| !is_verbosity(a)).map(|i| i + 1) else {
        argv.push("scan".to_string());
        return argv;
    };
    let arg = argv[first].as_str();

    let is_top_level_help_or_version = matches!(arg, "-h" | "--help" | "-V" | "--version" | "help");
    let is_subcommand = matches!(arg, "scan" | "summary");
    if is_top_level_help_or_version || is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "scan flags".
    if arg.starts_with('-') {
        argv.insert(first, "scan".to_string());
    }
    argv
}
