//! Logging setup for the binary.
//!
//! `RUST_LOG` wins when set. Otherwise the `-v` count picks the level:
//! 0 = warn, 1 = info, 2 = debug, 3+ = trace. Optimizer timings are logged
//! under the `llh_scan::timing` target and can be enabled on their own, e.g.
//! `RUST_LOG=warn,llh_scan::timing=debug`.

use tracing_subscriber::{EnvFilter, fmt};

/// Default filter directive for a given verbosity.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr.
///
/// Calling this more than once keeps the first subscriber.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
