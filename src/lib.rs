//! `llh-scan` library crate.
//!
//! The binary (`llhscan`) is a thin wrapper around this library so that:
//!
//! - the scan core is testable without spawning processes
//! - the driver, evaluator and forward model can be reused independently
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod scan;
