//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - parameter settings (`ParamSpec`, `ParamSet`, `Prior`, `StepSpec`)
//! - the three settings documents (`TemplateSettings`, `MinimizerSettings`, `GridSettings`)
//! - run configuration (`ScanConfig`, `Hierarchy`, `Channel`)

pub mod params;
pub mod types;

pub use params::*;
pub use types::*;
