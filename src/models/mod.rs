//! Forward model and reference dataset.
//!
//! The scan only sees these through the `TemplateMaker` and `ReferenceBuilder`
//! traits, so the physics can be swapped without touching the driver.

pub mod asimov;
pub mod template;

pub use asimov::*;
pub use template::*;
